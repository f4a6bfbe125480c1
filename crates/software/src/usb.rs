mod control;
mod controller;
pub use controller::*;

mod device;
pub use device::*;

mod endpoint;
pub use endpoint::*;

#[cfg(test)]
pub(crate) mod mock;

mod setup;
pub use setup::*;

mod standard;

mod string;
pub use string::*;

/// Lifecycle of the device as seen by the host, in the order a device normally moves through it.
#[derive(Debug, Default, Clone, Copy, PartialEq, PartialOrd)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceState {
    /// Plugged in, not yet powered.
    #[default]
    Attached,
    /// Powered, no reset seen yet.
    Powered,
    /// Reset by the host, answering at address 0.
    Default,
    /// Assigned an address.
    Addressed,
    /// Configuration selected; the MIDI endpoints are live.
    Configured,
    /// The bus went idle. The state to return to on resume is kept aside.
    Suspended,
}

/// How a handler answered a setup request.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Response {
    /// Not recognized; the next handler in line gets a try and if none takes it the request is stalled.
    Unhandled,
    /// Recognized but invalid; the request is stalled.
    Reject,
    /// Accepted. A data stage, if any, is supplied later via [`UsbDevice::control_write`] or
    /// [`UsbDevice::control_read`]; until then the hardware NAKs.
    Accept,
    /// Accepted; send these bytes, truncated to `wLength`.
    Transmit(&'static [u8]),
    /// Accepted; send this string descriptor, truncated to `wLength`.
    TransmitString(StringDescriptor),
    /// Accepted; send the first `length` bytes of `data`.
    Reply {
        /// Reply payload.
        data: [u8; 2],
        /// Number of bytes of `data` to send.
        length: usize,
    },
    /// Accepted; receive the data stage into a buffer of this many bytes.
    Receive(usize),
}

/// Application hooks of the device stack.
///
/// All methods run in interrupt context and should return quickly.
pub trait Handler {
    /// Offered every setup request before the standard request handler sees it.
    fn setup(&mut self, _request: &SetupRequest) -> Response {
        Response::Unhandled
    }

    /// A transfer issued with notification enabled has ended.
    fn transfer_complete(
        &mut self,
        _endpoint: u8,
        _status: TransferStatus,
        _transferred: usize,
        _remaining: usize,
    ) {
    }

    /// The device moved from `old` to `new`.
    fn state_changed(&mut self, _old: DeviceState, _new: DeviceState) {}
}

/// A handler which relies entirely on the standard requests.
impl Handler for () {}
