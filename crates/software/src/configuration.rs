//! This module contains the build-time options of the device, gathered into plain structs which are handed to the
//! components that honor them.

/// Capacity of the outbound (serial to USB) event buffer. One full-speed bulk packet.
pub const OUTBOUND_CAPACITY: usize = 64;

/// Capacity of the real-time priority queue, in messages.
pub const REALTIME_CAPACITY: usize = 8;

/// Capacity of the inbound (USB to serial) slot. One full-speed bulk packet.
pub const INBOUND_CAPACITY: usize = 64;

/// Capacity of the buffer which receives the data stage of control OUT transfers.
pub const CONTROL_BUFFER_CAPACITY: usize = 64;

/// Options of the USB device stack.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UsbConfig {
    /// Report finished transfers to [`Handler::transfer_complete`][crate::usb::Handler::transfer_complete].
    pub enable_transfer_callback: bool,
    /// Report device state changes to [`Handler::state_changed`][crate::usb::Handler::state_changed].
    pub enable_state_change_callback: bool,
    /// The interrupt handler is called from a poll loop rather than from the USB interrupt, so it must return
    /// early when there is nothing to do.
    pub polling_mode: bool,
    /// The device draws its power from the bus. Reported by `GET_STATUS`.
    pub bus_powered: bool,
    /// The host may arm the device for remote wakeup via `SET_FEATURE`.
    pub remote_wakeup: bool,
    /// Maximum packet size of the control endpoint.
    pub ep0_max_packet_size: u16,
}

impl UsbConfig {
    /// The configuration the device ships with.
    pub const fn new() -> Self {
        Self {
            enable_transfer_callback: true,
            enable_state_change_callback: true,
            polling_mode: false,
            bus_powered: true,
            remote_wakeup: false,
            ep0_max_packet_size: 64,
        }
    }
}

impl Default for UsbConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Options of the serial to USB translation.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MidiConfig {
    /// Accept data bytes which reuse the status of the previous channel message.
    ///
    /// Most keyboards omit repeated status bytes to save bandwidth on the 31250 baud link, so this is on by default.
    pub running_status: bool,
}

impl MidiConfig {
    /// The configuration the device ships with.
    pub const fn new() -> Self {
        Self {
            running_status: true,
        }
    }
}

impl Default for MidiConfig {
    fn default() -> Self {
        Self::new()
    }
}
