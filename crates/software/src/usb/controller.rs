use bitmask_enum::bitmask;

/// Interrupt sources of the USB peripheral which the device stack services.
#[bitmask(u8)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Interrupts {
    /// The host drove a bus reset.
    Reset,
    /// The bus went idle for 3 ms.
    Suspend,
    /// Bus activity resumed after a suspend.
    Resume,
    /// A start-of-frame token arrived.
    StartOfFrame,
    /// The control endpoint needs attention.
    Ep0,
    /// The bulk IN endpoint finished sending a packet.
    BulkIn,
    /// The bulk OUT endpoint holds a received packet.
    BulkOut,
}

/// Handshake conditions of the control endpoint.
#[bitmask(u8)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Ep0Status {
    /// A packet (setup or data) is waiting in the FIFO.
    OutPacketReady,
    /// The last IN packet has not been collected by the host yet.
    InPacketBusy,
    /// A STALL handshake went out.
    SentStall,
    /// The host aborted the control transfer by sending a new setup packet. Any IN packet still waiting for the
    /// host has been discarded.
    SetupEnd,
}

/// Register-level capabilities of a USB device peripheral.
///
/// The model is that of a banked controller: operations on "the selected endpoint" act on the bank chosen with
/// [`select`][EndpointController::select], where bank 0 is the control endpoint and bank `n` the bulk endpoint
/// with number `n`. Every FIFO holds at most one packet.
pub trait EndpointController {
    /// Returns and acknowledges the pending interrupt sources.
    fn interrupts(&mut self) -> Interrupts;

    /// The selected endpoint bank.
    fn index(&self) -> u8;

    /// Selects the endpoint bank subsequent calls act on.
    fn select(&mut self, index: u8);

    /// Handshake status of the control endpoint.
    fn ep0_status(&mut self) -> Ep0Status;

    /// Acknowledges [`Ep0Status::SentStall`].
    fn clear_sent_stall(&mut self);

    /// Acknowledges [`Ep0Status::SetupEnd`].
    fn serviced_setup_end(&mut self);

    /// Number of bytes in the selected endpoint's received packet.
    fn out_count(&mut self) -> usize;

    /// Copies `buf.len()` bytes out of the selected endpoint's receive FIFO.
    fn read_fifo(&mut self, buf: &mut [u8]);

    /// Appends `data` to the selected endpoint's transmit FIFO.
    fn write_fifo(&mut self, data: &[u8]);

    /// Releases the control endpoint's received packet. With `data_end` the control transfer ends after it.
    fn ep0_serviced_out(&mut self, data_end: bool);

    /// Hands the control endpoint's FIFO contents to the host. With `data_end` the control transfer ends after it.
    fn ep0_in_ready(&mut self, data_end: bool);

    /// Answers the current control transfer with STALL.
    fn ep0_stall(&mut self);

    /// Applies the address assigned by `SET_ADDRESS`.
    fn set_address(&mut self, address: u8);

    /// Enables or disables the bulk endpoints of the configuration.
    fn enable_endpoints(&mut self, enable: bool);

    /// Sets or clears the halt (STALL) condition of the selected bulk endpoint.
    fn set_halt(&mut self, halt: bool);

    /// Hands the selected bulk IN endpoint's FIFO contents to the host.
    fn in_ready(&mut self);

    /// Whether the selected bulk IN endpoint still holds a packet the host has not collected.
    fn in_busy(&mut self) -> bool;

    /// Releases the selected bulk OUT endpoint's packet, letting the host send the next one.
    fn release_out(&mut self);
}
