use super::{
    BULK_MAX_PACKET_SIZE, DeviceState, EP1_IN, EP2_OUT, EndpointController, EndpointError, EndpointState, Flags,
    Handler, Interrupts, SetupRequest, State, StringCursor, TransferStatus,
};
use crate::{
    configuration::{CONTROL_BUFFER_CAPACITY, UsbConfig},
    descriptors::Descriptors,
};

/// Bank of the bulk IN endpoint.
pub(super) const BULK_IN_BANK: u8 = EP1_IN & 0x0F;
/// Bank of the bulk OUT endpoint.
pub(super) const BULK_OUT_BANK: u8 = EP2_OUT & 0x0F;

/// Where the data of a control IN transfer comes from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(super) enum Source {
    Static(&'static [u8]),
    Buffer,
}

/// A USB MIDI device: the control endpoint engine plus one bulk endpoint in each direction.
///
/// All entry points must be called with the device locked against the USB interrupt (see
/// [`Shared`][crate::handoff::Shared]).
pub struct UsbDevice<C> {
    pub(super) controller: C,
    pub(super) config: UsbConfig,
    pub(super) descriptors: &'static Descriptors,
    pub(super) state: DeviceState,
    pub(super) saved_state: DeviceState,
    pub(super) configuration: u8,
    pub(super) remote_wakeup_armed: bool,
    pub(super) setup: SetupRequest,
    pub(super) ep0: EndpointState,
    pub(super) ep0_source: Source,
    pub(super) ep0_string: StringCursor,
    pub(super) ep0_buffer: [u8; CONTROL_BUFFER_CAPACITY],
    pub(super) ep1_in: EndpointState,
    ep1_buffer: [u8; BULK_MAX_PACKET_SIZE],
    pub(super) ep2_out: EndpointState,
    ep2_buffer: [u8; BULK_MAX_PACKET_SIZE],
    ep2_received: Option<usize>,
}

impl<C: EndpointController> UsbDevice<C> {
    /// Creates a device which has not seen a bus reset yet.
    pub const fn new(controller: C, config: UsbConfig, descriptors: &'static Descriptors) -> Self {
        Self {
            controller,
            config,
            descriptors,
            state: DeviceState::Attached,
            saved_state: DeviceState::Attached,
            configuration: 0,
            remote_wakeup_armed: false,
            setup: SetupRequest {
                request_type: 0,
                request: 0,
                value: 0,
                index: 0,
                length: 0,
            },
            ep0: EndpointState::idle(),
            ep0_source: Source::Buffer,
            ep0_string: StringCursor {
                encoding: super::Encoding::Utf16Le,
                initial_header_sent: false,
            },
            ep0_buffer: [0; CONTROL_BUFFER_CAPACITY],
            ep1_in: EndpointState::halted(),
            ep1_buffer: [0; BULK_MAX_PACKET_SIZE],
            ep2_out: EndpointState::halted(),
            ep2_buffer: [0; BULK_MAX_PACKET_SIZE],
            ep2_received: None,
        }
    }

    /// The device's place in its lifecycle.
    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// The hardware the device runs on.
    pub fn controller(&mut self) -> &mut C {
        &mut self.controller
    }

    /// Bytes received by the last control OUT data stage.
    pub fn control_data(&self) -> &[u8] {
        &self.ep0_buffer[..self.ep0.transferred().min(CONTROL_BUFFER_CAPACITY)]
    }

    /// Services every pending interrupt source. Called from the USB interrupt, or from the poll loop when
    /// [`UsbConfig::polling_mode`] is set.
    pub fn on_interrupt<H: Handler>(&mut self, handler: &mut H) {
        let mut pending = self.controller.interrupts();
        if self.config.polling_mode && pending.is_none() {
            return;
        }

        let index = self.controller.index();

        if pending.contains(Interrupts::StartOfFrame) {
            // packets which could not be serviced when they arrived get another chance every frame
            let ep0 = &self.ep0;
            if (ep0.flags.contains(Flags::OutPacketPending) && ep0.state == State::Receiving)
                || (ep0.flags.contains(Flags::InPacketPending) && ep0.state == State::Transmitting)
            {
                pending |= Interrupts::Ep0;
            }
            if self.ep2_out.flags.contains(Flags::OutPacketPending) && self.ep2_out.state == State::Receiving {
                pending |= Interrupts::BulkOut;
            }
        }

        if pending.contains(Interrupts::Reset) {
            self.on_reset(handler);
        }
        if pending.contains(Interrupts::Resume) {
            self.on_resume(handler);
        }
        if pending.contains(Interrupts::Suspend) {
            self.on_suspend(handler);
        }
        if pending.contains(Interrupts::BulkIn) {
            self.on_bulk_in(handler);
        }
        if pending.contains(Interrupts::BulkOut) {
            self.on_bulk_out(handler);
        }
        if pending.contains(Interrupts::Ep0) {
            self.on_control_interrupt(handler);
        }

        self.controller.select(index);
    }

    pub(super) fn set_state<H: Handler>(&mut self, new: DeviceState, handler: &mut H) {
        let old = self.state;
        if old == new {
            return;
        }
        if new == DeviceState::Suspended {
            self.saved_state = old;
        }
        self.state = new;

        #[cfg(feature = "defmt")]
        defmt::debug!("USB device state {} -> {}", old, new);
        if self.config.enable_state_change_callback {
            handler.state_changed(old, new);
        }
    }

    fn on_reset<H: Handler>(&mut self, handler: &mut H) {
        self.ep0.reset(State::Idle);
        self.ep0_string = StringCursor::default();
        self.ep1_in.reset(State::Halted);
        self.ep2_out.reset(State::Halted);
        self.ep2_received = None;
        self.configuration = 0;
        self.remote_wakeup_armed = false;

        // a bus-powered device is in the Default state whenever it sees a reset
        self.set_state(DeviceState::Default, handler);
    }

    fn on_suspend<H: Handler>(&mut self, handler: &mut H) {
        if self.state >= DeviceState::Powered && self.state != DeviceState::Suspended {
            self.set_state(DeviceState::Suspended, handler);
        }
    }

    fn on_resume<H: Handler>(&mut self, handler: &mut H) {
        if self.state == DeviceState::Suspended {
            self.set_state(self.saved_state, handler);
        }
    }

    /// Leaves the configured state: the bulk endpoints are halted and anything in flight is dropped.
    pub(super) fn deconfigure(&mut self) {
        self.controller.enable_endpoints(false);
        self.ep1_in.reset(State::Halted);
        self.ep2_out.reset(State::Halted);
        self.ep2_received = None;
        self.configuration = 0;
    }

    /// Enters the configured state with idle bulk endpoints.
    pub(super) fn configure(&mut self, value: u8) {
        self.controller.enable_endpoints(true);
        self.ep1_in.reset(State::Idle);
        self.ep2_out.reset(State::Idle);
        self.configuration = value;
    }

    /// Whether a transfer is in progress on `endpoint`, or the endpoint cannot take one.
    pub fn is_busy(&self, endpoint: u8) -> bool {
        match endpoint {
            EP1_IN => self.ep1_in.state != State::Idle,
            EP2_OUT => self.ep2_out.state != State::Idle,
            _ => self.ep0.state != State::Idle,
        }
    }

    /// Sends `data` on the bulk IN endpoint. The data is copied, so the caller's buffer is free once this returns.
    pub fn write(&mut self, endpoint: u8, data: &[u8], notify: bool) -> Result<(), EndpointError> {
        if endpoint != EP1_IN {
            return Err(EndpointError::InvalidEndpoint);
        }
        match self.ep1_in.state {
            State::Idle => {}
            State::Halted | State::Stalled => return Err(EndpointError::Halted),
            State::Receiving | State::Transmitting => return Err(EndpointError::Busy),
        }
        let Some(slot) = self.ep1_buffer.get_mut(..data.len()) else {
            return Err(EndpointError::Overflow);
        };
        slot.copy_from_slice(data);
        self.ep1_in.begin(State::Transmitting, data.len(), notify);

        let index = self.controller.index();
        self.controller.select(BULK_IN_BANK);
        if self.controller.in_busy() {
            self.ep1_in.flags |= Flags::InPacketPending;
        } else {
            self.send_bulk_packet();
        }
        self.controller.select(index);
        Ok(())
    }

    fn send_bulk_packet(&mut self) {
        let ep = &mut self.ep1_in;
        let count = ep.remaining.min(BULK_MAX_PACKET_SIZE);
        self.controller.write_fifo(&self.ep1_buffer[ep.cursor..ep.cursor + count]);
        self.controller.in_ready();
        ep.cursor += count;
        ep.remaining -= count;
        ep.flags &= !Flags::InPacketPending;
    }

    fn on_bulk_in<H: Handler>(&mut self, handler: &mut H) {
        if self.ep1_in.state != State::Transmitting {
            return;
        }
        self.controller.select(BULK_IN_BANK);
        if self.ep1_in.remaining > 0 || self.ep1_in.flags.contains(Flags::InPacketPending) {
            self.send_bulk_packet();
            return;
        }

        let transferred = self.ep1_in.transferred();
        let notify = self.ep1_in.flags.contains(Flags::NotifyOnComplete);
        self.ep1_in.reset(State::Idle);
        if notify && self.config.enable_transfer_callback {
            handler.transfer_complete(EP1_IN, TransferStatus::Ok, transferred, 0);
        }
    }

    /// Arms the bulk OUT endpoint for one packet. Until the packet has been taken with
    /// [`take_received`][UsbDevice::take_received] and the endpoint re-armed, the host is NAKed.
    pub fn read(&mut self, endpoint: u8, notify: bool) -> Result<(), EndpointError> {
        if endpoint != EP2_OUT {
            return Err(EndpointError::InvalidEndpoint);
        }
        match self.ep2_out.state {
            State::Idle => {}
            State::Halted | State::Stalled => return Err(EndpointError::Halted),
            State::Receiving | State::Transmitting => return Err(EndpointError::Busy),
        }
        if self.ep2_received.is_some() {
            return Err(EndpointError::Busy);
        }
        let pending = self.ep2_out.flags.contains(Flags::OutPacketPending);
        self.ep2_out.begin(State::Receiving, BULK_MAX_PACKET_SIZE, notify);
        if pending {
            self.ep2_out.flags |= Flags::OutPacketPending;
        }
        Ok(())
    }

    fn on_bulk_out<H: Handler>(&mut self, handler: &mut H) {
        if self.ep2_out.state != State::Receiving {
            // the hardware keeps the packet and NAKs until a read is issued
            self.ep2_out.flags |= Flags::OutPacketPending;
            return;
        }
        self.controller.select(BULK_OUT_BANK);
        let count = self.controller.out_count();
        let notify = self.ep2_out.flags.contains(Flags::NotifyOnComplete) && self.config.enable_transfer_callback;

        if count > self.ep2_out.remaining {
            self.ep2_out.state = State::Idle;
            self.ep2_out.flags |= Flags::OutPacketPending;
            if notify {
                handler.transfer_complete(EP2_OUT, TransferStatus::ReceiveBufferOverrun, count, self.ep2_out.remaining);
            }
            return;
        }

        self.controller.read_fifo(&mut self.ep2_buffer[..count]);
        self.controller.release_out();
        self.ep2_out.reset(State::Idle);
        self.ep2_received = Some(count);
        if notify {
            handler.transfer_complete(EP2_OUT, TransferStatus::Ok, count, 0);
        }
    }

    /// Hands over the packet received by the last read, if it has completed.
    pub fn take_received(&mut self) -> Option<&[u8]> {
        let count = self.ep2_received.take()?;
        Some(&self.ep2_buffer[..count])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        descriptors::MIDI2USB,
        usb::mock::{MockController, Recorder, configured, device},
    };

    #[test]
    fn reset_halts_bulk_endpoints() {
        let mut device = configured();
        assert_eq!(DeviceState::Configured, device.state());

        device.controller.pending |= Interrupts::Reset;
        device.on_interrupt(&mut ());

        assert_eq!(DeviceState::Default, device.state());
        assert_eq!(State::Idle, device.ep0.state);
        assert_eq!(State::Halted, device.ep1_in.state);
        assert_eq!(State::Halted, device.ep2_out.state);
        assert_eq!(Err(EndpointError::Halted), device.write(EP1_IN, &[0x09, 0x90, 60, 100], false));
    }

    #[test]
    fn suspend_and_resume() {
        let mut device = configured();
        let mut recorder = Recorder::default();

        device.controller.pending |= Interrupts::Suspend;
        device.on_interrupt(&mut recorder);
        assert_eq!(DeviceState::Suspended, device.state());

        device.controller.pending |= Interrupts::Resume;
        device.on_interrupt(&mut recorder);
        assert_eq!(
            [
                (DeviceState::Configured, DeviceState::Suspended),
                (DeviceState::Suspended, DeviceState::Configured)
            ]
            .as_slice(),
            recorder.states.as_slice(),
            "Expected left but got right"
        );
    }

    #[test]
    fn suspend_before_power_is_ignored() {
        let mut device = device();
        device.controller.pending |= Interrupts::Suspend;
        device.on_interrupt(&mut ());
        assert_eq!(DeviceState::Attached, device.state());
    }

    #[test]
    fn state_change_callback_can_be_disabled() {
        let mut device = UsbDevice::new(
            MockController::default(),
            UsbConfig {
                enable_state_change_callback: false,
                ..UsbConfig::default()
            },
            &MIDI2USB,
        );
        let mut recorder = Recorder::default();
        device.controller.pending |= Interrupts::Reset;
        device.on_interrupt(&mut recorder);
        assert_eq!(DeviceState::Default, device.state());
        assert!(recorder.states.is_empty(), "No state change should be reported");
    }

    #[test]
    fn polling_mode_preserves_index_when_idle() {
        let mut device = UsbDevice::new(
            MockController::default(),
            UsbConfig {
                polling_mode: true,
                ..UsbConfig::default()
            },
            &MIDI2USB,
        );
        device.controller.index = 2;
        device.on_interrupt(&mut ());
        assert_eq!(2, device.controller.index);
    }

    #[test]
    fn bulk_write() {
        let mut device = configured();
        let mut recorder = Recorder::default();
        device.controller.index = 0;
        let packet = [0x09, 0x90, 60, 100];

        assert_eq!(Ok(()), device.write(EP1_IN, &packet, true));
        assert!(device.is_busy(EP1_IN));
        assert_eq!(Err(EndpointError::Busy), device.write(EP1_IN, &packet, true));
        assert_eq!(0, device.controller.index, "Selected bank should be restored");

        device.controller.bulk_in_collected();
        device.on_interrupt(&mut recorder);
        assert!(!device.is_busy(EP1_IN));
        assert_eq!([packet.to_vec()].as_slice(), device.controller.bulk_in.as_slice());
        assert_eq!([(EP1_IN, TransferStatus::Ok, 4, 0)].as_slice(), recorder.completions.as_slice());
    }

    #[test]
    fn bulk_write_rejects_oversized_data() {
        let mut device = configured();
        assert_eq!(Err(EndpointError::Overflow), device.write(EP1_IN, &[0; 65], false));
        assert_eq!(Err(EndpointError::InvalidEndpoint), device.write(EP2_OUT, &[0; 4], false));
    }

    #[test]
    fn bulk_read_holds_packets_until_armed() {
        let mut device = configured();
        let packet = [0x09, 0x90, 60, 100];

        // nothing armed: the packet stays in the hardware
        device.controller.bulk_out(&packet);
        device.on_interrupt(&mut ());
        assert_eq!(None, device.take_received());
        assert_eq!(0, device.controller.bulk_out_released);

        // arming picks it up on the next frame
        assert_eq!(Ok(()), device.read(EP2_OUT, false));
        device.controller.pending |= Interrupts::StartOfFrame;
        device.on_interrupt(&mut ());
        assert_eq!(Some(packet.as_slice()), device.take_received());
        assert_eq!(1, device.controller.bulk_out_released);
        assert!(!device.is_busy(EP2_OUT));
    }
}
