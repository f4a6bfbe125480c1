//! The control endpoint engine.
//!
//! A control transfer is a setup packet, an optional data stage and a status handshake. The hardware generates
//! the handshake; the engine's job is to decide what the request means and to move the data stage in and out of
//! the FIFO one packet at a time.

use super::{
    Direction, EP0, Ep0Status, EndpointController, EndpointError, Flags, Handler, RequestKind, Response,
    SetupRequest, Source, State, StringCursor, TransferStatus, UsbDevice,
};
use crate::configuration::CONTROL_BUFFER_CAPACITY;

impl<C: EndpointController> UsbDevice<C> {
    /// Services the control endpoint.
    pub(super) fn on_control_interrupt<H: Handler>(&mut self, handler: &mut H) {
        self.controller.select(0);
        let status = self.controller.ep0_status();

        if status.intersects(Ep0Status::SentStall | Ep0Status::SetupEnd) {
            // the host gave up on the previous transfer; nothing of it may survive
            self.controller.clear_sent_stall();
            self.controller.serviced_setup_end();
            self.ep0.reset(State::Idle);
        }

        if status.contains(Ep0Status::OutPacketReady) {
            if self.ep0.flags.contains(Flags::WaitForRead) {
                self.ep0.flags |= Flags::OutPacketPending;
            } else if self.ep0.state == State::Idle {
                self.on_setup(handler);
            } else if self.ep0.state == State::Receiving {
                self.serve_control_out(handler);
            } else {
                self.ep0.flags |= Flags::OutPacketPending;
            }
        }

        if self.ep0.state == State::Transmitting
            && !self.controller.ep0_status().contains(Ep0Status::InPacketBusy)
        {
            self.serve_control_in(handler);
        }
    }

    fn on_setup<H: Handler>(&mut self, handler: &mut H) {
        self.ep0_string = StringCursor::default();

        let mut raw = [0_u8; 8];
        if self.controller.out_count() != raw.len() {
            self.stall();
            return;
        }
        self.controller.read_fifo(&mut raw);
        self.setup = SetupRequest::parse(&raw);
        let setup = self.setup;

        let mut response = handler.setup(&setup);
        if response == Response::Unhandled && setup.kind() == RequestKind::Standard {
            response = self.standard_request(handler);
        }

        // the handlers may have selected another bank
        self.controller.select(0);

        match response {
            Response::Unhandled | Response::Reject => {
                #[cfg(feature = "defmt")]
                defmt::debug!("Stalling setup request {}", setup);
                self.stall();
            }
            _ if setup.length == 0 => self.controller.ep0_serviced_out(true),
            response => {
                match response {
                    Response::Transmit(data) => self.begin_in(Source::Static(data), data.len(), StringCursor::default()),
                    Response::TransmitString(string) => self.begin_in(
                        Source::Static(string.data),
                        string.wire_length(),
                        StringCursor::new(string.encoding),
                    ),
                    Response::Reply { data, length } => {
                        let length = length.min(data.len());
                        self.ep0_buffer[..length].copy_from_slice(&data[..length]);
                        self.begin_in(Source::Buffer, length, StringCursor::default());
                    }
                    Response::Receive(capacity) => self.begin_out(capacity),
                    _ => {}
                }
                self.controller.ep0_serviced_out(false);

                // a data stage is coming but nobody is ready for it: NAK until a buffer is registered
                if setup.direction() == Direction::Out && self.ep0.state != State::Receiving {
                    self.ep0.flags |= Flags::WaitForRead;
                }
            }
        }
    }

    fn begin_in(&mut self, source: Source, length: usize, string: StringCursor) {
        let length = length.min(usize::from(self.setup.length));
        self.ep0_source = source;
        self.ep0_string = string;
        self.ep0
            .begin(State::Transmitting, length, self.config.enable_transfer_callback);
    }

    fn begin_out(&mut self, capacity: usize) {
        // the data stage never carries more than the host announced
        let length = capacity
            .min(CONTROL_BUFFER_CAPACITY)
            .min(usize::from(self.setup.length));
        self.ep0
            .begin(State::Receiving, length, self.config.enable_transfer_callback);
    }

    /// Answers the current control transfer with STALL.
    pub(super) fn stall(&mut self) {
        self.controller.select(0);
        self.ep0.state = State::Stalled;
        self.controller.ep0_stall();
    }

    /// Sends one packet of the data stage of a control IN transfer.
    pub(super) fn serve_control_in<H: Handler>(&mut self, handler: &mut H) {
        let max_packet_size = usize::from(self.config.ep0_max_packet_size);
        let count = self.ep0.remaining.min(max_packet_size);

        let source = match self.ep0_source {
            Source::Static(data) => data,
            Source::Buffer => &self.ep0_buffer[..],
        };
        self.ep0_string
            .write_chunk(&mut self.controller, source, &mut self.ep0.cursor, count);

        self.ep0.flags &= !Flags::InPacketPending;
        // remaining counts wire bytes, which is what went out regardless of how many source bytes they took
        self.ep0.remaining -= count;

        // a final packet exactly filling the endpoint is indistinguishable from "more to come", so it is
        // followed by a zero-length packet which ends the transfer instead
        if self.ep0.remaining == 0 && count != max_packet_size {
            self.controller.ep0_in_ready(true);
            let transferred = self.ep0.length;
            let notify = self.ep0.flags.contains(Flags::NotifyOnComplete);
            self.ep0.reset(State::Idle);
            self.ep0_string = StringCursor::default();
            if notify {
                handler.transfer_complete(EP0, TransferStatus::Ok, transferred, 0);
            }
        } else {
            self.controller.ep0_in_ready(false);
        }
    }

    /// Collects one packet of the data stage of a control OUT transfer.
    pub(super) fn serve_control_out<H: Handler>(&mut self, handler: &mut H) {
        let max_packet_size = usize::from(self.config.ep0_max_packet_size);
        let count = self.controller.out_count();
        let notify = self.ep0.flags.contains(Flags::NotifyOnComplete);
        self.ep0.flags &= !Flags::OutPacketPending;

        if self.ep0.remaining < count {
            self.ep0.state = State::Idle;
            self.ep0.flags |= Flags::OutPacketPending;
            #[cfg(feature = "defmt")]
            defmt::warn!("Control OUT packet of {} bytes overruns the receive buffer", count);
            if notify {
                handler.transfer_complete(EP0, TransferStatus::ReceiveBufferOverrun, count, self.ep0.remaining);
            }
            return;
        }

        let cursor = self.ep0.cursor;
        self.controller.read_fifo(&mut self.ep0_buffer[cursor..cursor + count]);
        self.ep0.cursor += count;
        self.ep0.remaining -= count;

        if self.ep0.remaining == 0 && count != max_packet_size {
            self.controller.ep0_serviced_out(true);
            self.ep0.state = State::Idle;
            self.ep0.flags &= !Flags::NotifyOnComplete;
            if notify {
                handler.transfer_complete(EP0, TransferStatus::Ok, self.ep0.transferred(), 0);
            }
        } else {
            // an exact multiple of the packet size is only complete once the zero-length packet arrives
            self.controller.ep0_serviced_out(false);
        }
    }

    /// Registers a receive buffer of `capacity` bytes for the data stage of an accepted control OUT request.
    ///
    /// Packets NAKed in the meantime are collected on the next start of frame.
    pub fn control_read(&mut self, capacity: usize) -> Result<(), EndpointError> {
        if self.ep0.is_busy() {
            return Err(EndpointError::Busy);
        }
        let pending = self.ep0.flags.contains(Flags::OutPacketPending);
        self.begin_out(capacity);
        if pending {
            self.ep0.flags |= Flags::OutPacketPending;
        }
        Ok(())
    }

    /// Supplies the data stage of an accepted control IN request. It goes out on the next start of frame.
    pub fn control_write(&mut self, data: &'static [u8]) -> Result<(), EndpointError> {
        if self.ep0.is_busy() {
            return Err(EndpointError::Busy);
        }
        self.begin_in(Source::Static(data), data.len(), StringCursor::default());
        self.ep0.flags |= Flags::InPacketPending;
        Ok(())
    }
}
