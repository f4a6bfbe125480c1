//! A scripted stand-in for the USB peripheral.

use std::{collections::VecDeque, vec::Vec};

use super::{DeviceState, Ep0Status, EndpointController, Handler, Interrupts, TransferStatus, UsbDevice};
use crate::{configuration::UsbConfig, descriptors::MIDI2USB};

/// Plays the host's side of the bus and records everything the device stack does to the hardware.
pub struct MockController {
    pub index: u8,
    pub pending: Interrupts,
    /// Setup and data packets the host sent to the control endpoint, oldest first.
    pub ep0_out: VecDeque<Vec<u8>>,
    /// `data_end` of every control OUT packet the stack released.
    pub ep0_serviced: Vec<bool>,
    /// Every control IN packet the stack handed over, with its `data_end`.
    pub ep0_in: Vec<(Vec<u8>, bool)>,
    pub ep0_in_busy: bool,
    pub ep0_stalled: bool,
    pub sent_stall: bool,
    pub setup_end: bool,
    /// Bytes written to the selected FIFO since the last packet was handed over.
    pub fifo: Vec<u8>,
    read_position: usize,
    pub address: Option<u8>,
    pub endpoints_enabled: bool,
    pub halted: [bool; 3],
    /// Packets sent on the bulk IN endpoint.
    pub bulk_in: Vec<Vec<u8>>,
    pub bulk_in_busy: bool,
    /// Packets the host sent to the bulk OUT endpoint that the stack has not released yet.
    pub bulk_out: VecDeque<Vec<u8>>,
    pub bulk_out_released: usize,
}

impl Default for MockController {
    fn default() -> Self {
        Self {
            index: 0,
            pending: Interrupts::none(),
            ep0_out: VecDeque::new(),
            ep0_serviced: Vec::new(),
            ep0_in: Vec::new(),
            ep0_in_busy: false,
            ep0_stalled: false,
            sent_stall: false,
            setup_end: false,
            fifo: Vec::new(),
            read_position: 0,
            address: None,
            endpoints_enabled: false,
            halted: [false; 3],
            bulk_in: Vec::new(),
            bulk_in_busy: false,
            bulk_out: VecDeque::new(),
            bulk_out_released: 0,
        }
    }
}

impl MockController {
    /// The host sends a setup packet.
    pub fn setup(&mut self, raw: [u8; 8]) {
        self.ep0_stalled = false;
        self.ep0_out.push_back(raw.to_vec());
        self.pending |= Interrupts::Ep0;
    }

    /// The host abandons the control transfer in progress with a new setup packet. The IN packet it never
    /// collected is thrown away.
    pub fn abort_with_setup(&mut self, raw: [u8; 8]) {
        self.setup_end = true;
        self.ep0_in_busy = false;
        self.fifo.clear();
        self.setup(raw);
    }

    /// The host sends a data packet to the control endpoint.
    pub fn control_out(&mut self, data: &[u8]) {
        self.ep0_out.push_back(data.to_vec());
        self.pending |= Interrupts::Ep0;
    }

    /// The host collects the last control IN packet.
    pub fn control_in_collected(&mut self) {
        self.ep0_in_busy = false;
        self.pending |= Interrupts::Ep0;
    }

    /// The host sends a packet to the bulk OUT endpoint.
    pub fn bulk_out(&mut self, data: &[u8]) {
        self.bulk_out.push_back(data.to_vec());
        self.pending |= Interrupts::BulkOut;
    }

    /// The host collects the last bulk IN packet.
    pub fn bulk_in_collected(&mut self) {
        self.bulk_in_busy = false;
        self.pending |= Interrupts::BulkIn;
    }

    fn selected_out(&self) -> Option<&Vec<u8>> {
        match self.index {
            0 => self.ep0_out.front(),
            2 => self.bulk_out.front(),
            _ => None,
        }
    }
}

impl EndpointController for MockController {
    fn interrupts(&mut self) -> Interrupts {
        core::mem::replace(&mut self.pending, Interrupts::none())
    }

    fn index(&self) -> u8 {
        self.index
    }

    fn select(&mut self, index: u8) {
        self.index = index;
    }

    fn ep0_status(&mut self) -> Ep0Status {
        let mut status = Ep0Status::none();
        if !self.ep0_out.is_empty() {
            status |= Ep0Status::OutPacketReady;
        }
        if self.ep0_in_busy {
            status |= Ep0Status::InPacketBusy;
        }
        if self.sent_stall {
            status |= Ep0Status::SentStall;
        }
        if self.setup_end {
            status |= Ep0Status::SetupEnd;
        }
        status
    }

    fn clear_sent_stall(&mut self) {
        self.sent_stall = false;
    }

    fn serviced_setup_end(&mut self) {
        self.setup_end = false;
    }

    fn out_count(&mut self) -> usize {
        self.selected_out().map_or(0, |packet| packet.len())
    }

    fn read_fifo(&mut self, buf: &mut [u8]) {
        let start = self.read_position;
        if let Some(packet) = self.selected_out() {
            buf.copy_from_slice(&packet[start..start + buf.len()]);
        }
        self.read_position += buf.len();
    }

    fn write_fifo(&mut self, data: &[u8]) {
        self.fifo.extend_from_slice(data);
    }

    fn ep0_serviced_out(&mut self, data_end: bool) {
        self.ep0_out.pop_front();
        self.read_position = 0;
        self.ep0_serviced.push(data_end);
    }

    fn ep0_in_ready(&mut self, data_end: bool) {
        let packet = core::mem::take(&mut self.fifo);
        self.ep0_in.push((packet, data_end));
        self.ep0_in_busy = true;
    }

    fn ep0_stall(&mut self) {
        // the host runs into the STALL on its next token for this transfer
        self.ep0_stalled = true;
        self.sent_stall = true;
        self.ep0_out.pop_front();
        self.read_position = 0;
    }

    fn set_address(&mut self, address: u8) {
        self.address = Some(address);
    }

    fn enable_endpoints(&mut self, enable: bool) {
        self.endpoints_enabled = enable;
    }

    fn set_halt(&mut self, halt: bool) {
        self.halted[usize::from(self.index)] = halt;
    }

    fn in_ready(&mut self) {
        let packet = core::mem::take(&mut self.fifo);
        self.bulk_in.push(packet);
        self.bulk_in_busy = true;
    }

    fn in_busy(&mut self) -> bool {
        self.bulk_in_busy
    }

    fn release_out(&mut self) {
        self.bulk_out.pop_front();
        self.read_position = 0;
        self.bulk_out_released += 1;
        // the next queued packet lands in the FIFO
        if !self.bulk_out.is_empty() {
            self.pending |= Interrupts::BulkOut;
        }
    }
}

/// Remembers every notification the device stack makes.
#[derive(Default)]
pub struct Recorder {
    pub states: Vec<(DeviceState, DeviceState)>,
    pub completions: Vec<(u8, TransferStatus, usize, usize)>,
}

impl Handler for Recorder {
    fn transfer_complete(&mut self, endpoint: u8, status: TransferStatus, transferred: usize, remaining: usize) {
        self.completions.push((endpoint, status, transferred, remaining));
    }

    fn state_changed(&mut self, old: DeviceState, new: DeviceState) {
        self.states.push((old, new));
    }
}

/// A device fresh out of power-on.
pub fn device() -> UsbDevice<MockController> {
    UsbDevice::new(MockController::default(), UsbConfig::default(), &MIDI2USB)
}

/// A device which the host has reset, addressed and configured.
pub fn configured() -> UsbDevice<MockController> {
    let mut device = device();
    let mut handler = ();
    device.controller.pending |= Interrupts::Reset;
    device.on_interrupt(&mut handler);
    // SET_ADDRESS 7
    device.controller.setup([0x00, 0x05, 0x07, 0x00, 0x00, 0x00, 0x00, 0x00]);
    device.on_interrupt(&mut handler);
    // SET_CONFIGURATION 1
    device.controller.setup([0x00, 0x09, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00]);
    device.on_interrupt(&mut handler);
    device
}
