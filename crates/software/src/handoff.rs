use core::cell::RefCell;

use embassy_sync::blocking_mutex::{Mutex, raw::CriticalSectionRawMutex};
use tinyvec::ArrayVec;

use crate::{
    configuration::{INBOUND_CAPACITY, OUTBOUND_CAPACITY, REALTIME_CAPACITY, UsbConfig},
    descriptors::Descriptors,
    midi::{MidiEventPacket, Output, SerialToUsb, UsbToSerial},
    usb::{
        BULK_MAX_PACKET_SIZE, DeviceState, EP1_IN, EP2_OUT, EndpointController, EndpointError, Handler,
        TransferStatus, UsbDevice,
    },
};

/// A message did not fit into a buffer and was dropped.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Overflow;

/// State shared between an interrupt handler and the foreground. Every access is a short critical section.
pub struct Shared<T>(Mutex<CriticalSectionRawMutex, RefCell<T>>);

impl<T> Shared<T> {
    /// Wraps `value`.
    pub const fn new(value: T) -> Self {
        Self(Mutex::new(RefCell::new(value)))
    }

    /// Runs `f` with exclusive access to the value, with interrupts masked.
    pub fn lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        self.0.lock(|cell| f(&mut cell.borrow_mut()))
    }
}

/// MIDI data waiting to go to the host.
///
/// Real-time messages have a queue of their own and leave ahead of everything else.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundBuffer {
    events: [u8; OUTBOUND_CAPACITY],
    len: usize,
    realtime: [u8; REALTIME_CAPACITY],
    realtime_len: usize,
}

impl OutboundBuffer {
    /// An empty buffer.
    pub const fn new() -> Self {
        Self {
            events: [0; OUTBOUND_CAPACITY],
            len: 0,
            realtime: [0; REALTIME_CAPACITY],
            realtime_len: 0,
        }
    }

    /// Queued event bytes, in arrival order.
    pub fn events(&self) -> &[u8] {
        &self.events[..self.len]
    }

    /// Queued real-time status bytes, in arrival order.
    pub fn realtime(&self) -> &[u8] {
        &self.realtime[..self.realtime_len]
    }

    /// Whether there is nothing to send.
    pub fn is_empty(&self) -> bool {
        self.len == 0 && self.realtime_len == 0
    }

    /// Queues the output of the serial parser. Either all of it is queued or, on [`Overflow`], none of it.
    pub fn enqueue(&mut self, output: Output) -> Result<(), Overflow> {
        match output {
            Output::Packet(packet) => self.push(&packet.to_bytes()),
            Output::SysEx(byte) => self.push(&[byte]),
            Output::RealTime(byte) => {
                let slot = self.realtime.get_mut(self.realtime_len).ok_or(Overflow)?;
                *slot = byte;
                self.realtime_len += 1;
                Ok(())
            }
        }
    }

    fn push(&mut self, bytes: &[u8]) -> Result<(), Overflow> {
        let end = self.len + bytes.len();
        let slot = self.events.get_mut(self.len..end).ok_or(Overflow)?;
        slot.copy_from_slice(bytes);
        self.len = end;
        Ok(())
    }

    /// Lays out the next bulk IN packet in `frame`: queued real-time messages first, then as many event bytes as
    /// fit. Returns the packet length. Nothing is removed until [`consume`][OutboundBuffer::consume].
    pub fn frame(&self, frame: &mut [u8; BULK_MAX_PACKET_SIZE]) -> usize {
        let mut count = 0;
        for byte in self.realtime() {
            frame[count..count + 4].copy_from_slice(&MidiEventPacket::single_byte(*byte).to_bytes());
            count += 4;
        }
        let events = self.len.min(BULK_MAX_PACKET_SIZE - count);
        frame[count..count + events].copy_from_slice(&self.events[..events]);
        count + events
    }

    /// Removes the `count` bytes a [`frame`][OutboundBuffer::frame] call laid out.
    pub fn consume(&mut self, count: usize) {
        let realtime = self.realtime_len.min(count / 4);
        self.realtime.copy_within(realtime..self.realtime_len, 0);
        self.realtime_len -= realtime;

        let events = (count - realtime * 4).min(self.len);
        self.events.copy_within(events..self.len, 0);
        self.len -= events;
    }
}

impl Default for OutboundBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// The single slot a received bulk OUT packet waits in until the foreground parses it.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundBuffer {
    data: [u8; INBOUND_CAPACITY],
    len: usize,
}

impl InboundBuffer {
    /// An empty slot.
    pub const fn new() -> Self {
        Self {
            data: [0; INBOUND_CAPACITY],
            len: 0,
        }
    }

    /// Whether the slot is free.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Stores a packet in the free slot.
    pub fn fill(&mut self, packet: &[u8]) -> Result<(), Overflow> {
        if !self.is_empty() {
            return Err(Overflow);
        }
        let slot = self.data.get_mut(..packet.len()).ok_or(Overflow)?;
        slot.copy_from_slice(packet);
        self.len = packet.len();
        Ok(())
    }

    /// Hands out the stored packet and frees the slot.
    pub fn take(&mut self) -> ArrayVec<[u8; INBOUND_CAPACITY]> {
        let len = core::mem::take(&mut self.len);
        self.data[..len].iter().copied().collect()
    }
}

impl Default for InboundBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Logs what the device stack reports.
struct Notifications;

impl Handler for Notifications {
    #[cfg_attr(not(feature = "defmt"), allow(unused_variables))]
    fn transfer_complete(&mut self, endpoint: u8, status: TransferStatus, transferred: usize, remaining: usize) {
        if status != TransferStatus::Ok {
            #[cfg(feature = "defmt")]
            defmt::warn!(
                "Transfer on {=u8:#x} failed: {}, {} bytes, {} remaining",
                endpoint,
                status,
                transferred,
                remaining
            );
        }
    }

    #[cfg_attr(not(feature = "defmt"), allow(unused_variables))]
    fn state_changed(&mut self, old: DeviceState, new: DeviceState) {
        #[cfg(feature = "defmt")]
        defmt::info!("USB {} -> {}", old, new);
    }
}

/// The whole bridge: the USB device and the buffers between it and the serial port.
///
/// Each method belongs to one execution context, noted in its documentation. All of them take `&self` so a
/// `static` bridge can be reached from interrupt handlers and tasks alike.
pub struct Bridge<C> {
    device: Shared<UsbDevice<C>>,
    outbound: Shared<OutboundBuffer>,
    inbound: Shared<InboundBuffer>,
}

impl<C: EndpointController> Bridge<C> {
    /// Creates a bridge around the USB peripheral.
    pub const fn new(controller: C, config: UsbConfig, descriptors: &'static Descriptors) -> Self {
        Self {
            device: Shared::new(UsbDevice::new(controller, config, descriptors)),
            outbound: Shared::new(OutboundBuffer::new()),
            inbound: Shared::new(InboundBuffer::new()),
        }
    }

    /// Runs `f` on the USB device.
    pub fn device<R>(&self, f: impl FnOnce(&mut UsbDevice<C>) -> R) -> R {
        self.device.lock(f)
    }

    /// USB interrupt context: services the peripheral and moves a received bulk OUT packet into the inbound slot.
    pub fn on_usb_interrupt(&self) {
        self.device.lock(|device| {
            device.on_interrupt(&mut Notifications);
            self.inbound.lock(|inbound| {
                if !inbound.is_empty() {
                    return;
                }
                if let Some(packet) = device.take_received() {
                    #[cfg(feature = "defmt")]
                    defmt::debug!("Received {=[u8]:#x}", packet);
                    // the slot is empty, so only an oversized packet could fail
                    if inbound.fill(packet).is_err() {
                        #[cfg(feature = "defmt")]
                        defmt::warn!("Dropped an oversized USB packet");
                    }
                }
                arm_read(device, inbound);
            });
        });
    }

    /// Serial receive context: feeds one byte to `parser` and queues whatever it completes for the host.
    ///
    /// A message that does not fit is dropped and reported as [`Overflow`].
    pub fn on_serial_byte(&self, parser: &mut SerialToUsb, byte: u8) -> Result<(), Overflow> {
        let Some(output) = parser.parse(byte) else {
            return Ok(());
        };
        self.outbound.lock(|outbound| outbound.enqueue(output)).inspect_err(|_| {
            #[cfg(feature = "defmt")]
            defmt::warn!("Outbound buffer full, dropped {}", output);
        })
    }

    /// Foreground: starts a bulk IN transfer of the queued messages if there are any and the endpoint is free.
    ///
    /// Returns the number of bytes handed to the device. Queued messages are only removed once the device has
    /// accepted them.
    pub fn transmit(&self) -> Result<usize, EndpointError> {
        self.device.lock(|device| {
            self.outbound.lock(|outbound| {
                if outbound.is_empty() || device.is_busy(EP1_IN) {
                    return Ok(0);
                }
                let mut frame = [0; BULK_MAX_PACKET_SIZE];
                let count = outbound.frame(&mut frame);
                device.write(EP1_IN, &frame[..count], true)?;
                outbound.consume(count);
                Ok(count)
            })
        })
    }

    /// Foreground: parses the packet waiting in the inbound slot, if any, passing every serial byte to `sink`.
    ///
    /// The slot is emptied and the next bulk OUT transfer armed before parsing starts. Returns the number of USB
    /// bytes consumed.
    pub fn drain(&self, parser: &mut UsbToSerial, sink: impl FnMut(u8)) -> usize {
        let packet = self.device.lock(|device| {
            self.inbound.lock(|inbound| {
                let packet = inbound.take();
                arm_read(device, inbound);
                packet
            })
        });

        if !packet.is_empty() {
            parser.begin_transfer();
        }
        #[cfg(feature = "defmt")]
        for frame in packet.chunks_exact(4) {
            let event = MidiEventPacket::from_bytes([frame[0], frame[1], frame[2], frame[3]]);
            match event.message() {
                Ok(message) => defmt::debug!("From host: {}", defmt::Debug2Format(&message)),
                Err(_) => defmt::debug!("From host: {}", event),
            }
        }
        packet
            .iter()
            .filter_map(|byte| parser.parse(*byte))
            .for_each(sink);
        packet.len()
    }
}

/// Arms the next bulk OUT transfer once the inbound slot is free.
fn arm_read<C: EndpointController>(device: &mut UsbDevice<C>, inbound: &InboundBuffer) {
    if device.state() != DeviceState::Configured || device.is_busy(EP2_OUT) || !inbound.is_empty() {
        return;
    }
    // fails only while the previous packet has not been taken
    if let Err(_error) = device.read(EP2_OUT, false) {
        #[cfg(feature = "defmt")]
        defmt::debug!("Bulk OUT not armed: {}", _error);
    }
}
