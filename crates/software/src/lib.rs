//! This crate contains the architecture-agnostic core of MIDI2USB, a bridge between a classic 5-pin serial
//! [MIDI](https://midi.org/midi-1-0) port and a [USB MIDI class](https://usb.org/sites/default/files/midi10.pdf)
//! device.
//!
//! It holds everything with protocol state: the control endpoint engine that enumerates the device, the bulk
//! endpoint driver, the byte-stream parsers that translate between serial MIDI and USB-MIDI event packets, and
//! the shared buffers that hand data between interrupt and foreground contexts. Register access is abstracted
//! behind [`usb::EndpointController`], so all of it runs (and is tested) on the host.

#![deny(missing_docs)]
#![no_std]

#[cfg(test)]
extern crate std;

pub mod configuration;

/// Static USB device, configuration and string descriptors.
pub mod descriptors;

/// Interrupt/foreground handoff of MIDI data.
pub mod handoff;

/// Translation between serial MIDI byte streams and USB-MIDI event packets.
pub mod midi;

/// USB device stack: control endpoint engine, standard requests and bulk endpoints.
pub mod usb;
