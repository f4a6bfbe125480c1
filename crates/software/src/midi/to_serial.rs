use super::{Kind, MidiEventPacket, ParserState};

/// Unpacks USB-MIDI event packets into a serial MIDI byte stream, one byte at a time.
///
/// The parser tracks the byte position within each 4-byte packet, so padding after a short message is skipped
/// and a new packet always resynchronizes it. Only cable 0 exists; packets for other cables are dropped.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UsbToSerial {
    state: ParserState,
    /// Position of the next byte within its packet.
    position: u8,
    code_index: u8,
    /// The current packet belongs to another cable.
    skip: bool,
    /// System Exclusive bytes left in the current packet.
    sysex_left: usize,
}

impl UsbToSerial {
    /// Creates a parser expecting a packet header.
    pub const fn new() -> Self {
        Self {
            state: ParserState::Idle,
            position: 0,
            code_index: 0,
            skip: false,
            sysex_left: 0,
        }
    }

    /// Where the parser stands.
    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Marks the start of a new USB transfer, which always begins with a packet header.
    pub fn begin_transfer(&mut self) {
        self.position = 0;
    }

    /// Consumes one byte received from the host and returns the byte to transmit on the serial port, if any.
    pub fn parse(&mut self, byte: u8) -> Option<u8> {
        let position = self.position;
        self.position = (self.position + 1) % 4;

        if position == 0 {
            self.header(byte);
            return None;
        }
        if self.skip {
            return None;
        }

        match self.state {
            ParserState::AwaitingStatus => self.status(byte),
            ParserState::AwaitingData1 => {
                self.state = ParserState::AwaitingData2;
                Some(byte)
            }
            ParserState::AwaitingData2 | ParserState::AwaitingSingleData => {
                self.state = ParserState::Idle;
                Some(byte)
            }
            ParserState::InSysEx => {
                if self.sysex_left == 0 {
                    return None;
                }
                self.sysex_left -= 1;
                match Kind::of(byte) {
                    Kind::Data | Kind::RealTime => Some(byte),
                    Kind::SysExEnd => {
                        self.state = ParserState::Idle;
                        Some(byte)
                    }
                    _ => self.status(byte),
                }
            }
            // padding
            ParserState::Idle => None,
        }
    }

    fn header(&mut self, byte: u8) {
        let packet = MidiEventPacket::from_bytes([byte, 0, 0, 0]);
        self.skip = packet.cable() != 0;
        if self.skip {
            #[cfg(feature = "defmt")]
            defmt::debug!("Dropping USB-MIDI packet for cable {}", packet.cable());
            return;
        }

        self.code_index = packet.code_index();
        let continues_sysex = matches!(self.code_index, 0x4..=0x7 | 0xF);
        if self.state == ParserState::InSysEx && continues_sysex {
            self.sysex_left = packet.message_length();
        } else {
            self.state = ParserState::AwaitingStatus;
        }
    }

    fn status(&mut self, byte: u8) -> Option<u8> {
        match Kind::of(byte) {
            Kind::TwoDataBytes => {
                self.state = ParserState::AwaitingData1;
                Some(byte)
            }
            Kind::OneDataByte => {
                self.state = ParserState::AwaitingSingleData;
                Some(byte)
            }
            Kind::SysExStart => {
                self.state = ParserState::InSysEx;
                let length = MidiEventPacket::from_bytes([self.code_index, 0, 0, 0]).message_length();
                self.sysex_left = length.saturating_sub(1);
                Some(byte)
            }
            Kind::RealTime => {
                self.state = ParserState::Idle;
                Some(byte)
            }
            // the rest of an unsupported packet is dropped
            _ => {
                self.state = ParserState::Idle;
                None
            }
        }
    }
}
