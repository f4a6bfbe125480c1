use super::{Kind, MidiEventPacket, ParserState, SYSEX_END, SYSTEM_RESET};
use crate::configuration::MidiConfig;

/// What the serial parser produced from a byte.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Output {
    /// A complete channel message.
    Packet(MidiEventPacket),
    /// A real-time message, to be sent ahead of everything else.
    RealTime(u8),
    /// One byte of a System Exclusive message, passed through as is.
    SysEx(u8),
}

/// Assembles serial MIDI bytes into USB-MIDI event packets, one byte at a time.
///
/// Real-time messages are reported as soon as they arrive and never disturb the message in progress. System
/// Exclusive messages are streamed byte by byte until their end marker. Malformed input resynchronizes on the
/// next status byte.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SerialToUsb {
    state: ParserState,
    status: u8,
    data0: u8,
    /// Status of the last channel message, for running status.
    running: Option<u8>,
    config: MidiConfig,
}

impl SerialToUsb {
    /// Creates a parser waiting for a status byte.
    pub const fn new(config: MidiConfig) -> Self {
        Self {
            state: ParserState::Idle,
            status: 0,
            data0: 0,
            running: None,
            config,
        }
    }

    /// Where the parser stands.
    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Consumes one byte received from the serial port.
    pub fn parse(&mut self, byte: u8) -> Option<Output> {
        let kind = Kind::of(byte);

        if kind == Kind::RealTime {
            if byte == SYSTEM_RESET {
                self.state = ParserState::Idle;
                self.running = None;
            }
            return Some(Output::RealTime(byte));
        }

        if self.state == ParserState::InSysEx {
            match kind {
                Kind::Data => return Some(Output::SysEx(byte)),
                Kind::SysExEnd => {
                    self.state = ParserState::Idle;
                    return Some(Output::SysEx(SYSEX_END));
                }
                // any other status byte cuts the message short and is handled as usual
                _ => self.state = ParserState::Idle,
            }
        }

        match kind {
            Kind::TwoDataBytes => {
                self.begin(byte, ParserState::AwaitingData1);
                None
            }
            Kind::OneDataByte => {
                self.begin(byte, ParserState::AwaitingSingleData);
                None
            }
            Kind::SysExStart => {
                self.state = ParserState::InSysEx;
                self.running = None;
                Some(Output::SysEx(byte))
            }
            Kind::SysExEnd | Kind::Unsupported => {
                #[cfg(feature = "defmt")]
                defmt::debug!("Skipping unsupported MIDI status {:#04x}", byte);
                self.state = ParserState::Idle;
                self.running = None;
                None
            }
            Kind::Data => self.data(byte),
            Kind::RealTime => None,
        }
    }

    fn begin(&mut self, status: u8, state: ParserState) {
        self.status = status;
        self.running = Some(status);
        self.state = state;
    }

    fn data(&mut self, byte: u8) -> Option<Output> {
        match self.state {
            ParserState::AwaitingData1 => {
                self.data0 = byte;
                self.state = ParserState::AwaitingData2;
                None
            }
            ParserState::AwaitingData2 => {
                self.state = ParserState::Idle;
                Some(Output::Packet(MidiEventPacket::channel(self.status, self.data0, byte)))
            }
            ParserState::AwaitingSingleData => {
                self.state = ParserState::Idle;
                Some(Output::Packet(MidiEventPacket::channel(self.status, byte, 0)))
            }
            _ => {
                let status = self.running.filter(|_| self.config.running_status)?;
                match Kind::of(status) {
                    Kind::TwoDataBytes => self.state = ParserState::AwaitingData1,
                    _ => self.state = ParserState::AwaitingSingleData,
                }
                self.status = status;
                self.data(byte)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::vec::Vec;

    use super::*;

    fn parse_all(parser: &mut SerialToUsb, bytes: &[u8]) -> Vec<Output> {
        bytes.iter().filter_map(|byte| parser.parse(*byte)).collect()
    }

    #[test]
    fn two_data_byte_messages() {
        for status in [0x80, 0x91, 0xA2, 0xB3, 0xEF] {
            let mut parser = SerialToUsb::default();
            let expected = [Output::Packet(MidiEventPacket::from_bytes([status >> 4, status, 0x40, 0x7F]))];
            assert_eq!(
                expected.as_slice(),
                parse_all(&mut parser, &[status, 0x40, 0x7F]).as_slice(),
                "Expected left but got right"
            );
            assert_eq!(ParserState::Idle, parser.state());
        }
    }

    #[test]
    fn one_data_byte_messages() {
        for status in [0xC0, 0xD5] {
            let mut parser = SerialToUsb::default();
            let expected = [Output::Packet(MidiEventPacket::from_bytes([status >> 4, status, 0x12, 0]))];
            assert_eq!(
                expected.as_slice(),
                parse_all(&mut parser, &[status, 0x12]).as_slice(),
                "Expected left but got right"
            );
        }
    }

    #[test]
    fn real_time_interleaved() {
        let mut parser = SerialToUsb::default();
        let expected = [
            Output::RealTime(0xF8),
            Output::RealTime(0xFE),
            Output::Packet(MidiEventPacket::channel(0x90, 60, 100)),
        ];
        assert_eq!(
            expected.as_slice(),
            parse_all(&mut parser, &[0x90, 0xF8, 60, 0xFE, 100]).as_slice(),
            "Real-time bytes should not disturb the message in progress; expected left but got right"
        );
    }

    #[test]
    fn system_reset_flushes() {
        let mut parser = SerialToUsb::default();
        assert_eq!(
            [Output::RealTime(0xFF)].as_slice(),
            parse_all(&mut parser, &[0x90, 60, 0xFF, 100]).as_slice(),
            "Expected left but got right"
        );
        assert_eq!(ParserState::Idle, parser.state());
    }

    #[test]
    fn sysex_passthrough() {
        let mut parser = SerialToUsb::default();
        let message = [0xF0, 0x7E, 0x7F, 0x06, 0x01, 0xF7];
        let expected: Vec<Output> = message.iter().map(|byte| Output::SysEx(*byte)).collect();
        assert_eq!(expected, parse_all(&mut parser, &message), "Expected left but got right");
        assert_eq!(ParserState::Idle, parser.state());
    }

    #[test]
    fn sysex_cut_short_by_status() {
        let mut parser = SerialToUsb::default();
        let expected = [
            Output::SysEx(0xF0),
            Output::SysEx(0x01),
            Output::Packet(MidiEventPacket::channel(0x80, 60, 0)),
        ];
        assert_eq!(
            expected.as_slice(),
            parse_all(&mut parser, &[0xF0, 0x01, 0x80, 60, 0]).as_slice(),
            "Expected left but got right"
        );
    }

    #[test]
    fn unsupported_status_skipped() {
        let mut parser = SerialToUsb::default();
        // song position pointer with its two data bytes, then a note
        let expected = [Output::Packet(MidiEventPacket::channel(0x90, 60, 100))];
        assert_eq!(
            expected.as_slice(),
            parse_all(&mut parser, &[0xF2, 0x10, 0x20, 0x90, 60, 100]).as_slice(),
            "Expected left but got right"
        );
    }

    #[test]
    fn resynchronizes_on_status() {
        let mut parser = SerialToUsb::default();
        let expected = [Output::Packet(MidiEventPacket::channel(0xB0, 7, 90))];
        assert_eq!(
            expected.as_slice(),
            parse_all(&mut parser, &[0x90, 60, 0xB0, 7, 90]).as_slice(),
            "Expected left but got right"
        );
    }

    #[test]
    fn running_status() {
        let mut parser = SerialToUsb::default();
        let expected = [
            Output::Packet(MidiEventPacket::channel(0x90, 60, 100)),
            Output::Packet(MidiEventPacket::channel(0x90, 64, 100)),
            Output::RealTime(0xF8),
            Output::Packet(MidiEventPacket::channel(0x90, 67, 100)),
        ];
        assert_eq!(
            expected.as_slice(),
            parse_all(&mut parser, &[0x90, 60, 100, 64, 100, 0xF8, 67, 100]).as_slice(),
            "Real-time bytes should not cancel running status; expected left but got right"
        );
    }

    #[test]
    fn running_status_disabled() {
        let mut parser = SerialToUsb::new(MidiConfig {
            running_status: false,
        });
        let expected = [Output::Packet(MidiEventPacket::channel(0xC0, 5, 0))];
        assert_eq!(
            expected.as_slice(),
            parse_all(&mut parser, &[0xC0, 5, 6, 7]).as_slice(),
            "Expected left but got right"
        );
    }
}
