mod packet;
pub use packet::*;

mod to_serial;
pub use to_serial::*;

mod to_usb;
pub use to_usb::*;

/// Start of a System Exclusive message.
pub const SYSEX_START: u8 = 0xF0;
/// End of a System Exclusive message.
pub const SYSEX_END: u8 = 0xF7;
/// System Reset, the last real-time message.
pub const SYSTEM_RESET: u8 = 0xFF;

/// Where a parser stands within the message it is assembling.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParserState {
    /// Between messages.
    #[default]
    Idle,
    /// Expecting the status byte of a USB-MIDI event packet.
    AwaitingStatus,
    /// Expecting the first data byte of a two-data-byte message.
    AwaitingData1,
    /// Expecting the second data byte of a two-data-byte message.
    AwaitingData2,
    /// Expecting the only data byte of a one-data-byte message.
    AwaitingSingleData,
    /// Inside a System Exclusive message.
    InSysEx,
}

/// What a byte of a MIDI stream means on its own.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Kind {
    /// Note off/on, polyphonic pressure, control change, pitch bend.
    TwoDataBytes,
    /// Program change, channel pressure.
    OneDataByte,
    /// `0xF0`.
    SysExStart,
    /// `0xF7`.
    SysExEnd,
    /// `0xF8..=0xFF`; may appear anywhere, even inside another message.
    RealTime,
    /// System common messages, which this bridge does not carry.
    Unsupported,
    /// Any byte without the status bit.
    Data,
}

impl Kind {
    /// Classifies a byte by its command nibble.
    pub fn of(byte: u8) -> Self {
        match byte {
            0x00..=0x7F => Self::Data,
            0x80..=0xBF | 0xE0..=0xEF => Self::TwoDataBytes,
            0xC0..=0xDF => Self::OneDataByte,
            SYSEX_START => Self::SysExStart,
            SYSEX_END => Self::SysExEnd,
            0xF8..=0xFF => Self::RealTime,
            _ => Self::Unsupported,
        }
    }
}
