use wmidi::{FromBytesError, MidiMessage};

/// Code index number of a single-byte message, used here for real-time messages.
pub const CIN_SINGLE_BYTE: u8 = 0x0F;

/// A 32-bit USB-MIDI event packet.
///
/// Byte 0 holds the cable number in its upper nibble and the code index number (CIN) in its lower nibble. The
/// remaining bytes carry a MIDI message of up to three bytes, padded with zeros.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MidiEventPacket([u8; 4]);

impl MidiEventPacket {
    /// A channel message on cable 0. The code index number of a channel message is its command nibble.
    pub fn channel(status: u8, data0: u8, data1: u8) -> Self {
        Self([status >> 4, status, data0, data1])
    }

    /// A single-byte message on cable 0, such as a real-time message.
    pub fn single_byte(byte: u8) -> Self {
        Self([CIN_SINGLE_BYTE, byte, 0, 0])
    }

    /// Wraps four bytes received from the host.
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// The packet as sent on the wire.
    pub fn to_bytes(self) -> [u8; 4] {
        self.0
    }

    /// Virtual cable the packet belongs to.
    pub fn cable(&self) -> u8 {
        self.0[0] >> 4
    }

    /// Sets the virtual cable.
    pub fn set_cable(&mut self, cable: u8) {
        self.0[0] = (cable << 4) | (self.0[0] & 0x0F);
    }

    /// Code index number, which classifies the message.
    pub fn code_index(&self) -> u8 {
        self.0[0] & 0x0F
    }

    /// Sets the code index number.
    pub fn set_code_index(&mut self, code_index: u8) {
        self.0[0] = (self.0[0] & 0xF0) | (code_index & 0x0F);
    }

    /// Status byte of the message.
    pub fn status(&self) -> u8 {
        self.0[1]
    }

    /// First data byte (zero if unused).
    pub fn data0(&self) -> u8 {
        self.0[2]
    }

    /// Second data byte (zero if unused).
    pub fn data1(&self) -> u8 {
        self.0[3]
    }

    /// Number of MIDI bytes the code index number declares.
    pub fn message_length(&self) -> usize {
        match self.code_index() {
            0x5 | 0xF => 1,
            0x2 | 0x6 | 0xC | 0xD => 2,
            0x3 | 0x4 | 0x7 | 0x8..=0xB | 0xE => 3,
            // reserved
            _ => 0,
        }
    }

    /// Interprets the carried bytes as a MIDI message.
    pub fn message(&self) -> Result<MidiMessage<'_>, FromBytesError> {
        MidiMessage::from_bytes(&self.0[1..1 + self.message_length()])
    }
}
