//! On-the-fly re-encoding of string descriptors.
//!
//! String descriptors may be stored in a compact form and expanded to UTF-16LE while they are written to the
//! control endpoint. The length in the descriptor header always counts *wire* bytes, so the transfer's remaining
//! count is kept in wire bytes too, while the source cursor advances by however many source bytes each
//! character occupies.

use super::EndpointController;

/// Replacement for anything the decoder cannot represent.
pub const REPLACEMENT: u16 = b'?' as u16;

/// How a descriptor's bytes are stored.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Encoding {
    /// Stored exactly as sent. Every non-string descriptor uses this.
    #[default]
    Utf16Le,
    /// A header followed by one byte per character; a zero byte is inserted after each character.
    Utf16LePacked,
    /// A header followed by UTF-8 text, limited to the Basic Multilingual Plane.
    Utf8,
}

/// A string descriptor and the encoding it is stored in.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StringDescriptor {
    /// `bLength` and `bDescriptorType` followed by the text.
    pub data: &'static [u8],
    /// How `data` must be expanded on the wire.
    pub encoding: Encoding,
}

impl StringDescriptor {
    /// Length on the wire, as declared by the header.
    pub fn wire_length(&self) -> usize {
        self.data.first().map_or(0, |length| usize::from(*length))
    }
}

/// Decodes the UTF-8 sequence at the start of `input` into one UCS-2 code unit.
///
/// Returns the code unit and the number of bytes it took. A NUL (or an empty input) yields `(0, 0)`; an invalid
/// or unsupported sequence yields `(REPLACEMENT, 0)`. Either way the caller must advance by at least one byte.
pub fn decode_utf8_to_ucs2(input: &[u8]) -> (u16, usize) {
    let byte = |n: usize| input.get(n).copied().map(u16::from);
    let continuation = |n: usize| byte(n).filter(|b| b & 0xC0 == 0x80);

    let Some(lead) = byte(0) else {
        return (0, 0);
    };
    match lead {
        0 => (0, 0),
        0x01..=0x7F => (lead, 1),
        _ if lead & 0xE0 == 0xC0 => match continuation(1) {
            Some(b1) => (((lead & 0x1F) << 6) | (b1 & 0x3F), 2),
            None => (REPLACEMENT, 0),
        },
        _ if lead & 0xF0 == 0xE0 => match (continuation(1), continuation(2)) {
            (Some(b1), Some(b2)) => (((lead & 0x0F) << 12) | ((b1 & 0x3F) << 6) | (b2 & 0x3F), 3),
            _ => (REPLACEMENT, 0),
        },
        // stray continuation bytes and 4-byte sequences
        _ => (REPLACEMENT, 0),
    }
}

/// Encode state of the descriptor currently being sent on the control endpoint.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StringCursor {
    /// Expansion applied to the source bytes.
    pub encoding: Encoding,
    /// The two header bytes have gone out and the text follows.
    pub initial_header_sent: bool,
}

impl StringCursor {
    /// Starts a descriptor transfer in `encoding`.
    pub fn new(encoding: Encoding) -> Self {
        Self {
            encoding,
            initial_header_sent: false,
        }
    }

    /// Writes `count` wire bytes taken from `source` starting at `*cursor` and advances `*cursor` by the number
    /// of source bytes used.
    pub fn write_chunk<C: EndpointController>(
        &mut self,
        controller: &mut C,
        source: &[u8],
        cursor: &mut usize,
        count: usize,
    ) {
        let source_at = |position: usize| source.get(position..).unwrap_or(&[]);

        if self.encoding == Encoding::Utf16Le {
            let end = (*cursor + count).min(source.len());
            controller.write_fifo(source.get(*cursor..end).unwrap_or(&[]));
            *cursor += count;
            return;
        }

        let mut count = count;
        if !self.initial_header_sent {
            // the header is never packed
            let header = count.min(2);
            let end = (*cursor + header).min(source.len());
            controller.write_fifo(source.get(*cursor..end).unwrap_or(&[]));
            *cursor += header;
            count -= header;
            self.initial_header_sent = true;
        }

        while count > 0 {
            let unit = match self.encoding {
                Encoding::Utf8 => {
                    let (unit, consumed) = decode_utf8_to_ucs2(source_at(*cursor));
                    *cursor += consumed.max(1);
                    unit
                }
                _ => {
                    let unit = source_at(*cursor).first().copied().map_or(0, u16::from);
                    *cursor += 1;
                    unit
                }
            };
            // an odd count only happens at the end of a truncated transfer
            let bytes = count.min(2);
            controller.write_fifo(&unit.to_le_bytes()[..bytes]);
            count -= bytes;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usb::mock::MockController;

    #[test]
    fn decode_ascii() {
        assert_eq!((0x0041, 1), decode_utf8_to_ucs2(&[0x41]), "Expected left but got right");
    }

    #[test]
    fn decode_two_bytes() {
        assert_eq!((0x00E9, 2), decode_utf8_to_ucs2(&[0xC3, 0xA9]), "Expected left but got right");
    }

    #[test]
    fn decode_three_bytes() {
        assert_eq!(
            (0x20AC, 3),
            decode_utf8_to_ucs2(&[0xE2, 0x82, 0xAC]),
            "Expected left but got right"
        );
    }

    #[test]
    fn decode_nul() {
        assert_eq!((0x0000, 0), decode_utf8_to_ucs2(&[0x00]), "Expected left but got right");
        assert_eq!((0x0000, 0), decode_utf8_to_ucs2(&[]), "Expected left but got right");
    }

    #[test]
    fn decode_invalid() {
        assert_eq!(
            (0x003F, 0),
            decode_utf8_to_ucs2(&[0xC3, 0x28]),
            "Invalid continuation byte should be replaced; expected left but got right"
        );
        assert_eq!(
            (0x003F, 0),
            decode_utf8_to_ucs2(&[0xE2, 0x82]),
            "Truncated sequence should be replaced; expected left but got right"
        );
        assert_eq!(
            (0x003F, 0),
            decode_utf8_to_ucs2(&[0xF0, 0x9F, 0x8E, 0xB9]),
            "4-byte sequences are unsupported; expected left but got right"
        );
    }

    #[test]
    fn packed_expands_across_packets() {
        // "MIDI" in the packed form: 2 header bytes + 4 characters = 10 wire bytes
        let source = b"\x0A\x03MIDI";
        let mut controller = MockController::default();
        let mut string = StringCursor::new(Encoding::Utf16LePacked);
        let mut cursor = 0;

        string.write_chunk(&mut controller, source, &mut cursor, 6);
        assert_eq!(
            [0x0A, 0x03, b'M', 0, b'I', 0].as_slice(),
            controller.fifo.as_slice(),
            "First chunk should carry the raw header; expected left but got right"
        );
        assert_eq!(4, cursor, "Source cursor should advance by decoded bytes");

        controller.fifo.clear();
        string.write_chunk(&mut controller, source, &mut cursor, 4);
        assert_eq!(
            [b'D', 0, b'I', 0].as_slice(),
            controller.fifo.as_slice(),
            "Header should not be repeated; expected left but got right"
        );
        assert_eq!(source.len(), cursor);
    }

    #[test]
    fn utf8_expands_to_ucs2() {
        // "é€" is 5 source bytes but 4 wire bytes
        let source = b"\x06\x03\xC3\xA9\xE2\x82\xAC";
        let mut controller = MockController::default();
        let mut string = StringCursor::new(Encoding::Utf8);
        let mut cursor = 0;

        string.write_chunk(&mut controller, source, &mut cursor, 6);
        assert_eq!(
            [0x06, 0x03, 0xE9, 0x00, 0xAC, 0x20].as_slice(),
            controller.fifo.as_slice(),
            "Expected left but got right"
        );
        assert_eq!(source.len(), cursor);
    }

    #[test]
    fn utf8_skips_invalid_bytes() {
        let source = b"\x06\x03\xFFA";
        let mut controller = MockController::default();
        let mut string = StringCursor::new(Encoding::Utf8);
        let mut cursor = 0;

        string.write_chunk(&mut controller, source, &mut cursor, 6);
        assert_eq!(
            [0x06, 0x03, b'?', 0x00, b'A', 0x00].as_slice(),
            controller.fifo.as_slice(),
            "Expected left but got right"
        );
    }
}
