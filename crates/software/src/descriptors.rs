use crate::usb::{Encoding, StringDescriptor};

/// The descriptor tables the control endpoint serves.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Descriptors {
    /// The 18-byte device descriptor.
    pub device: &'static [u8],
    /// The configuration descriptor followed by every descriptor it encloses.
    pub configuration: &'static [u8],
    /// String descriptors by index; index 0 is the language table.
    pub strings: &'static [StringDescriptor],
}

impl Descriptors {
    /// `bNumInterfaces` of the configuration.
    pub fn interface_count(&self) -> u16 {
        self.configuration.get(4).copied().map_or(0, u16::from)
    }

    /// `bConfigurationValue` of the configuration.
    pub fn configuration_value(&self) -> u8 {
        self.configuration.get(5).copied().unwrap_or(1)
    }
}

/// pid.codes vendor ID for open source hardware.
pub const VENDOR_ID: u16 = 0x1209;
#[allow(missing_docs)]
pub const PRODUCT_ID: u16 = 0x7522;
/// Device release 1.20, BCD.
pub const DEVICE_RELEASE: u16 = 0x0120;

const MAX_PACKET_SIZE: u8 = 64;

#[rustfmt::skip]
static DEVICE: [u8; 18] = [
    18,                             // bLength
    0x01,                           // bDescriptorType: device
    0x10, 0x01,                     // bcdUSB 1.10
    0x00,                           // bDeviceClass: defined by the interfaces
    0x00,                           // bDeviceSubClass
    0x00,                           // bDeviceProtocol
    MAX_PACKET_SIZE,                // bMaxPacketSize0
    VENDOR_ID.to_le_bytes()[0], VENDOR_ID.to_le_bytes()[1],
    PRODUCT_ID.to_le_bytes()[0], PRODUCT_ID.to_le_bytes()[1],
    DEVICE_RELEASE.to_le_bytes()[0], DEVICE_RELEASE.to_le_bytes()[1],
    1,                              // iManufacturer
    2,                              // iProduct
    3,                              // iSerialNumber
    1,                              // bNumConfigurations
];

// Jack wiring, as seen from the host:
//   bulk OUT 0x02 -> embedded IN jack 1 -> external OUT jack 4 -> serial TX
//   serial RX -> external IN jack 2 -> embedded OUT jack 3 -> bulk IN 0x81
#[rustfmt::skip]
static CONFIGURATION: [u8; 101] = [
    // configuration
    9, 0x02, 101, 0,                // bLength, bDescriptorType, wTotalLength
    2,                              // bNumInterfaces
    1,                              // bConfigurationValue
    0,                              // iConfiguration
    0x80,                           // bmAttributes: bus powered
    50,                             // bMaxPower: 100 mA

    // interface 0: audio control
    9, 0x04, 0, 0, 0, 0x01, 0x01, 0, 0,
    // class-specific audio control header: ADC 1.00, 9 bytes, 1 streaming interface (#1)
    9, 0x24, 0x01, 0x00, 0x01, 9, 0, 1, 1,

    // interface 1: MIDI streaming, 2 endpoints
    9, 0x04, 1, 0, 2, 0x01, 0x03, 0, 0,
    // class-specific MIDI streaming header: MSC 1.00, 65 bytes
    7, 0x24, 0x01, 0x00, 0x01, 65, 0,
    // embedded IN jack 1
    6, 0x24, 0x02, 0x01, 1, 0,
    // external IN jack 2
    6, 0x24, 0x02, 0x02, 2, 0,
    // embedded OUT jack 3, sourced from jack 2 pin 1
    9, 0x24, 0x03, 0x01, 3, 1, 2, 1, 0,
    // external OUT jack 4, sourced from jack 1 pin 1
    9, 0x24, 0x03, 0x02, 4, 1, 1, 1, 0,

    // bulk IN 0x81
    9, 0x05, 0x81, 0x02, MAX_PACKET_SIZE, 0, 0, 0, 0,
    // class-specific: associated with embedded OUT jack 3
    5, 0x25, 0x01, 1, 3,

    // bulk OUT 0x02
    9, 0x05, 0x02, 0x02, MAX_PACKET_SIZE, 0, 0, 0, 0,
    // class-specific: associated with embedded IN jack 1
    5, 0x25, 0x01, 1, 1,
];

static STRINGS: [StringDescriptor; 4] = [
    // English (United States)
    StringDescriptor {
        data: &[4, 0x03, 0x09, 0x04],
        encoding: Encoding::Utf16Le,
    },
    StringDescriptor {
        data: b"\x1A\x03Maximov K.M.",
        encoding: Encoding::Utf16LePacked,
    },
    StringDescriptor {
        data: b"\x12\x03MIDI2USB",
        encoding: Encoding::Utf16LePacked,
    },
    StringDescriptor {
        data: b"\x08\x031.2",
        encoding: Encoding::Utf16LePacked,
    },
];

/// The descriptors of the MIDI2USB bridge: one audio control interface and one MIDI streaming interface with a
/// single cable in each direction.
pub static MIDI2USB: Descriptors = Descriptors {
    device: &DEVICE,
    configuration: &CONFIGURATION,
    strings: &STRINGS,
};

#[cfg(test)]
mod tests {
    use super::*;

    /// Walks the descriptors enclosed by a configuration descriptor.
    fn lengths(data: &[u8]) -> impl Iterator<Item = usize> + '_ {
        let mut offset = 0;
        core::iter::from_fn(move || {
            let length = usize::from(*data.get(offset)?);
            offset += length;
            Some(length)
        })
    }

    #[test]
    fn configuration_is_consistent() {
        let total = u16::from_le_bytes([CONFIGURATION[2], CONFIGURATION[3]]);
        assert_eq!(CONFIGURATION.len(), usize::from(total), "wTotalLength should match the table");
        assert_eq!(
            CONFIGURATION.len(),
            lengths(&CONFIGURATION).sum::<usize>(),
            "Every enclosed descriptor should be sized by its bLength"
        );
        assert_eq!(2, MIDI2USB.interface_count());
        assert_eq!(1, MIDI2USB.configuration_value());
    }

    #[test]
    fn string_lengths() {
        for string in MIDI2USB.strings.iter().skip(1) {
            let characters = string.data.len() - 2;
            assert_eq!(
                2 + characters * 2,
                string.wire_length(),
                "Packed string length should count the expanded characters"
            );
        }
        assert_eq!(4, MIDI2USB.strings[0].wire_length());
    }
}
