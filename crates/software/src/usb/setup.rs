use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

/// Direction of the data stage of a control transfer.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    /// Host to device.
    Out,
    /// Device to host.
    In,
}

/// Bits 5..6 of `bmRequestType`.
#[derive(Debug, Clone, Copy, PartialEq, FromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RequestKind {
    /// Defined by chapter 9 of the USB specification.
    Standard = 0,
    /// Defined by a device class.
    Class = 1,
    /// Defined by the vendor.
    Vendor = 2,
    /// Reserved.
    Reserved = 3,
}

/// Bits 0..4 of `bmRequestType`.
#[derive(Debug, Clone, Copy, PartialEq, FromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Recipient {
    /// The device as a whole.
    Device = 0,
    /// The interface named by `wIndex`.
    Interface = 1,
    /// The endpoint named by `wIndex`.
    Endpoint = 2,
    /// Anything else.
    Other = 3,
}

/// `bRequest` codes of the standard requests.
#[derive(Debug, Clone, Copy, PartialEq, FromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StandardRequest {
    #[allow(missing_docs)]
    GetStatus = 0,
    #[allow(missing_docs)]
    ClearFeature = 1,
    #[allow(missing_docs)]
    SetFeature = 3,
    #[allow(missing_docs)]
    SetAddress = 5,
    #[allow(missing_docs)]
    GetDescriptor = 6,
    #[allow(missing_docs)]
    SetDescriptor = 7,
    #[allow(missing_docs)]
    GetConfiguration = 8,
    #[allow(missing_docs)]
    SetConfiguration = 9,
    #[allow(missing_docs)]
    GetInterface = 10,
    #[allow(missing_docs)]
    SetInterface = 11,
    #[allow(missing_docs)]
    SynchFrame = 12,
}

/// Descriptor types, found in the high byte of `wValue` of a `GET_DESCRIPTOR` request.
#[derive(Debug, Clone, Copy, PartialEq, FromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DescriptorType {
    #[allow(missing_docs)]
    Device = 1,
    #[allow(missing_docs)]
    Configuration = 2,
    #[allow(missing_docs)]
    String = 3,
    #[allow(missing_docs)]
    Interface = 4,
    #[allow(missing_docs)]
    Endpoint = 5,
}

/// Feature selector of the `ENDPOINT_HALT` feature.
pub const FEATURE_ENDPOINT_HALT: u16 = 0;
/// Feature selector of the `DEVICE_REMOTE_WAKEUP` feature.
pub const FEATURE_DEVICE_REMOTE_WAKEUP: u16 = 1;

/// The 8-byte packet which opens every control transfer.
///
/// Multi-byte fields arrive little-endian on the wire and are stored in native order.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SetupRequest {
    /// `bmRequestType`: direction, kind and recipient.
    pub request_type: u8,
    /// `bRequest`.
    pub request: u8,
    /// `wValue`.
    pub value: u16,
    /// `wIndex`.
    pub index: u16,
    /// `wLength`: the number of bytes in the data stage.
    pub length: u16,
}

impl SetupRequest {
    /// Parses a setup packet as read from the control endpoint's FIFO.
    pub fn parse(raw: &[u8; 8]) -> Self {
        Self {
            request_type: raw[0],
            request: raw[1],
            value: u16::from_le_bytes([raw[2], raw[3]]),
            index: u16::from_le_bytes([raw[4], raw[5]]),
            length: u16::from_le_bytes([raw[6], raw[7]]),
        }
    }

    /// Direction of the data stage.
    pub fn direction(&self) -> Direction {
        if self.request_type & 0x80 == 0 {
            Direction::Out
        } else {
            Direction::In
        }
    }

    /// Whether the request is standard, class or vendor defined.
    pub fn kind(&self) -> RequestKind {
        RequestKind::from_u8((self.request_type >> 5) & 0x03).unwrap_or(RequestKind::Reserved)
    }

    /// The entity the request is addressed to.
    pub fn recipient(&self) -> Recipient {
        Recipient::from_u8(self.request_type & 0x1F).unwrap_or(Recipient::Other)
    }

    /// The standard request code, if `request` is one.
    pub fn standard_request(&self) -> Option<StandardRequest> {
        StandardRequest::from_u8(self.request)
    }

    /// For `GET_DESCRIPTOR`: the descriptor type and index packed into `value`.
    pub fn descriptor(&self) -> (Option<DescriptorType>, u8) {
        let [index, kind] = self.value.to_le_bytes();
        (DescriptorType::from_u8(kind), index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse() {
        // GET_DESCRIPTOR (configuration, index 0), wLength = 0x00FF
        let raw = [0x80, 0x06, 0x00, 0x02, 0x00, 0x00, 0xFF, 0x00];
        let expected = SetupRequest {
            request_type: 0x80,
            request: 0x06,
            value: 0x0200,
            index: 0,
            length: 0x00FF,
        };
        let actual = SetupRequest::parse(&raw);
        assert_eq!(expected, actual, "Expected left but got right");

        assert_eq!(Direction::In, actual.direction());
        assert_eq!(RequestKind::Standard, actual.kind());
        assert_eq!(Recipient::Device, actual.recipient());
        assert_eq!(Some(StandardRequest::GetDescriptor), actual.standard_request());
        assert_eq!((Some(DescriptorType::Configuration), 0), actual.descriptor());
    }

    #[test]
    fn class_request_to_interface() {
        let actual = SetupRequest::parse(&[0x21, 0x0A, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00]);
        assert_eq!(Direction::Out, actual.direction());
        assert_eq!(RequestKind::Class, actual.kind());
        assert_eq!(Recipient::Interface, actual.recipient());
        assert_eq!(1, actual.index);
    }
}
