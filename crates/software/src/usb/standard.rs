//! Chapter 9 requests.

use super::{
    BULK_IN_BANK, BULK_OUT_BANK, DescriptorType, DeviceState, Direction, EP1_IN, EP2_OUT, EndpointController,
    FEATURE_DEVICE_REMOTE_WAKEUP, FEATURE_ENDPOINT_HALT, Handler, Recipient, Response, StandardRequest, State,
    UsbDevice,
};

impl<C: EndpointController> UsbDevice<C> {
    /// Answers the standard request in `self.setup`.
    pub(super) fn standard_request<H: Handler>(&mut self, handler: &mut H) -> Response {
        let Some(request) = self.setup.standard_request() else {
            return Response::Reject;
        };
        match request {
            StandardRequest::GetStatus => self.get_status(),
            StandardRequest::ClearFeature => self.set_feature(false),
            StandardRequest::SetFeature => self.set_feature(true),
            StandardRequest::SetAddress => self.set_address(handler),
            StandardRequest::GetDescriptor => self.get_descriptor(),
            StandardRequest::GetConfiguration => self.get_configuration(),
            StandardRequest::SetConfiguration => self.set_configuration(handler),
            StandardRequest::GetInterface => self.get_interface(),
            StandardRequest::SetInterface => self.set_interface(),
            StandardRequest::SetDescriptor | StandardRequest::SynchFrame => Response::Reject,
        }
    }

    fn is_configured(&self) -> bool {
        self.state == DeviceState::Configured
    }

    fn valid_interface(&self) -> bool {
        self.is_configured() && self.setup.index < self.descriptors.interface_count()
    }

    fn get_status(&mut self) -> Response {
        let setup = self.setup;
        if setup.direction() != Direction::In || setup.value != 0 || setup.length != 2 {
            return Response::Reject;
        }
        let status = match setup.recipient() {
            Recipient::Device if setup.index == 0 => {
                u8::from(!self.config.bus_powered) | (u8::from(self.remote_wakeup_armed) << 1)
            }
            Recipient::Interface if self.valid_interface() => 0,
            Recipient::Endpoint => match setup.index as u8 {
                0x00 | 0x80 => 0,
                EP1_IN if self.is_configured() => u8::from(self.ep1_in.state == State::Stalled),
                EP2_OUT if self.is_configured() => u8::from(self.ep2_out.state == State::Stalled),
                _ => return Response::Reject,
            },
            _ => return Response::Reject,
        };
        Response::Reply {
            data: [status, 0],
            length: 2,
        }
    }

    fn set_feature(&mut self, set: bool) -> Response {
        let setup = self.setup;
        if setup.direction() != Direction::Out || setup.length != 0 {
            return Response::Reject;
        }
        match (setup.recipient(), setup.value) {
            (Recipient::Device, FEATURE_DEVICE_REMOTE_WAKEUP) if self.config.remote_wakeup => {
                self.remote_wakeup_armed = set;
                Response::Accept
            }
            (Recipient::Endpoint, FEATURE_ENDPOINT_HALT) => match setup.index as u8 {
                0x00 | 0x80 => Response::Accept,
                EP1_IN if self.is_configured() => {
                    self.controller.select(BULK_IN_BANK);
                    self.controller.set_halt(set);
                    self.ep1_in.reset(if set { State::Stalled } else { State::Idle });
                    Response::Accept
                }
                EP2_OUT if self.is_configured() => {
                    self.controller.select(BULK_OUT_BANK);
                    self.controller.set_halt(set);
                    self.ep2_out.reset(if set { State::Stalled } else { State::Idle });
                    Response::Accept
                }
                _ => Response::Reject,
            },
            _ => Response::Reject,
        }
    }

    fn set_address<H: Handler>(&mut self, handler: &mut H) -> Response {
        let setup = self.setup;
        if setup.recipient() != Recipient::Device
            || setup.value > 127
            || setup.index != 0
            || setup.length != 0
            || self.is_configured()
        {
            return Response::Reject;
        }
        let address = setup.value as u8;
        self.controller.set_address(address);
        let state = if address == 0 {
            DeviceState::Default
        } else {
            DeviceState::Addressed
        };
        self.set_state(state, handler);
        Response::Accept
    }

    fn get_descriptor(&mut self) -> Response {
        if self.setup.direction() != Direction::In {
            return Response::Reject;
        }
        let descriptors = self.descriptors;
        match self.setup.descriptor() {
            (Some(DescriptorType::Device), _) => Response::Transmit(descriptors.device),
            (Some(DescriptorType::Configuration), 0) => Response::Transmit(descriptors.configuration),
            (Some(DescriptorType::String), index) => descriptors
                .strings
                .get(usize::from(index))
                .map_or(Response::Reject, |string| Response::TransmitString(*string)),
            _ => Response::Reject,
        }
    }

    fn get_configuration(&mut self) -> Response {
        let setup = self.setup;
        if setup.direction() != Direction::In
            || setup.length != 1
            || !matches!(self.state, DeviceState::Addressed | DeviceState::Configured)
        {
            return Response::Reject;
        }
        Response::Reply {
            data: [self.configuration, 0],
            length: 1,
        }
    }

    fn set_configuration<H: Handler>(&mut self, handler: &mut H) -> Response {
        let setup = self.setup;
        if setup.direction() != Direction::Out
            || setup.length != 0
            || !matches!(self.state, DeviceState::Addressed | DeviceState::Configured)
        {
            return Response::Reject;
        }
        match setup.value {
            0 => {
                self.deconfigure();
                self.set_state(DeviceState::Addressed, handler);
                Response::Accept
            }
            value if value == u16::from(self.descriptors.configuration_value()) => {
                self.configure(value as u8);
                self.set_state(DeviceState::Configured, handler);
                Response::Accept
            }
            _ => Response::Reject,
        }
    }

    fn get_interface(&mut self) -> Response {
        if self.setup.direction() != Direction::In || self.setup.length != 1 || !self.valid_interface() {
            return Response::Reject;
        }
        // no interface has alternate settings
        Response::Reply {
            data: [0, 0],
            length: 1,
        }
    }

    fn set_interface(&mut self) -> Response {
        if self.setup.direction() != Direction::Out
            || self.setup.length != 0
            || self.setup.value != 0
            || !self.valid_interface()
        {
            return Response::Reject;
        }
        Response::Accept
    }
}
