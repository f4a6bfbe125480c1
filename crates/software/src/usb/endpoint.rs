use bitmask_enum::bitmask;

/// Address of the control endpoint.
pub const EP0: u8 = 0x00;
/// Address of the bulk IN endpoint carrying MIDI from the device to the host.
pub const EP1_IN: u8 = 0x81;
/// Address of the bulk OUT endpoint carrying MIDI from the host to the device.
pub const EP2_OUT: u8 = 0x02;

/// Maximum packet size of both bulk endpoints.
pub const BULK_MAX_PACKET_SIZE: usize = 64;

/// Where an endpoint stands in its current transfer.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    /// No transfer in progress.
    #[default]
    Idle,
    /// An OUT transfer has been issued and is collecting packets.
    Receiving,
    /// An IN transfer has been issued and is sending packets.
    Transmitting,
    /// The endpoint answers with STALL, either because the host halted it or because the last control request
    /// was rejected.
    Stalled,
    /// The endpoint is not part of the active configuration.
    Halted,
}

/// Conditions recorded alongside the [`State`] of an endpoint.
#[bitmask(u8)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Flags {
    /// A packet arrived that could not be serviced yet; the hardware keeps NAKing until it is.
    OutPacketPending,
    /// An IN packet is owed to the host.
    InPacketPending,
    /// A control OUT data stage is expected but no receive buffer has been registered.
    WaitForRead,
    /// Report the end of the transfer to the handler.
    NotifyOnComplete,
}

/// Transfer bookkeeping of one logical endpoint.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EndpointState {
    /// Where the endpoint stands.
    pub state: State,
    /// Total bytes of the current transfer.
    pub length: usize,
    /// Position of the next byte in the transfer's buffer.
    pub cursor: usize,
    /// Bytes left to move.
    pub remaining: usize,
    /// Pending conditions.
    pub flags: Flags,
}

impl EndpointState {
    /// An endpoint with nothing in flight.
    pub const fn idle() -> Self {
        Self::with_state(State::Idle)
    }

    /// An endpoint outside the active configuration.
    pub const fn halted() -> Self {
        Self::with_state(State::Halted)
    }

    const fn with_state(state: State) -> Self {
        Self {
            state,
            length: 0,
            cursor: 0,
            remaining: 0,
            flags: Flags::none(),
        }
    }

    /// Forgets any transfer in flight and enters `state`.
    pub fn reset(&mut self, state: State) {
        *self = Self::with_state(state);
    }

    /// Starts a transfer of `length` bytes.
    pub fn begin(&mut self, state: State, length: usize, notify: bool) {
        self.state = state;
        self.length = length;
        self.cursor = 0;
        self.remaining = length;
        self.flags &= !Flags::WaitForRead;
        if notify {
            self.flags |= Flags::NotifyOnComplete;
        } else {
            self.flags &= !Flags::NotifyOnComplete;
        }
    }

    /// Bytes moved so far.
    pub fn transferred(&self) -> usize {
        self.length - self.remaining
    }

    /// Whether a transfer is in progress.
    pub fn is_busy(&self) -> bool {
        matches!(self.state, State::Receiving | State::Transmitting)
    }
}

/// Outcome reported when a transfer ends.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransferStatus {
    /// Every byte was moved.
    Ok,
    /// The host sent more than the registered buffer could hold; the packet is left pending.
    ReceiveBufferOverrun,
}

/// Reasons a transfer cannot be issued.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EndpointError {
    /// A transfer is already in progress on the endpoint.
    Busy,
    /// The endpoint is halted or not configured.
    Halted,
    /// The address names no endpoint of this device, or one of the wrong direction.
    InvalidEndpoint,
    /// The data does not fit the endpoint's transfer buffer.
    Overflow,
}
