//! Connection lifecycle state machine.
//!
//! [`LinkState::on`] is a pure, total transition function: every
//! [`LinkInput`] maps every state to exactly one next state. Inputs that do
//! not apply to the current state leave it unchanged.

/// Connection state of the vehicle link.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LinkState {
    /// Nothing in progress.
    #[default]
    Idle,
    /// Looking for a matching peripheral.
    Scanning,
    /// Connecting to the matched peripheral.
    Connecting,
    /// Connected with a writable command channel.
    Connected,
    /// The previous connection ended.
    Disconnected,
    /// The last attempt failed. Reported once, then the manager returns to idle.
    Error(String),
}

/// Inputs that drive [`LinkState`] transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkInput {
    /// The user asked to scan.
    ScanRequested,
    /// A peripheral with a matching name was found.
    PeripheralMatched,
    /// The scan window closed with no match.
    ScanTimedOut,
    /// The transport could not scan.
    ScanFailed(String),
    /// Connect and channel discovery succeeded.
    ConnectSucceeded,
    /// The transport failed to connect.
    ConnectFailed(String),
    /// The peripheral has no writable characteristic.
    NoWritableCharacteristic,
    /// The user asked to disconnect.
    DisconnectRequested,
    /// The transport reported the link dropped.
    LinkLost,
    /// The user asked to start over.
    RescanRequested,
    /// An error state has been reported upward.
    ErrorReported,
}

impl LinkState {
    /// Compute the next state for an input.
    pub fn on(&self, input: &LinkInput) -> LinkState {
        use LinkInput as I;
        use LinkState as S;

        match (self, input) {
            (_, I::RescanRequested) => S::Idle,

            (S::Idle | S::Disconnected | S::Error(_) | S::Connecting, I::ScanRequested) => {
                S::Scanning
            }

            (S::Scanning, I::PeripheralMatched) => S::Connecting,
            (S::Scanning, I::ScanTimedOut) => S::Idle,
            (S::Scanning, I::ScanFailed(reason)) => S::Error(reason.clone()),

            (S::Connecting, I::ConnectSucceeded) => S::Connected,
            (S::Connecting, I::ConnectFailed(reason)) => S::Error(reason.clone()),
            (S::Connecting, I::NoWritableCharacteristic) => {
                S::Error("no writable characteristic".to_string())
            }

            (S::Connected, I::DisconnectRequested | I::LinkLost) => S::Disconnected,
            (S::Scanning | S::Connecting, I::DisconnectRequested) => S::Idle,

            (S::Error(_), I::ErrorReported) => S::Idle,

            (state, _) => state.clone(),
        }
    }

    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if a scan or connect attempt is in flight.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Scanning | Self::Connecting)
    }
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Scanning => write!(f, "Scanning"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Error(reason) => write!(f, "Error: {}", reason),
        }
    }
}
