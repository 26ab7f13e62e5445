//! Error types for the rover-link-ble crate.

use thiserror::Error;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// No peripheral matching the target name was found within the scan window.
    #[error("Scan timed out without finding a matching vehicle")]
    ScanTimeout,

    /// Failed to establish a connection to the vehicle.
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// Description of why the connection failed.
        reason: String,
    },

    /// The peripheral exposes no characteristic that accepts writes.
    #[error("Device {device} has no writable characteristic")]
    NoWritableCharacteristic {
        /// Identifier of the incompatible device.
        device: String,
    },

    /// Writing a command frame to the vehicle failed.
    #[error("Write failed: {reason}")]
    WriteFailed {
        /// Description of the failure reported by the transport.
        reason: String,
    },

    /// Operation requires a connection but the vehicle is not connected.
    #[error("Vehicle not connected")]
    NotConnected,

    /// The connection to the vehicle was lost.
    #[error("Connection lost")]
    ConnectionLost,

    /// Inbound telemetry was malformed or physically impossible.
    #[error("Telemetry rejected: {frame}")]
    DecodeRejected {
        /// The offending frame, as text.
        frame: String,
    },

    /// An invalid parameter was provided.
    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter {
        /// The name of the parameter.
        name: String,
        /// The invalid value that was provided.
        value: String,
    },

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// User-facing failure categories reported by the link manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FailureKind {
    /// No peripheral found; the manager returned to idle.
    ScanTimeout,
    /// Transport-level connection failure; an explicit rescan is required.
    ConnectFailure,
    /// The device is incompatible.
    NoWritableCharacteristic,
    /// A transient write failure.
    WriteFailure,
    /// Telemetry was dropped.
    DecodeReject,
    /// The link dropped while connected.
    LinkLost,
}

impl Error {
    /// Classify this error into the user-facing failure taxonomy.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::ScanTimeout => FailureKind::ScanTimeout,
            Self::NoWritableCharacteristic { .. } => FailureKind::NoWritableCharacteristic,
            Self::WriteFailed { .. } => FailureKind::WriteFailure,
            Self::DecodeRejected { .. } => FailureKind::DecodeReject,
            Self::ConnectionLost => FailureKind::LinkLost,
            Self::Bluetooth(_)
            | Self::BluetoothUnavailable
            | Self::ConnectionFailed { .. }
            | Self::NotConnected
            | Self::InvalidParameter { .. }
            | Self::Internal(_) => FailureKind::ConnectFailure,
        }
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
