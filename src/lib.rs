// Allow derivable impls for clarity
#![allow(clippy::derivable_impls)]

//! # rover-link-ble
//!
//! A Rust library for driving an ESP32-based remote-control vehicle over
//! Bluetooth Low Energy and displaying its temperature telemetry.
//!
//! ## Features
//!
//! - **Vehicle Discovery**: Scan for a peripheral whose advertised name
//!   contains a target substring
//! - **Driving**: Direction, lights, horn and speed commands over a text
//!   line protocol
//! - **Telemetry**: Periodic `GET_TEMP` polling with a rate-limited display
//!   value that falls back to a bounded random walk when the hardware goes
//!   quiet
//! - **Observation**: Snapshots and change events for UI bindings
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rover_link_ble::{Command, Direction, LinkConfig, LinkManager, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let manager = LinkManager::new(LinkConfig::default()).await?;
//!     manager.scan()?;
//!
//!     // Wait for the vehicle to connect
//!     tokio::time::sleep(std::time::Duration::from_secs(6)).await;
//!
//!     if manager.is_connected() {
//!         manager.send(Command::Move(Direction::Up)).await?;
//!
//!         if let Some(telemetry) = manager.telemetry() {
//!             println!("Temperature: {:.1}°C ({})", telemetry.displayed, telemetry.source);
//!         }
//!     }
//!
//!     manager.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for data types

// Public modules
pub mod ble;
pub mod callback;
pub mod config;
pub mod data;
pub mod error;
pub mod link_manager;
pub mod link_state;
pub mod protocol;
pub mod telemetry;

mod session;

// Re-exports for convenience
pub use callback::CallbackHandle;
pub use config::{LinkConfig, TelemetryConfig};
pub use error::{Error, FailureKind, Result};
pub use link_manager::{LinkEvent, LinkFailure, LinkManager, LinkSnapshot};
pub use link_state::{LinkInput, LinkState};
pub use session::DeviceHandle;
pub use telemetry::{RejectReason, TelemetryReconciler, TelemetrySnapshot};

// Re-export commonly used types from submodules
pub use ble::{
    BtleplugTransport, CharacteristicInfo, DiscoveredPeripheral, PeripheralId, Transport,
};
pub use data::{
    celsius_to_fahrenheit, SensorRange, SimulationModel, TemperatureReading, TemperatureSource,
};
pub use protocol::{Command, Direction, InboundEvent, Light, Speed};
