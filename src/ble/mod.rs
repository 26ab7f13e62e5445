//! BLE communication module.
//!
//! This module provides the transport boundary the link manager talks to,
//! its btleplug implementation, and command/telemetry channel selection.

pub mod btleplug_transport;
pub mod characteristics;
pub mod transport;

pub use btleplug_transport::BtleplugTransport;
pub use characteristics::{select_channels, ChannelSelection};
pub use transport::{CharacteristicInfo, DiscoveredPeripheral, PeripheralId, Transport};
