//! Transport abstraction over the BLE stack.
//!
//! The link manager only needs a narrow set of operations from the radio:
//! scan, connect, enumerate characteristics, write, subscribe and
//! disconnect. Production uses [`BtleplugTransport`](super::BtleplugTransport);
//! tests drive the manager with scripted in-memory transports.

use async_trait::async_trait;
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::error::Result;

/// Opaque, platform-specific peripheral identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeripheralId(pub String);

impl PeripheralId {
    /// Create an identifier from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A peripheral seen while scanning.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredPeripheral {
    /// Platform identifier.
    pub id: PeripheralId,
    /// Advertised local name, if any.
    pub name: Option<String>,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
}

impl DiscoveredPeripheral {
    /// Check whether the advertised name contains `target`.
    pub fn matches(&self, target: &str) -> bool {
        self.name
            .as_deref()
            .map(|name| name.contains(target))
            .unwrap_or(false)
    }
}

/// Capabilities of a discovered GATT characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharacteristicInfo {
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// UUID of the owning service.
    pub service: Uuid,
    /// Accepts writes, with or without response.
    pub writable: bool,
    /// Supports notifications or indications.
    pub notifiable: bool,
}

/// The narrow BLE capability set the link manager depends on.
///
/// Every operation is asynchronous and fallible.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Start scanning. The stream yields peripherals as they are seen and
    /// runs until [`stop_scan`](Transport::stop_scan) is called.
    async fn scan(&self) -> Result<BoxStream<'static, DiscoveredPeripheral>>;

    /// Stop an active scan.
    async fn stop_scan(&self) -> Result<()>;

    /// Connect to a peripheral.
    async fn connect(&self, peripheral: &PeripheralId) -> Result<()>;

    /// Discover the characteristics of a connected peripheral.
    async fn discover_characteristics(
        &self,
        peripheral: &PeripheralId,
    ) -> Result<Vec<CharacteristicInfo>>;

    /// Write bytes to a characteristic.
    async fn write(&self, peripheral: &PeripheralId, characteristic: Uuid, data: &[u8])
        -> Result<()>;

    /// Subscribe to a characteristic and stream its notification payloads.
    async fn subscribe(
        &self,
        peripheral: &PeripheralId,
        characteristic: Uuid,
    ) -> Result<BoxStream<'static, Vec<u8>>>;

    /// Stream the identifiers of peripherals whose link dropped.
    async fn disconnections(&self) -> Result<BoxStream<'static, PeripheralId>>;

    /// Disconnect from a peripheral.
    async fn disconnect(&self, peripheral: &PeripheralId) -> Result<()>;
}
