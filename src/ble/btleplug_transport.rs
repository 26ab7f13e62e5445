//! [`Transport`] implementation on top of btleplug.
//!
//! Uses the first Bluetooth adapter reported by the platform manager.

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::{BoxStream, StreamExt};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::ble::transport::{CharacteristicInfo, DiscoveredPeripheral, PeripheralId, Transport};
use crate::error::{Error, Result};

/// BLE transport backed by the platform Bluetooth stack.
pub struct BtleplugTransport {
    /// The BLE adapter in use.
    adapter: Adapter,
    /// Peripherals seen while scanning, by identifier.
    peripherals: Arc<RwLock<HashMap<PeripheralId, Peripheral>>>,
}

impl BtleplugTransport {
    /// Create a transport on the first available adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(Self::with_adapter(adapter))
    }

    /// Create a transport on a specific adapter.
    pub fn with_adapter(adapter: Adapter) -> Self {
        Self {
            adapter,
            peripherals: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Get the underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    fn peripheral(&self, id: &PeripheralId) -> Result<Peripheral> {
        self.peripherals
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::ConnectionFailed {
                reason: format!("unknown peripheral {}", id),
            })
    }

    fn characteristic(peripheral: &Peripheral, uuid: Uuid) -> Result<Characteristic> {
        peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or_else(|| Error::WriteFailed {
                reason: format!("characteristic {} not found", uuid),
            })
    }

    /// Resolve a discovery event into a peripheral record.
    async fn process_peripheral(
        adapter: &Adapter,
        id: btleplug::platform::PeripheralId,
        peripherals: &Arc<RwLock<HashMap<PeripheralId, Peripheral>>>,
    ) -> Option<DiscoveredPeripheral> {
        let peripheral = match adapter.peripheral(&id).await {
            Ok(p) => p,
            Err(e) => {
                trace!("Failed to get peripheral: {}", e);
                return None;
            }
        };

        let properties = match peripheral.properties().await {
            Ok(Some(p)) => p,
            _ => return None,
        };

        let identifier = PeripheralId(id.to_string());
        peripherals.write().insert(identifier.clone(), peripheral);

        Some(DiscoveredPeripheral {
            id: identifier,
            name: properties.local_name,
            rssi: properties.rssi,
        })
    }
}

#[async_trait]
impl Transport for BtleplugTransport {
    async fn scan(&self) -> Result<BoxStream<'static, DiscoveredPeripheral>> {
        info!("Starting BLE scan");

        let events = self.adapter.events().await.map_err(Error::Bluetooth)?;

        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(Error::Bluetooth)?;

        let adapter = self.adapter.clone();
        let peripherals = self.peripherals.clone();

        let stream = events.filter_map(move |event| {
            let adapter = adapter.clone();
            let peripherals = peripherals.clone();
            async move {
                match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                        trace!("Device seen: {:?}", id);
                        Self::process_peripheral(&adapter, id, &peripherals).await
                    }
                    _ => None,
                }
            }
        });

        Ok(stream.boxed())
    }

    async fn stop_scan(&self) -> Result<()> {
        info!("Stopping BLE scan");
        self.adapter.stop_scan().await.map_err(Error::Bluetooth)
    }

    async fn connect(&self, peripheral: &PeripheralId) -> Result<()> {
        let handle = self.peripheral(peripheral)?;

        if handle.is_connected().await.unwrap_or(false) {
            info!("Peripheral {} already connected at BLE level", peripheral);
        } else {
            handle.connect().await.map_err(|e| Error::ConnectionFailed {
                reason: e.to_string(),
            })?;
        }

        handle
            .discover_services()
            .await
            .map_err(|e| Error::ConnectionFailed {
                reason: format!("service discovery failed: {}", e),
            })?;

        info!("Connected to {}", peripheral);
        Ok(())
    }

    async fn discover_characteristics(
        &self,
        peripheral: &PeripheralId,
    ) -> Result<Vec<CharacteristicInfo>> {
        let handle = self.peripheral(peripheral)?;

        let mut found = Vec::new();
        for service in handle.services() {
            for characteristic in service.characteristics {
                debug!(
                    "Found characteristic: {} in service {}, properties: {:?}",
                    characteristic.uuid, service.uuid, characteristic.properties
                );
                let props = characteristic.properties;
                found.push(CharacteristicInfo {
                    uuid: characteristic.uuid,
                    service: service.uuid,
                    writable: props
                        .intersects(CharPropFlags::WRITE | CharPropFlags::WRITE_WITHOUT_RESPONSE),
                    notifiable: props.intersects(CharPropFlags::NOTIFY | CharPropFlags::INDICATE),
                });
            }
        }

        debug!("Discovered {} characteristics", found.len());

        Ok(found)
    }

    async fn write(&self, peripheral: &PeripheralId, characteristic: Uuid, data: &[u8]) -> Result<()> {
        let handle = self.peripheral(peripheral)?;
        let characteristic = Self::characteristic(&handle, characteristic)?;

        let write_type = if characteristic.properties.contains(CharPropFlags::WRITE) {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };

        handle
            .write(&characteristic, data, write_type)
            .await
            .map_err(|e| Error::WriteFailed {
                reason: e.to_string(),
            })?;

        trace!(
            "Wrote {} bytes to characteristic {}",
            data.len(),
            characteristic.uuid
        );

        Ok(())
    }

    async fn subscribe(
        &self,
        peripheral: &PeripheralId,
        characteristic: Uuid,
    ) -> Result<BoxStream<'static, Vec<u8>>> {
        let handle = self.peripheral(peripheral)?;
        let target = Self::characteristic(&handle, characteristic)?;

        handle.subscribe(&target).await.map_err(Error::Bluetooth)?;
        let notifications = handle.notifications().await.map_err(Error::Bluetooth)?;

        debug!("Subscribed to notifications from {}", characteristic);

        let stream = notifications.filter_map(move |notification| async move {
            (notification.uuid == characteristic).then_some(notification.value)
        });

        Ok(stream.boxed())
    }

    async fn disconnections(&self) -> Result<BoxStream<'static, PeripheralId>> {
        let events = self.adapter.events().await.map_err(Error::Bluetooth)?;

        let stream = events.filter_map(|event| async move {
            match event {
                CentralEvent::DeviceDisconnected(id) => Some(PeripheralId(id.to_string())),
                _ => None,
            }
        });

        Ok(stream.boxed())
    }

    async fn disconnect(&self, peripheral: &PeripheralId) -> Result<()> {
        let handle = self.peripheral(peripheral)?;

        if !handle.is_connected().await.unwrap_or(false) {
            debug!("Peripheral {} already disconnected", peripheral);
            return Ok(());
        }

        handle.disconnect().await.map_err(Error::Bluetooth)?;
        info!("Disconnected from {}", peripheral);
        Ok(())
    }
}
