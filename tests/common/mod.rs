//! Scripted in-memory transport for driving the link manager in tests.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use rover_link_ble::{
    CharacteristicInfo, DiscoveredPeripheral, Error, LinkManager, PeripheralId, Result, Transport,
};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const VEHICLE_ID: &str = "24:6F:28:AA:BB:CC";
pub const COMMAND_UUID: Uuid = Uuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e);
pub const TELEMETRY_UUID: Uuid = Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e);
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e);

#[derive(Default)]
struct FakeState {
    peripherals: Vec<DiscoveredPeripheral>,
    characteristics: Vec<CharacteristicInfo>,
    fail_connect: bool,
    fail_writes: bool,
    connect_delay: Option<Duration>,
    write_delay: Option<Duration>,
    disconnect_delay: Option<Duration>,
    connected: bool,
    connects: usize,
    disconnects: usize,
    scans: usize,
    writes: Vec<String>,
    write_attempts: Vec<String>,
    calls: Vec<&'static str>,
    notifications: Option<mpsc::UnboundedSender<Vec<u8>>>,
    link_loss: Vec<mpsc::UnboundedSender<PeripheralId>>,
}

/// A transport whose radio is a script. Clones share state, so a test keeps
/// one clone to inject traffic while the manager owns the other.
#[derive(Clone, Default)]
pub struct FakeTransport {
    state: Arc<Mutex<FakeState>>,
}

impl FakeTransport {
    /// A transport advertising one vehicle with the usual UART-style layout.
    pub fn with_vehicle() -> Self {
        let transport = Self::default();
        {
            let mut state = transport.state.lock();
            state.peripherals = vec![
                DiscoveredPeripheral {
                    id: PeripheralId::new("11:22:33:44:55:66"),
                    name: Some("Headphones".to_string()),
                    rssi: Some(-70),
                },
                DiscoveredPeripheral {
                    id: PeripheralId::new(VEHICLE_ID),
                    name: Some("ESP32-Rover".to_string()),
                    rssi: Some(-48),
                },
            ];
            state.characteristics = vec![
                CharacteristicInfo {
                    uuid: COMMAND_UUID,
                    service: SERVICE_UUID,
                    writable: true,
                    notifiable: false,
                },
                CharacteristicInfo {
                    uuid: TELEMETRY_UUID,
                    service: SERVICE_UUID,
                    writable: false,
                    notifiable: true,
                },
            ];
        }
        transport
    }

    /// A transport that sees nothing while scanning.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn set_characteristics(&self, characteristics: Vec<CharacteristicInfo>) {
        self.state.lock().characteristics = characteristics;
    }

    pub fn fail_connect(&self) {
        self.state.lock().fail_connect = true;
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        self.state.lock().connect_delay = Some(delay);
    }

    pub fn set_write_delay(&self, delay: Duration) {
        self.state.lock().write_delay = Some(delay);
    }

    pub fn set_disconnect_delay(&self, delay: Duration) {
        self.state.lock().disconnect_delay = Some(delay);
    }

    /// Deliver a notification payload from the vehicle.
    pub fn notify(&self, payload: &str) {
        let state = self.state.lock();
        if let Some(tx) = &state.notifications {
            let _ = tx.unbounded_send(payload.as_bytes().to_vec());
        }
    }

    /// Simulate the vehicle dropping off the air.
    pub fn drop_link(&self) {
        let mut state = self.state.lock();
        state.connected = false;
        for tx in &state.link_loss {
            let _ = tx.unbounded_send(PeripheralId::new(VEHICLE_ID));
        }
    }

    pub fn writes(&self) -> Vec<String> {
        self.state.lock().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.state.lock().writes.clear();
    }

    pub fn count_writes(&self, frame: &str) -> usize {
        self.state.lock().writes.iter().filter(|w| *w == frame).count()
    }

    /// Every frame handed to the radio, including failed writes.
    pub fn write_attempts(&self) -> Vec<String> {
        self.state.lock().write_attempts.clone()
    }

    pub fn count_attempts(&self, frame: &str) -> usize {
        self.state
            .lock()
            .write_attempts
            .iter()
            .filter(|w| *w == frame)
            .count()
    }

    /// Completed `scan`, `connect` and `disconnect` calls, in order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.state.lock().calls.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    pub fn connects(&self) -> usize {
        self.state.lock().connects
    }

    pub fn disconnects(&self) -> usize {
        self.state.lock().disconnects
    }

    pub fn scans(&self) -> usize {
        self.state.lock().scans
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn scan(&self) -> Result<BoxStream<'static, DiscoveredPeripheral>> {
        let mut state = self.state.lock();
        state.scans += 1;
        state.calls.push("scan");
        let seen = state.peripherals.clone();
        Ok(stream::iter(seen).chain(stream::pending()).boxed())
    }

    async fn stop_scan(&self) -> Result<()> {
        Ok(())
    }

    async fn connect(&self, _peripheral: &PeripheralId) -> Result<()> {
        let delay = {
            let mut state = self.state.lock();
            state.connects += 1;
            state.connect_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        state.calls.push("connect");
        if state.fail_connect {
            return Err(Error::ConnectionFailed {
                reason: "peripheral refused connection".to_string(),
            });
        }
        state.connected = true;
        Ok(())
    }

    async fn discover_characteristics(
        &self,
        _peripheral: &PeripheralId,
    ) -> Result<Vec<CharacteristicInfo>> {
        Ok(self.state.lock().characteristics.clone())
    }

    async fn write(&self, _peripheral: &PeripheralId, _characteristic: Uuid, data: &[u8]) -> Result<()> {
        let delay = self.state.lock().write_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        state
            .write_attempts
            .push(String::from_utf8_lossy(data).into_owned());
        if !state.connected {
            return Err(Error::NotConnected);
        }
        if state.fail_writes {
            return Err(Error::WriteFailed {
                reason: "characteristic busy".to_string(),
            });
        }
        state
            .writes
            .push(String::from_utf8_lossy(data).into_owned());
        Ok(())
    }

    async fn subscribe(
        &self,
        _peripheral: &PeripheralId,
        _characteristic: Uuid,
    ) -> Result<BoxStream<'static, Vec<u8>>> {
        let (tx, rx) = mpsc::unbounded();
        self.state.lock().notifications = Some(tx);
        Ok(rx.boxed())
    }

    async fn disconnections(&self) -> Result<BoxStream<'static, PeripheralId>> {
        let (tx, rx) = mpsc::unbounded();
        self.state.lock().link_loss.push(tx);
        Ok(rx.boxed())
    }

    async fn disconnect(&self, peripheral: &PeripheralId) -> Result<()> {
        let delay = self.state.lock().disconnect_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        state.calls.push("disconnect");
        if state.connected {
            state.disconnects += 1;
            state.connected = false;
            // The stack reports every disconnect, requested or not.
            for tx in &state.link_loss {
                let _ = tx.unbounded_send(peripheral.clone());
            }
        }
        Ok(())
    }
}

/// Poll `condition` until it holds or `limit` of (virtual) time passes.
pub async fn wait_until<F>(limit: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Scan and wait for the manager to report a connection.
pub async fn connect(manager: &LinkManager) {
    manager.scan().expect("scan request");
    assert!(
        wait_until(Duration::from_secs(2), || manager.is_connected()).await,
        "vehicle did not connect, state = {}",
        manager.state()
    );
}
