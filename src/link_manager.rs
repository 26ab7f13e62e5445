//! Link manager for discovering, connecting to and driving the vehicle.
//!
//! All link and telemetry state is owned by a single background task. User
//! requests, transport completions, notifications and the telemetry timers
//! are all delivered to that task as messages and handled one at a time, so
//! no two writers ever touch the state concurrently. Slow transport
//! operations (scanning, connecting) run in helper tasks that report back
//! when they finish; a newer request cancels them and bumps a generation
//! counter so their late results are ignored. Peripherals left behind by a
//! cancelled attempt or a closed session are disconnected before the next
//! scan starts.
//!
//! UI bindings read the latest [`LinkSnapshot`] and subscribe to
//! [`LinkEvent`]s for change notification.

use futures::future;
use futures::stream::StreamExt;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::ble::characteristics::select_channels;
use crate::ble::transport::{DiscoveredPeripheral, PeripheralId, Transport};
use crate::ble::BtleplugTransport;
use crate::callback::CallbackHandle;
use crate::config::LinkConfig;
use crate::error::{Error, FailureKind, Result};
use crate::link_state::{LinkInput, LinkState};
use crate::protocol::Command;
use crate::session::{Connection, DeviceHandle, Session, Tick};
use crate::telemetry::TelemetrySnapshot;

/// Capacity of the event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// A failure reported to the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkFailure {
    /// Failure category.
    pub kind: FailureKind,
    /// Human-readable description.
    pub message: String,
}

/// Everything UI bindings need to render the link.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LinkSnapshot {
    /// Current connection state.
    pub state: LinkState,
    /// The connected device. `None` unless connected.
    pub device: Option<DeviceHandle>,
    /// Reconciled temperature. `None` unless connected.
    pub telemetry: Option<TelemetrySnapshot>,
    /// The most recent user-visible failure, cleared by the next scan.
    pub last_failure: Option<LinkFailure>,
}

/// Change notifications published by the link manager.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// The connection state changed.
    StateChanged {
        /// State before the change.
        from: LinkState,
        /// State after the change.
        to: LinkState,
    },
    /// A user-visible failure occurred.
    Failure(LinkFailure),
    /// The reconciled temperature was updated.
    Telemetry(TelemetrySnapshot),
    /// The vehicle sent a frame the codec does not recognise.
    Unrecognized(String),
}

/// Requests from the public handle to the manager task.
enum Request {
    Scan,
    Rescan,
    Disconnect,
    Send(Command, oneshot::Sender<Result<()>>),
    Shutdown,
}

/// Completions and session traffic delivered to the manager task.
pub(crate) enum Internal {
    ScanFinished {
        generation: u64,
        outcome: ScanOutcome,
    },
    ConnectFinished {
        generation: u64,
        outcome: Result<Connection>,
    },
    Notification {
        generation: u64,
        payload: Vec<u8>,
    },
    LinkLost {
        generation: u64,
    },
    /// An abandoned peripheral finished disconnecting.
    Released {
        peripheral: PeripheralId,
    },
}

pub(crate) enum ScanOutcome {
    Matched(DiscoveredPeripheral),
    TimedOut,
    Failed(Error),
}

/// Handle to the link manager task.
pub struct LinkManager {
    /// Request channel into the manager task.
    requests: mpsc::UnboundedSender<Request>,
    /// Latest published snapshot.
    shared: Arc<RwLock<LinkSnapshot>>,
    /// Event channel.
    event_tx: broadcast::Sender<LinkEvent>,
    /// Callback ID counter.
    callback_counter: AtomicU64,
    /// Manager task handle.
    task: RwLock<Option<JoinHandle<()>>>,
}

impl LinkManager {
    /// Create a link manager on the platform Bluetooth adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available or the configuration
    /// is invalid.
    pub async fn new(config: LinkConfig) -> Result<Self> {
        let transport = BtleplugTransport::new().await?;
        Self::with_transport(transport, config)
    }

    /// Create a link manager on an arbitrary transport.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn with_transport<T: Transport>(transport: T, config: LinkConfig) -> Result<Self> {
        config.validate()?;

        let (requests, request_rx) = mpsc::unbounded_channel();
        let (actor, internal_rx) = LinkActor::new(transport, config);
        let shared = actor.shared.clone();
        let event_tx = actor.event_tx.clone();

        let task = tokio::spawn(actor.run(request_rx, internal_rx));

        Ok(Self {
            requests,
            shared,
            event_tx,
            callback_counter: AtomicU64::new(0),
            task: RwLock::new(Some(task)),
        })
    }

    /// Start scanning for the vehicle.
    ///
    /// Ignored while scanning or connected. Cancels an in-flight connect.
    pub fn scan(&self) -> Result<()> {
        self.request(Request::Scan)
    }

    /// Drop whatever is in progress, including an active connection, and
    /// scan again.
    pub fn rescan(&self) -> Result<()> {
        self.request(Request::Rescan)
    }

    /// Disconnect from the vehicle. Does nothing when already disconnected.
    pub fn disconnect(&self) -> Result<()> {
        self.request(Request::Disconnect)
    }

    /// Send a command to the connected vehicle.
    ///
    /// Returns once the command is queued for writing. Write failures are
    /// logged rather than returned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] when no session is active.
    pub async fn send(&self, command: Command) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.request(Request::Send(command, reply_tx))?;
        reply_rx.await.map_err(|_| stopped())?
    }

    /// Get the latest snapshot.
    pub fn snapshot(&self) -> LinkSnapshot {
        self.shared.read().clone()
    }

    /// Get the current connection state.
    pub fn state(&self) -> LinkState {
        self.shared.read().state.clone()
    }

    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        self.shared.read().state.is_connected()
    }

    /// Get the reconciled temperature, when connected.
    pub fn telemetry(&self) -> Option<TelemetrySnapshot> {
        self.shared.read().telemetry
    }

    /// Subscribe to link events.
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.event_tx.subscribe()
    }

    /// Register a callback for link events.
    pub fn on_event<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(LinkEvent) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.event_tx.subscribe();

        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => callback(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Event callback lagged, skipped {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        CallbackHandle::new(callback_id, move || {
            handle.abort();
        })
    }

    /// Disconnect, cancel any scan or connect in progress, and stop the
    /// manager task.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down link manager");

        // The task may already be gone.
        let _ = self.requests.send(Request::Shutdown);

        let task = self.task.write().take();
        if let Some(task) = task {
            task.await
                .map_err(|e| Error::Internal(format!("link manager task failed: {}", e)))?;
        }

        Ok(())
    }

    fn request(&self, request: Request) -> Result<()> {
        self.requests.send(request).map_err(|_| stopped())
    }
}

fn stopped() -> Error {
    Error::Internal("link manager stopped".to_string())
}

/// A scan or connect running in a helper task.
struct PendingAttempt {
    task: JoinHandle<()>,
    kind: AttemptKind,
}

enum AttemptKind {
    Scan,
    Connect(PeripheralId),
}

/// The single owner of link state.
struct LinkActor<T: Transport> {
    transport: Arc<T>,
    config: LinkConfig,
    state: LinkState,
    /// Bumped whenever an attempt or session is abandoned.
    generation: u64,
    pending: Option<PendingAttempt>,
    /// Disconnects of abandoned links still in flight.
    releasing: usize,
    /// A scan waiting for `releasing` to drain.
    scan_deferred: bool,
    session: Option<Session>,
    /// Last hardware temperature accepted in any session.
    last_baseline: Option<f64>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    shared: Arc<RwLock<LinkSnapshot>>,
    event_tx: broadcast::Sender<LinkEvent>,
}

impl<T: Transport> LinkActor<T> {
    fn new(transport: T, config: LinkConfig) -> (Self, mpsc::UnboundedReceiver<Internal>) {
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let actor = Self {
            transport: Arc::new(transport),
            config,
            state: LinkState::Idle,
            generation: 0,
            pending: None,
            releasing: 0,
            scan_deferred: false,
            session: None,
            last_baseline: None,
            internal_tx,
            shared: Arc::new(RwLock::new(LinkSnapshot::default())),
            event_tx,
        };

        (actor, internal_rx)
    }

    async fn run(
        mut self,
        mut requests: mpsc::UnboundedReceiver<Request>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        debug!("Link manager task started");

        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(Request::Shutdown) | None => break,
                    Some(request) => self.handle_request(request),
                },
                Some(message) = internal.recv() => self.handle_internal(message),
                tick = Session::next_tick(&mut self.session) => self.handle_tick(tick),
            }
        }

        self.teardown().await;
        debug!("Link manager task ended");
    }

    fn handle_request(&mut self, request: Request) {
        match request {
            Request::Scan => match self.state {
                LinkState::Scanning => debug!("Already scanning"),
                LinkState::Connected => debug!("Already connected, ignoring scan request"),
                _ => self.start_scan(),
            },
            Request::Rescan => {
                info!("Rescan requested");
                self.cancel_pending();
                self.apply(LinkInput::RescanRequested);
                self.start_scan();
            }
            Request::Disconnect => {
                if self.state.is_busy() {
                    self.cancel_pending();
                } else if !self.state.is_connected() {
                    debug!("Not connected, ignoring disconnect request");
                    return;
                }
                self.apply(LinkInput::DisconnectRequested);
            }
            Request::Send(command, reply) => {
                let result = match &self.session {
                    Some(session) => session.send(command),
                    None => Err(Error::NotConnected),
                };
                let _ = reply.send(result);
            }
            Request::Shutdown => {}
        }
    }

    fn handle_internal(&mut self, message: Internal) {
        match message {
            Internal::ScanFinished {
                generation,
                outcome,
            } => {
                if generation != self.generation || self.state != LinkState::Scanning {
                    debug!("Ignoring stale scan result");
                    return;
                }
                self.pending = None;
                self.on_scan_finished(outcome);
            }
            Internal::ConnectFinished {
                generation,
                outcome,
            } => {
                if generation != self.generation || self.state != LinkState::Connecting {
                    debug!("Ignoring stale connect result");
                    if let Ok(connection) = outcome {
                        self.release(connection.device.id);
                    }
                    return;
                }
                self.pending = None;
                self.on_connect_finished(outcome);
            }
            Internal::Notification {
                generation,
                payload,
            } => {
                let now = Instant::now();
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                if session.generation() != generation {
                    return;
                }

                let outcome = session.on_notification(&payload, now);
                let telemetry = session.telemetry();

                if let Some(value) = outcome.accepted {
                    self.last_baseline = Some(value);
                    self.shared.write().telemetry = Some(telemetry);
                    self.emit(LinkEvent::Telemetry(telemetry));
                }
                for text in outcome.unrecognized {
                    self.emit(LinkEvent::Unrecognized(text));
                }
            }
            Internal::Released { peripheral } => {
                debug!("Released {}", peripheral);
                self.releasing = self.releasing.saturating_sub(1);
                if self.releasing == 0 && self.scan_deferred {
                    self.scan_deferred = false;
                    if self.state == LinkState::Scanning {
                        self.spawn_scan();
                    }
                }
            }
            Internal::LinkLost { generation } => {
                let current = self.session.as_ref().map(Session::generation);
                if current != Some(generation) {
                    return;
                }
                warn!("Link to vehicle lost");
                self.apply(LinkInput::LinkLost);
                self.report(FailureKind::LinkLost, Error::ConnectionLost.to_string());
            }
        }
    }

    fn handle_tick(&mut self, tick: Tick) {
        let now = Instant::now();
        let Some(session) = self.session.as_mut() else {
            return;
        };

        match tick {
            Tick::Display => {
                let telemetry = session.on_display_tick(now);
                self.shared.write().telemetry = Some(telemetry);
                self.emit(LinkEvent::Telemetry(telemetry));
            }
            Tick::Request => {
                session.on_request_tick(now);
                let telemetry = session.telemetry();
                self.shared.write().telemetry = Some(telemetry);
            }
        }
    }

    fn on_scan_finished(&mut self, outcome: ScanOutcome) {
        match outcome {
            ScanOutcome::Matched(peripheral) => {
                info!(
                    "Found vehicle {} ({})",
                    peripheral.name.as_deref().unwrap_or("unnamed"),
                    peripheral.id
                );
                self.apply(LinkInput::PeripheralMatched);
                self.start_connect(peripheral);
            }
            ScanOutcome::TimedOut => {
                info!(
                    "No device matching {:?} found within {:?}",
                    self.config.target_name, self.config.scan_timeout
                );
                self.apply(LinkInput::ScanTimedOut);
                self.report(FailureKind::ScanTimeout, Error::ScanTimeout.to_string());
            }
            ScanOutcome::Failed(e) => {
                let message = e.to_string();
                self.apply(LinkInput::ScanFailed(message.clone()));
                self.report(e.failure_kind(), message);
                self.apply(LinkInput::ErrorReported);
            }
        }
    }

    fn on_connect_finished(&mut self, outcome: Result<Connection>) {
        match outcome {
            Ok(connection) => {
                info!("Connected to vehicle {}", connection.device.id);
                let session = Session::start(
                    self.generation,
                    connection,
                    self.transport.clone(),
                    &self.config.telemetry,
                    self.last_baseline,
                    self.internal_tx.clone(),
                );
                self.session = Some(session);
                self.apply(LinkInput::ConnectSucceeded);
            }
            Err(e) => {
                let kind = e.failure_kind();
                let message = e.to_string();
                let input = match e {
                    Error::NoWritableCharacteristic { .. } => LinkInput::NoWritableCharacteristic,
                    _ => LinkInput::ConnectFailed(message.clone()),
                };
                warn!("Connection attempt failed: {}", message);
                self.apply(input);
                self.report(kind, message);
                self.apply(LinkInput::ErrorReported);
            }
        }
    }

    fn start_scan(&mut self) {
        self.cancel_pending();
        self.generation += 1;
        self.shared.write().last_failure = None;
        self.apply(LinkInput::ScanRequested);

        // A peripheral still being released would report its disconnect
        // into the new attempt.
        if self.releasing > 0 {
            debug!("Waiting for {} abandoned link(s) to be released", self.releasing);
            self.scan_deferred = true;
        } else {
            self.spawn_scan();
        }
    }

    fn spawn_scan(&mut self) {
        info!("Scanning for {:?}", self.config.target_name);

        let generation = self.generation;
        let transport = self.transport.clone();
        let target = self.config.target_name.clone();
        let timeout = self.config.scan_timeout;
        let internal_tx = self.internal_tx.clone();

        let task = tokio::spawn(async move {
            let outcome = scan_for(transport, target, timeout).await;
            let _ = internal_tx.send(Internal::ScanFinished {
                generation,
                outcome,
            });
        });

        self.pending = Some(PendingAttempt {
            task,
            kind: AttemptKind::Scan,
        });
    }

    fn start_connect(&mut self, peripheral: DiscoveredPeripheral) {
        let generation = self.generation;
        let transport = self.transport.clone();
        let internal_tx = self.internal_tx.clone();
        let id = peripheral.id.clone();

        let task = tokio::spawn(async move {
            let outcome = connect_to(transport, peripheral).await;
            let _ = internal_tx.send(Internal::ConnectFinished {
                generation,
                outcome,
            });
        });

        self.pending = Some(PendingAttempt {
            task,
            kind: AttemptKind::Connect(id),
        });
    }

    /// Abort any scan or connect in flight and invalidate its result.
    fn cancel_pending(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };

        pending.task.abort();
        self.generation += 1;

        match pending.kind {
            AttemptKind::Scan => {
                debug!("Cancelling scan");
                let transport = self.transport.clone();
                tokio::spawn(async move {
                    if let Err(e) = transport.stop_scan().await {
                        debug!("Failed to stop cancelled scan: {}", e);
                    }
                });
            }
            AttemptKind::Connect(id) => {
                debug!("Cancelling connection attempt to {}", id);
                self.release(id);
            }
        }
    }

    /// Disconnect an abandoned peripheral. New scans wait until every
    /// release has reported back.
    fn release(&mut self, id: PeripheralId) {
        self.releasing += 1;
        let transport = self.transport.clone();
        let internal_tx = self.internal_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = transport.disconnect(&id).await {
                warn!("Failed to disconnect from {}: {}", id, e);
            }
            let _ = internal_tx.send(Internal::Released { peripheral: id });
        });
    }

    /// Drive the state machine and publish the result.
    ///
    /// Leaving `Connected` ends the session. The transport is only told to
    /// disconnect when the user asked for it.
    fn apply(&mut self, input: LinkInput) {
        let next = self.state.on(&input);
        if next == self.state {
            return;
        }

        let previous = std::mem::replace(&mut self.state, next.clone());

        if previous.is_connected() {
            if let Some(session) = self.session.take() {
                let id = session.device().id.clone();
                drop(session);
                self.generation += 1;
                if input != LinkInput::LinkLost {
                    self.release(id);
                }
            }
        }

        debug!("Link state changed: {} -> {}", previous, next);

        {
            let mut shared = self.shared.write();
            shared.state = next.clone();
            shared.device = self.session.as_ref().map(|s| s.device().clone());
            shared.telemetry = self.session.as_ref().map(Session::telemetry);
        }

        self.emit(LinkEvent::StateChanged {
            from: previous,
            to: next,
        });
    }

    fn report(&self, kind: FailureKind, message: String) {
        warn!("{:?}: {}", kind, message);
        let failure = LinkFailure { kind, message };
        self.shared.write().last_failure = Some(failure.clone());
        self.emit(LinkEvent::Failure(failure));
    }

    fn emit(&self, event: LinkEvent) {
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }

    async fn teardown(&mut self) {
        self.cancel_pending();

        if let Some(session) = self.session.take() {
            let id = session.device().id.clone();
            drop(session);
            self.generation += 1;
            if let Err(e) = self.transport.disconnect(&id).await {
                warn!("Failed to disconnect from {}: {}", id, e);
            }
        }

        self.apply(LinkInput::DisconnectRequested);
    }
}

/// Scan until the first peripheral whose name contains `target`, or until
/// `timeout` elapses.
async fn scan_for<T: Transport>(
    transport: Arc<T>,
    target: String,
    timeout: Duration,
) -> ScanOutcome {
    let stream = match transport.scan().await {
        Ok(stream) => stream,
        Err(e) => return ScanOutcome::Failed(e),
    };

    let mut matches = stream.filter(move |peripheral| future::ready(peripheral.matches(&target)));

    let outcome = match tokio::time::timeout(timeout, matches.next()).await {
        Ok(Some(peripheral)) => ScanOutcome::Matched(peripheral),
        Ok(None) | Err(_) => ScanOutcome::TimedOut,
    };

    if let Err(e) = transport.stop_scan().await {
        warn!("Failed to stop scan: {}", e);
    }

    outcome
}

/// Connect, pick channels, and subscribe to telemetry.
async fn connect_to<T: Transport>(
    transport: Arc<T>,
    peripheral: DiscoveredPeripheral,
) -> Result<Connection> {
    let id = peripheral.id.clone();

    if let Err(e) = transport.connect(&id).await {
        return Err(match e {
            Error::ConnectionFailed { .. } => e,
            other => Error::ConnectionFailed {
                reason: other.to_string(),
            },
        });
    }

    // Subscribed only once connected, so a late report from a previous link
    // to the same peripheral is never seen.
    let link_loss = match transport.disconnections().await {
        Ok(stream) => Some(stream),
        Err(e) => {
            warn!("Link-loss reports unavailable: {}", e);
            None
        }
    };

    let characteristics = match transport.discover_characteristics(&id).await {
        Ok(characteristics) => characteristics,
        Err(e) => {
            disconnect_quietly(transport.as_ref(), &id).await;
            return Err(Error::ConnectionFailed {
                reason: format!("characteristic discovery failed: {}", e),
            });
        }
    };

    let Some(channels) = select_channels(&characteristics) else {
        disconnect_quietly(transport.as_ref(), &id).await;
        return Err(Error::NoWritableCharacteristic {
            device: peripheral
                .name
                .clone()
                .unwrap_or_else(|| id.to_string()),
        });
    };

    let notifications = match channels.telemetry {
        Some(uuid) => match transport.subscribe(&id, uuid).await {
            Ok(stream) => Some(stream),
            Err(e) => {
                warn!("Telemetry subscription failed, continuing without: {}", e);
                None
            }
        },
        None => {
            debug!("No notifiable characteristic, telemetry will be simulated");
            None
        }
    };

    Ok(Connection {
        device: DeviceHandle {
            id,
            name: peripheral.name,
            command_channel: channels.command,
            telemetry_channel: channels.telemetry,
        },
        notifications,
        link_loss,
    })
}

async fn disconnect_quietly<T: Transport>(transport: &T, id: &PeripheralId) {
    if let Err(e) = transport.disconnect(id).await {
        debug!("Failed to disconnect from {}: {}", id, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::transport::{CharacteristicInfo, MockTransport};
    use futures::stream;
    use uuid::Uuid;

    fn vehicle() -> DiscoveredPeripheral {
        DiscoveredPeripheral {
            id: PeripheralId::new("AA:BB:CC:DD:EE:FF"),
            name: Some("ESP32-Car".to_string()),
            rssi: Some(-55),
        }
    }

    fn mock_scanning_vehicle() -> MockTransport {
        let mut mock = MockTransport::new();
        mock.expect_scan().returning(|| {
            Ok(stream::iter(vec![vehicle()])
                .chain(stream::pending())
                .boxed())
        });
        mock.expect_stop_scan().returning(|| Ok(()));
        mock.expect_disconnections()
            .returning(|| Ok(stream::pending().boxed()));
        mock.expect_disconnect().returning(|_| Ok(()));
        mock
    }

    async fn next_failure(rx: &mut broadcast::Receiver<LinkEvent>) -> LinkFailure {
        loop {
            match rx.recv().await {
                Ok(LinkEvent::Failure(failure)) => return failure,
                Ok(_) => continue,
                Err(e) => panic!("event channel closed: {e}"),
            }
        }
    }

    #[tokio::test]
    async fn test_connect_failure_reports_and_returns_to_idle() {
        let mut mock = mock_scanning_vehicle();
        mock.expect_connect().returning(|_| {
            Err(Error::ConnectionFailed {
                reason: "refused".to_string(),
            })
        });

        let manager = LinkManager::with_transport(mock, LinkConfig::default()).unwrap();
        let mut rx = manager.subscribe();
        manager.scan().unwrap();

        let failure = next_failure(&mut rx).await;
        assert_eq!(failure.kind, FailureKind::ConnectFailure);
        assert!(failure.message.contains("refused"));

        manager.shutdown().await.unwrap();
        assert_eq!(manager.state(), LinkState::Idle);
    }

    #[tokio::test]
    async fn test_no_writable_characteristic_is_reported() {
        let mut mock = mock_scanning_vehicle();
        mock.expect_connect().returning(|_| Ok(()));
        mock.expect_discover_characteristics().returning(|_| {
            Ok(vec![CharacteristicInfo {
                uuid: Uuid::from_u128(0xFFE1),
                service: Uuid::from_u128(0xFFE0),
                writable: false,
                notifiable: true,
            }])
        });

        let manager = LinkManager::with_transport(mock, LinkConfig::default()).unwrap();
        let mut rx = manager.subscribe();
        manager.scan().unwrap();

        let failure = next_failure(&mut rx).await;
        assert_eq!(failure.kind, FailureKind::NoWritableCharacteristic);
        assert!(failure.message.contains("ESP32-Car"));
        assert_eq!(
            manager.snapshot().last_failure.map(|f| f.kind),
            Some(FailureKind::NoWritableCharacteristic)
        );
        assert!(manager.snapshot().device.is_none());
    }

    #[tokio::test]
    async fn test_scan_failure_is_reported() {
        let mut mock = MockTransport::new();
        mock.expect_scan()
            .returning(|| Err(Error::BluetoothUnavailable));
        mock.expect_stop_scan().returning(|| Ok(()));

        let manager = LinkManager::with_transport(mock, LinkConfig::default()).unwrap();
        let mut rx = manager.subscribe();
        manager.scan().unwrap();

        let failure = next_failure(&mut rx).await;
        assert!(failure.message.contains("Bluetooth not available"));
    }

    #[tokio::test]
    async fn test_stale_connect_result_is_released() {
        let mut mock = MockTransport::new();
        mock.expect_disconnect().times(1).returning(|_| Ok(()));

        let (mut actor, mut internal) = LinkActor::new(mock, LinkConfig::default());
        actor.generation = 3;

        let connection = Connection {
            device: DeviceHandle {
                id: vehicle().id,
                name: vehicle().name,
                command_channel: Uuid::from_u128(0xFFE1),
                telemetry_channel: None,
            },
            notifications: None,
            link_loss: None,
        };
        actor.handle_internal(Internal::ConnectFinished {
            generation: 2,
            outcome: Ok(connection),
        });

        assert_eq!(actor.state, LinkState::Idle);
        assert!(actor.session.is_none());
        assert_eq!(actor.releasing, 1);

        match internal.recv().await {
            Some(Internal::Released { peripheral }) => assert_eq!(peripheral, vehicle().id),
            _ => panic!("expected the stale peripheral to be released"),
        }
    }

    #[tokio::test]
    async fn test_scan_waits_for_release() {
        let mut mock = MockTransport::new();
        mock.expect_scan().times(1).returning(|| {
            Ok(stream::iter(vec![vehicle()])
                .chain(stream::pending())
                .boxed())
        });
        mock.expect_stop_scan().returning(|| Ok(()));
        mock.expect_disconnect().returning(|_| Ok(()));

        let (mut actor, mut internal) = LinkActor::new(mock, LinkConfig::default());
        actor.release(vehicle().id);
        actor.handle_request(Request::Scan);

        assert_eq!(actor.state, LinkState::Scanning);
        assert!(actor.scan_deferred);
        assert!(actor.pending.is_none());

        let released = internal.recv().await.expect("release report");
        assert!(matches!(released, Internal::Released { .. }));
        actor.handle_internal(released);

        assert!(!actor.scan_deferred);
        assert!(matches!(
            actor.pending.as_ref().map(|p| &p.kind),
            Some(AttemptKind::Scan)
        ));
    }

    #[tokio::test]
    async fn test_send_without_connection_fails() {
        let manager =
            LinkManager::with_transport(MockTransport::new(), LinkConfig::default()).unwrap();
        assert!(matches!(
            manager.send(Command::RequestTemperature).await,
            Err(Error::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let config = LinkConfig::default().with_target_name("");
        assert!(matches!(
            LinkManager::with_transport(MockTransport::new(), config),
            Err(Error::InvalidParameter { .. })
        ));
    }

    #[tokio::test]
    async fn test_requests_after_shutdown_fail() {
        let manager =
            LinkManager::with_transport(MockTransport::new(), LinkConfig::default()).unwrap();
        manager.shutdown().await.unwrap();
        assert!(matches!(manager.scan(), Err(Error::Internal(_))));
    }
}
