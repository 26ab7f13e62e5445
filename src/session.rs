//! Per-connection session.
//!
//! A [`Session`] exists exactly while the link is connected. It owns the
//! device handle, the telemetry reconciler, both telemetry timers, the
//! command writer task and the notification listener task. Dropping the
//! session stops the timers, the listener and the writer. Frames still
//! queued for the old link are discarded, never written.

use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::ble::transport::{PeripheralId, Transport};
use crate::config::TelemetryConfig;
use crate::error::{Error, Result};
use crate::link_manager::Internal;
use crate::protocol::{decode_frames, Command, InboundEvent};
use crate::telemetry::{TelemetryReconciler, TelemetrySnapshot};

/// Commands queued for the writer before new ones are refused.
const COMMAND_QUEUE_DEPTH: usize = 32;

/// Identity and channels of the connected vehicle.
///
/// Only handed out while the link is connected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    /// Platform identifier.
    pub id: PeripheralId,
    /// Advertised name.
    pub name: Option<String>,
    /// Characteristic commands are written to.
    pub command_channel: Uuid,
    /// Characteristic telemetry arrives on, if any.
    pub telemetry_channel: Option<Uuid>,
}

/// A freshly established link, before the session takes it over.
pub(crate) struct Connection {
    pub(crate) device: DeviceHandle,
    pub(crate) notifications: Option<BoxStream<'static, Vec<u8>>>,
    pub(crate) link_loss: Option<BoxStream<'static, PeripheralId>>,
}

/// Which telemetry timer fired.
pub(crate) enum Tick {
    Display,
    Request,
}

/// Result of handling one notification payload.
#[derive(Debug, Default)]
pub(crate) struct NotificationOutcome {
    /// Last hardware value accepted from the payload.
    pub(crate) accepted: Option<f64>,
    /// Frames the codec did not recognise.
    pub(crate) unrecognized: Vec<String>,
}

/// State scoped to one connection.
pub(crate) struct Session {
    generation: u64,
    device: DeviceHandle,
    reconciler: TelemetryReconciler,
    display_timer: Interval,
    request_timer: Interval,
    commands: mpsc::Sender<Command>,
    writer: JoinHandle<()>,
    listener: JoinHandle<()>,
}

impl Session {
    /// Take over a connection: start the writer and listener, arm the
    /// timers and queue the handshake.
    pub(crate) fn start<T: Transport>(
        generation: u64,
        connection: Connection,
        transport: Arc<T>,
        config: &TelemetryConfig,
        baseline: Option<f64>,
        events: mpsc::UnboundedSender<Internal>,
    ) -> Self {
        let Connection {
            device,
            notifications,
            link_loss,
        } = connection;

        let (commands, queue) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let writer = tokio::spawn(run_writer(
            transport,
            device.id.clone(),
            device.command_channel,
            queue,
        ));

        let listener = tokio::spawn(run_listener(
            generation,
            device.id.clone(),
            notifications,
            link_loss,
            events,
        ));

        let session = Self {
            generation,
            device,
            reconciler: TelemetryReconciler::new(config.clone(), baseline),
            display_timer: timer(config.display_interval),
            request_timer: timer(config.request_interval),
            commands,
            writer,
            listener,
        };

        if let Err(e) = session.send(Command::Handshake) {
            warn!("Failed to queue handshake: {}", e);
        }

        session
    }

    /// Generation this session was started under.
    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// The connected device.
    pub(crate) fn device(&self) -> &DeviceHandle {
        &self.device
    }

    /// Telemetry view for UI bindings.
    pub(crate) fn telemetry(&self) -> TelemetrySnapshot {
        self.reconciler.snapshot()
    }

    /// Queue a command for the writer.
    pub(crate) fn send(&self, command: Command) -> Result<()> {
        self.commands.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => Error::WriteFailed {
                reason: "command queue full".to_string(),
            },
            mpsc::error::TrySendError::Closed(_) => Error::NotConnected,
        })
    }

    /// Wait for the next telemetry timer. Pends forever without a session.
    pub(crate) async fn next_tick(session: &mut Option<Session>) -> Tick {
        match session {
            Some(session) => tokio::select! {
                _ = session.display_timer.tick() => Tick::Display,
                _ = session.request_timer.tick() => Tick::Request,
            },
            None => std::future::pending().await,
        }
    }

    pub(crate) fn on_display_tick(&mut self, now: Instant) -> TelemetrySnapshot {
        self.reconciler.on_display_tick(now);
        self.reconciler.snapshot()
    }

    pub(crate) fn on_request_tick(&mut self, now: Instant) {
        if self.reconciler.on_request_tick(now) {
            trace!("Requesting temperature from {}", self.device.id);
            if let Err(e) = self.send(Command::RequestTemperature) {
                warn!("Temperature request not queued: {}", e);
            }
        }
    }

    pub(crate) fn on_notification(&mut self, payload: &[u8], now: Instant) -> NotificationOutcome {
        let mut outcome = NotificationOutcome::default();

        for event in decode_frames(payload) {
            match event {
                InboundEvent::Temperature(value) => {
                    match self.reconciler.accept_hardware(value, now) {
                        Ok(reading) => outcome.accepted = Some(reading.value),
                        Err(reason) => warn!("Dropped temperature frame: {}", reason),
                    }
                }
                InboundEvent::Unrecognized(text) => {
                    debug!("Unrecognized frame from {}: {:?}", self.device.id, text);
                    outcome.unrecognized.push(text);
                }
            }
        }

        outcome
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.writer.abort();
        self.listener.abort();
    }
}

fn timer(period: std::time::Duration) -> Interval {
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

/// Write queued commands in order until the session is dropped.
async fn run_writer<T: Transport>(
    transport: Arc<T>,
    device: PeripheralId,
    channel: Uuid,
    mut queue: mpsc::Receiver<Command>,
) {
    while let Some(command) = queue.recv().await {
        let frame = command.encode();
        match transport.write(&device, channel, &frame).await {
            Ok(()) => debug!("Sent {} to {}", command, device),
            Err(e) => warn!("Failed to send {} to {}: {}", command, device, e),
        }
    }
    debug!("Command writer for {} stopped", device);
}

/// Forward notifications and link loss for one device to the manager.
async fn run_listener(
    generation: u64,
    device: PeripheralId,
    mut notifications: Option<BoxStream<'static, Vec<u8>>>,
    mut link_loss: Option<BoxStream<'static, PeripheralId>>,
    events: mpsc::UnboundedSender<Internal>,
) {
    loop {
        tokio::select! {
            payload = next_or_pending(&mut notifications) => match payload {
                Some(payload) => {
                    trace!("Notification from {}: {} bytes", device, payload.len());
                    if events.send(Internal::Notification { generation, payload }).is_err() {
                        break;
                    }
                }
                None => {
                    debug!("Notification stream for {} ended", device);
                    notifications = None;
                }
            },
            lost = next_or_pending(&mut link_loss) => match lost {
                Some(id) if id == device => {
                    let _ = events.send(Internal::LinkLost { generation });
                    break;
                }
                Some(_) => {}
                None => {
                    debug!("Disconnection stream ended");
                    link_loss = None;
                }
            },
        }
    }
    debug!("Listener for {} stopped", device);
}

async fn next_or_pending<S>(stream: &mut Option<S>) -> Option<S::Item>
where
    S: futures::Stream + Unpin,
{
    match stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}
