//! Temperature reconciliation.
//!
//! The vehicle only reports temperature when asked, and BLE notifications
//! can go missing for seconds at a time. [`TelemetryReconciler`] presents a
//! single continuously updating value regardless:
//!
//! - A **display tick** moves the displayed value toward a target, at most
//!   `max_step` per tick. The target is the last hardware reading while it
//!   is fresh, otherwise one step of the [`SimulationModel`].
//! - A **request tick** decides whether to ask the vehicle for a new reading
//!   and clears the "receiving hardware" flag once readings have gone stale.
//!   Once cleared, only a newly accepted reading hands the display back to
//!   the hardware.
//!
//! All methods take the current time explicitly so the reconciler can be
//! driven deterministically from tests.

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::config::TelemetryConfig;
use crate::data::{celsius_to_fahrenheit, SimulationModel, TemperatureReading, TemperatureSource};

/// Why a hardware value was dropped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RejectReason {
    /// The value is NaN or infinite.
    NotFinite,
    /// The value lies outside the sanity range.
    OutOfRange(f64),
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFinite => write!(f, "value is not finite"),
            Self::OutOfRange(value) => write!(f, "{value} is outside the sanity range"),
        }
    }
}

/// Read-only view of the reconciler for UI bindings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetrySnapshot {
    /// The value the gauge should show.
    pub displayed: f64,
    /// The source that produced the current display target.
    pub source: TemperatureSource,
    /// Whether fresh hardware data is being received.
    pub receiving_hardware: bool,
    /// The last accepted hardware reading, if any.
    pub last_hardware: Option<TemperatureReading>,
}

impl TelemetrySnapshot {
    /// The displayed value in degrees Fahrenheit.
    pub fn fahrenheit(&self) -> f64 {
        celsius_to_fahrenheit(self.displayed)
    }
}

/// Merges hardware telemetry with a simulated fallback.
pub struct TelemetryReconciler {
    config: TelemetryConfig,
    last_hardware: Option<TemperatureReading>,
    receiving_hardware: bool,
    displayed: f64,
    source: TemperatureSource,
    simulation: SimulationModel,
    rng: Box<dyn RngCore + Send>,
}

impl TelemetryReconciler {
    /// Create a reconciler seeded from `baseline`, or the configured default.
    pub fn new(config: TelemetryConfig, baseline: Option<f64>) -> Self {
        Self::with_rng(config, baseline, StdRng::from_entropy())
    }

    /// Create a reconciler with an explicit random source.
    pub fn with_rng<R>(config: TelemetryConfig, baseline: Option<f64>, rng: R) -> Self
    where
        R: RngCore + Send + 'static,
    {
        let seed = config
            .nominal_range
            .clamp(baseline.unwrap_or(config.default_baseline));
        let simulation =
            SimulationModel::new(seed, config.nominal_range, config.spike_probability);

        Self {
            config,
            last_hardware: None,
            receiving_hardware: false,
            displayed: seed,
            source: TemperatureSource::Simulated,
            simulation,
            rng: Box::new(rng),
        }
    }

    /// Current displayed value.
    pub fn displayed(&self) -> f64 {
        self.displayed
    }

    /// Whether fresh hardware data is being received.
    pub fn is_receiving_hardware(&self) -> bool {
        self.receiving_hardware
    }

    /// The last accepted hardware reading.
    pub fn last_hardware(&self) -> Option<TemperatureReading> {
        self.last_hardware
    }

    /// The fallback model.
    pub fn simulation(&self) -> &SimulationModel {
        &self.simulation
    }

    /// The settings this reconciler runs with.
    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    /// Snapshot for UI bindings.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            displayed: self.displayed,
            source: self.source,
            receiving_hardware: self.receiving_hardware,
            last_hardware: self.last_hardware,
        }
    }

    /// Whether the last hardware reading is younger than the staleness threshold.
    pub fn hardware_is_recent(&self, now: Instant) -> bool {
        self.last_hardware
            .map(|reading| reading.age(now) < self.config.staleness_threshold)
            .unwrap_or(false)
    }

    /// Accept a hardware temperature value.
    ///
    /// Values outside the sanity range are rejected without touching any
    /// state. Accepted values also re-centre the simulation.
    pub fn accept_hardware(
        &mut self,
        value: f64,
        now: Instant,
    ) -> Result<TemperatureReading, RejectReason> {
        if !value.is_finite() {
            return Err(RejectReason::NotFinite);
        }
        if !self.config.sanity_range.contains(value) {
            return Err(RejectReason::OutOfRange(value));
        }

        let reading = TemperatureReading::new(value, TemperatureSource::Hardware, now);
        self.last_hardware = Some(reading);
        self.receiving_hardware = true;
        self.simulation.set_baseline(value);

        debug!("Accepted hardware temperature {:.2}°C", value);

        Ok(reading)
    }

    /// Run one display tick and return the new displayed value.
    pub fn on_display_tick(&mut self, now: Instant) -> f64 {
        let (target, source) = match self.last_hardware {
            Some(reading) if self.receiving_hardware && self.hardware_is_recent(now) => {
                (reading.value, TemperatureSource::Hardware)
            }
            _ => (
                self.simulation.step(&mut self.rng, now),
                TemperatureSource::Simulated,
            ),
        };

        self.displayed = approach(self.displayed, target, self.config.max_step);
        self.source = source;

        trace!(
            "Display tick: target={:.2} ({}), displayed={:.2}",
            target,
            source,
            self.displayed
        );

        self.displayed
    }

    /// Run one request tick.
    ///
    /// Returns `true` when a temperature request should be sent.
    pub fn on_request_tick(&mut self, now: Instant) -> bool {
        let recent = self.hardware_is_recent(now);

        if self.receiving_hardware && !recent {
            debug!("Hardware telemetry went stale, falling back to simulation");
            self.receiving_hardware = false;
        }

        !recent
    }
}

impl std::fmt::Debug for TelemetryReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryReconciler")
            .field("last_hardware", &self.last_hardware)
            .field("receiving_hardware", &self.receiving_hardware)
            .field("displayed", &self.displayed)
            .field("source", &self.source)
            .field("simulation", &self.simulation)
            .finish_non_exhaustive()
    }
}

/// Absorbs floating-point error accumulated over many steps.
const SNAP_EPSILON: f64 = 1e-9;

/// Move `current` toward `target` by at most `max_step`, landing exactly on
/// `target` instead of overshooting.
pub fn approach(current: f64, target: f64, max_step: f64) -> f64 {
    let delta = target - current;
    if delta.abs() <= max_step + SNAP_EPSILON {
        target
    } else {
        current + max_step.copysign(delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::mock::StepRng;
    use std::time::Duration;

    const TICK: Duration = Duration::from_millis(500);

    fn reconciler() -> TelemetryReconciler {
        TelemetryReconciler::with_rng(
            TelemetryConfig::default(),
            None,
            StdRng::seed_from_u64(7),
        )
    }

    #[test]
    fn test_starts_on_default_baseline() {
        let r = reconciler();
        assert_eq!(r.displayed(), 25.0);
        assert!(!r.is_receiving_hardware());
        assert!(r.last_hardware().is_none());
        assert_eq!(r.snapshot().source, TemperatureSource::Simulated);
    }

    #[test]
    fn test_seeded_from_previous_baseline() {
        let r = TelemetryReconciler::with_rng(
            TelemetryConfig::default(),
            Some(31.0),
            StepRng::new(0, 1),
        );
        assert_eq!(r.displayed(), 31.0);
        assert_eq!(r.simulation().baseline(), 31.0);
    }

    #[test]
    fn test_snapshot_fahrenheit_tracks_display() {
        let mut r = reconciler();
        assert!((r.snapshot().fahrenheit() - 77.0).abs() < 1e-9);

        let t0 = Instant::now();
        r.accept_hardware(26.0, t0).unwrap();
        r.on_display_tick(t0 + TICK);
        assert!((r.snapshot().fahrenheit() - 77.9).abs() < 1e-9);
    }

    #[test]
    fn test_approach() {
        assert_eq!(approach(25.0, 27.5, 0.5), 25.5);
        assert_eq!(approach(25.0, 22.0, 0.5), 24.5);
        assert_eq!(approach(27.3, 27.5, 0.5), 27.5);
        assert_eq!(approach(27.5, 27.5, 0.5), 27.5);
    }

    #[test]
    fn test_walks_to_hardware_value_and_holds() {
        let mut r = reconciler();
        let t0 = Instant::now();
        r.accept_hardware(27.5, t0).unwrap();

        let mut previous = r.displayed();
        for i in 1..=5 {
            let value = r.on_display_tick(t0 + TICK * i);
            assert!(value - previous <= 0.5 + 1e-9);
            assert!(value <= 27.5);
            previous = value;
        }
        assert_eq!(r.displayed(), 27.5);

        // No further drift while the reading is fresh.
        for i in 6..=10 {
            assert_eq!(r.on_display_tick(t0 + TICK * i), 27.5);
        }
        assert_eq!(r.snapshot().source, TemperatureSource::Hardware);
    }

    #[test]
    fn test_accept_updates_state_and_baseline() {
        let mut r = reconciler();
        let now = Instant::now();
        let reading = r.accept_hardware(33.0, now).unwrap();

        assert_eq!(reading.value, 33.0);
        assert_eq!(reading.source, TemperatureSource::Hardware);
        assert!(r.is_receiving_hardware());
        assert_eq!(r.last_hardware().map(|r| r.value), Some(33.0));
        assert_eq!(r.simulation().baseline(), 33.0);
    }

    #[test]
    fn test_accepts_slightly_outside_nominal_range() {
        let mut r = reconciler();
        assert!(r.accept_hardware(62.0, Instant::now()).is_ok());
        assert!(r.accept_hardware(-5.0, Instant::now()).is_ok());
        // Baseline stays inside the nominal range.
        assert_eq!(r.simulation().baseline(), 0.0);
    }

    #[test]
    fn test_rejects_impossible_values() {
        let mut r = reconciler();
        let now = Instant::now();
        r.accept_hardware(26.0, now).unwrap();
        let before = r.snapshot();

        assert_eq!(
            r.accept_hardware(999.0, now + TICK),
            Err(RejectReason::OutOfRange(999.0))
        );
        assert_eq!(
            r.accept_hardware(f64::NAN, now + TICK),
            Err(RejectReason::NotFinite)
        );
        assert_eq!(
            r.accept_hardware(f64::NEG_INFINITY, now + TICK),
            Err(RejectReason::NotFinite)
        );

        assert_eq!(r.snapshot(), before);
        assert_eq!(r.simulation().baseline(), 26.0);
    }

    #[test]
    fn test_request_tick_without_hardware_requests() {
        let mut r = reconciler();
        assert!(r.on_request_tick(Instant::now()));
        assert!(!r.is_receiving_hardware());
    }

    #[test]
    fn test_request_tick_with_fresh_hardware_is_quiet() {
        let mut r = reconciler();
        let t0 = Instant::now();
        r.accept_hardware(27.0, t0).unwrap();
        assert!(!r.on_request_tick(t0 + Duration::from_secs(3)));
        assert!(r.is_receiving_hardware());
    }

    #[test]
    fn test_staleness_falls_back_to_simulation() {
        let mut r = reconciler();
        let t0 = Instant::now();
        r.accept_hardware(40.0, t0).unwrap();

        let stale = t0 + Duration::from_secs(7);
        assert!(r.on_request_tick(stale));
        assert!(!r.is_receiving_hardware());

        r.on_display_tick(stale + TICK);
        assert_eq!(r.snapshot().source, TemperatureSource::Simulated);
        // The walk resumes from the last real reading.
        assert!((r.simulation().baseline() - 40.0).abs() < 2.0);
        assert_eq!(r.last_hardware().map(|r| r.value), Some(40.0));
    }

    #[test]
    fn test_stale_reading_is_never_a_display_target() {
        let mut r = TelemetryReconciler::with_rng(
            TelemetryConfig::default().with_spike_probability(0.0),
            Some(25.0),
            StdRng::seed_from_u64(3),
        );
        let t0 = Instant::now();
        r.accept_hardware(25.0, t0).unwrap();
        r.on_display_tick(t0 + Duration::from_secs(8));
        assert_eq!(r.snapshot().source, TemperatureSource::Simulated);
    }

    #[test]
    fn test_fresh_reading_after_fallback_resumes_hardware() {
        let mut r = reconciler();
        let t0 = Instant::now();
        r.accept_hardware(30.0, t0).unwrap();
        r.on_request_tick(t0 + Duration::from_secs(9));
        assert!(!r.is_receiving_hardware());

        let t1 = t0 + Duration::from_secs(10);
        r.accept_hardware(31.0, t1).unwrap();
        assert!(r.is_receiving_hardware());
        assert!(!r.on_request_tick(t1 + Duration::from_secs(1)));
    }

    proptest! {
        #[test]
        fn prop_converges_without_overshoot(value in -40.0f64..=125.0, step in 0.1f64..5.0) {
            let config = TelemetryConfig::default().with_max_step(step);
            let mut r = TelemetryReconciler::with_rng(config, None, StdRng::seed_from_u64(1));
            let t0 = Instant::now();
            let start = r.displayed();
            r.accept_hardware(value, t0).unwrap();

            let ticks = ((value - start).abs() / step).ceil() as u32;
            let (low, high) = if start <= value { (start, value) } else { (value, start) };
            for i in 1..=ticks {
                let displayed = r.on_display_tick(t0 + Duration::from_millis(1) * i);
                prop_assert!(displayed >= low - 1e-9 && displayed <= high + 1e-9);
            }
            prop_assert_eq!(r.displayed(), value);
        }

        #[test]
        fn prop_rejected_values_leave_state_unchanged(value in prop_oneof![
            125.0001f64..1.0e9,
            -1.0e9f64..-40.0001,
        ]) {
            let mut r = reconciler();
            let now = Instant::now();
            r.accept_hardware(20.0, now).unwrap();
            let before = r.snapshot();
            prop_assert!(r.accept_hardware(value, now).is_err());
            prop_assert_eq!(r.snapshot(), before);
        }
    }
}
