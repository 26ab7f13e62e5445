//! Fallback temperature model.
//!
//! A bounded random walk that stands in for the vehicle's sensor while no
//! fresh hardware reading is available. The walk is centred on the last
//! accepted hardware value so that a fallback resumes near the truth.

use rand::Rng;
use tokio::time::Instant;

use crate::data::temperature::SensorRange;

/// Fraction of the trend kept from one step to the next.
const TREND_DECAY: f64 = 0.9;

/// Largest random nudge applied to the trend per step.
const TREND_JITTER: f64 = 0.05;

/// Largest independent noise added per step.
const NOISE_AMPLITUDE: f64 = 0.1;

/// Largest spike excursion.
const SPIKE_AMPLITUDE: f64 = 1.5;

/// Bounded random-walk temperature generator.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationModel {
    baseline: f64,
    trend: f64,
    last_tick: Option<Instant>,
    range: SensorRange,
    spike_probability: f64,
}

impl SimulationModel {
    /// Create a model centred on `baseline`, clamped into `range`.
    pub fn new(baseline: f64, range: SensorRange, spike_probability: f64) -> Self {
        Self {
            baseline: range.clamp(baseline),
            trend: 0.0,
            last_tick: None,
            range,
            spike_probability: spike_probability.clamp(0.0, 1.0),
        }
    }

    /// Current centre value.
    pub fn baseline(&self) -> f64 {
        self.baseline
    }

    /// Current drift per step.
    pub fn trend(&self) -> f64 {
        self.trend
    }

    /// Time of the most recent step, if any.
    pub fn last_tick(&self) -> Option<Instant> {
        self.last_tick
    }

    /// Re-centre the walk on a trusted value. The trend is kept.
    pub fn set_baseline(&mut self, value: f64) {
        self.baseline = self.range.clamp(value);
    }

    /// Advance the walk by one step and return the new value.
    ///
    /// Given the same state and the same random source the result is
    /// always the same.
    pub fn step<R: Rng>(&mut self, rng: &mut R, now: Instant) -> f64 {
        self.trend = self.trend * TREND_DECAY + rng.gen_range(-TREND_JITTER..=TREND_JITTER);
        let noise = rng.gen_range(-NOISE_AMPLITUDE..=NOISE_AMPLITUDE);
        let mut value = self.range.clamp(self.baseline + self.trend + noise);

        if rng.gen_bool(self.spike_probability) {
            value = self
                .range
                .clamp(value + rng.gen_range(-SPIKE_AMPLITUDE..=SPIKE_AMPLITUDE));
        }

        self.baseline = value;
        self.last_tick = Some(now);
        value
    }
}
