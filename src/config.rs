//! Link and telemetry configuration.

use std::time::Duration;

use crate::data::SensorRange;
use crate::error::{Error, Result};

/// Default advertised-name substring identifying the vehicle.
pub const DEFAULT_TARGET_NAME: &str = "ESP32";

/// Default scan window before giving up.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings for the link manager.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LinkConfig {
    /// Substring that must appear in the advertised name. First match wins.
    pub target_name: String,
    /// How long a scan runs before returning to idle.
    pub scan_timeout: Duration,
    /// Telemetry reconciliation settings.
    pub telemetry: TelemetryConfig,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            target_name: DEFAULT_TARGET_NAME.to_string(),
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl LinkConfig {
    /// Set the advertised-name substring to match.
    pub fn with_target_name(mut self, name: impl Into<String>) -> Self {
        self.target_name = name.into();
        self
    }

    /// Set the scan window.
    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    /// Replace the telemetry settings.
    pub fn with_telemetry(mut self, telemetry: TelemetryConfig) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Check the configuration for inconsistent values.
    pub fn validate(&self) -> Result<()> {
        if self.target_name.is_empty() {
            return Err(invalid("target_name", "\"\""));
        }
        if self.scan_timeout.is_zero() {
            return Err(invalid("scan_timeout", "0s"));
        }
        self.telemetry.validate()
    }
}

/// Settings for the telemetry reconciler.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TelemetryConfig {
    /// Interval between display ticks.
    pub display_interval: Duration,
    /// Interval between request ticks.
    pub request_interval: Duration,
    /// Hardware readings older than this are stale.
    pub staleness_threshold: Duration,
    /// Largest change of the displayed value per display tick.
    pub max_step: f64,
    /// Range the gauge displays and the simulation stays within.
    pub nominal_range: SensorRange,
    /// Range outside of which hardware readings are physically impossible.
    pub sanity_range: SensorRange,
    /// Baseline used when no hardware reading has ever been accepted.
    pub default_baseline: f64,
    /// Probability of a spike excursion on each simulation step.
    pub spike_probability: f64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            display_interval: Duration::from_millis(500),
            request_interval: Duration::from_secs(3),
            staleness_threshold: Duration::from_secs(6),
            max_step: 0.5,
            nominal_range: SensorRange::new(0.0, 60.0),
            sanity_range: SensorRange::new(-40.0, 125.0),
            default_baseline: 25.0,
            spike_probability: 0.02,
        }
    }
}

impl TelemetryConfig {
    /// Set the display tick interval.
    pub fn with_display_interval(mut self, interval: Duration) -> Self {
        self.display_interval = interval;
        self
    }

    /// Set the request tick interval.
    pub fn with_request_interval(mut self, interval: Duration) -> Self {
        self.request_interval = interval;
        self
    }

    /// Set the staleness threshold.
    pub fn with_staleness_threshold(mut self, threshold: Duration) -> Self {
        self.staleness_threshold = threshold;
        self
    }

    /// Set the maximum displayed-value step per tick.
    pub fn with_max_step(mut self, max_step: f64) -> Self {
        self.max_step = max_step;
        self
    }

    /// Set the nominal and sanity ranges.
    pub fn with_ranges(mut self, nominal: SensorRange, sanity: SensorRange) -> Self {
        self.nominal_range = nominal;
        self.sanity_range = sanity;
        self
    }

    /// Set the default simulation baseline.
    pub fn with_default_baseline(mut self, baseline: f64) -> Self {
        self.default_baseline = baseline;
        self
    }

    /// Set the spike probability.
    pub fn with_spike_probability(mut self, probability: f64) -> Self {
        self.spike_probability = probability;
        self
    }

    /// Check the configuration for inconsistent values.
    pub fn validate(&self) -> Result<()> {
        if self.display_interval.is_zero() {
            return Err(invalid("display_interval", "0s"));
        }
        if self.request_interval.is_zero() {
            return Err(invalid("request_interval", "0s"));
        }
        if !(self.max_step.is_finite() && self.max_step > 0.0) {
            return Err(invalid("max_step", self.max_step));
        }
        if !(self.nominal_range.min <= self.nominal_range.max) {
            return Err(invalid("nominal_range", format!("{:?}", self.nominal_range)));
        }
        if !self.sanity_range.encloses(&self.nominal_range) {
            return Err(invalid("sanity_range", format!("{:?}", self.sanity_range)));
        }
        if !self.nominal_range.contains(self.default_baseline) {
            return Err(invalid("default_baseline", self.default_baseline));
        }
        if !(0.0..=1.0).contains(&self.spike_probability) {
            return Err(invalid("spike_probability", self.spike_probability));
        }
        Ok(())
    }
}

fn invalid(name: &str, value: impl ToString) -> Error {
    Error::InvalidParameter {
        name: name.to_string(),
        value: value.to_string(),
    }
}
