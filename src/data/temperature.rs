//! Temperature data structures.
//!
//! Contains the sensor range used for validation and clamping, and the
//! reading type handed to UI bindings.

use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// An inclusive temperature range in degrees Celsius.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SensorRange {
    /// Lowest value in the range.
    pub min: f64,
    /// Highest value in the range.
    pub max: f64,
}

impl SensorRange {
    /// Create a new range. `min` must not exceed `max`.
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Check whether a value lies inside the range.
    ///
    /// NaN is never contained.
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Check whether `other` lies entirely inside this range.
    pub fn encloses(&self, other: &SensorRange) -> bool {
        self.min <= other.min && self.max >= other.max
    }

    /// Clamp a value into the range.
    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }

    /// Midpoint of the range.
    pub fn midpoint(&self) -> f64 {
        (self.min + self.max) / 2.0
    }
}

/// Where a temperature value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TemperatureSource {
    /// Reported by the vehicle over BLE.
    Hardware,
    /// Produced by the local fallback model.
    #[default]
    Simulated,
}

impl std::fmt::Display for TemperatureSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hardware => write!(f, "Hardware"),
            Self::Simulated => write!(f, "Simulated"),
        }
    }
}

/// A single validated temperature value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureReading {
    /// Temperature in degrees Celsius.
    pub value: f64,
    /// Origin of the value.
    pub source: TemperatureSource,
    /// Monotonic time the value was produced, used for staleness.
    pub timestamp: Instant,
    /// Wall-clock time the value was produced.
    pub recorded_at: DateTime<Utc>,
}

impl TemperatureReading {
    /// Create a reading stamped with the current wall-clock time.
    pub fn new(value: f64, source: TemperatureSource, timestamp: Instant) -> Self {
        Self {
            value,
            source,
            timestamp,
            recorded_at: Utc::now(),
        }
    }

    /// The value in degrees Fahrenheit.
    pub fn fahrenheit(&self) -> f64 {
        celsius_to_fahrenheit(self.value)
    }

    /// Age of the reading relative to `now`.
    pub fn age(&self, now: Instant) -> std::time::Duration {
        now.saturating_duration_since(self.timestamp)
    }
}

/// Convert Celsius to Fahrenheit.
pub fn celsius_to_fahrenheit(celsius: f64) -> f64 {
    celsius * 9.0 / 5.0 + 32.0
}
