//! Data structures for vehicle telemetry.

pub mod simulation;
pub mod temperature;

pub use simulation::SimulationModel;
pub use temperature::{celsius_to_fahrenheit, SensorRange, TemperatureReading, TemperatureSource};
