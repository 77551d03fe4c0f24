//! Analog sensor front end for the greenhouse controller.
//!
//! The regulation engine only ever sees percentages through [`SensorPort`].
//! Multiplexer addressing, ADC conversion and calibration all live here.
//!
//! - `adc` feature: ADS1115 over I2C behind a 16:1 analog multiplexer.
//! - `sim` feature (default): stateful greenhouse simulator for development.

pub mod calibration;

#[cfg(feature = "adc")]
pub mod adc;

#[cfg(feature = "sim")]
pub mod sim;

pub use calibration::FrontendConfig;

/// Number of plant positions wired to the moisture multiplexer.
pub const POSITION_COUNT: usize = 16;

/// Read-only access to the greenhouse sensors, in percent.
///
/// Implementations must always return a value; filtering below the
/// raw-voltage level (retries, last-good fallback) is their job, not the
/// caller's.
pub trait SensorPort {
    /// Soil moisture at `position` (0..16), 0.0..=100.0.
    fn read_moisture(&mut self, position: usize) -> f64;

    /// Reservoir level, 0.0..=100.0.
    fn read_water_level(&mut self) -> f64;

    /// Ambient light, 0.0..=100.0.
    fn read_ambient_light(&mut self) -> f64;
}
