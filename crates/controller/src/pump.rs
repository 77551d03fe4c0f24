//! Water pump speed control. The `gpio` feature gates the real rppal
//! software-PWM driver; without it, a mock records every duty write.

use anyhow::Result;
use tracing::info;

use crate::config::PumpConfig;

#[cfg(feature = "gpio")]
use anyhow::Context;
#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, OutputPin};

/// The PWM line feeding the pump driver. `duty` is in percent.
pub trait PumpOutput: Send {
    fn set_duty(&mut self, duty: f64) -> Result<()>;
}

/// Map a speed request to a duty cycle.
///
/// 0 stops the pump and 100 drives it at `max_speed`. Anything between is
/// mapped linearly onto `[min_speed, max_speed]`, since the pump stalls
/// below `min_speed`.
pub fn duty_for_speed(speed: f64, min_speed: f64, max_speed: f64) -> f64 {
    if speed <= 0.0 {
        0.0
    } else if speed >= 100.0 {
        max_speed
    } else {
        speed * (max_speed - min_speed) / 100.0 + min_speed
    }
}

pub struct PumpActuator<P> {
    out: P,
    min_speed: f64,
    max_speed: f64,
    speed: f64,
}

impl<P: PumpOutput> PumpActuator<P> {
    pub fn new(out: P, cfg: &PumpConfig) -> Self {
        Self {
            out,
            min_speed: cfg.min_speed,
            max_speed: cfg.max_speed,
            speed: 0.0,
        }
    }

    /// `speed` is clamped to 0..=100.
    pub fn set_speed(&mut self, speed: f64) -> Result<()> {
        let speed = speed.clamp(0.0, 100.0);
        let duty = duty_for_speed(speed, self.min_speed, self.max_speed);
        self.out.set_duty(duty)?;
        if speed != self.speed {
            info!(speed, duty, "pump speed set");
        }
        self.speed = speed;
        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        self.set_speed(0.0)
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn is_running(&self) -> bool {
        self.speed > 0.0
    }

    #[cfg(test)]
    pub fn output(&self) -> &P {
        &self.out
    }
}

// ---------------------------------------------------------------------------
// Real GPIO pump (production, needs rppal on a Raspberry Pi)
// ---------------------------------------------------------------------------
#[cfg(feature = "gpio")]
pub struct GpioPump {
    pin: OutputPin,
    pwm_freq: f64,
}

#[cfg(feature = "gpio")]
impl GpioPump {
    pub fn new(cfg: &PumpConfig) -> Result<Self> {
        let gpio = Gpio::new().context("failed to open GPIO")?;
        let mut pin = gpio
            .get(cfg.gpio_speed_out)
            .with_context(|| format!("failed to claim pump pin {}", cfg.gpio_speed_out))?
            .into_output_low();
        // Fail-safe: pump stopped at startup.
        pin.set_low();
        Ok(Self {
            pin,
            pwm_freq: cfg.pwm_freq,
        })
    }
}

#[cfg(feature = "gpio")]
impl PumpOutput for GpioPump {
    fn set_duty(&mut self, duty: f64) -> Result<()> {
        if duty <= 0.0 {
            self.pin.clear_pwm().context("pump: clear_pwm failed")?;
            self.pin.set_low();
        } else {
            self.pin
                .set_pwm_frequency(self.pwm_freq, duty / 100.0)
                .context("pump: set_pwm_frequency failed")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Mock pump (development and tests, no hardware)
// ---------------------------------------------------------------------------
#[cfg(any(test, not(feature = "gpio")))]
#[derive(Debug, Default)]
pub struct MockPump {
    pub duties: Vec<f64>,
}

#[cfg(any(test, not(feature = "gpio")))]
impl PumpOutput for MockPump {
    fn set_duty(&mut self, duty: f64) -> Result<()> {
        tracing::debug!(duty, "[mock-gpio] pump duty");
        self.duties.push(duty);
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;

    fn pump() -> PumpActuator<MockPump> {
        let mut cfg = test_config().pump;
        cfg.min_speed = 25.0;
        cfg.max_speed = 95.0;
        PumpActuator::new(MockPump::default(), &cfg)
    }

    #[test]
    fn zero_speed_is_zero_duty() {
        assert_eq!(duty_for_speed(0.0, 25.0, 95.0), 0.0);
    }

    #[test]
    fn full_speed_is_max_duty() {
        assert_eq!(duty_for_speed(100.0, 25.0, 95.0), 95.0);
    }

    #[test]
    fn partial_speed_maps_linearly() {
        assert!((duty_for_speed(50.0, 25.0, 95.0) - 60.0).abs() < 1e-9);
        assert!((duty_for_speed(1.0, 25.0, 95.0) - 25.7).abs() < 1e-9);
    }

    #[test]
    fn set_speed_writes_duty() {
        let mut p = pump();
        p.set_speed(60.0).unwrap();
        assert!(p.is_running());
        assert_eq!(p.speed(), 60.0);
        assert!((p.output().duties[0] - 67.0).abs() < 1e-9);
    }

    #[test]
    fn stop_is_speed_zero() {
        let mut p = pump();
        p.set_speed(100.0).unwrap();
        p.stop().unwrap();
        assert!(!p.is_running());
        assert_eq!(p.output().duties, vec![95.0, 0.0]);
    }

    #[test]
    fn out_of_range_speed_clamped() {
        let mut p = pump();
        p.set_speed(150.0).unwrap();
        p.set_speed(-3.0).unwrap();
        assert_eq!(p.output().duties, vec![95.0, 0.0]);
    }
}
