//! Valve actuation over the shared position-select/PWM bus.
//!
//! All sixteen valves hang off one bus: four select lines address a
//! position, one PWM line drives the addressed valve. Only one valve can be
//! driven at a time, so every request goes through a single FIFO and at
//! most one movement is in progress:
//!
//! ```text
//!            request(p, s)
//!                 │
//!   ┌─────────────▼──────────────┐
//!   │ asked: [(p, s), ...] FIFO  │
//!   └─────────────┬──────────────┘
//!      head already at s? ──yes──▶ pop, no bus write
//!                 │ no
//!        select(p), duty(s) ──[opening/closing time]──▶ duty(0), actual = s, pop
//! ```
//!
//! `tick` never blocks; a movement spans as many ticks as its timing needs.
//! The `gpio` feature gates the real rppal driver; without it, a mock bus
//! records every write.

use anyhow::Result;
use greenhouse_frontend::POSITION_COUNT;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::config::ValveConfig;

#[cfg(feature = "gpio")]
use anyhow::Context;
#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, OutputPin};

/// How often `initialize_closed` re-ticks while draining.
const INIT_POLL: Duration = Duration::from_millis(10);

/// The shared valve bus. `duty` is in percent; 0 stops driving.
pub trait ValveBus: Send {
    fn select(&mut self, position: usize) -> Result<()>;
    fn set_duty(&mut self, duty: f64) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValveState {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy)]
struct Movement {
    position: usize,
    target: ValveState,
    since: Instant,
}

pub struct ValveActuator<B> {
    bus: B,
    open_duty: f64,
    close_duty: f64,
    opening_time: Duration,
    closing_time: Duration,
    asked: VecDeque<(usize, ValveState)>,
    /// `None` until the position has been driven once.
    actual: [Option<ValveState>; POSITION_COUNT],
    moving: Option<Movement>,
}

impl<B: ValveBus> ValveActuator<B> {
    pub fn new(bus: B, cfg: &ValveConfig) -> Self {
        Self {
            bus,
            open_duty: cfg.position_open,
            close_duty: cfg.position_close,
            opening_time: cfg.opening_time(),
            closing_time: cfg.closing_time(),
            asked: VecDeque::new(),
            actual: [None; POSITION_COUNT],
            moving: None,
        }
    }

    /// Queue a movement. Never rejected: a request for a position that is
    /// mid-movement waits its turn.
    pub fn request(&mut self, position: usize, state: ValveState) {
        debug!(position, ?state, queued = self.asked.len(), "valve request");
        self.asked.push_back((position, state));
    }

    pub fn open(&mut self, position: usize) {
        self.request(position, ValveState::Open);
    }

    pub fn close(&mut self, position: usize) {
        self.request(position, ValveState::Closed);
    }

    /// Advance the head of the queue by at most one step. Returns the
    /// position and state of a movement that completed on this call.
    pub fn tick(&mut self, now: Instant) -> Result<Option<(usize, ValveState)>> {
        if let Some(m) = self.moving {
            let needed = match m.target {
                ValveState::Open => self.opening_time,
                ValveState::Closed => self.closing_time,
            };
            if now.saturating_duration_since(m.since) < needed {
                return Ok(None);
            }
            self.bus.set_duty(0.0)?;
            self.actual[m.position] = Some(m.target);
            self.moving = None;
            self.asked.pop_front();
            info!(position = m.position, state = ?m.target, "valve movement complete");
            return Ok(Some((m.position, m.target)));
        }

        let Some(&(position, target)) = self.asked.front() else {
            return Ok(None);
        };

        if self.actual[position] == Some(target) {
            debug!(position, state = ?target, "valve already in requested state");
            self.asked.pop_front();
            return Ok(None);
        }

        let duty = match target {
            ValveState::Open => self.open_duty,
            ValveState::Closed => self.close_duty,
        };
        self.bus.select(position)?;
        self.bus.set_duty(duty)?;
        self.moving = Some(Movement {
            position,
            target,
            since: now,
        });
        debug!(position, state = ?target, duty, "valve movement started");
        Ok(None)
    }

    /// Force every position closed and drain the queue. Run once at startup
    /// before any regulation.
    pub async fn initialize_closed(&mut self) -> Result<()> {
        for position in 0..POSITION_COUNT {
            self.close(position);
        }
        while !self.is_idle() {
            self.tick(Instant::now())?;
            if !self.is_idle() {
                tokio::time::sleep(INIT_POLL).await;
            }
        }
        info!("all valves confirmed closed");
        Ok(())
    }

    pub fn is_idle(&self) -> bool {
        self.moving.is_none() && self.asked.is_empty()
    }

    #[cfg(test)]
    pub fn moving_position(&self) -> Option<usize> {
        self.moving.map(|m| m.position)
    }

    pub fn actual(&self, position: usize) -> Option<ValveState> {
        self.actual[position]
    }

    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.asked.len()
    }

    #[cfg(test)]
    pub fn bus(&self) -> &B {
        &self.bus
    }
}

// ---------------------------------------------------------------------------
// Real GPIO valve bus (production, needs rppal on a Raspberry Pi)
// ---------------------------------------------------------------------------
#[cfg(feature = "gpio")]
pub struct GpioValveBus {
    select: [OutputPin; 4],
    pwm: OutputPin,
    pwm_freq: f64,
}

#[cfg(feature = "gpio")]
impl GpioValveBus {
    pub fn new(cfg: &ValveConfig) -> Result<Self> {
        let gpio = Gpio::new().context("failed to open GPIO")?;
        let claim = |pin: u8| -> Result<OutputPin> {
            Ok(gpio
                .get(pin)
                .with_context(|| format!("failed to claim valve pin {pin}"))?
                .into_output_low())
        };
        let [s0, s1, s2, s3] = cfg.gpio_selector_pins;
        let select = [claim(s0)?, claim(s1)?, claim(s2)?, claim(s3)?];
        // Fail-safe: PWM line idle at startup.
        let pwm = claim(cfg.gpio_position_out)?;
        info!(
            pwm_pin = cfg.gpio_position_out,
            select_pins = ?cfg.gpio_selector_pins,
            "valve bus initialised"
        );
        Ok(Self {
            select,
            pwm,
            pwm_freq: cfg.pwm_freq,
        })
    }
}

#[cfg(feature = "gpio")]
impl ValveBus for GpioValveBus {
    fn select(&mut self, position: usize) -> Result<()> {
        for (bit, pin) in self.select.iter_mut().enumerate() {
            if position & (1 << bit) != 0 {
                pin.set_high();
            } else {
                pin.set_low();
            }
        }
        Ok(())
    }

    fn set_duty(&mut self, duty: f64) -> Result<()> {
        if duty <= 0.0 {
            self.pwm.clear_pwm().context("valve: clear_pwm failed")?;
            self.pwm.set_low();
        } else {
            self.pwm
                .set_pwm_frequency(self.pwm_freq, duty / 100.0)
                .context("valve: set_pwm_frequency failed")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Mock valve bus (development and tests, no hardware)
// ---------------------------------------------------------------------------

#[cfg(any(test, not(feature = "gpio")))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BusWrite {
    Select(usize),
    Duty(f64),
}

#[cfg(any(test, not(feature = "gpio")))]
#[derive(Debug, Default)]
pub struct MockValveBus {
    pub writes: Vec<BusWrite>,
}

#[cfg(any(test, not(feature = "gpio")))]
impl ValveBus for MockValveBus {
    fn select(&mut self, position: usize) -> Result<()> {
        debug!(position, "[mock-gpio] valve bus select");
        self.writes.push(BusWrite::Select(position));
        Ok(())
    }

    fn set_duty(&mut self, duty: f64) -> Result<()> {
        debug!(duty, "[mock-gpio] valve bus duty");
        self.writes.push(BusWrite::Duty(duty));
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
