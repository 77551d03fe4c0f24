//! Stateful greenhouse simulator for local development.
//!
//! Models what the regulation engine sees through the multiplexer:
//! - Temporal coherence via random walk with mean reversion per pot
//! - Gradual drying drift (evaporation)
//! - Per-reading ADC electronic noise and occasional spikes
//! - A low, steady "empty pot" baseline for unoccupied positions
//! - Closed-loop watering (moisture rises at the position being watered,
//!   the reservoir drains)
//! - Diurnal ambient light

use std::fmt;
use std::sync::{Arc, Mutex};

use crate::{SensorPort, POSITION_COUNT};

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1) using the Irwin-Hall method:
/// sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal() -> f64 {
    let mut sum: f64 = 0.0;
    for _ in 0..12 {
        sum += fastrand::f64();
    }
    sum - 6.0
}

/// Sample from N(mean, sigma).
fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Pre-configured simulation profiles selectable via `SIM_SCENARIO`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Pots start mid-range and dry out steadily. Moderate noise.
    Drying,
    /// Pots hover near their starting point. Low noise, rare spikes.
    Stable,
    /// High noise, ~10% spike rate. Exercises the presence debounce.
    Flaky,
    /// Pots start wet and dry very slowly; no watering should happen.
    Wet,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "stable" => Self::Stable,
            "flaky" => Self::Flaky,
            "wet" => Self::Wet,
            _ => Self::Drying,
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drying => write!(f, "drying"),
            Self::Stable => write!(f, "stable"),
            Self::Flaky => write!(f, "flaky"),
            Self::Wet => write!(f, "wet"),
        }
    }
}

// ---------------------------------------------------------------------------
// Per-position state
// ---------------------------------------------------------------------------

/// A simulated pot sitting on a position.
struct Pot {
    /// Current "true" soil moisture in percent. Evolves each sample.
    moisture: f64,
    /// Permanent per-probe offset (percent).
    offset: f64,
}

/// Reading of a probe with nothing around it.
const EMPTY_BASELINE: f64 = 4.0;

/// Moisture gained per sample while the position is being watered.
const WET_RATE: f64 = 3.0;

/// Reservoir drained per reservoir sample while a shot runs.
const DRAIN_RATE: f64 = 0.5;

/// Reservoir samples spent empty before the simulated gardener refills it.
const REFILL_AFTER: u32 = 600;

// ---------------------------------------------------------------------------
// Main simulator
// ---------------------------------------------------------------------------

pub struct GreenhouseSim {
    pots: [Option<Pot>; POSITION_COUNT],

    // Random walk parameters
    drift_per_sample: f64,
    walk_sigma: f64,
    mean_reversion: f64,
    center: f64,
    noise_sigma: f64,

    // Spike parameters
    spike_prob: f32,
    spike_sigma: f64,

    // Diurnal cycle
    diurnal_period_s: f64,

    watering: Option<usize>,
    tank: f64,
    empty_samples: u32,
}

impl GreenhouseSim {
    /// Create a simulator with pots on the first `occupied` positions.
    ///
    /// `diurnal_period_s` controls the day/night cycle length. Use 600
    /// (10 min) for fast dev iteration or 86400 for real-time.
    pub fn new(scenario: Scenario, occupied: usize, diurnal_period_s: f64) -> Self {
        let (drift, walk_sigma, mean_rev, noise_sigma, spike_prob, spike_sigma, start) =
            match scenario {
                Scenario::Drying => (0.05, 0.4, 0.005, 0.5, 0.03_f32, 15.0, 50.0),
                Scenario::Stable => (0.005, 0.2, 0.05, 0.3, 0.005, 8.0, 50.0),
                Scenario::Flaky => (0.03, 0.8, 0.01, 1.5, 0.10, 25.0, 50.0),
                Scenario::Wet => (0.01, 0.3, 0.01, 0.4, 0.02, 10.0, 80.0),
            };

        let pots = std::array::from_fn(|i| {
            (i < occupied).then(|| Pot {
                moisture: (start + gaussian(0.0, 3.0)).clamp(0.0, 100.0),
                offset: gaussian(0.0, 1.5),
            })
        });

        Self {
            pots,
            drift_per_sample: drift,
            walk_sigma,
            mean_reversion: mean_rev,
            center: start,
            noise_sigma,
            spike_prob,
            spike_sigma,
            diurnal_period_s,
            watering: None,
            tank: 80.0,
            empty_samples: 0,
        }
    }

    /// Inform the simulator which position (if any) is currently watered.
    pub fn set_watering(&mut self, position: Option<usize>) {
        self.watering = position;
    }

    /// Put a pot on `position` at the given moisture.
    pub fn insert_pot(&mut self, position: usize, moisture: f64) {
        self.pots[position] = Some(Pot {
            moisture,
            offset: gaussian(0.0, 1.5),
        });
    }

    /// Lift the pot off `position`.
    pub fn remove_pot(&mut self, position: usize) {
        self.pots[position] = None;
    }

    pub fn occupied(&self, position: usize) -> bool {
        self.pots[position].is_some()
    }

    /// Produce the next moisture reading for `position`.
    ///
    /// The pot's base value evolves with each call, so the order and
    /// frequency of calls matters.
    pub fn sample_moisture(&mut self, position: usize) -> f64 {
        let noise = gaussian(0.0, self.noise_sigma);
        let spike = if fastrand::f32() < self.spike_prob {
            gaussian(0.0, self.spike_sigma)
        } else {
            0.0
        };

        let watered = self.watering == Some(position);
        let reading = match &mut self.pots[position] {
            Some(pot) => {
                let pull = self.mean_reversion * (self.center - pot.moisture);
                let walk = gaussian(0.0, self.walk_sigma);
                let wet = if watered { WET_RATE } else { 0.0 };
                pot.moisture =
                    (pot.moisture - self.drift_per_sample + pull + walk + wet).clamp(0.0, 100.0);
                pot.moisture + pot.offset
            }
            None => EMPTY_BASELINE,
        };

        (reading + noise + spike).clamp(0.0, 100.0)
    }

    /// Produce the next reservoir reading.
    pub fn sample_water_level(&mut self) -> f64 {
        if self.watering.is_some() {
            self.tank = (self.tank - DRAIN_RATE).max(0.0);
        }
        if self.tank <= 0.0 {
            self.empty_samples += 1;
            if self.empty_samples >= REFILL_AFTER {
                self.tank = 95.0;
                self.empty_samples = 0;
            }
        }
        (self.tank + gaussian(0.0, 0.3)).clamp(0.0, 100.0)
    }

    /// Ambient light following a sinusoidal day, dark half the period.
    pub fn sample_ambient_light(&mut self) -> f64 {
        let now_s = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        let phase = 2.0 * std::f64::consts::PI * now_s / self.diurnal_period_s;
        (phase.sin() * 90.0 + gaussian(0.0, 2.0)).clamp(0.0, 100.0)
    }
}

/// Cloneable handle so the host can feed watering state back while the
/// engine owns the sensor side.
#[derive(Clone)]
pub struct SharedSim(Arc<Mutex<GreenhouseSim>>);

impl SharedSim {
    pub fn new(sim: GreenhouseSim) -> Self {
        Self(Arc::new(Mutex::new(sim)))
    }

    pub fn set_watering(&self, position: Option<usize>) {
        self.lock().set_watering(position);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GreenhouseSim> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SensorPort for SharedSim {
    fn read_moisture(&mut self, position: usize) -> f64 {
        self.lock().sample_moisture(position)
    }

    fn read_water_level(&mut self) -> f64 {
        self.lock().sample_water_level()
    }

    fn read_ambient_light(&mut self) -> f64 {
        self.lock().sample_ambient_light()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
