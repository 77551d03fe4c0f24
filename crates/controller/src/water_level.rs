//! Reservoir level classification with hysteresis.
//!
//! ```text
//!            ≤ low_at                 ≤ empty_at
//!  Normal ───────────▶ Low ──────────────────────▶ Empty
//!    ▲ ▲                │                            │
//!    │ └──── ≥ recover_at ◀───────────────────────────┘
//!    │
//!    │ ≤ high_unlatch_at and alarm elapsed
//!  High ◀──────────── ≥ high_at (from Normal or Low)
//! ```
//!
//! `≤ empty_at` wins from every band. Empty stays latched until the level
//! reaches `recover_at`, so a half-refilled tank still blocks irrigation.

use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::config::WaterLevelConfig;
use crate::signal::{Signal, StatusSignal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WaterBand {
    Empty,
    Low,
    Normal,
    High,
}

impl WaterBand {
    /// Indicator raised while in this band.
    pub fn signal(self) -> Option<Signal> {
        match self {
            Self::Empty => Some(Signal::WaterEmpty),
            Self::Low => Some(Signal::WaterLow),
            Self::High => Some(Signal::WaterHigh),
            Self::Normal => None,
        }
    }
}

impl fmt::Display for WaterBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Empty => "empty",
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaterTransition {
    pub from: WaterBand,
    pub to: WaterBand,
    pub level: f64,
}

pub struct WaterLevelMonitor {
    empty_at: f64,
    low_at: f64,
    recover_at: f64,
    high_at: f64,
    high_unlatch_at: f64,
    high_alarm: Duration,
    band: WaterBand,
    high_since: Option<Instant>,
    last_level: Option<f64>,
}

impl WaterLevelMonitor {
    pub fn new(cfg: &WaterLevelConfig) -> Self {
        Self {
            empty_at: cfg.empty_at,
            low_at: cfg.low_at,
            recover_at: cfg.recover_at,
            high_at: cfg.high_at,
            high_unlatch_at: cfg.high_unlatch_at,
            high_alarm: cfg.high_alarm_duration(),
            band: WaterBand::Normal,
            high_since: None,
            last_level: None,
        }
    }

    /// Band reached from `Normal` for a fresh reading.
    fn open_band(&self, level: f64) -> WaterBand {
        if level <= self.empty_at {
            WaterBand::Empty
        } else if level <= self.low_at {
            WaterBand::Low
        } else if level >= self.high_at {
            WaterBand::High
        } else {
            WaterBand::Normal
        }
    }

    fn next_band(&self, level: f64, now: Instant) -> WaterBand {
        if level <= self.empty_at {
            return WaterBand::Empty;
        }
        match self.band {
            WaterBand::Empty | WaterBand::Low => {
                if level >= self.high_at {
                    WaterBand::High
                } else if level >= self.recover_at {
                    WaterBand::Normal
                } else {
                    self.band
                }
            }
            WaterBand::Normal => self.open_band(level),
            WaterBand::High => {
                let alarm_done = self
                    .high_since
                    .map_or(true, |since| now.saturating_duration_since(since) >= self.high_alarm);
                if level <= self.low_at {
                    WaterBand::Low
                } else if level <= self.high_unlatch_at && alarm_done {
                    WaterBand::Normal
                } else {
                    WaterBand::High
                }
            }
        }
    }

    /// Classify a reading. On a band change the old band's signal is cleared
    /// and the new one raised, once.
    pub fn update(
        &mut self,
        level: f64,
        now: Instant,
        status: &dyn StatusSignal,
    ) -> Option<WaterTransition> {
        self.last_level = Some(level);
        let next = self.next_band(level, now);
        if next == self.band {
            return None;
        }

        let from = self.band;
        if let Some(signal) = from.signal() {
            status.clear(signal);
        }
        if let Some(signal) = next.signal() {
            status.raise(signal);
        }
        self.band = next;
        self.high_since = (next == WaterBand::High).then_some(now);

        match next {
            WaterBand::Empty => warn!(level, "reservoir empty, irrigation paused"),
            WaterBand::Low => warn!(level, "reservoir low"),
            WaterBand::High => warn!(level, "reservoir high level reached"),
            WaterBand::Normal => info!(level, from = %from, "reservoir level normal"),
        }
        Some(WaterTransition {
            from,
            to: next,
            level,
        })
    }

    pub fn band(&self) -> WaterBand {
        self.band
    }

    pub fn is_empty(&self) -> bool {
        self.band == WaterBand::Empty
    }

    pub fn last_level(&self) -> Option<f64> {
        self.last_level
    }
}

// ===========================================================================
// Tests
// ===========================================================================
