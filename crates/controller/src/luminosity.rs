//! Supplemental lighting inside each plant's daily exposure window.
//!
//! The window is `center ± hours/2` in local time and may wrap midnight.
//! Inside it the position's segment is lit at `100 - ambient` percent, so
//! the strip fills in what daylight does not provide. On/off orders are
//! logged on transitions only.

use anyhow::Result;
use greenhouse_frontend::POSITION_COUNT;
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tracing::info;

use crate::config::LuminosityConfig;
use crate::light::{LightOutput, LightStrip};
use crate::log::PersistentLog;
use crate::plant::PlantSlots;

/// Hour of day in `[0, 24)` at `offset_hours` east of UTC.
pub fn local_hour(wall: OffsetDateTime, offset_hours: f64) -> f64 {
    let utc = wall.to_offset(time::UtcOffset::UTC);
    let hour = f64::from(utc.hour())
        + f64::from(utc.minute()) / 60.0
        + f64::from(utc.second()) / 3600.0;
    (hour + offset_hours).rem_euclid(24.0)
}

/// Whether `hour` falls in `[center - duration/2, center + duration/2]`,
/// wrapping across midnight.
pub fn in_window(hour: f64, center: f64, duration: f64) -> bool {
    if duration >= 24.0 {
        return true;
    }
    let half = duration.max(0.0) / 2.0;
    let start = (center - half).rem_euclid(24.0);
    let end = (center + half).rem_euclid(24.0);
    if start <= end {
        (start..=end).contains(&hour)
    } else {
        hour >= start || hour <= end
    }
}

/// Supplemental brightness for a given ambient light, percent.
pub fn brightness(ambient: f64) -> f64 {
    (100.0 - ambient).clamp(0.0, 100.0)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LightTransition {
    On { position: usize, brightness: f64 },
    Off { position: usize },
}

pub struct LuminosityRegulator {
    interval: Duration,
    center: f64,
    offset_hours: f64,
    lit: [bool; POSITION_COUNT],
    last_run: Option<Instant>,
}

impl LuminosityRegulator {
    pub fn new(cfg: &LuminosityConfig, offset_hours: f64) -> Self {
        Self {
            interval: cfg.interval(),
            center: cfg.time_range_center,
            offset_hours,
            lit: [false; POSITION_COUNT],
            last_run: None,
        }
    }

    pub fn due(&self, now: Instant) -> bool {
        self.last_run
            .map_or(true, |t| now.saturating_duration_since(t) >= self.interval)
    }

    /// One pass over every position.
    pub fn regulate<O: LightOutput>(
        &mut self,
        now: Instant,
        wall: OffsetDateTime,
        ambient: f64,
        plants: &PlantSlots,
        lights: &mut LightStrip<O>,
        log: &dyn PersistentLog,
    ) -> Result<Vec<LightTransition>> {
        self.last_run = Some(now);
        let hour = local_hour(wall, self.offset_hours);
        let level = brightness(ambient);
        let mut transitions = Vec::new();

        for (position, slot) in plants.iter().enumerate() {
            let wanted = slot
                .as_ref()
                .is_some_and(|p| in_window(hour, self.center, p.light_exposure_hours));

            if wanted {
                lights.turn_on(position, level)?;
                if !self.lit[position] {
                    self.lit[position] = true;
                    log.record_light_order(position, true);
                    info!(position, hour, brightness = level, "light on");
                    transitions.push(LightTransition::On {
                        position,
                        brightness: level,
                    });
                }
            } else if self.lit[position] {
                lights.turn_off(position)?;
                self.lit[position] = false;
                log.record_light_order(position, false);
                info!(position, hour, "light off");
                transitions.push(LightTransition::Off { position });
            }
        }
        Ok(transitions)
    }

    pub fn is_lit(&self, position: usize) -> bool {
        self.lit[position]
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::light::MockLightOutput;
    use crate::log::{LogRecord, MemoryLog};
    use crate::plant::{empty_slots, Plant};
    use time::macros::datetime;

    fn plant(position: usize, hours: f64) -> Plant {
        Plant {
            id: Some(format!("p{position}")),
            position,
            moisture_goal: 40.0,
            light_exposure_hours: hours,
        }
    }

    fn rig(offset: f64) -> (LuminosityRegulator, LightStrip<MockLightOutput>, MemoryLog) {
        let cfg = test_config();
        let mut lum = cfg.luminosity.clone();
        lum.time_range_center = 14.0;
        (
            LuminosityRegulator::new(&lum, offset),
            LightStrip::new(MockLightOutput::default(), &cfg.lights),
            MemoryLog::default(),
        )
    }

    #[test]
    fn window_is_symmetric_and_inclusive() {
        for tenth in 0..240 {
            let hour = f64::from(tenth) / 10.0;
            let expected = (12.0..=16.0).contains(&hour);
            assert_eq!(in_window(hour, 14.0, 4.0), expected, "hour {hour}");
        }
    }

    #[test]
    fn window_wraps_midnight() {
        assert!(in_window(23.0, 0.0, 4.0));
        assert!(in_window(1.5, 0.0, 4.0));
        assert!(!in_window(2.5, 0.0, 4.0));
        assert!(!in_window(21.0, 0.0, 4.0));
    }

    #[test]
    fn full_day_window_always_on() {
        assert!(in_window(3.0, 14.0, 24.0));
    }

    #[test]
    fn zero_exposure_only_at_center() {
        assert!(in_window(14.0, 14.0, 0.0));
        assert!(!in_window(14.1, 14.0, 0.0));
    }

    #[test]
    fn local_hour_applies_offset() {
        let wall = datetime!(2024-06-01 11:30:00 UTC);
        assert!((local_hour(wall, 2.0) - 13.5).abs() < 1e-9);
        assert!((local_hour(wall, -12.0) - 23.5).abs() < 1e-9);
        let late = datetime!(2024-06-01 23:00:00 UTC);
        assert!((local_hour(late, 3.0) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn local_hour_ignores_wall_offset() {
        let wall = datetime!(2024-06-01 13:30:00 +02:00);
        assert!((local_hour(wall, 0.0) - 11.5).abs() < 1e-9);
    }

    #[test]
    fn brightness_compensates_ambient() {
        assert_eq!(brightness(30.0), 70.0);
        assert_eq!(brightness(0.0), 100.0);
        assert_eq!(brightness(120.0), 0.0);
        assert_eq!(brightness(-5.0), 100.0);
    }

    #[test]
    fn light_on_inside_window_once() {
        let (mut reg, mut strip, log) = rig(0.0);
        let mut plants = empty_slots();
        plants[3] = Some(plant(3, 4.0));
        let t0 = Instant::now();
        let wall = datetime!(2024-06-01 13:00:00 UTC);

        let tr = reg.regulate(t0, wall, 20.0, &plants, &mut strip, &log).unwrap();
        assert_eq!(
            tr,
            vec![LightTransition::On {
                position: 3,
                brightness: 80.0
            }]
        );
        assert!(reg.is_lit(3));
        assert_eq!(strip.segment(3)[0], [204, 204, 204]);

        // still inside: no new order, brightness follows ambient
        let tr = reg
            .regulate(t0 + Duration::from_secs(60), wall, 50.0, &plants, &mut strip, &log)
            .unwrap();
        assert!(tr.is_empty());
        assert_eq!(strip.segment(3)[0], [128, 128, 128]);
        assert_eq!(log.records(), vec![LogRecord::LightOrder { position: 3, on: true }]);
    }

    #[test]
    fn light_off_after_window_once() {
        let (mut reg, mut strip, log) = rig(0.0);
        let mut plants = empty_slots();
        plants[0] = Some(plant(0, 4.0));
        let t0 = Instant::now();

        reg.regulate(t0, datetime!(2024-06-01 15:59:00 UTC), 0.0, &plants, &mut strip, &log)
            .unwrap();
        let tr = reg
            .regulate(t0, datetime!(2024-06-01 16:01:00 UTC), 0.0, &plants, &mut strip, &log)
            .unwrap();
        assert_eq!(tr, vec![LightTransition::Off { position: 0 }]);
        let tr = reg
            .regulate(t0, datetime!(2024-06-01 17:00:00 UTC), 0.0, &plants, &mut strip, &log)
            .unwrap();
        assert!(tr.is_empty());
        assert_eq!(strip.segment(0), &[[0, 0, 0]; 3]);
        assert_eq!(log.records().len(), 2);
    }

    #[test]
    fn empty_positions_stay_dark() {
        let (mut reg, mut strip, log) = rig(0.0);
        let tr = reg
            .regulate(
                Instant::now(),
                datetime!(2024-06-01 14:00:00 UTC),
                0.0,
                &empty_slots(),
                &mut strip,
                &log,
            )
            .unwrap();
        assert!(tr.is_empty());
        assert_eq!(strip.output().writes, 0);
    }

    #[test]
    fn removed_plant_light_turned_off() {
        let (mut reg, mut strip, log) = rig(0.0);
        let mut plants = empty_slots();
        plants[7] = Some(plant(7, 8.0));
        let t0 = Instant::now();
        let wall = datetime!(2024-06-01 14:00:00 UTC);
        reg.regulate(t0, wall, 0.0, &plants, &mut strip, &log).unwrap();
        plants[7] = None;
        let tr = reg.regulate(t0, wall, 0.0, &plants, &mut strip, &log).unwrap();
        assert_eq!(tr, vec![LightTransition::Off { position: 7 }]);
    }

    #[test]
    fn offset_shifts_window() {
        let (mut reg, mut strip, log) = rig(2.0);
        let mut plants = empty_slots();
        plants[1] = Some(plant(1, 4.0));
        // 10:30 UTC is 12:30 local
        let tr = reg
            .regulate(
                Instant::now(),
                datetime!(2024-06-01 10:30:00 UTC),
                0.0,
                &plants,
                &mut strip,
                &log,
            )
            .unwrap();
        assert_eq!(tr.len(), 1);
    }

    #[test]
    fn due_respects_interval() {
        let (mut reg, mut strip, log) = rig(0.0);
        let t0 = Instant::now();
        assert!(reg.due(t0));
        reg.regulate(t0, datetime!(2024-06-01 00:00:00 UTC), 0.0, &empty_slots(), &mut strip, &log)
            .unwrap();
        assert!(!reg.due(t0 + Duration::from_secs(59)));
        assert!(reg.due(t0 + Duration::from_secs(60)));
    }
}
