//! The closed-loop regulation engine.
//!
//! One call to [`Regulator::tick`] runs, in order:
//!
//! 1. reservoir level classification, when due (gates shot starts)
//! 2. one step of the shot scheduler
//! 3. one step of the valve actuator
//! 4. one moisture sample, for the next position round-robin, when due
//! 5. a luminosity pass, when due
//!
//! Nothing here awaits. Hardware write failures are returned to the host,
//! which owns the fail-safe shutdown.

use anyhow::Result;
use greenhouse_frontend::{SensorPort, POSITION_COUNT};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::light::{LightOutput, LightStrip};
use crate::log::PersistentLog;
use crate::luminosity::{LightTransition, LuminosityRegulator};
use crate::moisture::{MoistureAverager, PresenceEvent};
use crate::plant::{merge_snapshot, Plant, PlantDefaults, PlantSlots};
use crate::pump::{PumpActuator, PumpOutput};
use crate::shots::{ShotScheduler, ShotTransition};
use crate::signal::StatusSignal;
use crate::valve::{ValveActuator, ValveBus, ValveState};
use crate::water_level::{WaterBand, WaterLevelMonitor};

// ---------------------------------------------------------------------------
// Events and snapshots
// ---------------------------------------------------------------------------

/// Something the engine did, for the status API and tests.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineEvent {
    PlantAdded { position: usize },
    PlantRemoved { position: usize, plant_id: Option<String> },
    ShotQueued { position: usize },
    ShotStarted { position: usize },
    ShotFinished { position: usize },
    ShotDropped { position: usize, count: usize },
    LightOn { position: usize, brightness: f64 },
    LightOff { position: usize },
    WaterLevel { from: WaterBand, to: WaterBand, level: f64 },
}

impl fmt::Display for EngineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PlantAdded { position } => write!(f, "plant detected at position {position}"),
            Self::PlantRemoved { position, plant_id } => match plant_id {
                Some(id) => write!(f, "plant {id} removed from position {position}"),
                None => write!(f, "plant removed from position {position}"),
            },
            Self::ShotQueued { position } => write!(f, "shot queued for position {position}"),
            Self::ShotStarted { position } => write!(f, "shot started at position {position}"),
            Self::ShotFinished { position } => write!(f, "shot finished at position {position}"),
            Self::ShotDropped { position, count } => {
                write!(f, "{count} pending shot(s) dropped for position {position}")
            }
            Self::LightOn {
                position,
                brightness,
            } => write!(f, "light on at position {position} ({brightness:.0}%)"),
            Self::LightOff { position } => write!(f, "light off at position {position}"),
            Self::WaterLevel { from, to, level } => {
                write!(f, "reservoir {from} -> {to} ({level:.1}%)")
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PositionSnapshot {
    pub position: usize,
    pub plant: Option<Plant>,
    pub average: f64,
    pub last_read: f64,
    pub sample_count: u32,
    pub valve: Option<ValveState>,
    pub light_on: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub water_band: WaterBand,
    pub water_level: Option<f64>,
    pub pump_speed: f64,
    pub watering: Option<usize>,
    pub queue: Vec<usize>,
    pub positions: Vec<PositionSnapshot>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Output drivers handed to the engine at construction.
pub struct Drivers<B, P, L> {
    pub valves: B,
    pub pump: P,
    pub lights: L,
}

pub struct Regulator<S, B, P, L> {
    sensors: S,
    plants: PlantSlots,
    defaults: PlantDefaults,
    moisture: MoistureAverager,
    shots: ShotScheduler,
    valves: ValveActuator<B>,
    pump: PumpActuator<P>,
    water: WaterLevelMonitor,
    luminosity: LuminosityRegulator,
    lights: LightStrip<L>,
    log: Arc<dyn PersistentLog>,
    status: Arc<dyn StatusSignal>,

    sample_interval: Duration,
    level_interval: Duration,
    tank_log_interval: Duration,
    next_position: usize,
    last_sample: Option<Instant>,
    last_level_read: Option<Instant>,
    last_tank_log: Option<Instant>,
    events: Vec<EngineEvent>,
}

impl<S, B, P, L> Regulator<S, B, P, L>
where
    S: SensorPort,
    B: ValveBus,
    P: PumpOutput,
    L: LightOutput,
{
    /// Build the engine. Every position's moisture baseline is primed from
    /// one reading so the first observations cannot look like a step.
    pub fn new(
        cfg: &Config,
        mut sensors: S,
        plants: PlantSlots,
        drivers: Drivers<B, P, L>,
        log: Arc<dyn PersistentLog>,
        status: Arc<dyn StatusSignal>,
    ) -> Self {
        let initial: [f64; POSITION_COUNT] =
            std::array::from_fn(|position| sensors.read_moisture(position));
        debug!(?initial, "moisture baselines primed");

        Self {
            sensors,
            plants,
            defaults: cfg.plant_defaults(),
            moisture: MoistureAverager::new(&cfg.hygrometry, initial),
            shots: ShotScheduler::new(&cfg.irrigation),
            valves: ValveActuator::new(drivers.valves, &cfg.valves),
            pump: PumpActuator::new(drivers.pump, &cfg.pump),
            water: WaterLevelMonitor::new(&cfg.water_level),
            luminosity: LuminosityRegulator::new(&cfg.luminosity, cfg.time_zone_offset),
            lights: LightStrip::new(drivers.lights, &cfg.lights),
            log,
            status,
            sample_interval: cfg.hygrometry.sample_interval(),
            level_interval: cfg.water_level.sample_interval(),
            tank_log_interval: cfg.water_level.log_interval(),
            next_position: 0,
            last_sample: None,
            last_level_read: None,
            last_tank_log: None,
            events: Vec::new(),
        }
    }

    /// Drive every valve closed and wait for all of them to confirm.
    pub async fn initialize_valves(&mut self) -> Result<()> {
        self.pump.stop()?;
        self.valves.initialize_closed().await
    }

    pub fn tick(&mut self, now: Instant, wall: OffsetDateTime) -> Result<()> {
        let level_due = self
            .last_level_read
            .map_or(true, |t| now.saturating_duration_since(t) >= self.level_interval);
        if level_due {
            self.last_level_read = Some(now);
            self.update_water_level(now);
        }

        if let Some(transition) = self.shots.tick(
            now,
            self.water.is_empty(),
            &mut self.valves,
            &mut self.pump,
            self.log.as_ref(),
        )? {
            self.events.push(match transition {
                ShotTransition::Started(position) => EngineEvent::ShotStarted { position },
                ShotTransition::Finished(position) => EngineEvent::ShotFinished { position },
            });
        }

        self.valves.tick(now)?;

        let sample_due = self
            .last_sample
            .map_or(true, |t| now.saturating_duration_since(t) >= self.sample_interval);
        if sample_due {
            self.last_sample = Some(now);
            self.sample_next(now);
        }

        if self.luminosity.due(now) {
            let ambient = self.sensors.read_ambient_light();
            let transitions = self.luminosity.regulate(
                now,
                wall,
                ambient,
                &self.plants,
                &mut self.lights,
                self.log.as_ref(),
            )?;
            self.events
                .extend(transitions.into_iter().map(|t| match t {
                    LightTransition::On {
                        position,
                        brightness,
                    } => EngineEvent::LightOn {
                        position,
                        brightness,
                    },
                    LightTransition::Off { position } => EngineEvent::LightOff { position },
                }));
        }

        Ok(())
    }

    fn update_water_level(&mut self, now: Instant) {
        let level = self.sensors.read_water_level();

        let log_due = self
            .last_tank_log
            .map_or(true, |t| now.saturating_duration_since(t) >= self.tank_log_interval);
        if log_due {
            self.last_tank_log = Some(now);
            self.log.record_tank_level(level);
            info!(level, "reservoir level");
        }

        if let Some(t) = self.water.update(level, now, self.status.as_ref()) {
            self.events.push(EngineEvent::WaterLevel {
                from: t.from,
                to: t.to,
                level: t.level,
            });
        }
    }

    fn sample_next(&mut self, now: Instant) {
        let position = self.next_position;
        self.next_position = (position + 1) % POSITION_COUNT;

        let raw = self.sensors.read_moisture(position);
        let occupied = self.plants[position].is_some();
        let obs = self.moisture.observe(position, raw, occupied);
        debug!(position, raw, occupied, "moisture sample");

        match obs.event {
            Some(PresenceEvent::PlantAdded(p)) => {
                info!(position = p, "new plant detected");
                self.plants[p] = Some(Plant::detected(p, self.defaults));
                self.log.record_plant_added(p);
                self.events.push(EngineEvent::PlantAdded { position: p });
            }
            Some(PresenceEvent::PlantRemoved(p)) => {
                let plant_id = self.plants[p].take().and_then(|plant| plant.id);
                info!(position = p, plant_id = ?plant_id, "plant removal detected");
                self.log.record_plant_removed(p, plant_id.as_deref());
                let dropped = self.shots.cancel(p);
                self.events.push(EngineEvent::PlantRemoved {
                    position: p,
                    plant_id,
                });
                if dropped > 0 {
                    self.events.push(EngineEvent::ShotDropped {
                        position: p,
                        count: dropped,
                    });
                }
            }
            None => {}
        }

        let Some(average) = obs.window_average else {
            return;
        };
        let Some(plant) = self.plants[position].as_ref() else {
            return;
        };
        info!(position, average, goal = plant.moisture_goal, "moisture window averaged");
        self.log.record_moisture(position, average);
        if average < plant.moisture_goal && self.shots.enqueue(position, now) {
            self.events.push(EngineEvent::ShotQueued { position });
        }
    }

    /// Queue a shot on operator request. Goes through the same FIFO, dedup
    /// and reservoir gating as regulation shots.
    pub fn request_shot(&mut self, position: usize, now: Instant) -> bool {
        if position >= POSITION_COUNT {
            warn!(position, "manual shot for invalid position ignored");
            return false;
        }
        let queued = self.shots.enqueue(position, now);
        if queued {
            self.events.push(EngineEvent::ShotQueued { position });
        }
        queued
    }

    /// Replace the plant directory with a fresh snapshot, keeping plants
    /// detected locally that the snapshot does not know yet.
    pub fn refresh_plants(&mut self, snapshot: PlantSlots) {
        self.plants = merge_snapshot(&self.plants, snapshot);
    }

    /// Fail-safe: stop the pump and turn every light off. A valve movement
    /// in progress is left to the hardware.
    pub fn shutdown(&mut self) -> Result<()> {
        let was_running = self.pump.is_running();
        let pump = self.pump.stop();
        if was_running {
            self.log.record_pump_order(0.0);
        }
        let lights = self.lights.all_off();
        pump.and(lights)
    }

    pub fn take_events(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.events)
    }

    #[cfg(test)]
    pub fn plants(&self) -> &PlantSlots {
        &self.plants
    }

    /// Position currently being watered.
    pub fn in_flight(&self) -> Option<usize> {
        self.shots.in_flight()
    }

    #[cfg(test)]
    pub fn water_band(&self) -> WaterBand {
        self.water.band()
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        let positions = (0..POSITION_COUNT)
            .map(|position| {
                let m = self.moisture.state(position);
                PositionSnapshot {
                    position,
                    plant: self.plants[position].clone(),
                    average: m.average,
                    last_read: m.last_read,
                    sample_count: m.sample_count,
                    valve: self.valves.actual(position),
                    light_on: self.luminosity.is_lit(position),
                }
            })
            .collect();

        EngineSnapshot {
            water_band: self.water.band(),
            water_level: self.water.last_level(),
            pump_speed: self.pump.speed(),
            watering: self.shots.in_flight(),
            queue: self.shots.pending(),
            positions,
        }
    }

    #[cfg(test)]
    fn valves(&self) -> &ValveActuator<B> {
        &self.valves
    }

    #[cfg(test)]
    fn lights(&self) -> &LightStrip<L> {
        &self.lights
    }

    #[cfg(test)]
    fn pump(&self) -> &PumpActuator<P> {
        &self.pump
    }
}

// ===========================================================================
// Tests
// ===========================================================================
