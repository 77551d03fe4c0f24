//! Watering shot scheduler: a FIFO of positions, one shot in flight.
//!
//! ```text
//! Idle ──[queue not empty, water not empty]──▶ Watering ──[shot_duration]──▶ Idle
//!          open valve, start pump                           close valve, stop pump
//! ```
//!
//! A shot in flight always runs to completion, even if the reservoir goes
//! empty or the plant is lifted meanwhile.

use anyhow::Result;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::config::IrrigationConfig;
use crate::log::PersistentLog;
use crate::pump::{PumpActuator, PumpOutput};
use crate::valve::{ValveActuator, ValveBus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShotRequest {
    pub position: usize,
    pub enqueued_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShotState {
    Idle,
    Watering { position: usize, since: Instant },
}

/// What a scheduler tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShotTransition {
    Started(usize),
    Finished(usize),
}

pub struct ShotScheduler {
    shot_duration: Duration,
    pump_speed: f64,
    queue: VecDeque<ShotRequest>,
    state: ShotState,
}

impl ShotScheduler {
    pub fn new(cfg: &IrrigationConfig) -> Self {
        Self {
            shot_duration: cfg.shot_duration(),
            pump_speed: cfg.pump_speed,
            queue: VecDeque::new(),
            state: ShotState::Idle,
        }
    }

    /// Append a shot for `position` unless one is already waiting. Returns
    /// whether it was queued.
    pub fn enqueue(&mut self, position: usize, now: Instant) -> bool {
        if self.queue.iter().any(|r| r.position == position) {
            debug!(position, "shot already queued");
            return false;
        }
        self.queue.push_back(ShotRequest {
            position,
            enqueued_at: now,
        });
        info!(position, queued = self.queue.len(), "shot queued");
        true
    }

    /// Drop waiting shots for `position`. The shot in flight is untouched.
    /// Returns how many were dropped.
    pub fn cancel(&mut self, position: usize) -> usize {
        let before = self.queue.len();
        self.queue.retain(|r| r.position != position);
        let dropped = before - self.queue.len();
        if dropped > 0 {
            info!(position, dropped, "pending shot discarded");
        }
        dropped
    }

    /// Advance the state machine by at most one transition.
    pub fn tick<B: ValveBus, P: PumpOutput>(
        &mut self,
        now: Instant,
        water_empty: bool,
        valves: &mut ValveActuator<B>,
        pump: &mut PumpActuator<P>,
        log: &dyn PersistentLog,
    ) -> Result<Option<ShotTransition>> {
        match self.state {
            ShotState::Idle => {
                if water_empty {
                    return Ok(None);
                }
                let Some(request) = self.queue.pop_front() else {
                    return Ok(None);
                };
                let position = request.position;
                log.record_valve_order(position, true);
                valves.open(position);
                log.record_pump_order(self.pump_speed);
                pump.set_speed(self.pump_speed)?;
                self.state = ShotState::Watering {
                    position,
                    since: now,
                };
                info!(
                    position,
                    waited_ms = now.saturating_duration_since(request.enqueued_at).as_millis() as u64,
                    "shot started"
                );
                Ok(Some(ShotTransition::Started(position)))
            }
            ShotState::Watering { position, since } => {
                if now.saturating_duration_since(since) < self.shot_duration {
                    return Ok(None);
                }
                log.record_valve_order(position, false);
                valves.close(position);
                log.record_pump_order(0.0);
                pump.stop()?;
                self.state = ShotState::Idle;
                info!(position, "shot finished");
                Ok(Some(ShotTransition::Finished(position)))
            }
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> ShotState {
        self.state
    }

    pub fn in_flight(&self) -> Option<usize> {
        match self.state {
            ShotState::Watering { position, .. } => Some(position),
            ShotState::Idle => None,
        }
    }

    /// Waiting positions, oldest first.
    pub fn pending(&self) -> Vec<usize> {
        self.queue.iter().map(|r| r.position).collect()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::log::{LogRecord, MemoryLog};
    use crate::pump::MockPump;
    use crate::valve::MockValveBus;

    const SHOT_MS: u64 = 3000;

    struct Rig {
        shots: ShotScheduler,
        valves: ValveActuator<MockValveBus>,
        pump: PumpActuator<MockPump>,
        log: MemoryLog,
    }

    impl Rig {
        fn new() -> Self {
            let cfg = test_config();
            let mut irrigation = cfg.irrigation.clone();
            irrigation.shot_duration_ms = SHOT_MS;
            irrigation.pump_speed = 60.0;
            Self {
                shots: ShotScheduler::new(&irrigation),
                valves: ValveActuator::new(MockValveBus::default(), &cfg.valves),
                pump: PumpActuator::new(MockPump::default(), &cfg.pump),
                log: MemoryLog::default(),
            }
        }

        fn tick(&mut self, now: Instant, water_empty: bool) -> Option<ShotTransition> {
            self.shots
                .tick(now, water_empty, &mut self.valves, &mut self.pump, &self.log)
                .unwrap()
        }
    }

    fn ms(t0: Instant, ms: u64) -> Instant {
        t0 + Duration::from_millis(ms)
    }

    #[test]
    fn enqueue_dedups_pending_position() {
        let mut rig = Rig::new();
        let t0 = Instant::now();
        assert!(rig.shots.enqueue(4, t0));
        assert!(!rig.shots.enqueue(4, t0));
        assert_eq!(rig.shots.pending(), vec![4]);
    }

    #[test]
    fn shot_opens_valve_and_runs_pump() {
        let mut rig = Rig::new();
        let t0 = Instant::now();
        rig.shots.enqueue(3, t0);
        assert_eq!(rig.tick(t0, false), Some(ShotTransition::Started(3)));
        assert_eq!(rig.shots.in_flight(), Some(3));
        assert!(rig.pump.is_running());
        assert_eq!(rig.valves.pending(), 1);
        assert_eq!(
            rig.log.records(),
            vec![
                LogRecord::ValveOrder { position: 3, open: true },
                LogRecord::PumpOrder { speed: 60.0 },
            ]
        );
    }

    #[test]
    fn shot_ends_after_duration() {
        let mut rig = Rig::new();
        let t0 = Instant::now();
        rig.shots.enqueue(3, t0);
        rig.tick(t0, false);
        assert_eq!(rig.tick(ms(t0, SHOT_MS - 1), false), None);
        assert_eq!(rig.tick(ms(t0, SHOT_MS), false), Some(ShotTransition::Finished(3)));
        assert!(!rig.pump.is_running());
        assert_eq!(rig.shots.state(), ShotState::Idle);
        assert_eq!(
            rig.log.records()[2..],
            [
                LogRecord::ValveOrder { position: 3, open: false },
                LogRecord::PumpOrder { speed: 0.0 },
            ]
        );
    }

    #[test]
    fn shots_served_fifo_one_at_a_time() {
        let mut rig = Rig::new();
        let t0 = Instant::now();
        let order = [9, 2, 14, 0, 7];
        for (i, p) in order.iter().enumerate() {
            rig.shots.enqueue(*p, ms(t0, i as u64));
        }

        let mut started = Vec::new();
        let mut in_flight: Option<usize> = None;
        let mut t = t0;
        for _ in 0..1000 {
            match rig.tick(t, false) {
                Some(ShotTransition::Started(p)) => {
                    assert_eq!(in_flight, None, "second shot started while {in_flight:?} in flight");
                    in_flight = Some(p);
                    started.push(p);
                }
                Some(ShotTransition::Finished(p)) => {
                    assert_eq!(in_flight, Some(p));
                    in_flight = None;
                }
                None => {}
            }
            t += Duration::from_millis(250);
        }
        assert_eq!(started, order);
        assert!(rig.shots.pending().is_empty());
    }

    #[test]
    fn empty_water_blocks_start() {
        let mut rig = Rig::new();
        let t0 = Instant::now();
        rig.shots.enqueue(1, t0);
        assert_eq!(rig.tick(t0, true), None);
        assert_eq!(rig.tick(ms(t0, 10_000), true), None);
        assert_eq!(rig.shots.pending(), vec![1]);
        assert!(rig.log.records().is_empty());
        assert_eq!(rig.tick(ms(t0, 10_100), false), Some(ShotTransition::Started(1)));
    }

    #[test]
    fn empty_water_does_not_abort_shot_in_flight() {
        let mut rig = Rig::new();
        let t0 = Instant::now();
        rig.shots.enqueue(1, t0);
        rig.tick(t0, false);
        assert_eq!(rig.tick(ms(t0, 1000), true), None);
        assert_eq!(rig.tick(ms(t0, SHOT_MS), true), Some(ShotTransition::Finished(1)));
    }

    #[test]
    fn cancel_drops_pending_but_not_in_flight() {
        let mut rig = Rig::new();
        let t0 = Instant::now();
        rig.shots.enqueue(5, t0);
        rig.tick(t0, false);
        rig.shots.enqueue(5, t0);
        rig.shots.enqueue(6, t0);
        assert_eq!(rig.shots.cancel(5), 1);
        assert_eq!(rig.shots.in_flight(), Some(5));
        assert_eq!(rig.shots.pending(), vec![6]);
        assert_eq!(rig.tick(ms(t0, SHOT_MS), false), Some(ShotTransition::Finished(5)));
    }

    #[test]
    fn in_flight_position_can_be_queued_again() {
        let mut rig = Rig::new();
        let t0 = Instant::now();
        rig.shots.enqueue(8, t0);
        rig.tick(t0, false);
        assert!(rig.shots.enqueue(8, t0));
    }
}
