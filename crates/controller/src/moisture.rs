//! Per-position moisture averaging and plant presence detection.
//!
//! Each observation feeds a rolling window per position. A pot being
//! inserted or lifted shows up as a step in the reading; a step is only
//! believed when the sample after it lands near the new level too:
//!
//! ```text
//! |raw - average| >= delta   (moved away from the settled level)
//! |raw - last|    <= delta   (and agrees with the previous sample)
//! ```
//!
//! A single spike fails the second test on the sample after it, because
//! that sample is back near the old average and far from the spike.

use greenhouse_frontend::POSITION_COUNT;
use serde::Serialize;
use tracing::debug;

use crate::config::HygrometryConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "position", rename_all = "snake_case")]
pub enum PresenceEvent {
    PlantAdded(usize),
    PlantRemoved(usize),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PositionMoistureState {
    pub cumulative: f64,
    pub sample_count: u32,
    pub last_read: f64,
    /// Only authoritative once a full window has been averaged.
    pub average: f64,
}

/// Outcome of one observation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Observation {
    pub event: Option<PresenceEvent>,
    /// Set when this sample completed a window.
    pub window_average: Option<f64>,
}

pub struct MoistureAverager {
    delta_detection: f64,
    window: u32,
    positions: [PositionMoistureState; POSITION_COUNT],
}

impl MoistureAverager {
    /// `initial` holds one reading per position, taken at startup; it seeds
    /// both the average and the previous sample so the first observation
    /// cannot look like a step.
    pub fn new(cfg: &HygrometryConfig, initial: [f64; POSITION_COUNT]) -> Self {
        let positions = initial.map(|raw| PositionMoistureState {
            cumulative: raw,
            sample_count: 1,
            last_read: raw,
            average: raw,
        });
        Self {
            delta_detection: cfg.delta_detection,
            window: cfg.max_samples_before_regulation,
            positions,
        }
    }

    pub fn state(&self, position: usize) -> &PositionMoistureState {
        &self.positions[position]
    }

    /// Feed one raw reading for `position`. `occupied` tells whether a plant
    /// is currently recorded there.
    pub fn observe(&mut self, position: usize, raw: f64, occupied: bool) -> Observation {
        let delta = self.delta_detection;
        let window = self.window;
        let st = &mut self.positions[position];
        let mut out = Observation::default();

        let diff_avg = (raw - st.average).abs();
        let diff_last = (raw - st.last_read).abs();

        if diff_avg >= delta && diff_last <= delta {
            debug!(
                position,
                raw,
                average = st.average,
                last = st.last_read,
                "confirmed moisture step"
            );
            if raw > st.average && !occupied {
                out.event = Some(PresenceEvent::PlantAdded(position));
            } else if occupied {
                out.event = Some(PresenceEvent::PlantRemoved(position));
            }
            // New baseline starts at the corroborating sample.
            st.cumulative = st.last_read;
            st.sample_count = 1;
            st.average = st.last_read;
        }

        st.cumulative += raw;
        st.sample_count += 1;
        st.last_read = raw;

        if st.sample_count >= window {
            st.average = st.cumulative / f64::from(st.sample_count);
            out.window_average = Some(st.average);
            st.cumulative = 0.0;
            st.sample_count = 0;
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;

    fn averager(window: u32, baseline: f64) -> MoistureAverager {
        let mut cfg = test_config().hygrometry;
        cfg.max_samples_before_regulation = window;
        cfg.delta_detection = 10.0;
        MoistureAverager::new(&cfg, [baseline; POSITION_COUNT])
    }

    fn feed(avg: &mut MoistureAverager, position: usize, values: &[f64], occupied: bool) -> Vec<Observation> {
        values
            .iter()
            .map(|&v| avg.observe(position, v, occupied))
            .collect()
    }

    #[test]
    fn primed_state_counts_startup_sample() {
        let avg = averager(20, 55.0);
        let st = avg.state(9);
        assert_eq!(st.sample_count, 1);
        assert_eq!(st.average, 55.0);
        assert_eq!(st.last_read, 55.0);
    }

    #[test]
    fn first_observation_at_baseline_is_quiet() {
        let mut avg = averager(20, 30.0);
        let obs = avg.observe(0, 30.0, false);
        assert_eq!(obs, Observation::default());
    }

    #[test]
    fn window_average_after_configured_samples() {
        let mut avg = averager(4, 50.0);
        // primed sample + 3 more = 4
        let obs = feed(&mut avg, 2, &[52.0, 54.0, 56.0], true);
        assert!(obs[..2].iter().all(|o| o.window_average.is_none()));
        assert_eq!(obs[2].window_average, Some(53.0));
        assert_eq!(avg.state(2).sample_count, 0);
        assert_eq!(avg.state(2).cumulative, 0.0);
        assert_eq!(avg.state(2).average, 53.0);
    }

    #[test]
    fn sample_count_never_exceeds_window() {
        let mut avg = averager(5, 40.0);
        for i in 0..50 {
            avg.observe(1, 40.0 + (i % 3) as f64, true);
            assert!(avg.state(1).sample_count <= 5);
        }
    }

    #[test]
    fn single_spike_is_rejected() {
        let mut avg = averager(20, 30.0);
        for spike in [90.0, 0.0, 55.0] {
            let obs = feed(&mut avg, 3, &[30.0, spike, 30.0, 31.0], false);
            assert!(obs.iter().all(|o| o.event.is_none()), "spike {spike}: {obs:?}");
            let obs = feed(&mut avg, 4, &[30.0, spike, 30.0], true);
            assert!(obs.iter().all(|o| o.event.is_none()), "spike {spike}: {obs:?}");
        }
    }

    #[test]
    fn two_corroborating_samples_add_plant() {
        let mut avg = averager(20, 10.0);
        let obs = feed(&mut avg, 3, &[10.0, 30.0, 30.0], false);
        assert_eq!(obs[1].event, None);
        assert_eq!(obs[2].event, Some(PresenceEvent::PlantAdded(3)));
    }

    #[test]
    fn baseline_resets_on_confirmed_step() {
        let mut avg = averager(20, 10.0);
        feed(&mut avg, 3, &[10.0, 30.0, 31.0], false);
        let st = avg.state(3);
        assert_eq!(st.sample_count, 2);
        assert_eq!(st.cumulative, 61.0);
        assert_eq!(st.average, 30.0);
        assert_eq!(st.last_read, 31.0);
        // the same level is not reported again
        assert_eq!(avg.observe(3, 30.0, true).event, None);
    }

    #[test]
    fn drop_with_plant_recorded_removes_it() {
        let mut avg = averager(20, 60.0);
        let obs = feed(&mut avg, 8, &[60.0, 5.0, 5.0], true);
        assert_eq!(obs[2].event, Some(PresenceEvent::PlantRemoved(8)));
    }

    #[test]
    fn drop_without_plant_only_rebaselines() {
        let mut avg = averager(20, 80.0);
        let obs = feed(&mut avg, 3, &[80.0, 20.0, 20.0], false);
        assert!(obs.iter().all(|o| o.event.is_none()));
        assert_eq!(avg.state(3).average, 20.0);
    }

    #[test]
    fn rise_with_plant_recorded_is_a_removal() {
        let mut avg = averager(20, 30.0);
        let obs = feed(&mut avg, 0, &[30.0, 60.0, 60.0], true);
        assert_eq!(obs[2].event, Some(PresenceEvent::PlantRemoved(0)));
    }

    #[test]
    fn slow_drift_is_not_a_step() {
        let mut avg = averager(5, 50.0);
        let mut v = 50.0;
        for _ in 0..40 {
            v -= 1.0;
            assert_eq!(avg.observe(6, v, true).event, None);
        }
    }

    #[test]
    fn positions_are_independent() {
        let mut avg = averager(20, 10.0);
        feed(&mut avg, 1, &[40.0, 40.0], false);
        assert_eq!(avg.state(2).last_read, 10.0);
        assert_eq!(avg.state(2).sample_count, 1);
    }
}
