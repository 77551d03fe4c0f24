//! Plant identity records and the fixed sixteen-slot plant directory.

use greenhouse_frontend::POSITION_COUNT;
use serde::Serialize;

/// An occupied position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Plant {
    /// Identifier assigned by the sync service. `None` while the plant is
    /// only known from local presence detection.
    pub id: Option<String>,
    pub position: usize,
    /// Minimum average moisture, percent.
    pub moisture_goal: f64,
    /// Minimum daily light exposure, hours.
    pub light_exposure_hours: f64,
}

/// One optional plant per position, indexed by position.
pub type PlantSlots = [Option<Plant>; POSITION_COUNT];

/// Goals applied to a plant until the sync service provides its own.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlantDefaults {
    pub moisture_goal: f64,
    pub light_exposure_hours: f64,
}

impl Plant {
    /// Placeholder for a plant just detected at `position`.
    pub fn detected(position: usize, defaults: PlantDefaults) -> Self {
        Self {
            id: None,
            position,
            moisture_goal: defaults.moisture_goal,
            light_exposure_hours: defaults.light_exposure_hours,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.id.is_none()
    }
}

pub fn empty_slots() -> PlantSlots {
    std::array::from_fn(|_| None)
}

/// Merge a directory snapshot into the engine's current slots.
///
/// The snapshot wins everywhere except at positions where it has nothing
/// and the engine holds a local placeholder: the placeholder was detected
/// after the snapshot was taken and is kept.
pub fn merge_snapshot(current: &PlantSlots, snapshot: PlantSlots) -> PlantSlots {
    let mut merged = snapshot;
    for (slot, local) in merged.iter_mut().zip(current.iter()) {
        if slot.is_none() {
            if let Some(plant) = local.as_ref().filter(|p| p.is_placeholder()) {
                *slot = Some(plant.clone());
            }
        }
    }
    merged
}

/// Build slots from a list of plants, dropping entries with an out of range
/// position. A later entry for the same position replaces an earlier one.
pub fn slots_from(plants: impl IntoIterator<Item = Plant>) -> PlantSlots {
    let mut slots = empty_slots();
    for plant in plants {
        if plant.position < POSITION_COUNT {
            let position = plant.position;
            slots[position] = Some(plant);
        } else {
            tracing::warn!(position = plant.position, "plant position out of range, ignored");
        }
    }
    slots
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULTS: PlantDefaults = PlantDefaults {
        moisture_goal: 40.0,
        light_exposure_hours: 8.0,
    };

    fn synced(position: usize, id: &str) -> Plant {
        Plant {
            id: Some(id.to_string()),
            position,
            moisture_goal: 55.0,
            light_exposure_hours: 6.0,
        }
    }

    #[test]
    fn detected_plant_uses_defaults() {
        let p = Plant::detected(7, DEFAULTS);
        assert!(p.is_placeholder());
        assert_eq!(p.position, 7);
        assert_eq!(p.moisture_goal, 40.0);
        assert_eq!(p.light_exposure_hours, 8.0);
    }

    #[test]
    fn slots_from_places_by_position() {
        let slots = slots_from(vec![synced(2, "a"), synced(15, "b")]);
        assert_eq!(slots[2].as_ref().unwrap().id.as_deref(), Some("a"));
        assert_eq!(slots[15].as_ref().unwrap().id.as_deref(), Some("b"));
        assert_eq!(slots.iter().flatten().count(), 2);
    }

    #[test]
    fn slots_from_ignores_out_of_range() {
        let slots = slots_from(vec![synced(16, "x")]);
        assert!(slots.iter().all(Option::is_none));
    }

    #[test]
    fn merge_prefers_snapshot() {
        let mut current = empty_slots();
        current[1] = Some(Plant::detected(1, DEFAULTS));
        let snapshot = slots_from(vec![synced(1, "uuid-1")]);
        let merged = merge_snapshot(&current, snapshot);
        assert_eq!(merged[1].as_ref().unwrap().id.as_deref(), Some("uuid-1"));
        assert_eq!(merged[1].as_ref().unwrap().moisture_goal, 55.0);
    }

    #[test]
    fn merge_keeps_local_placeholder_missing_from_snapshot() {
        let mut current = empty_slots();
        current[4] = Some(Plant::detected(4, DEFAULTS));
        let merged = merge_snapshot(&current, empty_slots());
        assert!(merged[4].as_ref().unwrap().is_placeholder());
    }

    #[test]
    fn merge_drops_synced_plant_missing_from_snapshot() {
        let mut current = empty_slots();
        current[4] = Some(synced(4, "gone"));
        let merged = merge_snapshot(&current, empty_slots());
        assert!(merged[4].is_none());
    }
}
