use serde::Serialize;
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::engine::{EngineEvent, EngineSnapshot};
use crate::signal::Signal;

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedState = Arc<RwLock<SystemState>>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

pub struct SystemState {
    pub started_at: Instant,
    pub mqtt_connected: bool,
    pub signals: BTreeSet<Signal>,
    pub engine: Option<EngineSnapshot>,
    pub events: VecDeque<SystemEvent>,
}

#[derive(Clone, Serialize)]
pub struct SystemEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Presence,
    Irrigation,
    Light,
    Water,
    Signal,
    Error,
    System,
}

impl EventKind {
    fn of(event: &EngineEvent) -> Self {
        match event {
            EngineEvent::PlantAdded { .. } | EngineEvent::PlantRemoved { .. } => Self::Presence,
            EngineEvent::ShotQueued { .. }
            | EngineEvent::ShotStarted { .. }
            | EngineEvent::ShotFinished { .. }
            | EngineEvent::ShotDropped { .. } => Self::Irrigation,
            EngineEvent::LightOn { .. } | EngineEvent::LightOff { .. } => Self::Light,
            EngineEvent::WaterLevel { .. } => Self::Water,
        }
    }
}

// ---------------------------------------------------------------------------
// JSON response (what the API returns)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub mqtt_connected: bool,
    pub signals: Vec<Signal>,
    pub engine: Option<EngineSnapshot>,
    pub events: Vec<SystemEvent>,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl SystemState {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            mqtt_connected: false,
            signals: BTreeSet::new(),
            engine: None,
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    /// Replace the engine snapshot and append its events.
    pub fn record_engine(&mut self, snapshot: EngineSnapshot, events: Vec<EngineEvent>) {
        for event in events {
            self.push_event(EventKind::of(&event), event.to_string());
        }
        self.engine = Some(snapshot);
    }

    /// Record a status signal change published to the indicator.
    pub fn record_signal(&mut self, signal: Signal, raised: bool) {
        if raised {
            self.signals.insert(signal);
        } else {
            self.signals.remove(&signal);
        }
        let state_str = if raised { "raised" } else { "cleared" };
        self.push_event(EventKind::Signal, format!("{signal} {state_str}"));
    }

    /// Record an error event.
    pub fn record_error(&mut self, detail: String) {
        self.push_event(EventKind::Error, detail);
    }

    /// Record a generic system event.
    pub fn record_system(&mut self, detail: String) {
        self.push_event(EventKind::System, detail);
    }

    /// Build the JSON-serialisable status snapshot.
    pub fn to_status(&self) -> StatusResponse {
        StatusResponse {
            uptime_secs: self.started_at.elapsed().as_secs(),
            mqtt_connected: self.mqtt_connected,
            signals: self.signals.iter().copied().collect(),
            engine: self.engine.clone(),
            events: self.events.iter().rev().cloned().collect(),
        }
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(SystemEvent {
            ts: OffsetDateTime::now_utc(),
            kind,
            detail,
        });
    }
}

impl Default for SystemState {
    fn default() -> Self {
        Self::new()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
