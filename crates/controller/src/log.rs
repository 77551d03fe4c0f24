//! Fire-and-forget fact log consumed by the external sync service.
//!
//! The engine calls [`PersistentLog`] synchronously from inside its tick.
//! In production [`ChannelLog`] only pushes onto an unbounded channel; the
//! SQLite writes happen in [`run_writer`], a separate task, so a slow disk
//! never stalls the control loop.

use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::db::Db;
use crate::plant::PlantDefaults;

/// One fact written by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum LogRecord {
    /// Window-averaged moisture of an occupied position.
    Moisture { position: usize, value: f64 },
    LightOrder { position: usize, on: bool },
    ValveOrder { position: usize, open: bool },
    /// Pump speed in percent, 0 for stop.
    PumpOrder { speed: f64 },
    TankLevel { value: f64 },
    PlantAdded { position: usize },
    PlantRemoved {
        position: usize,
        plant_id: Option<String>,
    },
}

pub trait PersistentLog: Send + Sync {
    fn record(&self, record: LogRecord);

    fn record_moisture(&self, position: usize, value: f64) {
        self.record(LogRecord::Moisture { position, value });
    }

    fn record_light_order(&self, position: usize, on: bool) {
        self.record(LogRecord::LightOrder { position, on });
    }

    fn record_valve_order(&self, position: usize, open: bool) {
        self.record(LogRecord::ValveOrder { position, open });
    }

    fn record_pump_order(&self, speed: f64) {
        self.record(LogRecord::PumpOrder { speed });
    }

    fn record_tank_level(&self, value: f64) {
        self.record(LogRecord::TankLevel { value });
    }

    fn record_plant_added(&self, position: usize) {
        self.record(LogRecord::PlantAdded { position });
    }

    fn record_plant_removed(&self, position: usize, plant_id: Option<&str>) {
        self.record(LogRecord::PlantRemoved {
            position,
            plant_id: plant_id.map(str::to_string),
        });
    }
}

// ---------------------------------------------------------------------------
// Channel-backed log (production)
// ---------------------------------------------------------------------------

pub struct ChannelLog {
    tx: mpsc::UnboundedSender<LogRecord>,
}

impl ChannelLog {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LogRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl PersistentLog for ChannelLog {
    fn record(&self, record: LogRecord) {
        if let Err(e) = self.tx.send(record) {
            warn!(record = ?e.0, "fact log writer stopped, record dropped");
        }
    }
}

/// Drain the channel into SQLite until every sender is dropped.
///
/// Write failures are logged and the record is skipped; the writer never
/// exits on a database error.
pub async fn run_writer(
    db: Db,
    mut rx: mpsc::UnboundedReceiver<LogRecord>,
    defaults: PlantDefaults,
) {
    while let Some(record) = rx.recv().await {
        debug!(?record, "fact log write");
        if let Err(e) = db.append(&record, defaults).await {
            error!(?record, "fact log write failed: {e:#}");
        }
    }
    debug!("fact log writer finished");
}

// ---------------------------------------------------------------------------
// In-memory log (tests)
// ---------------------------------------------------------------------------

#[cfg(test)]
#[derive(Default)]
pub struct MemoryLog {
    records: std::sync::Mutex<Vec<LogRecord>>,
}

#[cfg(test)]
impl MemoryLog {
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl PersistentLog for MemoryLog {
    fn record(&self, record: LogRecord) {
        self.records.lock().unwrap().push(record);
    }
}
