//! Status-indicator signals raised by the water level monitor.

use serde::Serialize;
use std::fmt;
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    WaterEmpty,
    WaterLow,
    WaterHigh,
}

impl Signal {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WaterEmpty => "water_empty",
            Self::WaterLow => "water_low",
            Self::WaterHigh => "water_high",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sink for indicator changes. Called once per state transition.
pub trait StatusSignal: Send + Sync {
    fn raise(&self, signal: Signal);
    fn clear(&self, signal: Signal);
}

/// Forwards `(signal, raised)` pairs to the MQTT status publisher task.
pub struct StatusChannel {
    tx: mpsc::UnboundedSender<(Signal, bool)>,
}

impl StatusChannel {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(Signal, bool)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, signal: Signal, raised: bool) {
        if self.tx.send((signal, raised)).is_err() {
            warn!(%signal, raised, "status publisher stopped, signal change dropped");
        }
    }
}

impl StatusSignal for StatusChannel {
    fn raise(&self, signal: Signal) {
        self.send(signal, true);
    }

    fn clear(&self, signal: Signal) {
        self.send(signal, false);
    }
}

/// Records every call, for tests.
#[cfg(test)]
#[derive(Default)]
pub struct RecordingSignal {
    calls: std::sync::Mutex<Vec<(Signal, bool)>>,
}

#[cfg(test)]
impl RecordingSignal {
    pub fn calls(&self) -> Vec<(Signal, bool)> {
        self.calls.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl StatusSignal for RecordingSignal {
    fn raise(&self, signal: Signal) {
        self.calls.lock().unwrap().push((signal, true));
    }

    fn clear(&self, signal: Signal) {
        self.calls.lock().unwrap().push((signal, false));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_names() {
        assert_eq!(Signal::WaterEmpty.to_string(), "water_empty");
        assert_eq!(Signal::WaterLow.as_str(), "water_low");
        assert_eq!(
            serde_json::to_string(&Signal::WaterHigh).unwrap(),
            "\"water_high\""
        );
    }

    #[test]
    fn status_channel_forwards_pairs() {
        let (status, mut rx) = StatusChannel::new();
        status.raise(Signal::WaterLow);
        status.clear(Signal::WaterLow);
        assert_eq!(rx.try_recv().unwrap(), (Signal::WaterLow, true));
        assert_eq!(rx.try_recv().unwrap(), (Signal::WaterLow, false));
    }
}
