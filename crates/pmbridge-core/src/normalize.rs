//! Raw daemon packet → typed event conversion
//!
//! Normalization is total. A malformed or partial packet never fails; missing
//! or mistyped fields become empty strings so one bad packet cannot stall the
//! stream. Fields the mapping does not name are dropped.

use serde_json::Value;

use crate::events::{LifecycleEvent, LogEvent, Severity};
use crate::timestamp::{Clock, SystemClock, TimestampFormatter};

/// Daemon-native packet payload, shape unspecified per topic
pub type RawPacket = Value;

/// Converts raw bus packets into [`LifecycleEvent`] and [`LogEvent`] records
#[derive(Debug, Clone, Default)]
pub struct EventNormalizer<C = SystemClock> {
    timestamps: TimestampFormatter<C>,
}

impl<C: Clock> EventNormalizer<C> {
    pub fn new(clock: C) -> Self {
        Self {
            timestamps: TimestampFormatter::new(clock),
        }
    }

    /// Map a `process:event` packet
    pub fn normalize_lifecycle(&self, packet: &RawPacket) -> LifecycleEvent {
        LifecycleEvent {
            name: field(packet, &["process", "name"]),
            unique_id: field(packet, &["process", "unique_id"]),
            pm_id: field(packet, &["process", "pm_id"]),
            status: field(packet, &["process", "status"]),
            working_directory: field(packet, &["process", "pm_cwd"]),
            entry_point: field(packet, &["process", "pm_exec_path"]),
            event_kind: field(packet, &["event"]),
        }
    }

    /// Map a `log:out` / `log:err` packet, stamping it with the capture time
    pub fn normalize_log(&self, packet: &RawPacket, severity: Severity) -> LogEvent {
        LogEvent {
            message: field(packet, &["data"]),
            process: packet.get("process").cloned().unwrap_or(Value::Null),
            timestamp: self.timestamps.now(),
            severity,
        }
    }
}

/// Walk `path` and render the scalar found there, or `""`
fn field(packet: &RawPacket, path: &[&str]) -> String {
    let mut current = packet;
    for key in path {
        match current.get(key) {
            Some(next) => current = next,
            None => return String::new(),
        }
    }
    scalar_to_string(current)
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null | Value::Array(_) | Value::Object(_) => String::new(),
    }
}
