//! Domain event definitions
//!
//! These are the typed records re-emitted to consumers. Every field is always
//! present so consumers never have to null-check.

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────
// Event Records
// ─────────────────────────────────────────────────────────

/// Normalized process lifecycle transition
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct LifecycleEvent {
    pub name: String,
    pub unique_id: String,
    /// Daemon-assigned process id, rendered as a string
    pub pm_id: String,
    /// Opaque status passthrough (`online`, `stopping`, `errored`, ...)
    pub status: String,
    #[serde(rename = "pwd")]
    pub working_directory: String,
    pub entry_point: String,
    /// Name of the underlying daemon event (`start`, `online`, `exit`, ...)
    #[serde(rename = "event")]
    pub event_kind: String,
}

/// Severity of a log line, derived from the bus topic it arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Error => "error",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized stdout/stderr line
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LogEvent {
    /// Raw line, unmodified
    pub message: String,
    /// Opaque process identity from the daemon packet
    pub process: serde_json::Value,
    /// Capture time, `DD/MM/YYYY, HH:MM:SS`
    #[serde(rename = "at")]
    pub timestamp: String,
    pub severity: Severity,
}

impl LogEvent {
    /// Best-effort process name from the opaque identity, for display only
    pub fn process_name(&self) -> Option<&str> {
        self.process.get("name").and_then(|v| v.as_str())
    }
}

// ─────────────────────────────────────────────────────────
// Emitted Event Surface
// ─────────────────────────────────────────────────────────

/// The three event streams a consumer can register for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Lifecycle transitions
    Status,
    /// Stdout lines
    Output,
    /// Stderr lines
    Error,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [EventKind::Status, EventKind::Output, EventKind::Error];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Status => "status",
            EventKind::Output => "output",
            EventKind::Error => "error",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed event as delivered to consumers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SupervisorEvent {
    Status(LifecycleEvent),
    Output(LogEvent),
    Error(LogEvent),
}

impl SupervisorEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SupervisorEvent::Status(_) => EventKind::Status,
            SupervisorEvent::Output(_) => EventKind::Output,
            SupervisorEvent::Error(_) => EventKind::Error,
        }
    }

    /// Wrap a log event in the variant matching its severity
    pub fn from_log(event: LogEvent) -> Self {
        match event.severity {
            Severity::Info => SupervisorEvent::Output(event),
            Severity::Error => SupervisorEvent::Error(event),
        }
    }

    pub fn as_lifecycle(&self) -> Option<&LifecycleEvent> {
        match self {
            SupervisorEvent::Status(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_log(&self) -> Option<&LogEvent> {
        match self {
            SupervisorEvent::Output(e) | SupervisorEvent::Error(e) => Some(e),
            SupervisorEvent::Status(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn log(severity: Severity) -> LogEvent {
        LogEvent {
            message: "hello".to_string(),
            process: json!({ "name": "api", "pm_id": 0 }),
            timestamp: "01/02/2024, 10:11:12".to_string(),
            severity,
        }
    }

    #[test]
    fn test_from_log_routes_by_severity() {
        assert_eq!(
            SupervisorEvent::from_log(log(Severity::Info)).kind(),
            EventKind::Output
        );
        assert_eq!(
            SupervisorEvent::from_log(log(Severity::Error)).kind(),
            EventKind::Error
        );
    }

    #[test]
    fn test_lifecycle_serializes_with_daemon_keys() {
        let event = LifecycleEvent {
            name: "api".to_string(),
            pm_id: "3".to_string(),
            working_directory: "/srv/api".to_string(),
            event_kind: "online".to_string(),
            ..Default::default()
        };
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["pwd"], "/srv/api");
        assert_eq!(value["event"], "online");
        assert_eq!(value["unique_id"], "");
        assert!(value.get("working_directory").is_none());
    }

    #[test]
    fn test_log_event_serializes_timestamp_as_at() {
        let value = serde_json::to_value(log(Severity::Error)).unwrap();
        assert_eq!(value["at"], "01/02/2024, 10:11:12");
        assert_eq!(value["severity"], "error");
    }

    #[test]
    fn test_process_name_is_best_effort() {
        assert_eq!(log(Severity::Info).process_name(), Some("api"));

        let mut anonymous = log(Severity::Info);
        anonymous.process = serde_json::Value::Null;
        assert_eq!(anonymous.process_name(), None);
    }

    #[test]
    fn test_supervisor_event_serializes_flat() {
        let value = serde_json::to_value(SupervisorEvent::from_log(log(Severity::Info))).unwrap();
        assert_eq!(value["kind"], "output");
        assert_eq!(value["message"], "hello");
        assert_eq!(value["process"]["name"], "api");
    }

    #[test]
    fn test_event_kind_names() {
        let names: Vec<_> = EventKind::ALL.iter().map(|k| k.as_str()).collect();
        assert_eq!(names, ["status", "output", "error"]);
    }
}
