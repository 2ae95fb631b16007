//! Console output for supervised events
//!
//! Events are written one per line, either human-readable or as NDJSON
//! (`--json`), which is easy to consume from scripts.
//!
//! # Example Output
//!
//! ```text
//! api[0] online -> online
//! 06/05/2024, 07:08:09 api out | listening on :8080
//! 06/05/2024, 07:08:10 api err | connection refused
//! ```
//!
//! ```json
//! {"kind":"status","name":"api","unique_id":"6f1c","pm_id":"0","status":"online","pwd":"/srv/api","entry_point":"/srv/api/main.js","event":"online"}
//! {"kind":"output","message":"listening on :8080","process":{"name":"api","pm_id":0},"at":"06/05/2024, 07:08:09","severity":"info"}
//! ```

use std::io::Write;
use std::sync::{Arc, Mutex};

use pmbridge_app::{HandlerResult, Supervisor};
use pmbridge_core::prelude::*;
use pmbridge_core::{Clock, EventKind, SupervisorEvent};
use pmbridge_daemon::DaemonClient;

/// How events are rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleFormat {
    Human,
    Json,
}

impl ConsoleFormat {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            ConsoleFormat::Json
        } else {
            ConsoleFormat::Human
        }
    }
}

/// Line-oriented writer shared by all event handlers
pub struct ConsoleSink<W> {
    format: ConsoleFormat,
    out: Mutex<W>,
}

impl<W: Write + Send + 'static> ConsoleSink<W> {
    pub fn new(out: W, format: ConsoleFormat) -> Self {
        Self {
            format,
            out: Mutex::new(out),
        }
    }

    /// Render and write one event, flushing immediately
    pub fn write(&self, event: &SupervisorEvent) -> HandlerResult {
        let line = match self.format {
            ConsoleFormat::Human => render_human(event),
            ConsoleFormat::Json => serde_json::to_string(event)?,
        };

        let mut out = self
            .out
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        writeln!(out, "{}", line)?;
        out.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Register `sink` for every event kind on `supervisor`
pub fn attach<D, C, W>(supervisor: &Supervisor<D, C>, sink: Arc<ConsoleSink<W>>)
where
    D: DaemonClient + Send + Sync + 'static,
    C: Clock + Clone + 'static,
    W: Write + Send + 'static,
{
    for kind in EventKind::ALL {
        let sink = Arc::clone(&sink);
        supervisor.on(kind, move |event| sink.write(event));
    }
    debug!("Console sink attached");
}

/// Single-line human rendering
pub fn render_human(event: &SupervisorEvent) -> String {
    match event {
        SupervisorEvent::Status(e) => {
            let mut line = format!("{}[{}] {}", e.name, e.pm_id, e.event_kind);
            if !e.status.is_empty() {
                line.push_str(" -> ");
                line.push_str(&e.status);
            }
            line
        }
        SupervisorEvent::Output(e) | SupervisorEvent::Error(e) => {
            let stream = if matches!(event, SupervisorEvent::Error(_)) {
                "err"
            } else {
                "out"
            };
            format!(
                "{} {} {} | {}",
                e.timestamp,
                e.process_name().unwrap_or("-"),
                stream,
                e.message.trim_end()
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmbridge_core::{LifecycleEvent, LogEvent, Severity};
    use serde_json::json;

    fn online() -> SupervisorEvent {
        SupervisorEvent::Status(LifecycleEvent {
            name: "api".to_string(),
            unique_id: "6f1c".to_string(),
            pm_id: "0".to_string(),
            status: "online".to_string(),
            working_directory: "/srv/api".to_string(),
            entry_point: "/srv/api/main.js".to_string(),
            event_kind: "online".to_string(),
        })
    }

    fn log(message: &str, severity: Severity) -> SupervisorEvent {
        SupervisorEvent::from_log(LogEvent {
            message: message.to_string(),
            process: json!({ "name": "api", "pm_id": 0 }),
            timestamp: "06/05/2024, 07:08:09".to_string(),
            severity,
        })
    }

    #[test]
    fn test_render_status() {
        insta::assert_snapshot!(render_human(&online()), @"api[0] online -> online");
    }

    #[test]
    fn test_render_status_without_status() {
        let event = SupervisorEvent::Status(LifecycleEvent {
            name: "api".to_string(),
            pm_id: "2".to_string(),
            event_kind: "restart overlimit".to_string(),
            ..Default::default()
        });
        insta::assert_snapshot!(render_human(&event), @"api[2] restart overlimit");
    }

    #[test]
    fn test_render_logs() {
        insta::assert_snapshot!(
            render_human(&log("listening on :8080\n", Severity::Info)),
            @"06/05/2024, 07:08:09 api out | listening on :8080"
        );
        insta::assert_snapshot!(
            render_human(&log("boom", Severity::Error)),
            @"06/05/2024, 07:08:09 api err | boom"
        );
    }

    #[test]
    fn test_render_log_without_process() {
        let event = SupervisorEvent::from_log(LogEvent {
            message: "orphan".to_string(),
            process: serde_json::Value::Null,
            timestamp: "06/05/2024, 07:08:09".to_string(),
            severity: Severity::Info,
        });
        assert_eq!(render_human(&event), "06/05/2024, 07:08:09 - out | orphan");
    }

    #[test]
    fn test_json_lines() {
        let sink = ConsoleSink::new(Vec::new(), ConsoleFormat::Json);
        sink.write(&online()).unwrap();
        sink.write(&log("boom", Severity::Error)).unwrap();

        let output = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<serde_json::Value> = output
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["kind"], "status");
        assert_eq!(lines[0]["pwd"], "/srv/api");
        assert_eq!(lines[1]["kind"], "error");
        assert_eq!(lines[1]["severity"], "error");
        assert_eq!(lines[1]["message"], "boom");
    }

    #[test]
    fn test_human_lines() {
        let sink = ConsoleSink::new(Vec::new(), ConsoleFormat::from_json_flag(false));
        sink.write(&online()).unwrap();
        let output = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(output, "api[0] online -> online\n");
    }
}
