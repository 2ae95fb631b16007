//! Supervisor notices
//!
//! Notices report the launch outcome and delivery problems. They travel on
//! their own channel, separate from the consumer event stream.

use pmbridge_core::{Error, EventKind};
use pmbridge_daemon::StartedProcess;

/// Bound on queued notices; older notices are kept, newer ones dropped
pub const NOTICE_CAPACITY: usize = 256;

#[derive(Debug)]
pub enum SupervisorNotice {
    /// Launch reached `active`
    Launched { processes: Vec<StartedProcess> },

    /// Launch stopped at a fatal stage
    LaunchFailed { error: Error },

    /// Pre-subscription flush failed under the best-effort policy
    FlushFailed { error: Error },

    /// A consumer handler returned an error or panicked
    HandlerFailed { kind: EventKind, message: String },

    /// The daemon closed its event bus
    BusClosed,

    /// The supervisor reached `closed`
    Closed,
}

impl std::fmt::Display for SupervisorNotice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SupervisorNotice::Launched { processes } => {
                write!(f, "launched {} process(es)", processes.len())
            }
            SupervisorNotice::LaunchFailed { error } => write!(f, "launch failed: {}", error),
            SupervisorNotice::FlushFailed { error } => write!(f, "flush failed: {}", error),
            SupervisorNotice::HandlerFailed { kind, message } => {
                write!(f, "{} handler failed: {}", kind, message)
            }
            SupervisorNotice::BusClosed => f.write_str("daemon bus closed"),
            SupervisorNotice::Closed => f.write_str("supervisor closed"),
        }
    }
}
