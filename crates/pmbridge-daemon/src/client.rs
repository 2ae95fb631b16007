//! Daemon service contract
//!
//! The daemon is an opaque service. This layer only ever connects, flushes,
//! opens the event bus, starts a process and disconnects. Each call is a
//! single-shot async operation returning a result.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use pmbridge_core::prelude::*;
use pmbridge_core::{ProcessDescriptor, RawPacket};

/// Lifecycle transitions (`start`, `online`, `exit`, ...)
pub const TOPIC_PROCESS_EVENT: &str = "process:event";
/// Stdout lines
pub const TOPIC_LOG_OUT: &str = "log:out";
/// Stderr lines
pub const TOPIC_LOG_ERR: &str = "log:err";

/// Bus topics this layer understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    ProcessEvent,
    LogOut,
    LogErr,
}

impl Topic {
    pub const ALL: [Topic; 3] = [Topic::ProcessEvent, Topic::LogOut, Topic::LogErr];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::ProcessEvent => TOPIC_PROCESS_EVENT,
            Topic::LogOut => TOPIC_LOG_OUT,
            Topic::LogErr => TOPIC_LOG_ERR,
        }
    }

    pub fn parse(topic: &str) -> Option<Self> {
        match topic {
            TOPIC_PROCESS_EVENT => Some(Topic::ProcessEvent),
            TOPIC_LOG_OUT => Some(Topic::LogOut),
            TOPIC_LOG_ERR => Some(Topic::LogErr),
            _ => None,
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message pushed by the daemon on its bus
#[derive(Debug, Clone)]
pub struct BusPacket {
    /// Topic as the daemon named it; may be one this layer ignores
    pub topic: String,
    pub payload: RawPacket,
}

impl BusPacket {
    pub fn new(topic: Topic, payload: RawPacket) -> Self {
        Self {
            topic: topic.as_str().to_string(),
            payload,
        }
    }
}

/// Receiving half of a daemon bus. Closed when the daemon drops the bus.
pub type BusReceiver = mpsc::Receiver<BusPacket>;

/// What the daemon needs to start a process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartSpec {
    pub script: PathBuf,
    pub name: String,
    pub instances: u32,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub interpreter: Option<String>,
}

impl From<&ProcessDescriptor> for StartSpec {
    fn from(desc: &ProcessDescriptor) -> Self {
        Self {
            script: desc.script_path().to_path_buf(),
            name: desc.name().to_string(),
            instances: desc.instances(),
            args: desc.args().to_vec(),
            interpreter: desc.interpreter().map(str::to_string),
        }
    }
}

/// Handle for one process instance the daemon started
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedProcess {
    pub name: String,
    pub pm_id: u32,
    pub pid: Option<u32>,
}

/// Operations consumed from the process-management daemon
///
/// Implement the `Send` variant [`DaemonClient`] so the supervisor can drive
/// the daemon from spawned tasks.
#[trait_variant::make(DaemonClient: Send)]
pub trait LocalDaemonClient {
    /// Open the connection to the daemon
    async fn connect(&self) -> Result<()>;

    /// Close the connection. Never fails; a second call is a no-op.
    async fn disconnect(&self);

    /// Discard retained logs for a process name, id, or `"all"`
    async fn flush(&self, target: &str) -> Result<()>;

    /// Subscribe to the daemon's push-event bus
    async fn launch_bus(&self) -> Result<BusReceiver>;

    /// Start `spec.instances` copies of the script
    async fn start(&self, spec: &StartSpec) -> Result<Vec<StartedProcess>>;
}
