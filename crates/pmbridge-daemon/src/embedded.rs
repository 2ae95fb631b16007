//! In-process daemon that supervises real child processes
//!
//! [`EmbeddedDaemon`] implements [`DaemonClient`] without an external
//! service: `start` spawns the script as OS children and the daemon publishes
//! pm2-shaped packets on its bus. Its lifetime is tied to the connection, so
//! `disconnect` kills every child it started. It has no restart policy.
//!
//! Each child is owned by a dedicated wait task. Stdout and stderr each get a
//! reader task, and each reader publishes in line order.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use pmbridge_core::prelude::*;

use crate::client::{BusPacket, BusReceiver, DaemonClient, StartSpec, StartedProcess, Topic};

/// Default bus channel capacity
pub const DEFAULT_BUS_CAPACITY: usize = 256;
/// Default number of log lines retained per process for `flush`
pub const DEFAULT_LOG_RETENTION: usize = 1000;

/// Tunables for [`EmbeddedDaemon`]
#[derive(Debug, Clone)]
pub struct EmbeddedOptions {
    pub bus_capacity: usize,
    pub log_retention: usize,
}

impl Default for EmbeddedOptions {
    fn default() -> Self {
        Self {
            bus_capacity: DEFAULT_BUS_CAPACITY,
            log_retention: DEFAULT_LOG_RETENTION,
        }
    }
}

/// Identity of one managed instance, shared with its background tasks
#[derive(Debug, Clone)]
struct ProcessInfo {
    name: String,
    pm_id: u32,
    unique_id: String,
    cwd: PathBuf,
    exec_path: PathBuf,
    pid: Option<u32>,
}

impl ProcessInfo {
    fn lifecycle_packet(&self, event: &str, status: &str) -> Value {
        json!({
            "event": event,
            "process": {
                "name": self.name,
                "pm_id": self.pm_id,
                "unique_id": self.unique_id,
                "status": status,
                "pm_cwd": self.cwd.display().to_string(),
                "pm_exec_path": self.exec_path.display().to_string(),
                "pid": self.pid,
            },
            "at": Utc::now().timestamp_millis(),
        })
    }

    fn log_packet(&self, line: &str) -> Value {
        json!({
            "data": line,
            "process": {
                "name": self.name,
                "pm_id": self.pm_id,
                "unique_id": self.unique_id,
            },
            "at": Utc::now().timestamp_millis(),
        })
    }

    fn matches(&self, target: &str) -> bool {
        target == "all" || self.name == target || self.pm_id.to_string() == target
    }
}

/// Bounded ring buffer of recent output lines
type LogBuffer = Arc<Mutex<VecDeque<String>>>;

/// Publishes onto whichever bus is currently open
#[derive(Clone, Default)]
struct BusPublisher {
    slot: Arc<Mutex<Option<mpsc::Sender<BusPacket>>>>,
}

impl BusPublisher {
    fn open(&self, capacity: usize) -> BusReceiver {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        *lock(&self.slot) = Some(tx);
        rx
    }

    fn close(&self) {
        lock(&self.slot).take();
    }

    /// Send one packet; dropped silently when no bus is open
    async fn publish(&self, topic: Topic, payload: Value) {
        let tx = lock(&self.slot).clone();
        if let Some(tx) = tx {
            if tx.send(BusPacket::new(topic, payload)).await.is_err() {
                trace!("Bus receiver gone, dropping {} packet", topic);
            }
        }
    }
}

/// A running instance as seen by the daemon
struct ManagedProcess {
    info: ProcessInfo,
    /// Consumed on first use
    kill_tx: Option<oneshot::Sender<()>>,
    exited: Arc<AtomicBool>,
    logs: LogBuffer,
}

#[derive(Default)]
struct DaemonState {
    connected: bool,
    next_pm_id: u32,
    processes: Vec<ManagedProcess>,
}

/// Point-in-time view of a managed instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSummary {
    pub name: String,
    pub pm_id: u32,
    pub pid: Option<u32>,
    pub running: bool,
}

/// Daemon implementation hosted in this process
pub struct EmbeddedDaemon {
    options: EmbeddedOptions,
    state: Mutex<DaemonState>,
    bus: BusPublisher,
}

impl EmbeddedDaemon {
    pub fn new() -> Self {
        Self::with_options(EmbeddedOptions::default())
    }

    pub fn with_options(options: EmbeddedOptions) -> Self {
        Self {
            options,
            state: Mutex::new(DaemonState::default()),
            bus: BusPublisher::default(),
        }
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }

    /// Snapshot of every instance started on this connection
    pub fn processes(&self) -> Vec<ProcessSummary> {
        lock(&self.state)
            .processes
            .iter()
            .map(|p| ProcessSummary {
                name: p.info.name.clone(),
                pm_id: p.info.pm_id,
                pid: p.info.pid,
                running: !p.exited.load(Ordering::Acquire),
            })
            .collect()
    }

    /// Retained output lines for a name, id, or `"all"`, oldest first
    pub fn recent_logs(&self, target: &str) -> Vec<String> {
        lock(&self.state)
            .processes
            .iter()
            .filter(|p| p.info.matches(target))
            .flat_map(|p| lock(&p.logs).iter().cloned().collect::<Vec<_>>())
            .collect()
    }

    fn require_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    /// Spawn one instance and its background tasks
    async fn spawn_instance(&self, spec: &StartSpec, pm_id: u32) -> Result<ManagedProcess> {
        let cwd = spec
            .script
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let mut info = ProcessInfo {
            name: spec.name.clone(),
            pm_id,
            unique_id: Uuid::new_v4().to_string(),
            cwd: cwd.clone(),
            exec_path: spec.script.clone(),
            pid: None,
        };

        self.bus
            .publish(Topic::ProcessEvent, info.lifecycle_packet("start", "launching"))
            .await;

        let mut command = build_command(spec)?;
        command
            .current_dir(&cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.bus
                    .publish(Topic::ProcessEvent, info.lifecycle_packet("exit", "errored"))
                    .await;
                return Err(Error::process_spawn(format!(
                    "{}: {}",
                    spec.script.display(),
                    e
                )));
            }
        };

        info.pid = child.id();
        info!(
            "Started {} (pm_id {}) with PID {:?}",
            info.name, info.pm_id, info.pid
        );

        let logs: LogBuffer = Arc::new(Mutex::new(VecDeque::new()));
        let exited = Arc::new(AtomicBool::new(false));
        let (kill_tx, kill_rx) = oneshot::channel::<()>();

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(output_reader(
                stdout,
                Topic::LogOut,
                info.clone(),
                self.bus.clone(),
                Arc::clone(&logs),
                self.options.log_retention,
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(output_reader(
                stderr,
                Topic::LogErr,
                info.clone(),
                self.bus.clone(),
                Arc::clone(&logs),
                self.options.log_retention,
            ));
        }

        self.bus
            .publish(Topic::ProcessEvent, info.lifecycle_packet("online", "online"))
            .await;

        tokio::spawn(wait_for_exit(
            child,
            kill_rx,
            info.clone(),
            self.bus.clone(),
            Arc::clone(&exited),
        ));

        Ok(ManagedProcess {
            info,
            kill_tx: Some(kill_tx),
            exited,
            logs,
        })
    }
}

impl Default for EmbeddedDaemon {
    fn default() -> Self {
        Self::new()
    }
}

impl DaemonClient for EmbeddedDaemon {
    async fn connect(&self) -> Result<()> {
        let mut state = lock(&self.state);
        if state.connected {
            debug!("Embedded daemon already connected");
        }
        state.connected = true;
        Ok(())
    }

    async fn disconnect(&self) {
        let processes = {
            let mut state = lock(&self.state);
            if !state.connected {
                return;
            }
            state.connected = false;
            std::mem::take(&mut state.processes)
        };

        for mut process in processes {
            if process.exited.load(Ordering::Acquire) {
                continue;
            }
            self.bus
                .publish(
                    Topic::ProcessEvent,
                    process.info.lifecycle_packet("kill", "stopping"),
                )
                .await;
            if let Some(tx) = process.kill_tx.take() {
                let _ = tx.send(());
            }
        }

        self.bus.close();
        info!("Embedded daemon disconnected");
    }

    async fn flush(&self, target: &str) -> Result<()> {
        self.require_connected()?;

        let state = lock(&self.state);
        let mut flushed = 0usize;
        for process in state.processes.iter().filter(|p| p.info.matches(target)) {
            lock(&process.logs).clear();
            flushed += 1;
        }
        debug!("Flushed logs for {} process(es) matching {:?}", flushed, target);
        Ok(())
    }

    async fn launch_bus(&self) -> Result<BusReceiver> {
        self.require_connected()
            .map_err(|_| Error::bus_subscribe("daemon is not connected"))?;
        Ok(self.bus.open(self.options.bus_capacity))
    }

    async fn start(&self, spec: &StartSpec) -> Result<Vec<StartedProcess>> {
        self.require_connected()
            .map_err(|_| Error::start("daemon is not connected"))?;

        if !spec.script.is_file() {
            return Err(Error::start(format!(
                "script not found: {}",
                spec.script.display()
            )));
        }

        let mut started = Vec::with_capacity(spec.instances as usize);
        for _ in 0..spec.instances {
            let pm_id = {
                let mut state = lock(&self.state);
                let id = state.next_pm_id;
                state.next_pm_id += 1;
                id
            };

            let mut process = self.spawn_instance(spec, pm_id).await?;
            started.push(StartedProcess {
                name: process.info.name.clone(),
                pm_id: process.info.pm_id,
                pid: process.info.pid,
            });

            let mut state = lock(&self.state);
            if !state.connected {
                // disconnect already swept the table; this child would be orphaned
                if let Some(tx) = process.kill_tx.take() {
                    let _ = tx.send(());
                }
                warn!("Disconnected while starting {}, stopping it", process.info.name);
                return Err(Error::Cancelled);
            }
            state.processes.push(process);
        }

        Ok(started)
    }
}

/// Resolve the interpreter and build the base command
fn build_command(spec: &StartSpec) -> Result<Command> {
    let interpreter = spec
        .interpreter
        .clone()
        .or_else(|| infer_interpreter(&spec.script).map(str::to_string));

    let mut command = match interpreter {
        Some(interpreter) => {
            let program =
                which::which(&interpreter).map_err(|_| Error::InterpreterNotFound {
                    interpreter: interpreter.clone(),
                })?;
            let mut command = Command::new(program);
            command.arg(&spec.script);
            command
        }
        None => Command::new(&spec.script),
    };
    command.args(&spec.args);
    Ok(command)
}

/// Interpreter implied by the script extension, if any
pub fn infer_interpreter(script: &Path) -> Option<&'static str> {
    match script.extension()?.to_str()? {
        "js" | "mjs" | "cjs" => Some("node"),
        "py" => Some("python3"),
        "sh" => Some("sh"),
        _ => None,
    }
}

fn retain(logs: &LogBuffer, line: &str, limit: usize) {
    let mut logs = lock(logs);
    if limit > 0 && logs.len() >= limit {
        logs.pop_front();
    }
    logs.push_back(line.to_string());
}

/// Publish each output line on `topic` until EOF or a read error
///
/// Lines are split on `\n` only and decoded lossily, so a stray byte never
/// ends the stream and a trailing `\r` is passed through.
async fn output_reader<R>(
    output: R,
    topic: Topic,
    info: ProcessInfo,
    bus: BusPublisher,
    logs: LogBuffer,
    retention: usize,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(output);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("{} read error for {}: {}", topic, info.name, e);
                break;
            }
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
        }

        let line = String::from_utf8_lossy(&buf);
        trace!("{} {}: {}", info.name, topic, line);
        retain(&logs, &line, retention);
        bus.publish(topic, info.log_packet(&line)).await;
    }

    debug!("{} reader for {} finished", topic, info.name);
}

/// Owns `child`, waits for it to exit and publishes the `exit` transition
///
/// Ends either when the child exits on its own or when `kill_rx` fires.
async fn wait_for_exit(
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    info: ProcessInfo,
    bus: BusPublisher,
    exited: Arc<AtomicBool>,
) {
    let status = tokio::select! {
        result = child.wait() => {
            match result {
                Ok(status) => {
                    info!("{} (pm_id {}) exited with {:?}", info.name, info.pm_id, status);
                    if status.success() { "stopped" } else { "errored" }
                }
                Err(e) => {
                    error!("Error waiting for {}: {}", info.name, e);
                    "errored"
                }
            }
        }
        _ = kill_rx => {
            info!("Killing {} (pm_id {})", info.name, info.pm_id);
            if let Err(e) = child.kill().await {
                error!("Failed to kill {}: {}", info.name, e);
            }
            "stopped"
        }
    };

    exited.store(true, Ordering::Release);
    bus.publish(Topic::ProcessEvent, info.lifecycle_packet("exit", status))
        .await;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
