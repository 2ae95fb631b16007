//! Test utilities for daemon consumers
//!
//! [`FakeDaemon`] is a scriptable in-memory [`DaemonClient`]. It records every
//! call, can fail or hold any operation, and lets the test push packets onto
//! the bus it handed out.
//!
//! # Usage Example
//!
//! ```ignore
//! let daemon = FakeDaemon::new();
//! daemon.fail(DaemonOp::Flush, "log file locked");
//! let release = daemon.gate(DaemonOp::Start);
//!
//! // ... drive a supervisor ...
//!
//! release.notify_one();
//! daemon.emit(Topic::LogOut, json!({ "data": "ready" })).await;
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{mpsc, Notify};

use pmbridge_core::prelude::*;
use pmbridge_core::RawPacket;

use crate::client::{BusPacket, BusReceiver, DaemonClient, StartSpec, StartedProcess, Topic};

/// Bus capacity; large enough that tests never block on emit
pub const FAKE_BUS_CAPACITY: usize = 1024;

/// Operations that can be failed or gated
///
/// `Disconnect` is infallible, so a failure set on it is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DaemonOp {
    Connect,
    Disconnect,
    Flush,
    LaunchBus,
    Start,
}

/// A recorded call, in invocation order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonCall {
    Connect,
    Disconnect,
    Flush(String),
    LaunchBus,
    Start(StartSpec),
}

impl DaemonCall {
    pub fn op(&self) -> DaemonOp {
        match self {
            DaemonCall::Connect => DaemonOp::Connect,
            DaemonCall::Disconnect => DaemonOp::Disconnect,
            DaemonCall::Flush(_) => DaemonOp::Flush,
            DaemonCall::LaunchBus => DaemonOp::LaunchBus,
            DaemonCall::Start(_) => DaemonOp::Start,
        }
    }
}

#[derive(Default)]
struct Inner {
    calls: Mutex<Vec<DaemonCall>>,
    failures: Mutex<HashMap<DaemonOp, String>>,
    gates: Mutex<HashMap<DaemonOp, Arc<Notify>>>,
    bus_tx: Mutex<Option<mpsc::Sender<BusPacket>>>,
    next_pm_id: AtomicU32,
}

/// In-memory daemon for tests. Clones share state.
#[derive(Clone, Default)]
pub struct FakeDaemon {
    inner: Arc<Inner>,
}

impl FakeDaemon {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every future call to `op` fail with `message`
    pub fn fail(&self, op: DaemonOp, message: impl Into<String>) {
        lock(&self.inner.failures).insert(op, message.into());
    }

    /// Hold `op` after it is recorded until the returned handle is notified
    ///
    /// A gate that is never released makes the call hang.
    pub fn gate(&self, op: DaemonOp) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        lock(&self.inner.gates).insert(op, Arc::clone(&notify));
        notify
    }

    pub fn calls(&self) -> Vec<DaemonCall> {
        lock(&self.inner.calls).clone()
    }

    /// Number of times `op` was invoked
    pub fn count(&self, op: DaemonOp) -> usize {
        lock(&self.inner.calls)
            .iter()
            .filter(|c| c.op() == op)
            .count()
    }

    pub fn disconnect_count(&self) -> usize {
        self.count(DaemonOp::Disconnect)
    }

    /// Whether the bus handed out by `launch_bus` is still open
    pub fn bus_open(&self) -> bool {
        lock(&self.inner.bus_tx)
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Push a packet onto the bus. Returns `false` when no bus is open.
    pub async fn emit(&self, topic: Topic, payload: RawPacket) -> bool {
        self.emit_raw(topic.as_str(), payload).await
    }

    /// Push a packet under an arbitrary topic name
    pub async fn emit_raw(&self, topic: &str, payload: RawPacket) -> bool {
        let tx = lock(&self.inner.bus_tx).clone();
        match tx {
            Some(tx) => tx
                .send(BusPacket {
                    topic: topic.to_string(),
                    payload,
                })
                .await
                .is_ok(),
            None => false,
        }
    }

    /// Drop the daemon side of the bus, as a crashed daemon would
    pub fn close_bus(&self) {
        lock(&self.inner.bus_tx).take();
    }

    async fn enter(&self, call: DaemonCall) -> Result<()> {
        let op = call.op();
        lock(&self.inner.calls).push(call);

        let gate = lock(&self.inner.gates).get(&op).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        match lock(&self.inner.failures).get(&op).cloned() {
            Some(message) => Err(failure(op, message)),
            None => Ok(()),
        }
    }
}

impl DaemonClient for FakeDaemon {
    async fn connect(&self) -> Result<()> {
        self.enter(DaemonCall::Connect).await
    }

    async fn disconnect(&self) {
        if let Err(e) = self.enter(DaemonCall::Disconnect).await {
            trace!("Ignoring scripted disconnect failure: {}", e);
        }
        self.close_bus();
    }

    async fn flush(&self, target: &str) -> Result<()> {
        self.enter(DaemonCall::Flush(target.to_string())).await
    }

    async fn launch_bus(&self) -> Result<BusReceiver> {
        self.enter(DaemonCall::LaunchBus).await?;
        let (tx, rx) = mpsc::channel(FAKE_BUS_CAPACITY);
        *lock(&self.inner.bus_tx) = Some(tx);
        Ok(rx)
    }

    async fn start(&self, spec: &StartSpec) -> Result<Vec<StartedProcess>> {
        self.enter(DaemonCall::Start(spec.clone())).await?;
        Ok((0..spec.instances)
            .map(|_| StartedProcess {
                name: spec.name.clone(),
                pm_id: self.inner.next_pm_id.fetch_add(1, Ordering::SeqCst),
                pid: None,
            })
            .collect())
    }
}

/// The error a real daemon would report for a failed `op`
fn failure(op: DaemonOp, message: String) -> Error {
    match op {
        DaemonOp::Connect | DaemonOp::Disconnect => Error::connect(message),
        DaemonOp::Flush => Error::flush("all", message),
        DaemonOp::LaunchBus => Error::bus_subscribe(message),
        DaemonOp::Start => Error::start(message),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;
    use std::time::Duration;

    fn spec(instances: u32) -> StartSpec {
        StartSpec {
            script: PathBuf::from("/srv/main.js"),
            name: "api".to_string(),
            instances,
            args: Vec::new(),
            interpreter: None,
        }
    }

    #[tokio::test]
    async fn test_records_calls_in_order() {
        let daemon = FakeDaemon::new();
        daemon.connect().await.unwrap();
        daemon.flush("all").await.unwrap();
        let _bus = daemon.launch_bus().await.unwrap();
        daemon.start(&spec(1)).await.unwrap();
        daemon.disconnect().await;

        assert_eq!(
            daemon.calls(),
            vec![
                DaemonCall::Connect,
                DaemonCall::Flush("all".to_string()),
                DaemonCall::LaunchBus,
                DaemonCall::Start(spec(1)),
                DaemonCall::Disconnect,
            ]
        );
    }

    #[tokio::test]
    async fn test_failures_use_matching_error() {
        let daemon = FakeDaemon::new();
        daemon.fail(DaemonOp::Connect, "refused");
        daemon.fail(DaemonOp::Start, "bad script");

        assert!(matches!(daemon.connect().await, Err(Error::Connect { .. })));
        assert!(matches!(daemon.start(&spec(1)).await, Err(Error::Start { .. })));
        assert_eq!(daemon.count(DaemonOp::Start), 1);
    }

    #[tokio::test]
    async fn test_gate_holds_until_released() {
        let daemon = FakeDaemon::new();
        let release = daemon.gate(DaemonOp::Connect);

        let held = tokio::time::timeout(Duration::from_millis(20), daemon.connect()).await;
        assert!(held.is_err());

        release.notify_one();
        daemon.connect().await.unwrap();
    }

    #[tokio::test]
    async fn test_gated_disconnect_still_closes_bus() {
        let daemon = FakeDaemon::new();
        let release = daemon.gate(DaemonOp::Disconnect);
        let _bus = daemon.launch_bus().await.unwrap();

        let held = tokio::time::timeout(Duration::from_millis(20), daemon.disconnect()).await;
        assert!(held.is_err());
        assert!(daemon.bus_open());

        release.notify_one();
        daemon.disconnect().await;
        assert!(!daemon.bus_open());
        assert_eq!(daemon.disconnect_count(), 2);
    }

    #[tokio::test]
    async fn test_start_assigns_sequential_ids() {
        let daemon = FakeDaemon::new();
        let started = daemon.start(&spec(3)).await.unwrap();
        let ids: Vec<u32> = started.iter().map(|p| p.pm_id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_emit_and_close_bus() {
        let daemon = FakeDaemon::new();
        assert!(!daemon.emit(Topic::LogOut, json!({})).await);

        let mut bus = daemon.launch_bus().await.unwrap();
        assert!(daemon.emit(Topic::LogOut, json!({ "data": "x" })).await);
        assert_eq!(bus.recv().await.unwrap().topic, "log:out");

        daemon.close_bus();
        assert!(bus.recv().await.is_none());
        assert!(!daemon.bus_open());
    }
}
