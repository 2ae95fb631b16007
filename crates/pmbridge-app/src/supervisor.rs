//! Supervisor - launch orchestration and event delivery
//!
//! A [`Supervisor`] drives one daemon through a forward-only lifecycle:
//!
//! ```text
//! idle ──launch──► connecting ──► subscribing ──► starting ──► active
//!   │                  │               │              │           │
//!   └──────────────────┴───── shutdown / failure ─────┴───────────┴──► closed
//! ```
//!
//! The launch runs as one spawned task. Every daemon round trip is raced
//! against `closed`, and optionally against a per-call timeout. Bus events
//! are routed by a single task into the [`ConsumerRegistry`]. Handlers run on
//! a snapshot, so no lock is held while user code runs.
//!
//! Launch outcomes and handler failures are reported as [`SupervisorNotice`]s
//! on a separate channel taken with [`Supervisor::notices`].

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use pmbridge_core::prelude::*;
use pmbridge_core::{
    Clock, EventKind, EventNormalizer, LifecycleEvent, LogEvent, ProcessDescriptor,
    SupervisorEvent, SystemClock,
};
use pmbridge_daemon::{BusSubscription, DaemonClient, EventSink, StartSpec, StartedProcess};

use crate::config::LaunchConfig;
use crate::consumers::{ConsumerRegistry, HandlerId, HandlerResult};
use crate::notice::{SupervisorNotice, NOTICE_CAPACITY};
use crate::state::SupervisorState;

type LaunchOutcome = Result<Vec<StartedProcess>>;

/// State shared between the supervisor, its launch task and the bus router
struct Shared {
    consumers: Mutex<ConsumerRegistry>,
    state: watch::Sender<SupervisorState>,
    notices: mpsc::Sender<SupervisorNotice>,
    /// Set once by whichever path disconnects first
    disconnected: AtomicBool,
    /// Disconnect started from the bus router, awaited by the other paths
    background_disconnect: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    fn is_closed(&self) -> bool {
        self.state().is_closed()
    }

    /// Move forward to `next`; fails with `Cancelled` once closed
    fn advance(&self, next: SupervisorState) -> Result<()> {
        let mut from = SupervisorState::Idle;
        let advanced = self.state.send_if_modified(|state| {
            from = *state;
            if state.can_advance_to(next) {
                *state = next;
                true
            } else {
                false
            }
        });

        if advanced {
            debug!("Supervisor {} -> {}", from, next);
            Ok(())
        } else if from.is_closed() {
            Err(Error::Cancelled)
        } else {
            warn!("Ignoring backward transition {} -> {}", from, next);
            Ok(())
        }
    }

    /// Enter `closed`. Returns `true` for the caller that made the transition.
    fn close(&self) -> bool {
        self.state.send_if_modified(|state| {
            if state.is_closed() {
                false
            } else {
                *state = SupervisorState::Closed;
                true
            }
        })
    }

    fn claim_disconnect(&self) -> bool {
        !self.disconnected.swap(true, Ordering::AcqRel)
    }

    fn publish(&self, notice: SupervisorNotice) {
        match self.notices.try_send(notice) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(notice)) => {
                warn!("Notice channel full, dropping: {}", notice);
            }
            Err(mpsc::error::TrySendError::Closed(notice)) => {
                trace!("No notice receiver, dropping: {}", notice);
            }
        }
    }

    /// Resolves once the supervisor is closed
    async fn closed(mut state_rx: watch::Receiver<SupervisorState>) {
        loop {
            let closed = state_rx.borrow_and_update().is_closed();
            if closed {
                return;
            }
            if state_rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Bus sink that fans events out to registered consumers
struct Dispatcher<D> {
    daemon: Arc<D>,
    shared: Arc<Shared>,
}

impl<D> EventSink for Dispatcher<D>
where
    D: DaemonClient + Send + Sync + 'static,
{
    fn deliver(&mut self, event: SupervisorEvent) {
        if self.shared.is_closed() {
            return;
        }

        let kind = event.kind();
        let handlers = lock(&self.shared.consumers).snapshot(kind);

        for handler in handlers {
            let message = match std::panic::catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(panic) => panic_message(panic.as_ref()),
            };
            warn!("{} handler failed: {}", kind, message);
            self.shared
                .publish(SupervisorNotice::HandlerFailed { kind, message });
        }
    }

    fn bus_closed(&mut self) {
        if self.shared.is_closed() {
            return;
        }

        error!("Daemon bus closed while supervising");
        self.shared.publish(SupervisorNotice::BusClosed);
        if self.shared.close() {
            self.shared.publish(SupervisorNotice::Closed);
        }

        // Claim and store under one lock so `disconnect_once` never misses the handle
        let mut pending = lock(&self.shared.background_disconnect);
        if self.shared.claim_disconnect() {
            let daemon = Arc::clone(&self.daemon);
            *pending = Some(tokio::spawn(async move {
                daemon.disconnect().await;
            }));
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

struct Inner<D, C> {
    daemon: Arc<D>,
    clock: C,
    shared: Arc<Shared>,
    launched: AtomicBool,
    launch_task: Mutex<Option<JoinHandle<()>>>,
    bus: tokio::sync::Mutex<Option<BusSubscription>>,
    notices_rx: Mutex<Option<mpsc::Receiver<SupervisorNotice>>>,
}

impl<D, C> Inner<D, C>
where
    D: DaemonClient + Send + Sync + 'static,
    C: Clock + Clone + 'static,
{
    /// One daemon round trip, cancelled by `closed` and bounded by `timeout`
    async fn call<T, F>(&self, operation: &'static str, timeout: Option<Duration>, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let guarded = async {
            match timeout {
                Some(limit) => match tokio::time::timeout(limit, fut).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::timeout(operation)),
                },
                None => fut.await,
            }
        };

        tokio::select! {
            result = guarded => result,
            _ = Shared::closed(self.shared.state.subscribe()) => {
                debug!("{} interrupted by shutdown", operation);
                Err(Error::Cancelled)
            }
        }
    }

    async fn orchestrate(
        &self,
        descriptor: &ProcessDescriptor,
        config: LaunchConfig,
    ) -> LaunchOutcome {
        let shared = &self.shared;
        let timeout = config.call_timeout;

        shared.advance(SupervisorState::Connecting)?;
        self.call("connect", timeout, self.daemon.connect()).await?;
        info!("Connected to daemon");

        shared.advance(SupervisorState::Subscribing)?;
        if config.flush.should_flush() {
            match self
                .call("flush", timeout, self.daemon.flush(descriptor.name()))
                .await
            {
                Ok(()) => debug!("Flushed logs for {}", descriptor.name()),
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) if config.flush.fail_on_flush_error() => return Err(e),
                Err(e) => {
                    warn!("Flush failed, continuing: {}", e);
                    shared.publish(SupervisorNotice::FlushFailed { error: e });
                }
            }
        }

        let sink = Dispatcher {
            daemon: Arc::clone(&self.daemon),
            shared: Arc::clone(shared),
        };
        let normalizer = EventNormalizer::new(self.clock.clone());
        let subscription = self
            .call(
                "launch_bus",
                timeout,
                BusSubscription::open(self.daemon.as_ref(), normalizer, sink),
            )
            .await?;
        {
            let mut slot = self.bus.lock().await;
            if shared.is_closed() {
                drop(slot);
                subscription.close().await;
                return Err(Error::Cancelled);
            }
            *slot = Some(subscription);
        }

        shared.advance(SupervisorState::Starting)?;
        let spec = StartSpec::from(descriptor);
        let processes = self.call("start", timeout, self.daemon.start(&spec)).await?;

        shared.advance(SupervisorState::Active)?;
        info!(
            "Supervising {} ({} instance(s))",
            descriptor.name(),
            processes.len()
        );
        Ok(processes)
    }

    async fn disconnect_once(&self) {
        if self.shared.claim_disconnect() {
            self.daemon.disconnect().await;
            debug!("Disconnected from daemon");
            return;
        }

        let pending = lock(&self.shared.background_disconnect).take();
        if let Some(task) = pending {
            if let Err(e) = task.await {
                if e.is_panic() {
                    error!("Disconnect task panicked: {}", e);
                }
            }
            debug!("Disconnected from daemon after bus closure");
        }
    }

    /// Stop routing. Afterwards no handler will be called.
    async fn close_bus(&self) {
        let mut slot = self.bus.lock().await;
        if let Some(subscription) = slot.take() {
            subscription.close().await;
        }
    }

    /// Body of the launch task
    async fn run_launch(
        &self,
        descriptor: ProcessDescriptor,
        config: LaunchConfig,
        done_tx: Option<oneshot::Sender<LaunchOutcome>>,
    ) {
        match self.orchestrate(&descriptor, config).await {
            Ok(processes) => {
                self.shared.publish(SupervisorNotice::Launched {
                    processes: processes.clone(),
                });
                if let Some(tx) = done_tx {
                    let _ = tx.send(Ok(processes));
                }
            }
            Err(error) => {
                if !matches!(error, Error::Cancelled) {
                    error!("Launch of {} failed: {}", descriptor.name(), error);
                }
                let transitioned = self.shared.close();
                self.disconnect_once().await;
                self.close_bus().await;

                // A waiting caller gets the error directly
                let unclaimed = match done_tx {
                    Some(tx) => tx.send(Err(error)).err().and_then(Result::err),
                    None => Some(error),
                };
                if let Some(error) = unclaimed {
                    self.shared
                        .publish(SupervisorNotice::LaunchFailed { error });
                }
                if transitioned {
                    self.shared.publish(SupervisorNotice::Closed);
                }
            }
        }
    }
}

/// Supervises one process through a daemon
///
/// Cheap to clone; clones share the same lifecycle. A supervisor is
/// single-use: once `closed` it cannot be launched again.
pub struct Supervisor<D, C = SystemClock> {
    inner: Arc<Inner<D, C>>,
}

impl<D, C> Clone for Supervisor<D, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D> Supervisor<D, SystemClock>
where
    D: DaemonClient + Send + Sync + 'static,
{
    pub fn new(daemon: D) -> Self {
        Self::with_clock(daemon, SystemClock)
    }
}

impl<D, C> Supervisor<D, C>
where
    D: DaemonClient + Send + Sync + 'static,
    C: Clock + Clone + 'static,
{
    /// Create a supervisor whose log timestamps come from `clock`
    pub fn with_clock(daemon: D, clock: C) -> Self {
        let (state, _) = watch::channel(SupervisorState::Idle);
        let (notices, notices_rx) = mpsc::channel(NOTICE_CAPACITY);

        let shared = Arc::new(Shared {
            consumers: Mutex::new(ConsumerRegistry::new()),
            state,
            notices,
            disconnected: AtomicBool::new(false),
            background_disconnect: Mutex::new(None),
        });

        Self {
            inner: Arc::new(Inner {
                daemon: Arc::new(daemon),
                clock,
                shared,
                launched: AtomicBool::new(false),
                launch_task: Mutex::new(None),
                bus: tokio::sync::Mutex::new(None),
                notices_rx: Mutex::new(Some(notices_rx)),
            }),
        }
    }

    pub fn daemon(&self) -> &D {
        &self.inner.daemon
    }

    pub fn state(&self) -> SupervisorState {
        self.inner.shared.state()
    }

    /// Watch lifecycle changes
    pub fn subscribe_state(&self) -> watch::Receiver<SupervisorState> {
        self.inner.shared.state.subscribe()
    }

    /// Take the notice receiver. Returns `None` after the first call.
    pub fn notices(&self) -> Option<mpsc::Receiver<SupervisorNotice>> {
        lock(&self.inner.notices_rx).take()
    }

    // ─────────────────────────────────────────────────────────
    // Consumers
    // ─────────────────────────────────────────────────────────

    /// Register a handler for every event of `kind`
    pub fn on<F>(&self, kind: EventKind, handler: F) -> HandlerId
    where
        F: Fn(&SupervisorEvent) -> HandlerResult + Send + Sync + 'static,
    {
        lock(&self.inner.shared.consumers).on(kind, handler)
    }

    pub fn on_status<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&LifecycleEvent) -> HandlerResult + Send + Sync + 'static,
    {
        lock(&self.inner.shared.consumers).on_status(handler)
    }

    pub fn on_output<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&LogEvent) -> HandlerResult + Send + Sync + 'static,
    {
        lock(&self.inner.shared.consumers).on_output(handler)
    }

    pub fn on_error<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&LogEvent) -> HandlerResult + Send + Sync + 'static,
    {
        lock(&self.inner.shared.consumers).on_error(handler)
    }

    pub fn off(&self, id: HandlerId) -> bool {
        lock(&self.inner.shared.consumers).off(id)
    }

    // ─────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────

    /// Start the launch in the background
    ///
    /// Only fails synchronously if this supervisor was already launched or
    /// shut down. The outcome arrives as a `Launched` or `LaunchFailed`
    /// notice.
    pub fn launch(&self, descriptor: ProcessDescriptor, config: LaunchConfig) -> Result<()> {
        self.spawn_launch(descriptor, config, None)
    }

    /// Launch and wait until `active` or the terminal error
    ///
    /// Resources are already released when an error is returned.
    pub async fn launch_and_wait(
        &self,
        descriptor: ProcessDescriptor,
        config: LaunchConfig,
    ) -> Result<Vec<StartedProcess>> {
        let (done_tx, done_rx) = oneshot::channel();
        self.spawn_launch(descriptor, config, Some(done_tx))?;
        done_rx.await.map_err(|_| Error::ChannelClosed)?
    }

    fn spawn_launch(
        &self,
        descriptor: ProcessDescriptor,
        config: LaunchConfig,
        done_tx: Option<oneshot::Sender<LaunchOutcome>>,
    ) -> Result<()> {
        if self.state().is_closed() {
            return Err(Error::Cancelled);
        }
        if self.inner.launched.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyLaunched);
        }

        info!(
            "Launching {} ({}, flush: {})",
            descriptor.name(),
            descriptor.script_path().display(),
            config.flush
        );

        let inner = Arc::clone(&self.inner);

        // Hold the slot while spawning so shutdown always sees the handle
        let mut slot = lock(&self.inner.launch_task);
        *slot = Some(tokio::spawn(async move {
            inner.run_launch(descriptor, config, done_tx).await;
        }));

        Ok(())
    }

    /// Ad-hoc log flush against the connected daemon
    pub async fn flush(&self, target: &str) -> Result<()> {
        match self.state() {
            SupervisorState::Idle | SupervisorState::Connecting | SupervisorState::Closed => {
                Err(Error::NotConnected)
            }
            _ => self
                .inner
                .daemon
                .flush(target)
                .await
                .map_err(|e| match e {
                    Error::Flush { .. } | Error::NotConnected => e,
                    other => Error::flush(target, other.to_string()),
                }),
        }
    }

    /// Disconnect and stop all delivery
    ///
    /// Idempotent and safe to race with an in-flight launch. When it returns
    /// no consumer handler will run again.
    pub async fn shutdown(&self) {
        let inner = &self.inner;

        if inner.shared.close() {
            info!("Supervisor shutting down");
            inner.shared.publish(SupervisorNotice::Closed);
        }

        inner.disconnect_once().await;

        let task = lock(&inner.launch_task).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                if e.is_panic() {
                    error!("Launch task panicked: {}", e);
                }
            }
        }

        inner.close_bus().await;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
