//! Daemon bus subscription and topic routing
//!
//! A single routing task drains the daemon bus, normalizes each packet for
//! its topic and hands the typed event to one [`EventSink`]. Consuming the
//! bus from one task is what keeps per-topic emission order intact; nothing
//! is promised about ordering across topics.
//!
//! ```text
//! daemon ──► BusReceiver ──► route task ──► EventNormalizer ──► EventSink
//!            (mpsc, FIFO)    (single writer)
//! ```

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use pmbridge_core::prelude::*;
use pmbridge_core::{Clock, EventNormalizer, Severity, SupervisorEvent};

use crate::client::{BusPacket, BusReceiver, DaemonClient, Topic};

/// Receives normalized events from the routing task
///
/// Called synchronously from the routing task, one event at a time.
pub trait EventSink: Send + 'static {
    fn deliver(&mut self, event: SupervisorEvent);

    /// The daemon closed its end of the bus
    fn bus_closed(&mut self) {}
}

/// Live subscription to a daemon bus
pub struct BusSubscription {
    cancel_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl BusSubscription {
    /// Ask the daemon for its bus and start routing packets into `sink`
    pub async fn open<D, C, S>(daemon: &D, normalizer: EventNormalizer<C>, sink: S) -> Result<Self>
    where
        D: DaemonClient,
        C: Clock + 'static,
        S: EventSink,
    {
        let bus = daemon.launch_bus().await.map_err(|e| match e {
            Error::BusSubscribe { .. } | Error::Timeout { .. } | Error::Cancelled => e,
            other => Error::bus_subscribe(other.to_string()),
        })?;
        debug!("Daemon bus opened");
        Ok(Self::attach(bus, normalizer, sink))
    }

    /// Start routing an already-open bus
    pub fn attach<C, S>(bus: BusReceiver, normalizer: EventNormalizer<C>, sink: S) -> Self
    where
        C: Clock + 'static,
        S: EventSink,
    {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let task = tokio::spawn(Self::route(bus, normalizer, sink, cancel_rx));
        Self {
            cancel_tx: Some(cancel_tx),
            task,
        }
    }

    async fn route<C: Clock, S: EventSink>(
        mut bus: BusReceiver,
        normalizer: EventNormalizer<C>,
        mut sink: S,
        mut cancel_rx: oneshot::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = &mut cancel_rx => {
                    debug!("Bus subscription cancelled");
                    break;
                }
                packet = bus.recv() => match packet {
                    Some(packet) => {
                        if let Some(event) = normalize_packet(&normalizer, &packet) {
                            sink.deliver(event);
                        }
                    }
                    None => {
                        info!("Daemon closed the event bus");
                        sink.bus_closed();
                        break;
                    }
                }
            }
        }
    }

    /// Stop routing and wait for the in-flight delivery to finish
    ///
    /// Once this returns the sink will not be called again.
    pub async fn close(mut self) {
        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = self.task.await {
            if e.is_panic() {
                error!("Bus routing task panicked: {}", e);
            }
        }
    }
}

/// Route one packet by topic through the normalizer
///
/// Unknown topics yield `None`; every known topic yields an event.
pub fn normalize_packet<C: Clock>(
    normalizer: &EventNormalizer<C>,
    packet: &BusPacket,
) -> Option<SupervisorEvent> {
    match Topic::parse(&packet.topic) {
        Some(Topic::ProcessEvent) => Some(SupervisorEvent::Status(
            normalizer.normalize_lifecycle(&packet.payload),
        )),
        Some(Topic::LogOut) => Some(SupervisorEvent::Output(
            normalizer.normalize_log(&packet.payload, Severity::Info),
        )),
        Some(Topic::LogErr) => Some(SupervisorEvent::Error(
            normalizer.normalize_log(&packet.payload, Severity::Error),
        )),
        None => {
            trace!("Ignoring packet on topic {:?}", packet.topic);
            None
        }
    }
}
