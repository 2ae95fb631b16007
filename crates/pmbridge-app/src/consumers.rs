//! Consumer handler registry
//!
//! Handlers are grouped by [`EventKind`] and called in registration order.
//! Delivery works on a snapshot, so a handler may register or remove handlers
//! while it runs; the change applies from the next event.

use std::sync::Arc;

use pmbridge_core::{EventKind, LifecycleEvent, LogEvent, SupervisorEvent};

/// Outcome of one handler invocation
pub type HandlerResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// A registered consumer callback
pub type Handler = Arc<dyn Fn(&SupervisorEvent) -> HandlerResult + Send + Sync>;

/// Token returned by registration, used to remove a handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

#[derive(Default)]
pub struct ConsumerRegistry {
    next_id: u64,
    status: Vec<(HandlerId, Handler)>,
    output: Vec<(HandlerId, Handler)>,
    error: Vec<(HandlerId, Handler)>,
}

impl ConsumerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&mut self, kind: EventKind) -> &mut Vec<(HandlerId, Handler)> {
        match kind {
            EventKind::Status => &mut self.status,
            EventKind::Output => &mut self.output,
            EventKind::Error => &mut self.error,
        }
    }

    pub fn register(&mut self, kind: EventKind, handler: Handler) -> HandlerId {
        let id = HandlerId(self.next_id);
        self.next_id += 1;
        self.slot(kind).push((id, handler));
        id
    }

    /// Register a closure for every event of `kind`
    pub fn on<F>(&mut self, kind: EventKind, handler: F) -> HandlerId
    where
        F: Fn(&SupervisorEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.register(kind, Arc::new(handler))
    }

    pub fn on_status<F>(&mut self, handler: F) -> HandlerId
    where
        F: Fn(&LifecycleEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.on(EventKind::Status, move |event| match event.as_lifecycle() {
            Some(lifecycle) => handler(lifecycle),
            None => Ok(()),
        })
    }

    pub fn on_output<F>(&mut self, handler: F) -> HandlerId
    where
        F: Fn(&LogEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.on(EventKind::Output, move |event| match event.as_log() {
            Some(log) => handler(log),
            None => Ok(()),
        })
    }

    pub fn on_error<F>(&mut self, handler: F) -> HandlerId
    where
        F: Fn(&LogEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.on(EventKind::Error, move |event| match event.as_log() {
            Some(log) => handler(log),
            None => Ok(()),
        })
    }

    /// Remove a handler. Returns `false` if it was not registered.
    pub fn off(&mut self, id: HandlerId) -> bool {
        for kind in EventKind::ALL {
            let slot = self.slot(kind);
            if let Some(pos) = slot.iter().position(|(h, _)| *h == id) {
                slot.remove(pos);
                return true;
            }
        }
        false
    }

    /// Handlers for `kind`, in registration order
    pub fn snapshot(&self, kind: EventKind) -> Vec<Handler> {
        let slot = match kind {
            EventKind::Status => &self.status,
            EventKind::Output => &self.output,
            EventKind::Error => &self.error,
        };
        slot.iter().map(|(_, h)| Arc::clone(h)).collect()
    }

    pub fn len(&self, kind: EventKind) -> usize {
        self.snapshot(kind).len()
    }

    pub fn is_empty(&self) -> bool {
        EventKind::ALL.iter().all(|k| self.len(*k) == 0)
    }
}
