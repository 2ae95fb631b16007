//! # pmbridge-daemon - Daemon Contract and Bus Routing
//!
//! Defines the operations consumed from a pm2-like process daemon, routes its
//! push-event bus through the normalizer, and ships an embedded daemon that
//! runs scripts as local child processes.
//!
//! Depends on [`pmbridge_core`] for domain types and error handling.
//!
//! ## Public API
//!
//! ### Daemon Contract (`client`)
//! - [`DaemonClient`] - connect / disconnect / flush / launch_bus / start
//! - [`BusPacket`], [`Topic`] - Raw bus traffic and the topics understood
//! - [`StartSpec`], [`StartedProcess`] - Start request and its result
//!
//! ### Bus Routing (`bus`)
//! - [`BusSubscription`] - Single routing task from bus to an [`EventSink`]
//! - [`normalize_packet()`] - Topic dispatch for one packet
//!
//! ### Embedded Daemon (`embedded`)
//! - [`EmbeddedDaemon`] - In-process daemon backed by `tokio::process`

pub mod bus;
pub mod client;
pub mod embedded;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;

// Public API re-exports
pub use bus::{normalize_packet, BusSubscription, EventSink};
pub use client::{
    BusPacket, BusReceiver, DaemonClient, LocalDaemonClient, StartSpec, StartedProcess, Topic,
    TOPIC_LOG_ERR, TOPIC_LOG_OUT, TOPIC_PROCESS_EVENT,
};
pub use embedded::{
    infer_interpreter, EmbeddedDaemon, EmbeddedOptions, ProcessSummary, DEFAULT_BUS_CAPACITY,
    DEFAULT_LOG_RETENTION,
};
