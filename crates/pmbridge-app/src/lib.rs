//! pmbridge-app - Supervision and configuration for pmbridge
//!
//! This crate implements the [`Supervisor`] state machine that drives a
//! daemon from `idle` to `active`, the consumer registry that fans typed
//! events out to handlers, supervisor notices, and configuration loading.

pub mod config;
pub mod consumers;
pub mod notice;
pub mod state;
pub mod supervisor;

// Re-export primary types
pub use config::{CliOverrides, FlushPolicy, LaunchConfig, Settings};
pub use consumers::{ConsumerRegistry, Handler, HandlerId, HandlerResult};
pub use notice::{SupervisorNotice, NOTICE_CAPACITY};
pub use state::SupervisorState;
pub use supervisor::Supervisor;
