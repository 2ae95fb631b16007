//! # pmbridge-core - Core Domain Types
//!
//! Foundation crate for pmbridge. Provides the error taxonomy, the typed event
//! contract, packet normalization and capture-time timestamps.
//!
//! This crate has **zero internal dependencies** -- it only depends on external
//! crates (serde, chrono, thiserror, tracing).
//!
//! ## Public API
//!
//! ### Events (`events`)
//! - [`LifecycleEvent`] - Normalized process lifecycle transition
//! - [`LogEvent`] - Normalized stdout/stderr line with [`Severity`]
//! - [`EventKind`] - The closed set of consumer streams (`status`, `output`, `error`)
//! - [`SupervisorEvent`] - Tagged variant delivered to consumers
//!
//! ### Normalization (`normalize`)
//! - [`EventNormalizer`] - Total, side-effect-free packet conversion
//! - [`RawPacket`] - Daemon-native JSON payload
//!
//! ### Timestamps (`timestamp`)
//! - [`TimestampFormatter`] - `DD/MM/YYYY, HH:MM:SS` from an injected [`Clock`]
//!
//! ### Domain Types (`types`)
//! - [`ProcessDescriptor`] - Validated identity of a managed process
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Error enum with `fatal` vs `recoverable` classification
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//! - [`ResultExt`] - Extension trait for adding error context
//!
//! ## Prelude
//!
//! ```rust
//! use pmbridge_core::prelude::*;
//! ```

pub mod error;
pub mod events;
pub mod logging;
pub mod normalize;
pub mod prelude;
pub mod timestamp;
pub mod types;

// Re-export commonly used types at crate root for convenience
pub use error::{Error, Result, ResultExt};
pub use events::{EventKind, LifecycleEvent, LogEvent, Severity, SupervisorEvent};
pub use normalize::{EventNormalizer, RawPacket};
pub use timestamp::{Clock, FixedClock, SystemClock, TimestampFormatter, TIMESTAMP_FORMAT};
pub use types::ProcessDescriptor;
