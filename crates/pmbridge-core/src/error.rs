//! Error types for the supervision pipeline

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Error types organized by layer
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    // ─────────────────────────────────────────────────────────────
    // Launch Pipeline Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Failed to connect to daemon: {message}")]
    Connect { message: String },

    #[error("Failed to subscribe to daemon bus: {message}")]
    BusSubscribe { message: String },

    #[error("Daemon failed to start process: {message}")]
    Start { message: String },

    #[error("Failed to flush logs for {target}: {message}")]
    Flush { target: String, message: String },

    #[error("Daemon call timed out: {operation}")]
    Timeout { operation: String },

    #[error("Launch cancelled by shutdown")]
    Cancelled,

    #[error("Supervisor was already launched; create a new one")]
    AlreadyLaunched,

    #[error("Not connected to daemon")]
    NotConnected,

    // ─────────────────────────────────────────────────────────────
    // Process Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Failed to spawn process: {reason}")]
    ProcessSpawn { reason: String },

    #[error("Interpreter not found in PATH: {interpreter}")]
    InterpreterNotFound { interpreter: String },

    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    ConfigInvalid { message: String },

    // ─────────────────────────────────────────────────────────────
    // Channel/Communication Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Channel closed unexpectedly")]
    ChannelClosed,
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn connect(message: impl Into<String>) -> Self {
        Self::Connect {
            message: message.into(),
        }
    }

    pub fn bus_subscribe(message: impl Into<String>) -> Self {
        Self::BusSubscribe {
            message: message.into(),
        }
    }

    pub fn start(message: impl Into<String>) -> Self {
        Self::Start {
            message: message.into(),
        }
    }

    pub fn flush(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Flush {
            target: target.into(),
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    pub fn process_spawn(reason: impl Into<String>) -> Self {
        Self::ProcessSpawn {
            reason: reason.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn config_invalid(message: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            message: message.into(),
        }
    }

    /// Check if this is a recoverable error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Flush { .. } | Error::ChannelClosed
        )
    }

    /// Check if this error ends a launch
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Connect { .. }
                | Error::BusSubscribe { .. }
                | Error::Start { .. }
                | Error::Timeout { .. }
                | Error::ProcessSpawn { .. }
                | Error::InterpreterNotFound { .. }
                | Error::Toml(_)
                | Error::Config { .. }
                | Error::ConfigNotFound { .. }
                | Error::ConfigInvalid { .. }
        )
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Context Extensions
// ─────────────────────────────────────────────────────────────────

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", context.into(), err);
            err
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", f(), err);
            err
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = Error::connect("socket refused");
        assert_eq!(
            err.to_string(),
            "Failed to connect to daemon: socket refused"
        );

        let err = Error::flush("api", "permission denied");
        assert!(err.to_string().contains("api"));
        assert!(err.to_string().contains("permission denied"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_launch_stage_errors_are_fatal() {
        assert!(Error::connect("x").is_fatal());
        assert!(Error::bus_subscribe("x").is_fatal());
        assert!(Error::start("x").is_fatal());
        assert!(Error::timeout("connect").is_fatal());
        assert!(!Error::flush("app", "x").is_fatal());
    }

    #[test]
    fn test_flush_error_is_recoverable() {
        assert!(Error::flush("app", "x").is_recoverable());
        assert!(Error::ChannelClosed.is_recoverable());
        assert!(!Error::connect("x").is_recoverable());
    }

    #[test]
    fn test_cancelled_is_neither() {
        assert!(!Error::Cancelled.is_fatal());
        assert!(!Error::Cancelled.is_recoverable());
    }

    #[test]
    fn test_context_preserves_error() {
        let result: std::result::Result<(), Error> = Err(Error::NotConnected);
        let err = result.context("flushing").unwrap_err();
        assert!(matches!(err, Error::NotConnected));
    }
}
