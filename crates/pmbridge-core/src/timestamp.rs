//! Capture-time timestamps for log events
//!
//! Log events carry a locale-stable wall-clock string, `DD/MM/YYYY, HH:MM:SS`
//! (day-month-year, 24-hour clock, zero-padded). The clock is injected so the
//! formatter is deterministic under test.

use chrono::{DateTime, Local};

/// `strftime` pattern for [`TimestampFormatter`]
pub const TIMESTAMP_FORMAT: &str = "%d/%m/%Y, %H:%M:%S";

/// Source of wall-clock time
#[cfg_attr(test, mockall::automock)]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

/// Reads the system clock in the local timezone
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Always returns the same instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Local>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Local> {
        self.0
    }
}

/// Formats the current time from an injected [`Clock`]
#[derive(Debug, Clone, Default)]
pub struct TimestampFormatter<C = SystemClock> {
    clock: C,
}

impl<C: Clock> TimestampFormatter<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    /// Current time as `DD/MM/YYYY, HH:MM:SS`
    pub fn now(&self) -> String {
        Self::format(&self.clock.now())
    }

    pub fn format(at: &DateTime<Local>) -> String {
        at.format(TIMESTAMP_FORMAT).to_string()
    }
}
