//! pmbridge Library
//!
//! Foreground runner and console output for the `pmbridge` binary.

pub mod console;
pub mod runner;
pub mod signals;

pub use runner::{run, RunOptions};
