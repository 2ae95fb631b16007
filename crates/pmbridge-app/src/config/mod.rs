//! Configuration file parsing for pmbridge
//!
//! Supports:
//! - `.pmbridge/config.toml` - Process, launch policy, output and daemon settings

pub mod settings;
pub mod types;

pub use settings::{config_path, init_config_dir, load_settings, CONFIG_FILENAME, PMBRIDGE_DIR};
pub use types::*;
