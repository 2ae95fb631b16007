//! pmbridge - supervise a script through a pm2-style daemon
//!
//! This is the binary entry point. All logic lives in the library.

use std::path::PathBuf;

use clap::Parser;
use pmbridge::runner::{self, RunOptions};
use pmbridge_app::config::{init_config_dir, CliOverrides};
use pmbridge_core::prelude::*;

/// pmbridge - supervise a script and stream its events
#[derive(Parser, Debug)]
#[command(name = "pmbridge")]
#[command(about = "Supervise a script and stream its lifecycle and log events", long_about = None)]
struct Args {
    /// Project directory (relative scripts resolve against it)
    #[arg(value_name = "PATH")]
    path: Option<PathBuf>,

    /// Config file (default: <PATH>/.pmbridge/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Process name, overrides the config file
    #[arg(long)]
    name: Option<String>,

    /// Script to run, overrides the config file
    #[arg(long, value_name = "FILE")]
    script: Option<PathBuf>,

    /// Number of instances to start
    #[arg(long, value_name = "N")]
    instances: Option<u32>,

    /// Print events as NDJSON
    #[arg(long)]
    json: bool,

    /// Write a default .pmbridge/config.toml and exit
    #[arg(long)]
    init: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let project_dir = args
        .path
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    if args.init {
        let path = init_config_dir(&project_dir)?;
        eprintln!("Config written to {}", path.display());
        return Ok(());
    }

    runner::run(RunOptions {
        project_dir,
        config_path: args.config,
        overrides: CliOverrides {
            name: args.name,
            script: args.script,
            instances: args.instances,
            json: args.json,
        },
    })
    .await
}
