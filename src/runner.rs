//! Foreground runner - supervise one process until interrupted
//!
//! Loads settings, launches the process through the embedded daemon, prints
//! every event to stdout, and shuts down on SIGINT/SIGTERM or when the
//! supervisor closes on its own.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;

use pmbridge_app::config::{self, CliOverrides};
use pmbridge_app::{Supervisor, SupervisorNotice};
use pmbridge_core::prelude::*;
use pmbridge_daemon::EmbeddedDaemon;

use crate::console::{self, ConsoleFormat, ConsoleSink};
use crate::signals;

/// Inputs for one foreground run
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Base directory for relative script paths
    pub project_dir: PathBuf,
    /// Explicit config file; defaults to `.pmbridge/config.toml` in `project_dir`
    pub config_path: Option<PathBuf>,
    pub overrides: CliOverrides,
}

impl RunOptions {
    pub fn config_path(&self) -> PathBuf {
        self.config_path
            .clone()
            .unwrap_or_else(|| config::config_path(&self.project_dir))
    }
}

/// Run in the foreground until a signal or a terminal notice
pub async fn run(options: RunOptions) -> Result<()> {
    color_eyre::install()
        .map_err(|e| Error::config(format!("Failed to install error reporter: {}", e)))?;

    // Logging goes to a file; stdout is reserved for events
    pmbridge_core::logging::init()?;

    let config_path = options.config_path();
    let mut settings = config::load_settings(&config_path).context("Loading settings")?;
    settings.merge_cli(&options.overrides);

    let descriptor = settings
        .descriptor(&options.project_dir)
        .with_context(|| format!("Invalid [process] settings in {}", config_path.display()))?;
    let launch = settings.launch_config();

    info!("═══════════════════════════════════════════════════════");
    info!("pmbridge supervising {}", descriptor.name());
    info!("Config: {}", config_path.display());
    info!("═══════════════════════════════════════════════════════");

    let supervisor = Supervisor::new(EmbeddedDaemon::with_options(settings.embedded_options()));
    let sink = Arc::new(ConsoleSink::new(
        io::stdout(),
        ConsoleFormat::from_json_flag(settings.output.json),
    ));
    console::attach(&supervisor, sink);

    let mut notices = supervisor.notices().ok_or(Error::ChannelClosed)?;
    supervisor.launch(descriptor, launch)?;

    let result = event_loop(&mut notices).await;

    let running = supervisor
        .daemon()
        .processes()
        .iter()
        .filter(|p| p.running)
        .count();
    if running > 0 {
        info!("Stopping {} running instance(s)", running);
    }
    supervisor.shutdown().await;

    if let Err(ref e) = result {
        error!("pmbridge error: {:?}", e);
        if let Ok(log_file) = pmbridge_core::logging::get_current_log_file() {
            eprintln!("pmbridge: see {} for details", log_file.display());
        }
    }
    info!("pmbridge exiting");
    result
}

/// Wait for a signal or a terminal notice
async fn event_loop(notices: &mut mpsc::Receiver<SupervisorNotice>) -> Result<()> {
    let interrupted = signals::wait_for_signal();
    tokio::pin!(interrupted);

    loop {
        tokio::select! {
            signal = &mut interrupted => {
                signal?;
                info!("Shutdown signal received");
                return Ok(());
            }
            notice = notices.recv() => {
                let Some(notice) = notice else {
                    return Err(Error::ChannelClosed);
                };
                if let Some(result) = handle_notice(notice) {
                    return result;
                }
            }
        }
    }
}

/// Report a notice; returns the run's outcome once it is decided
fn handle_notice(notice: SupervisorNotice) -> Option<Result<()>> {
    match notice {
        SupervisorNotice::Launched { processes } => {
            for process in &processes {
                info!(
                    "Started {} (pm_id {}, pid {:?})",
                    process.name, process.pm_id, process.pid
                );
            }
            eprintln!("pmbridge: {} process(es) online", processes.len());
            None
        }
        SupervisorNotice::LaunchFailed { error } => Some(Err(error)),
        SupervisorNotice::FlushFailed { error } => {
            eprintln!("pmbridge: warning: {}", error);
            None
        }
        SupervisorNotice::HandlerFailed { kind, message } => {
            warn!("Console {} handler failed: {}", kind, message);
            None
        }
        SupervisorNotice::BusClosed => {
            eprintln!("pmbridge: daemon event bus closed");
            None
        }
        SupervisorNotice::Closed => Some(Ok(())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmbridge_core::EventKind;
    use std::path::Path;

    #[test]
    fn test_default_config_path() {
        let options = RunOptions {
            project_dir: PathBuf::from("/srv/app"),
            config_path: None,
            overrides: CliOverrides::default(),
        };
        assert_eq!(
            options.config_path(),
            Path::new("/srv/app/.pmbridge/config.toml")
        );
    }

    #[test]
    fn test_terminal_notices_end_the_run() {
        assert!(matches!(
            handle_notice(SupervisorNotice::Closed),
            Some(Ok(()))
        ));
        assert!(matches!(
            handle_notice(SupervisorNotice::LaunchFailed {
                error: Error::connect("refused")
            }),
            Some(Err(Error::Connect { .. }))
        ));
        assert!(handle_notice(SupervisorNotice::BusClosed).is_none());
        assert!(handle_notice(SupervisorNotice::HandlerFailed {
            kind: EventKind::Output,
            message: "x".to_string()
        })
        .is_none());
    }

    #[tokio::test]
    async fn test_event_loop_ends_on_closed() {
        let (tx, mut rx) = mpsc::channel(4);
        tx.send(SupervisorNotice::Launched {
            processes: Vec::new(),
        })
        .await
        .unwrap();
        tx.send(SupervisorNotice::Closed).await.unwrap();

        tokio_test::assert_ok!(event_loop(&mut rx).await);
    }

    #[tokio::test]
    async fn test_event_loop_reports_dropped_channel() {
        let (tx, mut rx) = mpsc::channel::<SupervisorNotice>(1);
        drop(tx);
        assert!(matches!(
            event_loop(&mut rx).await,
            Err(Error::ChannelClosed)
        ));
    }
}
