//! Configuration types for pmbridge
//!
//! Defines:
//! - `Settings` - The `.pmbridge/config.toml` file
//! - `LaunchConfig` - Launch policy handed to the supervisor
//! - `FlushPolicy` - What to do about the pre-subscription log flush
//! - `DaemonSettings` - Tunables for the embedded daemon

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use pmbridge_core::prelude::*;
use pmbridge_core::ProcessDescriptor;
use pmbridge_daemon::{EmbeddedOptions, DEFAULT_BUS_CAPACITY, DEFAULT_LOG_RETENTION};

/// Pre-subscription flush behaviour
///
/// There is deliberately no `Default`: callers must pick one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlushPolicy {
    /// Do not flush
    Skip,
    /// Flush; on failure emit a notice and keep going
    BestEffort,
    /// Flush; on failure disconnect and close
    Strict,
}

impl FlushPolicy {
    /// Map a boolean "fail on flush error" switch onto a flushing policy
    pub fn from_fail_on_error(fail_on_error: bool) -> Self {
        if fail_on_error {
            FlushPolicy::Strict
        } else {
            FlushPolicy::BestEffort
        }
    }

    pub fn should_flush(&self) -> bool {
        !matches!(self, FlushPolicy::Skip)
    }

    pub fn fail_on_flush_error(&self) -> bool {
        matches!(self, FlushPolicy::Strict)
    }
}

impl std::fmt::Display for FlushPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlushPolicy::Skip => write!(f, "skip"),
            FlushPolicy::BestEffort => write!(f, "best-effort"),
            FlushPolicy::Strict => write!(f, "strict"),
        }
    }
}

/// Launch policy for one supervisor run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchConfig {
    pub flush: FlushPolicy,
    /// Upper bound on each daemon round trip; `None` waits indefinitely
    pub call_timeout: Option<Duration>,
}

impl LaunchConfig {
    pub fn new(flush: FlushPolicy) -> Self {
        Self {
            flush,
            call_timeout: None,
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }
}

/// Application settings (.pmbridge/config.toml)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub process: ProcessSettings,

    /// Required: the flush policy has no default
    pub launch: LaunchSettings,

    #[serde(default)]
    pub output: OutputSettings,

    #[serde(default)]
    pub daemon: DaemonSettings,
}

/// `[process]` section
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessSettings {
    #[serde(default)]
    pub name: Option<String>,

    /// Relative paths resolve against the project directory
    #[serde(default)]
    pub script: Option<PathBuf>,

    #[serde(default = "default_instances")]
    pub instances: u32,

    #[serde(default)]
    pub args: Vec<String>,

    /// Overrides extension-based interpreter inference
    #[serde(default)]
    pub interpreter: Option<String>,
}

impl Default for ProcessSettings {
    fn default() -> Self {
        Self {
            name: None,
            script: None,
            instances: default_instances(),
            args: Vec::new(),
            interpreter: None,
        }
    }
}

fn default_instances() -> u32 {
    1
}

/// `[launch]` section
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LaunchSettings {
    pub flush: FlushPolicy,

    #[serde(default)]
    pub call_timeout_ms: Option<u64>,
}

/// `[output]` section
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OutputSettings {
    /// Print events as NDJSON instead of human-readable lines
    #[serde(default)]
    pub json: bool,
}

/// `[daemon]` section
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DaemonSettings {
    /// Packets buffered between the daemon and the router
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,

    /// Output lines kept per process for `flush`; 0 keeps everything
    #[serde(default = "default_log_retention")]
    pub log_retention: usize,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            bus_capacity: default_bus_capacity(),
            log_retention: default_log_retention(),
        }
    }
}

fn default_bus_capacity() -> usize {
    DEFAULT_BUS_CAPACITY
}

fn default_log_retention() -> usize {
    DEFAULT_LOG_RETENTION
}

/// Command-line values that take precedence over the file
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub name: Option<String>,
    pub script: Option<PathBuf>,
    pub instances: Option<u32>,
    pub json: bool,
}

impl Settings {
    /// Validate the `[process]` section into a descriptor
    pub fn descriptor(&self, base_dir: &Path) -> Result<ProcessDescriptor> {
        let name = self
            .process
            .name
            .as_deref()
            .ok_or_else(|| Error::config_invalid("process name is not set"))?;
        let script = self
            .process
            .script
            .as_deref()
            .ok_or_else(|| Error::config_invalid("process script is not set"))?;

        let mut descriptor = ProcessDescriptor::new(name, script, self.process.instances, base_dir)?
            .with_args(self.process.args.clone());
        if let Some(interpreter) = &self.process.interpreter {
            descriptor = descriptor.with_interpreter(interpreter.clone());
        }
        Ok(descriptor)
    }

    pub fn launch_config(&self) -> LaunchConfig {
        LaunchConfig {
            flush: self.launch.flush,
            call_timeout: self.launch.call_timeout_ms.map(Duration::from_millis),
        }
    }

    pub fn embedded_options(&self) -> EmbeddedOptions {
        EmbeddedOptions {
            bus_capacity: self.daemon.bus_capacity,
            log_retention: self.daemon.log_retention,
        }
    }

    /// Apply command-line overrides
    pub fn merge_cli(&mut self, cli: &CliOverrides) {
        if let Some(name) = &cli.name {
            self.process.name = Some(name.clone());
        }
        if let Some(script) = &cli.script {
            self.process.script = Some(script.clone());
        }
        if let Some(instances) = cli.instances {
            self.process.instances = instances;
        }
        if cli.json {
            self.output.json = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> std::result::Result<Settings, toml::de::Error> {
        toml::from_str(content)
    }

    #[test]
    fn test_flush_policy_from_bool() {
        assert_eq!(FlushPolicy::from_fail_on_error(true), FlushPolicy::Strict);
        assert_eq!(FlushPolicy::from_fail_on_error(false), FlushPolicy::BestEffort);
        assert!(!FlushPolicy::Skip.should_flush());
        assert!(FlushPolicy::Strict.fail_on_flush_error());
        assert!(!FlushPolicy::BestEffort.fail_on_flush_error());
    }

    #[test]
    fn test_parse_full_settings() {
        let settings = parse(
            r#"
            [process]
            name = "worker"
            script = "src/main.js"
            instances = 2
            args = ["--port", "8080"]

            [launch]
            flush = "best-effort"
            call_timeout_ms = 5000

            [output]
            json = true
            "#,
        )
        .unwrap();

        assert_eq!(settings.process.name.as_deref(), Some("worker"));
        assert_eq!(settings.process.instances, 2);
        assert!(settings.output.json);
        assert_eq!(
            settings.launch_config(),
            LaunchConfig::new(FlushPolicy::BestEffort).with_call_timeout(Duration::from_secs(5))
        );
    }

    #[test]
    fn test_daemon_section_defaults() {
        let settings = parse("[launch]\nflush = \"skip\"\n").unwrap();
        let options = settings.embedded_options();
        assert_eq!(options.bus_capacity, DEFAULT_BUS_CAPACITY);
        assert_eq!(options.log_retention, DEFAULT_LOG_RETENTION);

        let settings =
            parse("[launch]\nflush = \"skip\"\n[daemon]\nlog_retention = 50\n").unwrap();
        let options = settings.embedded_options();
        assert_eq!(options.bus_capacity, DEFAULT_BUS_CAPACITY);
        assert_eq!(options.log_retention, 50);
    }

    #[test]
    fn test_launch_section_is_required() {
        assert!(parse("[process]\nname = \"worker\"\n").is_err());
        assert!(parse("[launch]\n").is_err());
    }

    #[test]
    fn test_rejects_unknown_flush_policy() {
        assert!(parse("[launch]\nflush = \"sometimes\"\n").is_err());
    }

    #[test]
    fn test_descriptor_needs_name_and_script() {
        let settings = parse("[launch]\nflush = \"skip\"\n").unwrap();
        let err = settings.descriptor(Path::new("/srv")).unwrap_err();
        assert!(matches!(err, Error::ConfigInvalid { .. }));
    }

    #[test]
    fn test_descriptor_resolves_script() {
        let settings = parse(
            "[process]\nname = \"api\"\nscript = \"main.py\"\ninterpreter = \"python3\"\n[launch]\nflush = \"strict\"\n",
        )
        .unwrap();
        let descriptor = settings.descriptor(Path::new("/srv")).unwrap();
        assert_eq!(descriptor.script_path(), Path::new("/srv/main.py"));
        assert_eq!(descriptor.interpreter(), Some("python3"));
        assert_eq!(settings.launch_config().call_timeout, None);
    }

    #[test]
    fn test_merge_cli_overrides_file() {
        let mut settings = parse(
            "[process]\nname = \"api\"\nscript = \"a.js\"\n[launch]\nflush = \"skip\"\n",
        )
        .unwrap();
        settings.merge_cli(&CliOverrides {
            name: Some("web".to_string()),
            script: None,
            instances: Some(4),
            json: true,
        });

        assert_eq!(settings.process.name.as_deref(), Some("web"));
        assert_eq!(settings.process.script, Some(PathBuf::from("a.js")));
        assert_eq!(settings.process.instances, 4);
        assert!(settings.output.json);
    }
}
