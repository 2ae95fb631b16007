//! Settings loader for .pmbridge/config.toml

use std::path::{Path, PathBuf};

use super::types::Settings;
use pmbridge_core::prelude::*;

pub const CONFIG_FILENAME: &str = "config.toml";
pub const PMBRIDGE_DIR: &str = ".pmbridge";

const DEFAULT_CONFIG: &str = r#"# pmbridge configuration

[process]
name = "app"
script = "index.js"   # relative to the project directory
instances = 1
# args = ["--port", "8080"]
# interpreter = "node"  # inferred from the extension when omitted

[launch]
# Required. One of:
#   "skip"         never flush retained logs before subscribing
#   "best-effort"  flush, report a failure and keep going
#   "strict"       flush, abort the launch on failure
flush = "best-effort"
# call_timeout_ms = 5000  # per daemon call; unset waits indefinitely

[output]
json = false   # print events as NDJSON

[daemon]
# bus_capacity = 256     # packets buffered between daemon and router
# log_retention = 1000   # lines kept per process for flush; 0 keeps all
"#;

/// Default location of the config file for a project
pub fn config_path(project_path: &Path) -> PathBuf {
    project_path.join(PMBRIDGE_DIR).join(CONFIG_FILENAME)
}

/// Load and parse a config file
///
/// Unlike most settings, the launch policy has no fallback, so a missing or
/// invalid file is an error rather than a silent default.
pub fn load_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        return Err(Error::ConfigNotFound {
            path: path.to_path_buf(),
        });
    }

    let content = std::fs::read_to_string(path)?;
    let settings: Settings = toml::from_str(&content)?;
    debug!("Loaded settings from {:?}", path);
    Ok(settings)
}

/// Create a commented default config in `.pmbridge/`
///
/// An existing file is left untouched. Returns the config path.
pub fn init_config_dir(project_path: &Path) -> Result<PathBuf> {
    let dir = project_path.join(PMBRIDGE_DIR);

    if !dir.exists() {
        std::fs::create_dir_all(&dir)
            .map_err(|e| Error::config(format!("Failed to create .pmbridge dir: {}", e)))?;
    }

    let path = dir.join(CONFIG_FILENAME);
    if !path.exists() {
        std::fs::write(&path, DEFAULT_CONFIG)
            .map_err(|e| Error::config(format!("Failed to write config.toml: {}", e)))?;
        info!("Created default config at {:?}", path);
    }

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FlushPolicy;
    use tempfile::tempdir;

    #[test]
    fn test_load_settings_missing_file() {
        let temp = tempdir().unwrap();
        let err = load_settings(&config_path(temp.path())).unwrap_err();
        assert!(matches!(err, Error::ConfigNotFound { .. }));
    }

    #[test]
    fn test_load_settings_custom() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join(".pmbridge");
        std::fs::create_dir_all(&dir).unwrap();

        let config = r#"
[process]
name = "worker"
script = "run.sh"

[launch]
flush = "strict"
"#;
        std::fs::write(dir.join("config.toml"), config).unwrap();

        let settings = load_settings(&config_path(temp.path())).unwrap();
        assert_eq!(settings.process.name.as_deref(), Some("worker"));
        assert_eq!(settings.launch.flush, FlushPolicy::Strict);
        assert!(!settings.output.json);
    }

    #[test]
    fn test_load_settings_invalid_toml() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "not valid toml {{{{").unwrap();

        let err = load_settings(&path).unwrap_err();
        assert!(matches!(err, Error::Toml(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_load_settings_without_flush_policy() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[process]\nname = \"api\"\n").unwrap();

        assert!(matches!(load_settings(&path), Err(Error::Toml(_))));
    }

    #[test]
    fn test_init_config_dir() {
        let temp = tempdir().unwrap();

        let path = init_config_dir(temp.path()).unwrap();
        assert_eq!(path, temp.path().join(".pmbridge/config.toml"));
        assert!(path.exists());

        // Template must load as-is
        let settings = load_settings(&path).unwrap();
        assert_eq!(settings.launch.flush, FlushPolicy::BestEffort);
        assert!(settings.descriptor(temp.path()).is_ok());
    }

    #[test]
    fn test_init_config_dir_keeps_existing() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join(".pmbridge");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("config.toml"), "[launch]\nflush = \"skip\"\n").unwrap();

        let path = init_config_dir(temp.path()).unwrap();
        let settings = load_settings(&path).unwrap();
        assert_eq!(settings.launch.flush, FlushPolicy::Skip);
    }
}
