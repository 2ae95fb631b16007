//! Core domain types

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Identity of a managed process, validated at construction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessDescriptor {
    name: String,
    script_path: PathBuf,
    instances: u32,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    interpreter: Option<String>,
}

impl ProcessDescriptor {
    /// Build a descriptor, resolving a relative `script` against `base_dir`
    pub fn new(
        name: impl Into<String>,
        script: impl AsRef<Path>,
        instances: u32,
        base_dir: &Path,
    ) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::config_invalid("process name must not be empty"));
        }
        if instances == 0 {
            return Err(Error::config_invalid("instances must be at least 1"));
        }

        let script = script.as_ref();
        if script.as_os_str().is_empty() {
            return Err(Error::config_invalid("script path must not be empty"));
        }
        let script_path = if script.is_absolute() {
            script.to_path_buf()
        } else {
            base_dir.join(script)
        };

        Ok(Self {
            name,
            script_path,
            instances,
            args: Vec::new(),
            interpreter: None,
        })
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = Some(interpreter.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn script_path(&self) -> &Path {
        &self.script_path
    }

    pub fn instances(&self) -> u32 {
        self.instances
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn interpreter(&self) -> Option<&str> {
        self.interpreter.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_script_is_resolved() {
        let desc = ProcessDescriptor::new("api", "src/main.js", 2, Path::new("/srv/app")).unwrap();
        assert_eq!(desc.script_path(), Path::new("/srv/app/src/main.js"));
        assert_eq!(desc.instances(), 2);
    }

    #[test]
    fn test_absolute_script_is_kept() {
        let desc = ProcessDescriptor::new("api", "/opt/x.js", 1, Path::new("/srv")).unwrap();
        assert_eq!(desc.script_path(), Path::new("/opt/x.js"));
    }

    #[test]
    fn test_rejects_empty_name() {
        let err = ProcessDescriptor::new("  ", "x.js", 1, Path::new("/")).unwrap_err();
        assert!(matches!(err, Error::ConfigInvalid { .. }));
    }

    #[test]
    fn test_rejects_zero_instances() {
        let err = ProcessDescriptor::new("api", "x.js", 0, Path::new("/")).unwrap_err();
        assert!(err.to_string().contains("instances"));
    }

    #[test]
    fn test_rejects_empty_script() {
        assert!(ProcessDescriptor::new("api", "", 1, Path::new("/")).is_err());
    }

    #[test]
    fn test_builder_extras() {
        let desc = ProcessDescriptor::new("api", "x.py", 1, Path::new("/"))
            .unwrap()
            .with_args(vec!["--port".into(), "80".into()])
            .with_interpreter("python3");
        assert_eq!(desc.args(), ["--port", "80"]);
        assert_eq!(desc.interpreter(), Some("python3"));
    }
}
