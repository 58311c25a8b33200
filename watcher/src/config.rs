//! Configuration for watch sessions.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WatcherError};

/// Configuration shared by every watch session of a [`crate::WatchManager`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Quiet period after the last event before subscribers are signalled.
    #[serde(rename = "debounce_ms", with = "millis")]
    pub debounce: Duration,

    /// How long an unused watch stays alive waiting for a new subscriber.
    #[serde(rename = "grace_period_ms", with = "millis")]
    pub grace_period: Duration,

    /// Name of the revision-control metadata directory.
    pub vcs_dir: String,

    /// Directory names that are never watched.
    pub excluded_dirs: Vec<String>,

    /// git executable used for ignore checks.
    pub git_program: PathBuf,
}

impl WatchConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self {
            debounce: Duration::from_millis(300),
            grace_period: Duration::from_secs(2),
            vcs_dir: ".git".to_string(),
            excluded_dirs: Self::default_excludes(),
            git_program: PathBuf::from("git"),
        }
    }

    /// Set the debounce window.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Set the teardown grace period.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Add an excluded directory name.
    pub fn exclude(mut self, name: impl Into<String>) -> Self {
        self.excluded_dirs.push(name.into());
        self
    }

    /// Set the git executable.
    pub fn with_git_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.git_program = program.into();
        self
    }

    /// Load a config from a TOML file. Missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
            .map_err(|e| WatcherError::Config(format!("{}: {e}", path.display())))
    }

    /// Parse a config from TOML text.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| WatcherError::Config(e.to_string()))
    }

    /// Well-known dependency and build output directories.
    fn default_excludes() -> Vec<String> {
        [
            "node_modules",
            "bower_components",
            "vendor",
            "target",
            "dist",
            "build",
            "__pycache__",
            "venv",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self::new()
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_config_builder() {
        let config = WatchConfig::new()
            .with_debounce(Duration::from_millis(50))
            .with_grace_period(Duration::from_millis(500))
            .exclude(".terraform");

        assert_eq!(config.debounce, Duration::from_millis(50));
        assert_eq!(config.grace_period, Duration::from_millis(500));
        assert!(config.excluded_dirs.iter().any(|d| d == "node_modules"));
        assert!(config.excluded_dirs.iter().any(|d| d == ".terraform"));
    }

    #[test]
    fn test_toml_partial_override() {
        let config = WatchConfig::from_toml(
            r#"
            debounce_ms = 120
            excluded_dirs = ["out"]
            "#,
        )
        .unwrap();

        assert_eq!(config.debounce, Duration::from_millis(120));
        assert_eq!(config.excluded_dirs, vec!["out".to_string()]);
        assert_eq!(config.grace_period, WatchConfig::default().grace_period);
        assert_eq!(config.vcs_dir, ".git");
    }

    #[test]
    fn test_toml_errors_are_config_errors() {
        let err = WatchConfig::from_toml("debounce_ms = \"soon\"").unwrap_err();
        assert!(matches!(err, WatcherError::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prview.toml");
        std::fs::write(&path, "grace_period_ms = 10000\ngit_program = \"/opt/git/bin/git\"\n").unwrap();

        let config = WatchConfig::load(&path).unwrap();
        assert_eq!(config.grace_period, Duration::from_secs(10));
        assert_eq!(config.git_program, PathBuf::from("/opt/git/bin/git"));

        assert!(WatchConfig::load(&dir.path().join("missing.toml")).is_err());
    }
}
