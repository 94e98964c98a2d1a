//! Process configuration loaded from `queuectl.toml`.
//!
//! [`QueueConfig`] covers where the database and PID file live and how the
//! worker pool paces itself. Values missing from the file use defaults, and
//! `QUEUECTL_DB` / `QUEUECTL_PID_FILE` take precedence over the file.
//!
//! Queue tuning (`max_retries`, `backoff_base`) lives in the database instead,
//! see `queuectl config set`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "queuectl.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// SQLite database shared by every worker.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Liveness marker holding the supervisor PID.
    #[serde(default = "default_pid_file")]
    pub pid_file: PathBuf,

    /// Idle sleep between empty claim attempts.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How long the supervisor waits for workers after forwarding SIGTERM.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    /// Default tracing filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("queuectl.db")
}

fn default_pid_file() -> PathBuf {
    std::env::temp_dir().join("queuectl.pid")
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_shutdown_grace_ms() -> u64 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            pid_file: default_pid_file(),
            poll_interval_ms: default_poll_interval_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            log_level: default_log_level(),
        }
    }
}

impl QueueConfig {
    /// Load from an explicit path, or from `queuectl.toml` in the current
    /// directory if present. An explicit path that does not exist is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    Self::from_file(path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config = toml::from_str::<QueueConfig>(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(db) = lookup("QUEUECTL_DB").filter(|v| !v.is_empty()) {
            self.db_path = PathBuf::from(db);
        }
        if let Some(pid) = lookup("QUEUECTL_PID_FILE").filter(|v| !v.is_empty()) {
            self.pid_file = PathBuf::from(pid);
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = QueueConfig::default();
        assert_eq!(config.db_path, PathBuf::from("queuectl.db"));
        assert!(config.pid_file.ends_with("queuectl.pid"));
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.shutdown_grace(), Duration::from_secs(1));
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            db_path = "/var/lib/queuectl/jobs.db"
            poll_interval_ms = 250
        "#;
        let config: QueueConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.db_path, PathBuf::from("/var/lib/queuectl/jobs.db"));
        assert_eq!(config.poll_interval_ms, 250);
        assert_eq!(config.shutdown_grace_ms, 1000);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queuectl.toml");
        std::fs::write(&path, "shutdown_grace_ms = 3000\nlog_level = \"debug\"\n").unwrap();

        let config = QueueConfig::from_file(&path).unwrap();
        assert_eq!(config.shutdown_grace(), Duration::from_secs(3));
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(QueueConfig::load(Some(&dir.path().join("nope.toml"))).is_err());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queuectl.toml");
        std::fs::write(&path, "poll_interval_ms = \"soon\"").unwrap();
        assert!(QueueConfig::from_file(&path).is_err());
    }

    #[test]
    fn env_overrides_file() {
        let mut config = QueueConfig::default();
        config.apply_env(|key| match key {
            "QUEUECTL_DB" => Some("/tmp/other.db".to_string()),
            "QUEUECTL_PID_FILE" => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.db_path, PathBuf::from("/tmp/other.db"));
        assert!(config.pid_file.ends_with("queuectl.pid"));
    }
}
