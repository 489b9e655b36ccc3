// Engine configuration.
//
// Global config: `~/.fencerun/config.toml`
// Runtime updates arrive as JSON through `engine.configure`.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};

use crate::runner::RunnerConfig;

pub const DEFAULT_STOP_SIGNAL: &str = "SIGINT";
pub const DEFAULT_CONTAINER_RUNTIME: &str = "docker";
pub const DEFAULT_STATUS_INTERVAL_MS: u64 = 100;
pub const DEFAULT_WRITE_ACK_TIMEOUT_MS: u64 = 5000;

const MIN_STATUS_INTERVAL_MS: u64 = 20;
const MAX_STATUS_INTERVAL_MS: u64 = 2000;

/// Root directory for fencerun global state: `~/.fencerun/`.
pub fn global_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".fencerun"))
}

/// Path to the global config file: `~/.fencerun/config.toml`.
pub fn global_config_path() -> Option<PathBuf> {
    global_dir().map(|d| d.join("config.toml"))
}

/// Default log file of the stdio host: `~/.fencerun/fencerund.log`.
pub fn default_log_path() -> Option<PathBuf> {
    global_dir().map(|d| d.join("fencerund.log"))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Signal sent to the process group on kill (e.g. `SIGINT`, `SIGTERM`).
    pub stop_signal: String,
    /// Container CLI used for `IMAGE`, `DOCKER=true` and `CWD=docker:` blocks.
    pub container_runtime: String,
    /// Status animation tick.
    pub status_interval_ms: u64,
    /// How long a read waits for the editor to acknowledge pending writes.
    pub write_ack_timeout_ms: u64,
    /// Runner overrides, applied on top of the built-in table.
    pub runners: Vec<RunnerConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stop_signal: DEFAULT_STOP_SIGNAL.into(),
            container_runtime: DEFAULT_CONTAINER_RUNTIME.into(),
            status_interval_ms: DEFAULT_STATUS_INTERVAL_MS,
            write_ack_timeout_ms: DEFAULT_WRITE_ACK_TIMEOUT_MS,
            runners: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Load from `~/.fencerun/config.toml`. Returns defaults if the file
    /// doesn't exist or can't be parsed.
    pub fn load() -> Self {
        let Some(path) = global_config_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(config) => config,
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "ignoring invalid config file");
                Self::default()
            }
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save to a specific path (creates parent directories).
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Parse the `engine.configure` payload. Missing fields keep their defaults.
    pub fn from_json(value: serde_json::Value) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.stop_signal()?;
        if self.container_runtime.trim().is_empty() {
            return Err(ConfigError::Invalid("container_runtime must not be empty".into()));
        }
        for runner in &self.runners {
            runner.validate().map_err(ConfigError::Invalid)?;
        }
        Ok(())
    }

    pub fn stop_signal(&self) -> Result<Signal, ConfigError> {
        let name = self.stop_signal.trim().to_ascii_uppercase();
        let name = if name.starts_with("SIG") { name } else { format!("SIG{name}") };
        Signal::from_str(&name).map_err(|_| ConfigError::InvalidSignal(self.stop_signal.clone()))
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms.clamp(MIN_STATUS_INTERVAL_MS, MAX_STATUS_INTERVAL_MS))
    }

    pub fn write_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.write_ack_timeout_ms)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("config decode error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown stop signal `{0}`")]
    InvalidSignal(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::Runner;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn engine_config_defaults() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.stop_signal, "SIGINT");
        assert_eq!(cfg.container_runtime, "docker");
        assert_eq!(cfg.status_interval(), Duration::from_millis(100));
        assert_eq!(cfg.write_ack_timeout(), Duration::from_secs(5));
        assert!(cfg.runners.is_empty());
        assert_eq!(cfg.stop_signal().unwrap(), Signal::SIGINT);
    }

    #[test]
    fn engine_config_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let cfg = EngineConfig {
            stop_signal: "SIGTERM".into(),
            container_runtime: "podman".into(),
            status_interval_ms: 250,
            write_ack_timeout_ms: 1000,
            runners: vec![RunnerConfig {
                languages: vec!["fish".into()],
                image: None,
                runner: Runner::Shell { shell: "fish".into() },
            }],
        };
        cfg.save_to(&path).unwrap();
        let loaded = EngineConfig::load_from(&path).unwrap();
        assert_eq!(cfg, loaded);
    }

    #[test]
    fn engine_config_parse_from_toml() {
        let toml_str = r#"
stop_signal = "TERM"
container_runtime = "podman"

[[runners]]
type = "interpreted"
languages = ["ruby", "rb"]
interpreter = "ruby"
file_name = "main.rb"
"#;
        let cfg: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.stop_signal().unwrap(), Signal::SIGTERM);
        assert_eq!(cfg.container_runtime, "podman");
        assert_eq!(cfg.status_interval_ms, DEFAULT_STATUS_INTERVAL_MS);
        assert_eq!(cfg.runners[0].languages, vec!["ruby", "rb"]);
        assert!(matches!(cfg.runners[0].runner, Runner::Interpreted { ref interpreter, .. } if interpreter == "ruby"));
    }

    #[test]
    fn engine_config_missing_fields_use_defaults() {
        let cfg: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(cfg, EngineConfig::default());
    }

    #[test]
    fn engine_config_load_missing_file_errors() {
        let dir = TempDir::new().unwrap();
        let result = EngineConfig::load_from(&dir.path().join("missing.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn from_json_rejects_unknown_signal() {
        let error = EngineConfig::from_json(json!({ "stop_signal": "SIGNOPE" })).unwrap_err();
        assert!(matches!(error, ConfigError::InvalidSignal(ref name) if name == "SIGNOPE"));
    }

    #[test]
    fn from_json_rejects_runner_without_type() {
        let error = EngineConfig::from_json(json!({ "runners": [{ "languages": ["x"] }] }));
        assert!(matches!(error, Err(ConfigError::Json(_))));
    }

    #[test]
    fn status_interval_is_clamped() {
        let fast = EngineConfig { status_interval_ms: 1, ..EngineConfig::default() };
        let slow = EngineConfig { status_interval_ms: 60_000, ..EngineConfig::default() };
        assert_eq!(fast.status_interval(), Duration::from_millis(20));
        assert_eq!(slow.status_interval(), Duration::from_millis(2000));
    }
}
