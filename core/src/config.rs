use crate::errors::{AssistError, AssistResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Env var overriding `default_timeout_millis`
pub const ENV_CALL_TIMEOUT_MS: &str = "ASSIST_CALL_TIMEOUT_MS";
/// Env var overriding `log_level`
pub const ENV_LOG_LEVEL: &str = "ASSIST_LOG_LEVEL";

/// How to launch a worker process.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct WorkerConfig {
    // Executable followed by its leading arguments
    pub command: Vec<String>,
    // Additional args, appended to command
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl WorkerConfig {
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            args: Vec::new(),
            env: HashMap::new(),
        }
    }
}

/// Configuration struct for a process-assist host
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct AssistConfig {
    /// Local wait limit for calls that do not carry their own `timeoutMillis`.
    /// `None` means such calls wait for a genuine reply indefinitely.
    pub default_timeout_millis: Option<u64>,
    pub log_level: Option<String>,
    pub worker: Option<WorkerConfig>,
}

impl Default for AssistConfig {
    fn default() -> Self {
        Self {
            default_timeout_millis: None,
            log_level: Some("info".to_string()),
            worker: None,
        }
    }
}

impl AssistConfig {
    /// Loads configuration from a file if it exists, otherwise returns the default config
    pub fn load_from_file(path: &Path) -> AssistResult<Self> {
        if path.exists() {
            let content = fs::read_to_string(path).map_err(|e| {
                AssistError::Config(format!("Failed to read config file: {}", e))
            })?;

            let config: Self = toml::from_str(&content).map_err(|e| {
                AssistError::Config(format!("Failed to parse config file: {}", e))
            })?;

            Ok(config)
        } else {
            debug!("No config file at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Saves configuration to a file
    pub fn save_to_file(&self, path: &Path) -> AssistResult<()> {
        let content = toml::to_string(self)
            .map_err(|e| AssistError::Config(format!("Failed to serialize config: {}", e)))?;

        // Ensure the directory exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                AssistError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        fs::write(path, content)
            .map_err(|e| AssistError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Merges this config with another config, preferring values from the other config if present
    pub fn merge(&self, other: &Self) -> Self {
        Self {
            default_timeout_millis: other.default_timeout_millis.or(self.default_timeout_millis),
            log_level: other.log_level.clone().or_else(|| self.log_level.clone()),
            worker: other.worker.clone().or_else(|| self.worker.clone()),
        }
    }

    /// Applies `ASSIST_CALL_TIMEOUT_MS` and `ASSIST_LOG_LEVEL` on top of this config
    pub fn with_env_overrides(&self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from(&self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = self.clone();

        if let Some(raw) = lookup(ENV_CALL_TIMEOUT_MS) {
            match raw.trim().parse::<u64>() {
                Ok(millis) => {
                    debug!("Using default call timeout of {}ms from {}", millis, ENV_CALL_TIMEOUT_MS);
                    config.default_timeout_millis = Some(millis);
                }
                Err(_) => debug!("Ignoring unparsable {}={:?}", ENV_CALL_TIMEOUT_MS, raw),
            }
        }

        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            if !level.trim().is_empty() {
                config.log_level = Some(level);
            }
        }

        config
    }
}

/// Helper function to get default config directory
pub fn get_default_config_dir(app_name: &str) -> AssistResult<PathBuf> {
    let home_dir = dirs::home_dir().ok_or_else(|| {
        AssistError::Config("Could not determine home directory".to_string())
    })?;

    let config_dir = home_dir.join(".config").join(app_name);

    Ok(config_dir)
}

/// Helper function to get default config file path
pub fn get_default_config_file(app_name: &str) -> AssistResult<PathBuf> {
    let config_dir = get_default_config_dir(app_name)?;
    Ok(config_dir.join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_load_missing_file_returns_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        let config = AssistConfig::load_from_file(&path).unwrap();
        assert_eq!(config, AssistConfig::default());
        assert_eq!(config.default_timeout_millis, None);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut worker = WorkerConfig::new(vec!["node".to_string(), "child.js".to_string()]);
        worker.env.insert("MODE".to_string(), "worker".to_string());
        let config = AssistConfig {
            default_timeout_millis: Some(250),
            log_level: Some("debug".to_string()),
            worker: Some(worker),
        };

        config.save_to_file(&path).unwrap();
        let loaded = AssistConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let content = r#"
default_timeout_millis = 1500

[worker]
command = ["./worker"]
"#;
        fs::write(&path, content).unwrap();

        let config = AssistConfig::load_from_file(&path).unwrap();
        assert_eq!(config.default_timeout_millis, Some(1500));
        assert_eq!(config.log_level, None);
        let worker = config.worker.unwrap();
        assert_eq!(worker.command, vec!["./worker".to_string()]);
        assert!(worker.args.is_empty());
        assert!(worker.env.is_empty());
    }

    #[test]
    fn test_load_invalid_file_is_config_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "default_timeout_millis = \"soon\"").unwrap();

        let result = AssistConfig::load_from_file(&path);
        assert!(matches!(result, Err(AssistError::Config(_))));
    }

    #[test]
    fn test_merge_prefers_other() {
        let base = AssistConfig {
            default_timeout_millis: Some(100),
            log_level: Some("info".to_string()),
            worker: None,
        };
        let other = AssistConfig {
            default_timeout_millis: None,
            log_level: Some("trace".to_string()),
            worker: Some(WorkerConfig::new(vec!["w".to_string()])),
        };

        let merged = base.merge(&other);
        assert_eq!(merged.default_timeout_millis, Some(100));
        assert_eq!(merged.log_level.as_deref(), Some("trace"));
        assert!(merged.worker.is_some());
    }

    #[test]
    fn test_overrides() {
        let config = AssistConfig::default().with_overrides_from(|key| match key {
            ENV_CALL_TIMEOUT_MS => Some("750".to_string()),
            ENV_LOG_LEVEL => Some("warn".to_string()),
            _ => None,
        });
        assert_eq!(config.default_timeout_millis, Some(750));
        assert_eq!(config.log_level.as_deref(), Some("warn"));

        let untouched = AssistConfig::default()
            .with_overrides_from(|key| (key == ENV_CALL_TIMEOUT_MS).then(|| "abc".to_string()));
        assert_eq!(untouched.default_timeout_millis, None);
    }
}
