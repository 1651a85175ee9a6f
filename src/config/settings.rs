//! Application settings (cadence.yaml).
//!
//! Every field has a default so an empty file, or no file at all, yields a
//! working in-memory dry-run setup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::error::ConfigError;
use crate::core::window::WindowPolicy;

/// Global settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directory holding one sub-directory per pipeline.
    pub pipelines_dir: PathBuf,
    /// How often the scheduler evaluates triggers.
    pub tick_interval_ms: u64,
    /// How long shutdown waits for in-flight runs.
    pub shutdown_timeout_secs: u64,
    /// Default window size for pipelines without an override.
    pub window_days: u32,
    /// RUNNING jobs older than this are reported as suspect.
    pub stale_after_secs: u64,
    /// Job record storage.
    pub storage: StorageSettings,
    /// Statement execution backend.
    pub backend: BackendSettings,
    /// HTTP API; disabled when absent.
    pub api: Option<ApiSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            pipelines_dir: PathBuf::from("pipelines"),
            tick_interval_ms: 1000,
            shutdown_timeout_secs: 30,
            window_days: 1,
            stale_after_secs: 24 * 60 * 60,
            storage: StorageSettings::default(),
            backend: BackendSettings::default(),
            api: None,
        }
    }
}

/// Where job records live.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorageSettings {
    /// In-memory, lost on restart.
    #[default]
    Memory,
    /// SQLite database file.
    Sqlite { path: PathBuf },
}

/// How statements are executed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendSettings {
    /// Log statements without executing them.
    #[default]
    DryRun,
    /// Execute against a MySQL server.
    Mysql {
        url: String,
        #[serde(default = "default_max_connections")]
        max_connections: u32,
    },
}

fn default_max_connections() -> u32 {
    5
}

/// HTTP API binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8565,
        }
    }
}

impl ApiSettings {
    /// `host:port` suitable for binding a listener.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Settings {
    /// Load settings from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse settings from a YAML string.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        // An empty document deserializes to unit, not to a mapping
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let settings: Settings = serde_yaml::from_str(yaml)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "tick_interval_ms must be greater than zero".into(),
            ));
        }
        self.window_policy()?;
        if let BackendSettings::Mysql {
            url,
            max_connections,
        } = &self.backend
        {
            if url.trim().is_empty() {
                return Err(ConfigError::InvalidConfig("backend url is empty".into()));
            }
            if *max_connections == 0 {
                return Err(ConfigError::InvalidConfig(
                    "backend max_connections must be greater than zero".into(),
                ));
            }
        }
        Ok(())
    }

    /// Default window policy for pipelines without an override.
    pub fn window_policy(&self) -> Result<WindowPolicy, ConfigError> {
        WindowPolicy::days(self.window_days)
            .map_err(|e| ConfigError::InvalidConfig(format!("window_days: {}", e)))
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let settings = Settings::parse("").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.storage, StorageSettings::Memory);
        assert_eq!(settings.backend, BackendSettings::DryRun);
        assert!(settings.api.is_none());
    }

    #[test]
    fn test_parse_full_settings() {
        let yaml = r#"
pipelines_dir: /etc/cadence/pipelines
tick_interval_ms: 250
shutdown_timeout_secs: 5
window_days: 2
stale_after_secs: 3600
storage:
  type: sqlite
  path: /var/lib/cadence/jobs.db
backend:
  type: mysql
  url: mysql://etl@db/warehouse
api:
  port: 9000
"#;
        let settings = Settings::parse(yaml).unwrap();

        assert_eq!(settings.pipelines_dir, PathBuf::from("/etc/cadence/pipelines"));
        assert_eq!(settings.tick_interval(), Duration::from_millis(250));
        assert_eq!(settings.shutdown_timeout(), Duration::from_secs(5));
        assert_eq!(settings.stale_after(), Duration::from_secs(3600));
        assert_eq!(settings.window_policy().unwrap().size_days(), 2);
        assert_eq!(
            settings.storage,
            StorageSettings::Sqlite {
                path: PathBuf::from("/var/lib/cadence/jobs.db")
            }
        );
        assert_eq!(
            settings.backend,
            BackendSettings::Mysql {
                url: "mysql://etl@db/warehouse".to_string(),
                max_connections: 5,
            }
        );

        let api = settings.api.unwrap();
        assert_eq!(api.host, "127.0.0.1");
        assert_eq!(api.bind_address(), "127.0.0.1:9000");
    }

    #[test]
    fn test_zero_tick_interval_rejected() {
        let err = Settings::parse("tick_interval_ms: 0").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidConfig(_)));
    }

    #[test]
    fn test_zero_window_days_rejected() {
        let err = Settings::parse("window_days: 0").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidConfig(_)));
    }

    #[test]
    fn test_oversized_window_days_rejected() {
        let err = Settings::parse("window_days: 200000000").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidConfig(ref msg) if msg.contains("maximum")));
    }

    #[test]
    fn test_unknown_storage_type_rejected() {
        let err = Settings::parse("storage:\n  type: postgres\n").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));
    }
}
