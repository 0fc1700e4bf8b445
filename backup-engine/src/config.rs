//! Configuration management for the backup engine.
//!
//! Loads configuration from TOML file with environment variable overrides.

use crate::store::paths::normalize_path;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub store: StoreConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Root of the main backup store
    pub main_root: PathBuf,

    /// Root of the emergency store (snapshots taken before restores)
    pub emergency_root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Maximum number of versions kept per original path
    #[serde(default = "default_max_versions")]
    pub max_versions: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_max_versions() -> usize {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_versions: default_max_versions(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .map(|dir| dir.join("backup-engine"))
            .unwrap_or_else(|| PathBuf::from(".backup-engine"));

        Self::with_roots(data_dir.join("backups"), data_dir.join("emergency"))
    }
}

impl Config {
    /// Default configuration rooted at explicit store directories
    pub fn with_roots(main_root: impl Into<PathBuf>, emergency_root: impl Into<PathBuf>) -> Self {
        Config {
            store: StoreConfig {
                main_root: main_root.into(),
                emergency_root: emergency_root.into(),
            },
            retention: RetentionConfig::default(),
            log: LogConfig::default(),
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Apply `BACKUP_ENGINE_*` environment overrides
    pub fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup("BACKUP_ENGINE_MAIN_ROOT") {
            self.store.main_root = PathBuf::from(root);
        }
        if let Some(root) = lookup("BACKUP_ENGINE_EMERGENCY_ROOT") {
            self.store.emergency_root = PathBuf::from(root);
        }
        if let Some(value) = lookup("BACKUP_ENGINE_MAX_VERSIONS") {
            self.retention.max_versions = value.parse().map_err(|_| {
                anyhow::anyhow!("Invalid BACKUP_ENGINE_MAX_VERSIONS: {value}")
            })?;
        }
        if let Some(level) = lookup("BACKUP_ENGINE_LOG_LEVEL") {
            self.log.level = level;
        }
        Ok(())
    }

    /// Check invariants the engine relies on for its whole lifetime
    pub fn validate(&self) -> crate::Result<()> {
        if self.retention.max_versions == 0 {
            return Err(crate::EngineError::Config(
                "retention.max_versions must be at least 1".to_string(),
            ));
        }
        let main = normalize_path(&self.store.main_root)?;
        let emergency = normalize_path(&self.store.emergency_root)?;
        if main.starts_with(&emergency) || emergency.starts_with(&main) {
            return Err(crate::EngineError::Config(format!(
                "main and emergency store roots must be disjoint ({} vs {})",
                main.display(),
                emergency.display()
            )));
        }
        Ok(())
    }
}
