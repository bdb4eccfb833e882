use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
    pub db_file_name: String,
    pub blob_dir_name: String,
    /// Hex-encoded 32-byte store key. Defaults to `<data_dir>/.store_key`,
    /// generated on first open.
    pub key_file: Option<PathBuf>,
    /// Settling delay before the startup recovery pass is started.
    pub recovery_delay_ms: u64,
    pub worker_threads: usize,
    pub retention: RetentionConfig,
}

/// Global retention defaults, overridden per discussion by
/// `discussion_customization` rows.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub max_messages_per_discussion: Option<u32>,
    pub max_message_age_secs: Option<u64>,
}

impl StoreConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: StoreConfig =
            toml::from_str(&raw).map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.db_file_name.trim().is_empty() {
            return Err(Error::Config("db_file_name cannot be empty".to_string()));
        }
        if self.blob_dir_name.trim().is_empty() {
            return Err(Error::Config("blob_dir_name cannot be empty".to_string()));
        }
        if self.worker_threads == 0 {
            return Err(Error::Config("worker_threads must be at least 1".to_string()));
        }
        Ok(())
    }

    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(&self.db_file_name)
    }

    #[must_use]
    pub fn blob_dir(&self) -> PathBuf {
        self.data_dir.join(&self.blob_dir_name)
    }

    #[must_use]
    pub fn key_path(&self) -> PathBuf {
        self.key_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join(".store_key"))
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            db_file_name: "app_database".to_string(),
            blob_dir_name: "fyles".to_string(),
            key_file: None,
            recovery_delay_ms: 1500,
            worker_threads: 2,
            retention: RetentionConfig::default(),
        }
    }
}
