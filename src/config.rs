//! Configuration for the compact block cache

use crate::error::{Result, StoreError};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Default cap on the number of heights a single range request may span.
pub const DEFAULT_MAX_RANGE_SPAN: u32 = 10_000;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    /// How long a connection waits on a locked database file before failing.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_range_span")]
    pub max_range_span: u32,
    /// Number of blocks a range producer may have in flight ahead of its consumer.
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_range_span: default_max_range_span(),
            stream_buffer: default_stream_buffer(),
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<()> {
        if self.database.path.is_empty() {
            return Err(StoreError::Config("database.path must be set".to_string()));
        }
        if self.limits.max_range_span == 0 {
            return Err(StoreError::Config(
                "limits.max_range_span must be at least 1".to_string(),
            ));
        }
        if self.limits.stream_buffer == 0 {
            return Err(StoreError::Config(
                "limits.stream_buffer must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Loads a TOML config file, falling back to defaults when the file is absent.
pub fn load_config(path: impl AsRef<Path>) -> Result<CacheConfig> {
    let path = path.as_ref();
    let config: CacheConfig = if path.exists() {
        let config_str = fs::read_to_string(path)?;
        toml::from_str(&config_str)
            .map_err(|e| StoreError::Config(format!("{}: {}", path.display(), e)))?
    } else {
        CacheConfig::default()
    };

    config.validate()?;
    Ok(config)
}

fn default_db_path() -> String {
    "./data/blocks.sqlite".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_max_range_span() -> u32 {
    DEFAULT_MAX_RANGE_SPAN
}

fn default_stream_buffer() -> usize {
    32
}
