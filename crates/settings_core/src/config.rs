use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crate::store::GENERAL_SETTINGS_KEY;

const DEFAULT_LOG_FILTER: &str = "settings_core=info";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    File,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    #[serde(default)]
    pub data_dir: Option<String>,
    #[serde(default)]
    pub storage: StorageBackend,
    #[serde(default = "default_storage_key")]
    pub storage_key: String,
    #[serde(default)]
    pub log_filter: Option<String>,
    /// Upper bound for `wait_initialized`, in milliseconds.
    #[serde(default = "default_init_timeout_ms")]
    pub init_timeout_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            storage: StorageBackend::default(),
            storage_key: default_storage_key(),
            log_filter: None,
            init_timeout_ms: default_init_timeout_ms(),
        }
    }
}

impl RuntimeConfig {
    /// Parses a host-supplied config. Blank input means all defaults.
    pub fn from_json(config_json: &str) -> Result<Self> {
        if config_json.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(config_json).context("invalid runtime config JSON")
    }

    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(resolve_data_dir)
    }
}

fn default_storage_key() -> String {
    GENERAL_SETTINGS_KEY.to_string()
}

fn default_init_timeout_ms() -> u64 {
    10_000
}

pub fn resolve_data_dir() -> PathBuf {
    if let Some(dir) = dirs::data_local_dir() {
        return dir.join("general-settings");
    }

    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".general-settings")
}

/// Installs the global fmt subscriber unless the host already set one.
///
/// Filter precedence: explicit `filter`, then `RUST_LOG`, then the crate default.
pub fn init_tracing(filter: Option<&str>) {
    let filter = match filter {
        Some(directives) => EnvFilter::try_new(directives)
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
