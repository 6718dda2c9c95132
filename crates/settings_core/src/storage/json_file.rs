use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use tokio::{fs, sync::Mutex};
use tracing::{debug, warn};

use super::{
    schema::{PersistedState, CURRENT_SCHEMA_VERSION, STATE_FILE_NAME},
    SettingsStorage,
};

/// All keys live in one JSON document, rewritten atomically on every set.
#[derive(Clone)]
pub struct JsonFileStorage {
    db_path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl JsonFileStorage {
    pub fn new(base_dir: PathBuf) -> Self {
        Self {
            db_path: base_dir.join(STATE_FILE_NAME),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    pub fn corrupt_path(&self) -> PathBuf {
        let mut name = self.db_path.as_os_str().to_os_string();
        name.push(".corrupt");
        PathBuf::from(name)
    }

    /// Missing and blank files both read as `None`.
    async fn read_raw(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.db_path).await {
            Ok(raw) if raw.trim().is_empty() => Ok(None),
            Ok(raw) => Ok(Some(raw)),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
            Err(error) => {
                Err(error).with_context(|| format!("failed to read {}", self.db_path.display()))
            }
        }
    }

    async fn read_state(&self) -> Result<PersistedState> {
        let Some(raw) = self.read_raw().await? else {
            return Ok(PersistedState::default());
        };

        serde_json::from_str(&raw).with_context(|| {
            format!(
                "failed to deserialize settings state from {}",
                self.db_path.display()
            )
        })
    }

    /// Like [`Self::read_state`], but an unparseable document is moved aside
    /// and replaced by an empty state. I/O errors still fail.
    async fn read_state_for_write(&self) -> Result<PersistedState> {
        let Some(raw) = self.read_raw().await? else {
            return Ok(PersistedState::default());
        };

        match serde_json::from_str(&raw) {
            Ok(state) => Ok(state),
            Err(error) => {
                let corrupt_path = self.corrupt_path();
                warn!(
                    path = %self.db_path.display(),
                    moved_to = %corrupt_path.display(),
                    error = %error,
                    "settings state is unreadable; starting a fresh document"
                );
                fs::rename(&self.db_path, &corrupt_path).await.with_context(|| {
                    format!(
                        "failed to move {} to {}",
                        self.db_path.display(),
                        corrupt_path.display()
                    )
                })?;
                Ok(PersistedState::default())
            }
        }
    }

    async fn write_state(&self, state: &PersistedState) -> Result<()> {
        self.ensure_parent_dir().await?;
        let tmp_path = self.db_path.with_extension("tmp");

        let serialized = serde_json::to_string_pretty(state)?;
        fs::write(&tmp_path, serialized)
            .await
            .with_context(|| format!("failed to write {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.db_path).await.with_context(|| {
            format!(
                "failed to atomically move {} to {}",
                tmp_path.display(),
                self.db_path.display()
            )
        })?;

        Ok(())
    }

    async fn ensure_parent_dir(&self) -> Result<()> {
        if let Some(parent) = self.db_path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        Ok(())
    }
}

#[async_trait]
impl SettingsStorage for JsonFileStorage {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.read_state().await?.entries.remove(key))
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut state = self.read_state_for_write().await?;
        if state.schema_version < CURRENT_SCHEMA_VERSION {
            debug!(
                from = state.schema_version,
                to = CURRENT_SCHEMA_VERSION,
                "bumping settings state schema version"
            );
            state.schema_version = CURRENT_SCHEMA_VERSION;
        }
        state.entries.insert(key.to_string(), value);
        state.updated_at = Some(now_iso());

        self.write_state(&state).await
    }
}

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
