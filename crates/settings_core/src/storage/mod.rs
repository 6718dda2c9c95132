use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

pub mod json_file;
pub mod memory;
pub mod schema;

use json_file::JsonFileStorage;
use memory::MemoryStorage;

/// Async key-value backend the settings store persists into.
///
/// Values are whole JSON documents; the store never writes partial records.
#[async_trait]
pub trait SettingsStorage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    async fn set(&self, key: &str, value: Value) -> Result<()>;
}

#[derive(Clone)]
pub struct StorageService {
    backend: Arc<dyn SettingsStorage>,
}

impl StorageService {
    pub fn new(backend: Arc<dyn SettingsStorage>) -> Self {
        Self { backend }
    }

    pub fn json_file(base_dir: PathBuf) -> Self {
        Self::new(Arc::new(JsonFileStorage::new(base_dir)))
    }

    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()))
    }

    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.backend.get(key).await
    }

    pub async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.backend.set(key, value).await
    }
}

impl<S> From<Arc<S>> for StorageService
where
    S: SettingsStorage + 'static,
{
    fn from(backend: Arc<S>) -> Self {
        Self::new(backend)
    }
}
