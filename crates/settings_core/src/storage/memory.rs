use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use super::SettingsStorage;

/// Process-local storage. Nothing survives the process.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<Mutex<HashMap<String, Value>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(key: impl Into<String>, value: Value) -> Self {
        let storage = Self::new();
        storage
            .entries
            .lock()
            .expect("memory storage mutex poisoned")
            .insert(key.into(), value);
        storage
    }

    pub fn entry(&self, key: &str) -> Option<Value> {
        self.entries
            .lock()
            .expect("memory storage mutex poisoned")
            .get(key)
            .cloned()
    }
}

#[async_trait]
impl SettingsStorage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entry(key))
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.entries
            .lock()
            .expect("memory storage mutex poisoned")
            .insert(key.to_string(), value);
        Ok(())
    }
}
