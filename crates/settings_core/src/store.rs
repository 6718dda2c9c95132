//! The settings store: single owner of the in-memory record.
//!
//! Setters swap in a new record synchronously and hand the full record to a
//! single writer task, so persisted state always ends on the last issued
//! write. Write failures are reported as [`SettingsEvent::PersistFailed`] and
//! are not retried.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use crate::{
    events::SettingsEvent,
    merge::{apply_pet_name, apply_update, merge_persisted},
    models::{GeneralSettings, PetType, SettingUpdate},
    storage::StorageService,
};

pub const GENERAL_SETTINGS_KEY: &str = "generalSettings";

const EVENT_CAPACITY: usize = 64;

struct PersistJob {
    seq: u64,
    record: Arc<GeneralSettings>,
}

struct StoreState {
    record: Arc<GeneralSettings>,
    issued_writes: u64,
}

struct StoreInner {
    storage: StorageService,
    storage_key: String,
    state: Mutex<StoreState>,
    load_started: AtomicBool,
    initialized: watch::Sender<bool>,
    persisted: watch::Receiver<u64>,
    writes: mpsc::UnboundedSender<PersistJob>,
    events: broadcast::Sender<SettingsEvent>,
}

/// Cheap, cloneable handle to one settings store.
#[derive(Clone)]
pub struct SettingsStore {
    inner: Arc<StoreInner>,
}

impl SettingsStore {
    /// Creates a store holding the defaults and starts its writer task.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a Tokio runtime.
    pub fn new(storage: StorageService, storage_key: impl Into<String>) -> Self {
        let storage_key = storage_key.into();
        let (writes, queue) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (initialized, _) = watch::channel(false);
        let (persisted_tx, persisted) = watch::channel(0);

        tokio::spawn(run_persist_queue(
            storage.clone(),
            storage_key.clone(),
            queue,
            persisted_tx,
            events.clone(),
        ));

        Self {
            inner: Arc::new(StoreInner {
                storage,
                storage_key,
                state: Mutex::new(StoreState {
                    record: Arc::new(GeneralSettings::default()),
                    issued_writes: 0,
                }),
                load_started: AtomicBool::new(false),
                initialized,
                persisted,
                writes,
                events,
            }),
        }
    }

    pub fn storage_key(&self) -> &str {
        &self.inner.storage_key
    }

    /// Loads the persisted record and overlays it on the defaults.
    ///
    /// Only the first call does anything. The initialized flag is raised once
    /// the attempt ends, whether the load succeeded or not.
    pub async fn initialize(&self) {
        if self.inner.load_started.swap(true, Ordering::AcqRel) {
            debug!("general settings load already attempted");
            return;
        }

        let restored = {
            let _flag = InitializedOnExit(&self.inner.initialized);
            match self.load().await {
                Ok(Some(record)) => {
                    self.state().record = Arc::new(record);
                    info!(key = %self.inner.storage_key, "restored general settings");
                    true
                }
                Ok(None) => {
                    debug!(key = %self.inner.storage_key, "no persisted general settings; using defaults");
                    false
                }
                Err(error) => {
                    let message = format!("{error:#}");
                    warn!(error = %message, "failed to load general settings; using defaults");
                    false
                }
            }
        };

        self.emit(SettingsEvent::Initialized {
            settings: self.snapshot(),
            restored,
        });
    }

    pub fn is_initialized(&self) -> bool {
        *self.inner.initialized.borrow()
    }

    pub async fn wait_initialized(&self) {
        let mut ready = self.inner.initialized.subscribe();
        let _ = ready.wait_for(|initialized| *initialized).await;
    }

    pub fn snapshot(&self) -> Arc<GeneralSettings> {
        Arc::clone(&self.state().record)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SettingsEvent> {
        self.inner.events.subscribe()
    }

    pub fn update_setting(&self, update: SettingUpdate) -> Arc<GeneralSettings> {
        debug!(field = update.field().key(), "updating general setting");
        self.commit(|current| apply_update(current, update))
    }

    pub fn set_pet_name(&self, pet: PetType, value: impl Into<String>) -> Arc<GeneralSettings> {
        let value = value.into();
        debug!(pet = pet.as_key(), "updating pet name");
        self.commit(|current| apply_pet_name(current, pet, value))
    }

    pub fn set_enable_pets(&self, value: bool) -> Arc<GeneralSettings> {
        self.update_setting(SettingUpdate::EnablePets(value))
    }

    pub fn set_analytics_enabled(&self, value: bool) -> Arc<GeneralSettings> {
        self.update_setting(SettingUpdate::AnalyticsEnabled(value))
    }

    pub fn set_selected_pets(&self, pets: Vec<PetType>) -> Arc<GeneralSettings> {
        self.update_setting(SettingUpdate::SelectedPets(pets))
    }

    pub fn set_timezone(&self, value: impl Into<String>) -> Arc<GeneralSettings> {
        self.update_setting(SettingUpdate::Timezone(value.into()))
    }

    /// Waits until every write issued so far has been attempted.
    pub async fn flush(&self) {
        let target = self.state().issued_writes;
        let mut persisted = self.inner.persisted.clone();
        let _ = persisted.wait_for(|done| *done >= target).await;
    }

    async fn load(&self) -> Result<Option<GeneralSettings>> {
        let stored = self
            .inner
            .storage
            .get(&self.inner.storage_key)
            .await
            .with_context(|| format!("failed to read `{}` from storage", self.inner.storage_key))?;

        match stored {
            None | Some(Value::Null) => Ok(None),
            Some(value) => merge_persisted(&GeneralSettings::default(), &value)
                .map(Some)
                .context("persisted general settings are malformed"),
        }
    }

    fn commit(&self, change: impl FnOnce(&GeneralSettings) -> GeneralSettings) -> Arc<GeneralSettings> {
        let mut state = self.state();
        let next = Arc::new(change(&state.record));
        state.record = Arc::clone(&next);
        state.issued_writes += 1;

        // Enqueue and emit under the lock so both follow commit order.
        let job = PersistJob {
            seq: state.issued_writes,
            record: Arc::clone(&next),
        };
        if self.inner.writes.send(job).is_err() {
            warn!("settings writer has stopped; change kept in memory only");
        }
        self.emit(SettingsEvent::Changed {
            settings: Arc::clone(&next),
        });
        next
    }

    fn state(&self) -> std::sync::MutexGuard<'_, StoreState> {
        self.inner
            .state
            .lock()
            .expect("settings state mutex poisoned")
    }

    fn emit(&self, event: SettingsEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }
}

struct InitializedOnExit<'a>(&'a watch::Sender<bool>);

impl Drop for InitializedOnExit<'_> {
    fn drop(&mut self) {
        self.0.send_replace(true);
    }
}

async fn run_persist_queue(
    storage: StorageService,
    storage_key: String,
    mut queue: mpsc::UnboundedReceiver<PersistJob>,
    persisted: watch::Sender<u64>,
    events: broadcast::Sender<SettingsEvent>,
) {
    while let Some(job) = queue.recv().await {
        let outcome = match serde_json::to_value(&*job.record) {
            Ok(value) => storage
                .set(&storage_key, value)
                .await
                .with_context(|| format!("failed to write `{storage_key}` to storage")),
            Err(error) => Err(anyhow::Error::new(error).context("failed to encode general settings")),
        };

        match outcome {
            Ok(()) => debug!(seq = job.seq, "persisted general settings"),
            Err(error) => {
                let message = format!("{error:#}");
                warn!(seq = job.seq, error = %message, "failed to persist general settings");
                let _ = events.send(SettingsEvent::PersistFailed {
                    seq: job.seq,
                    message,
                });
            }
        }

        persisted.send_replace(job.seq);
    }

    debug!("settings writer stopped");
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::AtomicUsize,
        time::Duration,
    };

    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::Notify;

    use super::*;
    use crate::{
        models::PetNames,
        storage::{memory::MemoryStorage, SettingsStorage},
    };

    // Records every write and can be told to fail reads or writes.
    #[derive(Default)]
    struct MockStorage {
        stored: Option<Value>,
        fail_get: bool,
        fail_set: bool,
        gets: AtomicUsize,
        writes: Mutex<Vec<Value>>,
    }

    #[async_trait]
    impl SettingsStorage for MockStorage {
        async fn get(&self, _key: &str) -> anyhow::Result<Option<Value>> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            if self.fail_get {
                anyhow::bail!("storage unavailable");
            }
            Ok(self.stored.clone())
        }

        async fn set(&self, _key: &str, value: Value) -> anyhow::Result<()> {
            self.writes.lock().unwrap().push(value);
            if self.fail_set {
                anyhow::bail!("disk full");
            }
            Ok(())
        }
    }

    // Each write sleeps for the delay in its `timezone` field (ms).
    #[derive(Default)]
    struct SlowStorage {
        completed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SettingsStorage for SlowStorage {
        async fn get(&self, _key: &str) -> anyhow::Result<Option<Value>> {
            Ok(None)
        }

        async fn set(&self, _key: &str, value: Value) -> anyhow::Result<()> {
            let timezone = value["timezone"].as_str().unwrap_or_default().to_string();
            let delay = timezone.rsplit('/').next().unwrap_or("0").parse().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.completed.lock().unwrap().push(timezone);
            Ok(())
        }
    }

    struct GatedStorage {
        gate: Notify,
    }

    #[async_trait]
    impl SettingsStorage for GatedStorage {
        async fn get(&self, _key: &str) -> anyhow::Result<Option<Value>> {
            self.gate.notified().await;
            Ok(Some(json!({ "enablePets": false })))
        }

        async fn set(&self, _key: &str, _value: Value) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn store_with(storage: Arc<MockStorage>) -> SettingsStore {
        SettingsStore::new(StorageService::from(storage), GENERAL_SETTINGS_KEY)
    }

    #[tokio::test]
    async fn initialize_overlays_persisted_timezone() {
        let storage = Arc::new(MockStorage {
            stored: Some(json!({ "timezone": "Europe/Berlin" })),
            ..Default::default()
        });
        let store = store_with(storage);

        store.initialize().await;

        assert!(store.is_initialized());
        assert_eq!(
            *store.snapshot(),
            GeneralSettings {
                timezone: "Europe/Berlin".to_string(),
                ..GeneralSettings::default()
            }
        );
    }

    #[tokio::test]
    async fn initialize_keeps_defaults_when_get_fails() {
        let storage = Arc::new(MockStorage {
            fail_get: true,
            ..Default::default()
        });
        let store = store_with(storage);
        assert!(!store.is_initialized());

        store.initialize().await;

        assert!(store.is_initialized());
        assert_eq!(*store.snapshot(), GeneralSettings::default());
    }

    #[tokio::test]
    async fn initialize_keeps_defaults_for_malformed_record() {
        let storage = Arc::new(MockStorage {
            stored: Some(json!("not a record")),
            ..Default::default()
        });
        let store = store_with(storage);

        store.initialize().await;

        assert!(store.is_initialized());
        assert_eq!(*store.snapshot(), GeneralSettings::default());
    }

    #[tokio::test]
    async fn initialize_treats_null_as_nothing_persisted() {
        let storage = Arc::new(MockStorage {
            stored: Some(Value::Null),
            ..Default::default()
        });
        let store = store_with(storage);
        let mut events = store.subscribe();

        store.initialize().await;

        match events.recv().await.unwrap() {
            SettingsEvent::Initialized { settings, restored } => {
                assert!(!restored);
                assert_eq!(*settings, GeneralSettings::default());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn initialize_runs_once() {
        let storage = Arc::new(MockStorage::default());
        let store = store_with(Arc::clone(&storage));

        store.initialize().await;
        store.initialize().await;
        store.clone().initialize().await;

        assert_eq!(storage.gets.load(Ordering::SeqCst), 1);
        assert!(store.is_initialized());
    }

    #[tokio::test]
    async fn flag_stays_down_until_load_completes() {
        let storage = Arc::new(GatedStorage {
            gate: Notify::new(),
        });
        let store = SettingsStore::new(StorageService::from(Arc::clone(&storage)), GENERAL_SETTINGS_KEY);
        let loader = store.clone();
        let load = tokio::spawn(async move { loader.initialize().await });

        tokio::task::yield_now().await;
        assert!(!store.is_initialized());

        storage.gate.notify_one();
        load.await.unwrap();
        store.wait_initialized().await;

        assert!(store.is_initialized());
        assert!(!store.snapshot().enable_pets);
    }

    #[tokio::test]
    async fn every_setter_writes_the_full_record() {
        let storage = Arc::new(MockStorage::default());
        let store = store_with(Arc::clone(&storage));
        store.initialize().await;

        store.set_selected_pets(vec![PetType::Dog, PetType::Cat]);
        store.set_pet_name(PetType::Cat, "Gorbe");
        store.flush().await;

        let final_record = store.snapshot();
        assert_eq!(final_record.selected_pets, vec![PetType::Dog, PetType::Cat]);
        assert_eq!(
            final_record.pet_names,
            PetNames {
                dog: "آکیتا".to_string(),
                cat: "Gorbe".to_string(),
            }
        );

        let writes = storage.writes.lock().unwrap().clone();
        assert_eq!(writes.len(), 2);
        assert_eq!(
            writes[0],
            serde_json::to_value(GeneralSettings {
                selected_pets: vec![PetType::Dog, PetType::Cat],
                ..GeneralSettings::default()
            })
            .unwrap()
        );
        assert_eq!(writes[1], serde_json::to_value(&*final_record).unwrap());
    }

    #[tokio::test]
    async fn setters_never_mutate_previous_snapshot() {
        let store = SettingsStore::new(StorageService::memory(), GENERAL_SETTINGS_KEY);
        store.initialize().await;

        let before = store.snapshot();
        let after = store.set_timezone("America/New_York");

        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(*before, GeneralSettings::default());
        assert_eq!(after.timezone, "America/New_York");

        let renamed = store.set_pet_name(PetType::Dog, "Hachiko");
        assert!(!Arc::ptr_eq(&after, &renamed));
        assert_eq!(after.pet_names.dog, "آکیتا");
        assert_eq!(renamed.pet_names.cat, after.pet_names.cat);
    }

    #[tokio::test]
    async fn wrappers_target_their_fields() {
        let store = SettingsStore::new(StorageService::memory(), GENERAL_SETTINGS_KEY);

        store.set_enable_pets(false);
        store.set_analytics_enabled(false);
        store.set_timezone("UTC");

        let record = store.snapshot();
        assert!(!record.enable_pets);
        assert!(!record.analytics_enabled);
        assert_eq!(record.timezone, "UTC");
        assert_eq!(record.selected_pets, vec![PetType::Dog]);
    }

    #[tokio::test]
    async fn write_failure_is_reported_and_memory_kept() {
        let storage = Arc::new(MockStorage {
            fail_set: true,
            ..Default::default()
        });
        let store = store_with(storage);
        store.initialize().await;
        let mut events = store.subscribe();

        store.set_analytics_enabled(false);
        store.flush().await;

        assert!(!store.snapshot().analytics_enabled);
        assert!(matches!(
            events.recv().await.unwrap(),
            SettingsEvent::Changed { .. }
        ));
        match events.recv().await.unwrap() {
            SettingsEvent::PersistFailed { seq, message } => {
                assert_eq!(seq, 1);
                assert!(message.contains("disk full"), "{message}");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn last_issued_write_wins_against_slow_backend() {
        let storage = Arc::new(SlowStorage::default());
        let store = SettingsStore::new(StorageService::from(Arc::clone(&storage)), GENERAL_SETTINGS_KEY);

        // The first write is slower than the second one.
        store.set_timezone("Slow/60");
        store.set_timezone("Fast/0");
        store.flush().await;

        let completed = storage.completed.lock().unwrap().clone();
        assert_eq!(completed, vec!["Slow/60".to_string(), "Fast/0".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn change_events_follow_commit_order() {
        let store = SettingsStore::new(StorageService::memory(), GENERAL_SETTINGS_KEY);
        let mut events = store.subscribe();

        let writers: Vec<_> = (0..4)
            .map(|thread| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for step in 0..10 {
                        store.set_timezone(format!("Zone/{thread}-{step}"));
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let mut last = None;
        for _ in 0..40 {
            match events.recv().await.unwrap() {
                SettingsEvent::Changed { settings } => last = Some(settings),
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert!(Arc::ptr_eq(&last.unwrap(), &store.snapshot()));
    }

    #[tokio::test]
    async fn writes_land_in_storage_under_fixed_key() {
        let backend = Arc::new(MemoryStorage::new());
        let store = SettingsStore::new(StorageService::from(Arc::clone(&backend)), GENERAL_SETTINGS_KEY);

        store.set_timezone("Asia/Dubai");
        store.flush().await;

        assert_eq!(
            backend.entry(GENERAL_SETTINGS_KEY).unwrap()["timezone"],
            json!("Asia/Dubai")
        );
    }
}
