use std::{ops::Deref, sync::Arc};

use crate::{
    error::SettingsError,
    models::{GeneralSettings, PetType, SettingUpdate},
    storage::StorageService,
    store::SettingsStore,
};

/// Owns a settings store and gates its consumers on initialization.
#[derive(Clone)]
pub struct SettingsProvider {
    store: SettingsStore,
}

impl SettingsProvider {
    /// Builds a store over `storage` and kicks off its one-time load.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a Tokio runtime.
    pub fn mount(storage: StorageService, storage_key: impl Into<String>) -> Self {
        Self::new(SettingsStore::new(storage, storage_key))
    }

    /// Wraps an existing store and starts its load in the background.
    pub fn new(store: SettingsStore) -> Self {
        let loader = store.clone();
        tokio::spawn(async move { loader.initialize().await });
        Self { store }
    }

    pub fn store(&self) -> &SettingsStore {
        &self.store
    }

    pub fn is_initialized(&self) -> bool {
        self.store.is_initialized()
    }

    pub async fn initialized(&self) {
        self.store.wait_initialized().await
    }

    /// Runs `children` inside this provider's scope, or renders nothing
    /// (`None`) while the initial load is still pending.
    pub fn render<T>(&self, children: impl FnOnce(&SettingsScope) -> T) -> Option<T> {
        if !self.store.is_initialized() {
            return None;
        }

        let scope = SettingsScope {
            store: Some(self.store.clone()),
        };
        Some(children(&scope))
    }
}

/// What a consumer can see of the provider tree it is rendered in.
#[derive(Clone, Default)]
pub struct SettingsScope {
    store: Option<SettingsStore>,
}

impl SettingsScope {
    /// A scope with no provider above it.
    pub fn root() -> Self {
        Self::default()
    }
}

pub fn use_general_setting(scope: &SettingsScope) -> Result<GeneralSettingContext, SettingsError> {
    let store = scope.store.as_ref().ok_or(SettingsError::OutsideProvider)?;
    Ok(GeneralSettingContext {
        settings: store.snapshot(),
        store: store.clone(),
    })
}

/// Current record plus the setters, as handed to consumers.
///
/// The record is the one current at lookup time; call
/// [`use_general_setting`] again after a change to see it.
#[derive(Clone)]
pub struct GeneralSettingContext {
    settings: Arc<GeneralSettings>,
    store: SettingsStore,
}

impl GeneralSettingContext {
    pub fn settings(&self) -> &Arc<GeneralSettings> {
        &self.settings
    }

    pub fn update_setting(&self, update: SettingUpdate) {
        self.store.update_setting(update);
    }

    pub fn set_enable_pets(&self, value: bool) {
        self.store.set_enable_pets(value);
    }

    pub fn set_analytics_enabled(&self, value: bool) {
        self.store.set_analytics_enabled(value);
    }

    pub fn set_pet_name(&self, pet: PetType, value: impl Into<String>) {
        self.store.set_pet_name(pet, value);
    }

    pub fn set_selected_pets(&self, pets: Vec<PetType>) {
        self.store.set_selected_pets(pets);
    }

    pub fn set_timezone(&self, value: impl Into<String>) {
        self.store.set_timezone(value);
    }

    pub(crate) fn store(&self) -> &SettingsStore {
        &self.store
    }
}

impl Deref for GeneralSettingContext {
    type Target = GeneralSettings;

    fn deref(&self) -> &Self::Target {
        &self.settings
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::{json, Value};
    use tokio::sync::Notify;

    use super::*;
    use crate::storage::SettingsStorage;

    struct GatedStorage {
        gate: Notify,
    }

    #[async_trait]
    impl SettingsStorage for GatedStorage {
        async fn get(&self, _key: &str) -> anyhow::Result<Option<Value>> {
            self.gate.notified().await;
            Ok(Some(json!({ "analyticsEnabled": false })))
        }

        async fn set(&self, _key: &str, _value: Value) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn lookup_outside_provider_fails() {
        let result = use_general_setting(&SettingsScope::root());
        assert_eq!(result.err(), Some(SettingsError::OutsideProvider));
    }

    #[tokio::test]
    async fn render_is_suppressed_until_loaded() {
        let storage = Arc::new(GatedStorage {
            gate: Notify::new(),
        });
        let provider = SettingsProvider::mount(StorageService::from(Arc::clone(&storage)), "generalSettings");

        tokio::task::yield_now().await;
        assert!(provider.render(|_| ()).is_none());

        storage.gate.notify_one();
        provider.initialized().await;

        let analytics = provider
            .render(|scope| use_general_setting(scope).map(|ctx| ctx.analytics_enabled))
            .expect("provider renders once initialized")
            .unwrap();
        assert!(!analytics);
    }

    #[tokio::test]
    async fn context_setters_reach_the_store() {
        let provider = SettingsProvider::mount(StorageService::memory(), "generalSettings");
        provider.initialized().await;

        let ctx = provider
            .render(|scope| use_general_setting(scope))
            .unwrap()
            .unwrap();
        ctx.set_selected_pets(vec![PetType::Dog, PetType::Cat]);
        ctx.set_pet_name(PetType::Cat, "Gorbe");
        ctx.update_setting(SettingUpdate::Timezone("Europe/Paris".to_string()));

        // The old context keeps the record it was handed.
        assert_eq!(ctx.selected_pets, vec![PetType::Dog]);

        let fresh = provider
            .render(|scope| use_general_setting(scope))
            .unwrap()
            .unwrap();
        assert_eq!(fresh.selected_pets, vec![PetType::Dog, PetType::Cat]);
        assert_eq!(fresh.pet_names.cat, "Gorbe");
        assert_eq!(fresh.pet_names.dog, "آکیتا");
        assert_eq!(fresh.timezone, "Europe/Paris");
    }
}
