use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::{runtime::Handle, sync::broadcast::error::RecvError, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    config::{init_tracing, RuntimeConfig, StorageBackend},
    error::SettingsError,
    events::SettingsEvent,
    merge::SettingsField,
    models::{GeneralSettings, PetType, SettingUpdate},
    provider::{use_general_setting, GeneralSettingContext, SettingsProvider},
    storage::StorageService,
    store::SettingsStore,
    view::GeneralSettingTab,
};

type SharedCallback = Arc<dyn Fn(&str, &Value) + Send + Sync>;

const SHUTDOWN_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeRequest {
    pub command: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeError {
    pub code: String,
    pub message: String,
}

impl From<SettingsError> for InvokeError {
    fn from(error: SettingsError) -> Self {
        Self {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<InvokeError>,
}

/// JSON command surface over one mounted settings provider.
///
/// Owns its own Tokio runtime so hosts can drive it from plain threads.
/// `invoke_json` must not be called from inside the event callback.
///
/// Dropping flushes pending writes, also when the drop happens on an async
/// worker of some other runtime.
pub struct Runtime {
    config: RuntimeConfig,
    provider: SettingsProvider,
    callback: Arc<Mutex<Option<SharedCallback>>>,
    forwarder: JoinHandle<()>,
    // Taken on drop.
    tokio: Option<tokio::runtime::Runtime>,
}

impl Runtime {
    pub fn new(config_json: &str) -> anyhow::Result<Self> {
        let config = RuntimeConfig::from_json(config_json)?;
        init_tracing(config.log_filter.as_deref());

        let tokio = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("general-settings")
            .enable_all()
            .build()?;

        let storage = match config.storage {
            StorageBackend::File => {
                let data_dir = config.resolved_data_dir();
                info!(data_dir = %data_dir.display(), "using file-backed settings storage");
                StorageService::json_file(data_dir)
            }
            StorageBackend::Memory => StorageService::memory(),
        };

        let callback = Arc::new(Mutex::new(None::<SharedCallback>));
        let (provider, forwarder) = {
            let _entered = tokio.enter();
            let store = SettingsStore::new(storage, config.storage_key.clone());
            // Subscribe before the load starts so the initialized event is not missed.
            let forwarder = tokio.spawn(forward_events(store.subscribe(), Arc::clone(&callback)));
            (SettingsProvider::new(store), forwarder)
        };

        Ok(Self {
            config,
            provider,
            callback,
            forwarder,
            tokio: Some(tokio),
        })
    }

    pub fn set_event_callback<F>(&self, callback: F)
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        let mut guard = self.callback.lock().expect("callback mutex poisoned");
        *guard = Some(Arc::new(callback));
    }

    pub fn clear_event_callback(&self) {
        let mut guard = self.callback.lock().expect("callback mutex poisoned");
        *guard = None;
    }

    pub fn is_initialized(&self) -> bool {
        self.provider.is_initialized()
    }

    /// The current record, once the load has finished.
    pub fn general_settings(&self) -> Result<Arc<GeneralSettings>, SettingsError> {
        Ok(Arc::clone(self.settings_context()?.settings()))
    }

    pub fn set_pet_name(
        &self,
        pet: PetType,
        name: impl Into<String>,
    ) -> Result<Arc<GeneralSettings>, SettingsError> {
        Ok(self.settings_context()?.store().set_pet_name(pet, name))
    }

    /// # Panics
    ///
    /// `wait_initialized` blocks, so it panics when invoked on an async worker.
    pub fn invoke_json(&self, request_json: &str) -> String {
        let parsed = serde_json::from_str::<InvokeRequest>(request_json);
        let response = match parsed {
            Ok(request) => {
                debug!(command = %request.command, "dispatching settings command");
                self.dispatch(request)
            }
            Err(error) => Err(InvokeError {
                code: "invalid_request".to_string(),
                message: format!("invalid request JSON: {error}"),
            }),
        };

        let payload = match response {
            Ok(data) => InvokeResponse {
                ok: true,
                data: Some(data),
                error: None,
            },
            Err(error) => InvokeResponse {
                ok: false,
                data: None,
                error: Some(error),
            },
        };

        serde_json::to_string(&payload).unwrap_or_else(|_| {
            r#"{"ok":false,"error":{"code":"serialization_failure","message":"failed to serialize response"}}"#
                .to_string()
        })
    }

    fn dispatch(&self, request: InvokeRequest) -> Result<Value, InvokeError> {
        match request.command.as_str() {
            "is_initialized" => Ok(json!(self.provider.is_initialized())),
            "wait_initialized" => self.wait_initialized(),
            "get_general_settings" => {
                let ctx = self.context()?;
                to_json(&**ctx.settings())
            }
            "get_general_tab" => match self.provider.render(GeneralSettingTab::render) {
                None => Ok(Value::Null),
                Some(view) => to_json(&view?),
            },
            "update_setting" => self.update_setting(request.payload),
            "set_enable_pets" => {
                let value = parse_value::<bool>(request.payload)?;
                let ctx = self.context()?;
                to_json(&*ctx.store().set_enable_pets(value))
            }
            "set_analytics_enabled" => {
                let value = parse_value::<bool>(request.payload)?;
                let ctx = self.context()?;
                to_json(&*ctx.store().set_analytics_enabled(value))
            }
            "set_selected_pets" => {
                let value = parse_value::<Vec<PetType>>(request.payload)?;
                let ctx = self.context()?;
                to_json(&*ctx.store().set_selected_pets(value))
            }
            "set_timezone" => {
                let value = parse_value::<String>(request.payload)?;
                let ctx = self.context()?;
                to_json(&*ctx.store().set_timezone(value))
            }
            "set_pet_name" => self.set_pet_name_command(request.payload),
            _ => Err(InvokeError {
                code: "unknown_command".to_string(),
                message: format!("unsupported command: {}", request.command),
            }),
        }
    }

    fn context(&self) -> Result<GeneralSettingContext, InvokeError> {
        Ok(self.settings_context()?)
    }

    fn settings_context(&self) -> Result<GeneralSettingContext, SettingsError> {
        match self.provider.render(use_general_setting) {
            Some(ctx) => ctx,
            None => Err(SettingsError::NotInitialized),
        }
    }

    fn wait_initialized(&self) -> Result<Value, InvokeError> {
        let timeout = Duration::from_millis(self.config.init_timeout_ms);
        let provider = self.provider.clone();
        let Some(runtime) = self.tokio.as_ref() else {
            return Err(SettingsError::NotInitialized.into());
        };
        runtime
            .block_on(async move { tokio::time::timeout(timeout, provider.initialized()).await })
            .map_err(|_| InvokeError {
                code: "not_initialized".to_string(),
                message: format!("settings did not load within {}ms", timeout.as_millis()),
            })?;
        Ok(json!(true))
    }

    fn update_setting(&self, payload: Value) -> Result<Value, InvokeError> {
        if payload.get("key").and_then(Value::as_str) == Some(SettingsField::PetNames.key()) {
            return Err(SettingsError::UnsupportedField(SettingsField::PetNames.key().to_string()).into());
        }

        let update = serde_json::from_value::<SettingUpdate>(payload).map_err(invalid_payload)?;
        let ctx = self.context()?;
        to_json(&*ctx.store().update_setting(update))
    }

    fn set_pet_name_command(&self, payload: Value) -> Result<Value, InvokeError> {
        #[derive(Deserialize)]
        struct Input {
            pet: PetType,
            value: String,
        }

        let input = serde_json::from_value::<Input>(payload).map_err(invalid_payload)?;
        to_json(&*self.set_pet_name(input.pet, input.value)?)
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        let Some(runtime) = self.tokio.take() else {
            return;
        };
        let store = self.provider.store().clone();
        let flush = || {
            runtime
                .block_on(async move {
                    tokio::time::timeout(SHUTDOWN_FLUSH_TIMEOUT, store.flush()).await
                })
                .is_ok()
        };

        // Async workers may not block_on, so flush from a plain thread there.
        let in_async_context = Handle::try_current().is_ok();
        let flushed = if in_async_context {
            std::thread::scope(|scope| scope.spawn(flush).join().unwrap_or(false))
        } else {
            flush()
        };
        if !flushed {
            warn!("pending settings writes did not finish before shutdown");
        }
        self.forwarder.abort();

        if in_async_context {
            runtime.shutdown_background();
        }
    }
}

async fn forward_events(
    mut events: tokio::sync::broadcast::Receiver<SettingsEvent>,
    callback: Arc<Mutex<Option<SharedCallback>>>,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "settings event forwarder lagged");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        let callback = {
            let guard = callback.lock().expect("callback mutex poisoned");
            guard.clone()
        };
        if let Some(callback) = callback {
            let event_payload = json!({
                "event": event.name(),
                "payload": event.payload(),
            });
            callback(event.name(), &event_payload);
        }
    }
}

fn parse_value<T: DeserializeOwned>(payload: Value) -> Result<T, InvokeError> {
    #[derive(Deserialize)]
    struct Input<T> {
        value: T,
    }

    serde_json::from_value::<Input<T>>(payload)
        .map(|input| input.value)
        .map_err(invalid_payload)
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<Value, InvokeError> {
    serde_json::to_value(value).map_err(|error| InvokeError {
        code: "serialization_failure".to_string(),
        message: error.to_string(),
    })
}

fn invalid_payload(error: serde_json::Error) -> InvokeError {
    InvokeError {
        code: "invalid_payload".to_string(),
        message: error.to_string(),
    }
}
