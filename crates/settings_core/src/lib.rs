//! General settings: a persisted preferences record for the general tab,
//! its store, and the view that hands it to form widgets.

pub mod config;
pub mod error;
pub mod events;
pub mod merge;
pub mod models;
pub mod provider;
pub mod runtime;
pub mod storage;
pub mod store;
pub mod view;

pub use config::RuntimeConfig;
pub use error::SettingsError;
pub use events::SettingsEvent;
pub use models::{GeneralSettings, PetNames, PetType, SettingUpdate};
pub use provider::{use_general_setting, GeneralSettingContext, SettingsProvider, SettingsScope};
pub use runtime::Runtime;
pub use storage::{SettingsStorage, StorageService};
pub use store::{SettingsStore, GENERAL_SETTINGS_KEY};
pub use view::{GeneralSettingTab, GeneralTabView};
