use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};

use crate::models::GeneralSettings;

pub const EVENT_SETTINGS_INITIALIZED: &str = "settings://initialized";
pub const EVENT_SETTINGS_CHANGED: &str = "settings://changed";
pub const EVENT_SETTINGS_PERSIST_ERROR: &str = "settings://persist-error";

#[derive(Debug, Clone)]
pub enum SettingsEvent {
    /// The load attempt finished. `restored` is false when defaults stayed in effect.
    Initialized {
        settings: Arc<GeneralSettings>,
        restored: bool,
    },
    Changed {
        settings: Arc<GeneralSettings>,
    },
    /// A queued write failed. The in-memory record is not rolled back.
    PersistFailed {
        seq: u64,
        message: String,
    },
}

impl SettingsEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Initialized { .. } => EVENT_SETTINGS_INITIALIZED,
            Self::Changed { .. } => EVENT_SETTINGS_CHANGED,
            Self::PersistFailed { .. } => EVENT_SETTINGS_PERSIST_ERROR,
        }
    }

    pub fn payload(&self) -> Value {
        let emitted_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        match self {
            Self::Initialized { settings, restored } => json!({
                "settings": &**settings,
                "restored": restored,
                "emittedAt": emitted_at,
            }),
            Self::Changed { settings } => json!({
                "settings": &**settings,
                "emittedAt": emitted_at,
            }),
            Self::PersistFailed { seq, message } => json!({
                "seq": seq,
                "message": message,
                "emittedAt": emitted_at,
            }),
        }
    }
}
