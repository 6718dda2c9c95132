//! Field-wise merge policy for the general settings record.
//!
//! Every top-level field is listed in [`MERGE_POLICY`] with the strategy used
//! when a partial value is laid over an existing record. The persisted-record
//! overlay on load and the in-memory setters both go through this table.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::models::{GeneralSettings, PetType, SettingUpdate};

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum SettingsField {
    AnalyticsEnabled,
    EnablePets,
    SelectedPets,
    PetNames,
    Timezone,
}

impl SettingsField {
    pub fn key(self) -> &'static str {
        match self {
            Self::AnalyticsEnabled => "analyticsEnabled",
            Self::EnablePets => "enablePets",
            Self::SelectedPets => "selectedPets",
            Self::PetNames => "petNames",
            Self::Timezone => "timezone",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        MERGE_POLICY
            .iter()
            .map(|(field, _)| *field)
            .find(|field| field.key() == key)
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MergeStrategy {
    /// The incoming value replaces the field wholesale.
    Replace,
    /// The incoming object is merged key-by-key into the existing object.
    Nested,
}

pub const MERGE_POLICY: [(SettingsField, MergeStrategy); 5] = [
    (SettingsField::AnalyticsEnabled, MergeStrategy::Replace),
    (SettingsField::EnablePets, MergeStrategy::Replace),
    (SettingsField::SelectedPets, MergeStrategy::Replace),
    (SettingsField::PetNames, MergeStrategy::Nested),
    (SettingsField::Timezone, MergeStrategy::Replace),
];

pub fn strategy_for(field: SettingsField) -> MergeStrategy {
    MERGE_POLICY
        .iter()
        .find(|(candidate, _)| *candidate == field)
        .map(|(_, strategy)| *strategy)
        .unwrap_or(MergeStrategy::Replace)
}

impl SettingUpdate {
    pub fn field(&self) -> SettingsField {
        match self {
            Self::AnalyticsEnabled(_) => SettingsField::AnalyticsEnabled,
            Self::EnablePets(_) => SettingsField::EnablePets,
            Self::SelectedPets(_) => SettingsField::SelectedPets,
            Self::Timezone(_) => SettingsField::Timezone,
        }
    }
}

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("persisted settings must be a JSON object, found {0}")]
    NotAnObject(&'static str),
    #[error("failed to encode settings record")]
    Encode(#[source] serde_json::Error),
    #[error("persisted settings do not fit the settings record")]
    Malformed(#[source] serde_json::Error),
}

/// Lays a persisted (possibly partial) record over `defaults`.
///
/// Fields missing from `persisted` keep their default. Unknown keys are
/// ignored. A field with the wrong shape fails the whole merge.
pub fn merge_persisted(
    defaults: &GeneralSettings,
    persisted: &Value,
) -> Result<GeneralSettings, MergeError> {
    let Value::Object(persisted) = persisted else {
        return Err(MergeError::NotAnObject(json_kind(persisted)));
    };

    let mut merged = match serde_json::to_value(defaults).map_err(MergeError::Encode)? {
        Value::Object(map) => map,
        other => return Err(MergeError::NotAnObject(json_kind(&other))),
    };

    for (field, strategy) in MERGE_POLICY {
        if let Some(incoming) = persisted.get(field.key()) {
            overlay_field(&mut merged, field.key(), incoming, strategy);
        }
    }

    serde_json::from_value(Value::Object(merged)).map_err(MergeError::Malformed)
}

/// `{ ...current, [key]: value }` for a replace-strategy field.
pub fn apply_update(current: &GeneralSettings, update: SettingUpdate) -> GeneralSettings {
    debug_assert_eq!(strategy_for(update.field()), MergeStrategy::Replace);

    let mut next = current.clone();
    match update {
        SettingUpdate::AnalyticsEnabled(value) => next.analytics_enabled = value,
        SettingUpdate::EnablePets(value) => next.enable_pets = value,
        SettingUpdate::SelectedPets(value) => next.selected_pets = value,
        SettingUpdate::Timezone(value) => next.timezone = value,
    }
    next
}

/// `{ ...current, petNames: { ...current.petNames, [pet]: name } }`.
pub fn apply_pet_name(current: &GeneralSettings, pet: PetType, name: String) -> GeneralSettings {
    debug_assert_eq!(
        strategy_for(SettingsField::PetNames),
        MergeStrategy::Nested
    );

    GeneralSettings {
        pet_names: current.pet_names.with_name(pet, name),
        ..current.clone()
    }
}

fn overlay_field(target: &mut Map<String, Value>, key: &str, incoming: &Value, strategy: MergeStrategy) {
    if strategy == MergeStrategy::Nested {
        if let (Some(Value::Object(existing)), Value::Object(overlay)) = (target.get_mut(key), incoming) {
            for (sub_key, value) in overlay {
                existing.insert(sub_key.clone(), value.clone());
            }
            return;
        }
    }

    target.insert(key.to_string(), incoming.clone());
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
