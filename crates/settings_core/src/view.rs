//! The general settings tab: distributes the record and its setters to the
//! leaf widgets that render them.

use std::sync::Arc;

use serde::Serialize;

use crate::{
    error::SettingsError,
    models::{PetNames, PetType},
    provider::{use_general_setting, SettingsScope},
};

pub type Setter<T> = Arc<dyn Fn(T) + Send + Sync>;
pub type PetNameSetter = Arc<dyn Fn(PetType, String) + Send + Sync>;

/// City picker. It keeps its own state and takes nothing from this record.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SelectCityProps {}

#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimezoneSettingsProps {
    pub timezone: String,
    #[serde(skip)]
    pub set_timezone: Setter<String>,
}

#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivacySettingsProps {
    pub analytics_enabled: bool,
    #[serde(skip)]
    pub set_analytics_enabled: Setter<bool>,
}

#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PetSettingsProps {
    pub enable_pets: bool,
    #[serde(skip)]
    pub set_enable_pets: Setter<bool>,
    pub selected_pets: Vec<PetType>,
    #[serde(skip)]
    pub set_selected_pets: Setter<Vec<PetType>>,
    pub pet_names: PetNames,
    #[serde(skip)]
    pub set_pet_name: PetNameSetter,
}

/// Rendered tab, widgets in display order.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneralTabView {
    pub select_city: SelectCityProps,
    pub timezone: TimezoneSettingsProps,
    pub privacy: PrivacySettingsProps,
    pub pets: PetSettingsProps,
}

impl GeneralTabView {
    pub const WIDGET_KEYS: [&'static str; 4] = ["selectCity", "timezone", "privacy", "pets"];
}

pub struct GeneralSettingTab;

impl GeneralSettingTab {
    pub fn render(scope: &SettingsScope) -> Result<GeneralTabView, SettingsError> {
        let ctx = use_general_setting(scope)?;
        let store = ctx.store();

        let timezone = {
            let store = store.clone();
            TimezoneSettingsProps {
                timezone: ctx.timezone.clone(),
                set_timezone: Arc::new(move |value: String| {
                    store.set_timezone(value);
                }),
            }
        };

        let privacy = {
            let store = store.clone();
            PrivacySettingsProps {
                analytics_enabled: ctx.analytics_enabled,
                set_analytics_enabled: Arc::new(move |value: bool| {
                    store.set_analytics_enabled(value);
                }),
            }
        };

        let pets = {
            let (enable, select, rename) = (store.clone(), store.clone(), store.clone());
            PetSettingsProps {
                enable_pets: ctx.enable_pets,
                set_enable_pets: Arc::new(move |value: bool| {
                    enable.set_enable_pets(value);
                }),
                selected_pets: ctx.selected_pets.clone(),
                set_selected_pets: Arc::new(move |pets: Vec<PetType>| {
                    select.set_selected_pets(pets);
                }),
                pet_names: ctx.pet_names.clone(),
                set_pet_name: Arc::new(move |pet: PetType, name: String| {
                    rename.set_pet_name(pet, name);
                }),
            }
        };

        Ok(GeneralTabView {
            select_city: SelectCityProps::default(),
            timezone,
            privacy,
            pets,
        })
    }
}
