use serde::{Deserialize, Serialize};

pub const DEFAULT_TIMEZONE: &str = "Asia/Tehran";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PetType {
    Dog,
    Cat,
}

impl PetType {
    pub const ALL: [PetType; 2] = [PetType::Dog, PetType::Cat];

    pub fn as_key(&self) -> &'static str {
        match self {
            Self::Dog => "dog",
            Self::Cat => "cat",
        }
    }

    pub fn default_name(&self) -> &'static str {
        match self {
            Self::Dog => "آکیتا",
            Self::Cat => "گربه",
        }
    }
}

/// Display name per pet tag. Every tag always has an entry.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct PetNames {
    pub dog: String,
    pub cat: String,
}

impl PetNames {
    pub fn get(&self, pet: PetType) -> &str {
        match pet {
            PetType::Dog => &self.dog,
            PetType::Cat => &self.cat,
        }
    }

    pub fn with_name(&self, pet: PetType, name: impl Into<String>) -> Self {
        let mut next = self.clone();
        match pet {
            PetType::Dog => next.dog = name.into(),
            PetType::Cat => next.cat = name.into(),
        }
        next
    }
}

impl Default for PetNames {
    fn default() -> Self {
        Self {
            dog: PetType::Dog.default_name().to_string(),
            cat: PetType::Cat.default_name().to_string(),
        }
    }
}

/// The complete settings record behind the general tab.
///
/// Persisted as a single JSON object under one storage key. Records are never
/// edited in place once shared; setters build a new one.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GeneralSettings {
    pub analytics_enabled: bool,
    pub enable_pets: bool,
    pub selected_pets: Vec<PetType>,
    pub pet_names: PetNames,
    pub timezone: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            analytics_enabled: true,
            enable_pets: true,
            selected_pets: vec![PetType::Dog],
            pet_names: PetNames::default(),
            timezone: DEFAULT_TIMEZONE.to_string(),
        }
    }
}

/// A change to one top-level field. `petNames` is deliberately absent: pet
/// names go through [`crate::store::SettingsStore::set_pet_name`].
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "key", content = "value", rename_all = "camelCase")]
pub enum SettingUpdate {
    AnalyticsEnabled(bool),
    EnablePets(bool),
    SelectedPets(Vec<PetType>),
    Timezone(String),
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn defaults_match_shipped_values() {
        let settings = GeneralSettings::default();

        assert_eq!(
            serde_json::to_value(&settings).unwrap(),
            json!({
                "analyticsEnabled": true,
                "enablePets": true,
                "selectedPets": ["dog"],
                "petNames": { "dog": "آکیتا", "cat": "گربه" },
                "timezone": "Asia/Tehran"
            })
        );
    }

    #[test]
    fn default_pet_names_cover_every_tag() {
        let names = PetNames::default();
        for pet in PetType::ALL {
            assert_eq!(names.get(pet), pet.default_name());
        }
    }

    #[test]
    fn with_name_leaves_source_untouched() {
        let names = PetNames::default();
        let renamed = names.with_name(PetType::Cat, "Gorbe");

        assert_eq!(renamed.cat, "Gorbe");
        assert_eq!(renamed.dog, names.dog);
        assert_eq!(names.cat, "گربه");
    }

    #[test]
    fn setting_update_uses_key_value_shape() {
        let update: SettingUpdate =
            serde_json::from_value(json!({ "key": "timezone", "value": "Europe/Berlin" }))
                .unwrap();
        assert_eq!(update, SettingUpdate::Timezone("Europe/Berlin".to_string()));

        let pets: SettingUpdate =
            serde_json::from_value(json!({ "key": "selectedPets", "value": ["dog", "cat"] }))
                .unwrap();
        assert_eq!(
            pets,
            SettingUpdate::SelectedPets(vec![PetType::Dog, PetType::Cat])
        );
    }

    #[test]
    fn setting_update_rejects_pet_names_key() {
        let result = serde_json::from_value::<SettingUpdate>(
            json!({ "key": "petNames", "value": { "dog": "x", "cat": "y" } }),
        );
        assert!(result.is_err());
    }
}
