use thiserror::Error;

#[derive(Debug, Clone, Error, Eq, PartialEq)]
pub enum SettingsError {
    #[error("use_general_setting must be used within a SettingsProvider")]
    OutsideProvider,
    #[error("general settings have not finished loading")]
    NotInitialized,
    #[error("`{0}` cannot be changed through update_setting; use set_pet_name")]
    UnsupportedField(String),
}

impl SettingsError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::OutsideProvider => "outside_provider",
            Self::NotInitialized => "not_initialized",
            Self::UnsupportedField(_) => "unsupported_field",
        }
    }
}
