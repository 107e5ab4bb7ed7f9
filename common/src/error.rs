use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum HiveError {
    #[error("invalid settings: {0}")]
    InvalidSettings(String),
    #[error("missing settings field '{0}'")]
    MissingField(&'static str),
    #[error("unknown settings field '{0}'")]
    UnknownField(String),
    #[error("settings field '{0}' has the wrong type")]
    FieldType(&'static str),
    #[error("settings are for module type '{found}', expected '{expected}'")]
    WrongModuleType {
        expected: &'static str,
        found: String,
    },
    #[error("storage unavailable at offset {offset}")]
    StorageUnavailable { offset: usize },
    #[error("stored record truncated")]
    Truncated,
    #[error("settings record could not be encoded: {0}")]
    Encode(String),
    #[error("sensor reading unavailable")]
    SensorUnavailable,
    #[error("no module with id {0}")]
    UnknownModule(u8),
}

impl HiveError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidSettings(message.into())
    }

    /// True for every kind that means "the request was rejected as a whole".
    pub fn is_invalid_settings(&self) -> bool {
        matches!(
            self,
            Self::InvalidSettings(_)
                | Self::MissingField(_)
                | Self::UnknownField(_)
                | Self::FieldType(_)
                | Self::WrongModuleType { .. }
        )
    }
}
