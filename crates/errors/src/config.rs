//! Configuration error types

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    NotFound { path: String },

    #[error("invalid config: {message}")]
    Invalid { message: String },

    #[error("parse error: {message}")]
    ParseError { message: String },

    #[error("missing required field: {field}")]
    MissingField { field: String },

    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    #[error("required path does not exist: {path}")]
    PathNotFound { path: String },

    #[error("storage handler '{name}' could not be loaded")]
    UnknownStorageHandler { name: String },

    #[error("storage handler '{handler}' failed to initialize with given configuration: {message}")]
    InvalidStorageSettings { handler: String, message: String },
}

impl UserFacingError for ConfigError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::NotFound { .. } => {
                Some("Provide builder.toml in $UPAAS_CONFIG_DIR, the current directory or /etc/upaas.")
            }
            Self::MissingField { .. } => {
                Some("Add the missing configuration field noted in the error message.")
            }
            Self::PathNotFound { .. } => Some("Create the directory or fix the configured path."),
            Self::UnknownStorageHandler { .. } => {
                Some("Use one of the registered storage handlers: local, mongodb.")
            }
            Self::InvalidValue { .. }
            | Self::Invalid { .. }
            | Self::ParseError { .. }
            | Self::InvalidStorageSettings { .. } => {
                Some("Fix the configuration value and retry the command.")
            }
        }
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::NotFound { .. } => "config.not_found",
            Self::Invalid { .. } => "config.invalid",
            Self::ParseError { .. } => "config.parse_error",
            Self::MissingField { .. } => "config.missing_field",
            Self::InvalidValue { .. } => "config.invalid_value",
            Self::PathNotFound { .. } => "config.path_not_found",
            Self::UnknownStorageHandler { .. } => "config.unknown_storage_handler",
            Self::InvalidStorageSettings { .. } => "config.invalid_storage_settings",
        };
        Some(code)
    }
}
