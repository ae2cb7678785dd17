//! Package build error types

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub enum BuildError {
    /// Failure caused by the application: its packages, repository, files or actions.
    #[error("package user error: {message}")]
    User { message: String },

    /// Failure independent from the application: OS image, unmounting, archiving, upload.
    #[error("package system error: {message}")]
    System { message: String },

    #[error("OS bootstrap failed: {message}")]
    OsBootstrap { message: String },

    #[error("unsupported interpreter version: {interpreter} {requested:?}")]
    UnsupportedInterpreterVersion {
        interpreter: String,
        requested: Vec<String>,
    },
}

impl BuildError {
    pub fn user(message: impl Into<String>) -> Self {
        Self::User {
            message: message.into(),
        }
    }

    pub fn system(message: impl Into<String>) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::User { .. } | Self::UnsupportedInterpreterVersion { .. }
        )
    }
}

impl UserFacingError for BuildError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::User { .. } => {
                Some("Check the application metadata and the output of the failed command.")
            }
            Self::UnsupportedInterpreterVersion { .. } => {
                Some("Request an interpreter version supported by the builder configuration.")
            }
            Self::System { .. } | Self::OsBootstrap { .. } => {
                Some("The worker failed independently of the application; retry on another worker.")
            }
        }
    }

    fn is_retryable(&self) -> bool {
        !self.is_user_error()
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::User { .. } => "build.user_error",
            Self::System { .. } => "build.system_error",
            Self::OsBootstrap { .. } => "build.os_bootstrap",
            Self::UnsupportedInterpreterVersion { .. } => "build.unsupported_interpreter_version",
        };
        Some(code)
    }
}
