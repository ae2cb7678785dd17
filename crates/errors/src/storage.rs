//! Blob storage error types

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub enum StorageError {
    #[error("file not found: {path}")]
    FileNotFound { path: String },

    #[error("file already exists: {path}")]
    FileAlreadyExists { path: String },

    #[error("IO error: {message}")]
    IoError { message: String },

    #[error("connection to storage failed: {message}")]
    ConnectionFailed { message: String },
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError {
            message: err.to_string(),
        }
    }
}

impl StorageError {
    /// Convert an `io::Error` into a `StorageError` with an associated path
    #[must_use]
    pub fn from_io_with_path(err: &std::io::Error, path: &std::path::Path) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::FileNotFound {
                path: path.display().to_string(),
            },
            std::io::ErrorKind::AlreadyExists => Self::FileAlreadyExists {
                path: path.display().to_string(),
            },
            _ => Self::IoError {
                message: format!("{}: {}", path.display(), err),
            },
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::FileNotFound { .. })
    }
}

impl UserFacingError for StorageError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::ConnectionFailed { .. } => {
                Some("Check that the storage server is reachable and the credentials are valid.")
            }
            Self::FileAlreadyExists { .. } => {
                Some("Delete the existing file first, storage never overwrites silently.")
            }
            _ => None,
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(self, Self::ConnectionFailed { .. } | Self::IoError { .. })
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::FileNotFound { .. } => "storage.file_not_found",
            Self::FileAlreadyExists { .. } => "storage.file_already_exists",
            Self::IoError { .. } => "storage.io_error",
            Self::ConnectionFailed { .. } => "storage.connection_failed",
        };
        Some(code)
    }
}
