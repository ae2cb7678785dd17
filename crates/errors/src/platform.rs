//! Platform operation errors (chroot, mounts, signals, archives)

use crate::{BuildError, StorageError, UserFacingError};
use std::borrow::Cow;
use thiserror::Error;

/// Errors that can occur during platform-specific operations
#[derive(Debug, Clone, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub enum PlatformError {
    #[error("chroot into {root} failed: {message}")]
    ChrootFailed { root: String, message: String },

    #[error("unmounting {path} failed: {message}")]
    UnmountFailed { path: String, message: String },

    #[error("signal {signal} to pid {pid} failed: {message}")]
    SignalFailed {
        pid: i32,
        signal: String,
        message: String,
    },

    #[error("archive operation failed: {operation} - {message}")]
    ArchiveFailed { operation: String, message: String },

    #[error("filesystem operation failed: {operation} - {message}")]
    FilesystemOperationFailed { operation: String, message: String },
}

impl From<PlatformError> for BuildError {
    fn from(err: PlatformError) -> Self {
        BuildError::System {
            message: err.to_string(),
        }
    }
}

impl From<PlatformError> for StorageError {
    fn from(err: PlatformError) -> Self {
        StorageError::IoError {
            message: err.to_string(),
        }
    }
}

impl UserFacingError for PlatformError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::ChrootFailed { .. } | Self::UnmountFailed { .. } => {
                Some("The builder must run as root to use chroot sandboxes.")
            }
            _ => None,
        }
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::ChrootFailed { .. } => "platform.chroot_failed",
            Self::UnmountFailed { .. } => "platform.unmount_failed",
            Self::SignalFailed { .. } => "platform.signal_failed",
            Self::ArchiveFailed { .. } => "platform.archive_failed",
            Self::FilesystemOperationFailed { .. } => "platform.filesystem_failed",
        };
        Some(code)
    }
}
