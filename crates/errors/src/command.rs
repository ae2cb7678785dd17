//! Shell command execution error types

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub enum CommandError {
    /// The deadline fired; the process group was killed before this error was returned.
    #[error("command timeout reached after {seconds} seconds: {command}")]
    Timeout { command: String, seconds: u64 },

    /// Unexpected exit code. `exit_code` is `None` when the process was
    /// killed by a signal or interrupted by the operator.
    #[error("command failed ({message}): {command}")]
    Failed {
        command: String,
        exit_code: Option<i32>,
        message: String,
    },

    #[error("failed to spawn {command}: {message}")]
    Spawn { command: String, message: String },
}

impl CommandError {
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Exit code of a failed command, when it exited on its own.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Failed { exit_code, .. } => *exit_code,
            _ => None,
        }
    }
}

impl UserFacingError for CommandError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::Timeout { .. } => Some("Increase the command time limit or speed up the command."),
            Self::Spawn { .. } => Some("Make sure /bin/sh is available inside the build root."),
            Self::Failed { .. } => None,
        }
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::Timeout { .. } => "command.timeout",
            Self::Failed { .. } => "command.failed",
            Self::Spawn { .. } => "command.spawn",
        };
        Some(code)
    }
}
