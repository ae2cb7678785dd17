use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Non-fatal conditions a build or bootstrap ran into
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GeneralEvent {
    Warning {
        message: String,
        /// Storage key or path the warning is about
        #[serde(skip_serializing_if = "Option::is_none")]
        context: Option<String>,
    },

    /// Cleanup failed and the directory stays on disk
    WorkspaceLeftBehind { path: PathBuf, error: String },
}

impl GeneralEvent {
    pub fn warning(message: impl Into<String>, context: Option<String>) -> Self {
        Self::Warning {
            message: message.into(),
            context,
        }
    }
}
