use serde::{Deserialize, Serialize};
use std::time::Duration;
use upaas_types::{BuildId, BuildResult};

use super::FailureContext;

/// Build pipeline events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BuildEvent {
    /// Build session started, parent image already selected
    SessionStarted {
        build_id: BuildId,
        interpreter: String,
        interpreter_version: String,
        parent: Option<String>,
    },

    /// A pipeline stage is about to run
    StageStarted { build_id: BuildId, stage: String },

    /// Progress snapshot yielded to the consumer
    Progress {
        build_id: BuildId,
        result: Box<BuildResult>,
    },

    /// Package uploaded, workspace removed
    Completed {
        build_id: BuildId,
        filename: String,
        bytes: u64,
        duration: Duration,
    },

    /// Build aborted, workspace removed
    Failed {
        build_id: BuildId,
        stage: String,
        user_error: bool,
        failure: FailureContext,
    },

    /// Base OS image is being created
    BootstrapStarted { image: String },

    BootstrapCompleted { image: String, bytes: u64 },

    BootstrapFailed {
        image: String,
        failure: FailureContext,
    },

    /// Cached base OS image is too old or broken and was deleted
    ImageDiscarded { image: String, reason: String },
}
