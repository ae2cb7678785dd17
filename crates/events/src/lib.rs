#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Event system for async communication in upaas
//!
//! Library crates publish domain events over an unbounded channel so that a
//! front-end (CLI, API worker) can report build progress without parsing
//! logs. Events complement `tracing`; they never replace error propagation.

pub mod events;
pub use events::{AppEvent, BuildEvent, FailureContext, GeneralEvent, StorageEvent};

use std::path::Path;

use tokio::sync::mpsc::UnboundedSender;
use upaas_types::{BuildId, BuildResult};

/// Type alias for event sender
pub type EventSender = UnboundedSender<AppEvent>;

/// Type alias for event receiver
pub type EventReceiver = tokio::sync::mpsc::UnboundedReceiver<AppEvent>;

/// Create a new event channel
#[must_use]
pub fn channel() -> (EventSender, EventReceiver) {
    tokio::sync::mpsc::unbounded_channel()
}

/// The unified trait for emitting events
///
/// Implemented for the raw `EventSender` and for any struct that may hold one.
pub trait EventEmitter {
    /// Get the event sender for this emitter
    fn event_sender(&self) -> Option<&EventSender>;

    /// Emit an event through this emitter
    fn emit(&self, event: AppEvent) {
        if let Some(sender) = self.event_sender() {
            // Ignore send errors - if receiver is dropped, we just continue
            let _ = sender.send(event);
        }
    }

    fn emit_warning_with_context(&self, message: impl Into<String>, context: impl Into<String>) {
        self.emit(AppEvent::General(GeneralEvent::warning(
            message,
            Some(context.into()),
        )));
    }

    fn emit_workspace_left_behind(&self, path: &Path, error: impl ToString) {
        self.emit(AppEvent::General(GeneralEvent::WorkspaceLeftBehind {
            path: path.to_path_buf(),
            error: error.to_string(),
        }));
    }

    fn emit_build_stage(&self, build_id: BuildId, stage: impl Into<String>) {
        self.emit(AppEvent::Build(BuildEvent::StageStarted {
            build_id,
            stage: stage.into(),
        }));
    }

    fn emit_build_progress(&self, build_id: BuildId, result: &BuildResult) {
        self.emit(AppEvent::Build(BuildEvent::Progress {
            build_id,
            result: Box::new(result.clone()),
        }));
    }
}

/// Implementation of `EventEmitter` for the raw `EventSender`
impl EventEmitter for EventSender {
    fn event_sender(&self) -> Option<&EventSender> {
        Some(self)
    }
}

impl EventEmitter for Option<EventSender> {
    fn event_sender(&self) -> Option<&EventSender> {
        self.as_ref()
    }
}
