//! Event handling and progress display

use upaas_events::{AppEvent, BuildEvent, GeneralEvent, StorageEvent};
use upaas_types::bytes_to_human;

/// Turns domain events into console output
pub struct EventHandler {
    json: bool,
}

impl EventHandler {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    /// Handle incoming event
    pub fn handle_event(&mut self, event: AppEvent) {
        if self.json {
            if let Ok(line) = serde_json::to_string(&event) {
                println!("{line}");
            }
            return;
        }

        match event {
            AppEvent::Build(event) => self.handle_build_event(event),
            AppEvent::Storage(StorageEvent::Uploaded { key, bytes, handler }) => {
                eprintln!("uploaded {key} ({}) to {handler}", bytes_to_human(bytes));
            }
            AppEvent::Storage(_) => {}
            AppEvent::General(GeneralEvent::Warning { message, context }) => match context {
                Some(context) => eprintln!("warning: {message} ({context})"),
                None => eprintln!("warning: {message}"),
            },
            AppEvent::General(GeneralEvent::WorkspaceLeftBehind { path, error }) => {
                eprintln!("warning: {} left behind: {error}", path.display());
            }
        }
    }

    fn handle_build_event(&self, event: BuildEvent) {
        match event {
            BuildEvent::SessionStarted {
                interpreter,
                interpreter_version,
                parent,
                ..
            } => match parent {
                Some(parent) => {
                    eprintln!("updating package {parent} ({interpreter} {interpreter_version})");
                }
                None => eprintln!("building fresh package ({interpreter} {interpreter_version})"),
            },
            BuildEvent::StageStarted { stage, .. } => eprintln!("==> {stage}"),
            BuildEvent::Progress { result, .. } => eprintln!("[{:>3}%]", result.progress),
            BuildEvent::Completed {
                filename,
                bytes,
                duration,
                ..
            } => {
                eprintln!(
                    "package {filename} built in {}s ({})",
                    duration.as_secs(),
                    bytes_to_human(bytes)
                );
            }
            BuildEvent::Failed {
                stage,
                user_error,
                failure,
                ..
            } => {
                let kind = if user_error { "application" } else { "worker" };
                eprintln!("build failed at {stage} ({kind} error): {}", failure.message);
            }
            BuildEvent::BootstrapStarted { image } => eprintln!("bootstrapping OS image {image}"),
            BuildEvent::BootstrapCompleted { image, bytes } => {
                eprintln!("OS image {image} ready ({})", bytes_to_human(bytes));
            }
            BuildEvent::BootstrapFailed { image, failure } => {
                eprintln!("OS image {image} failed: {}", failure.message);
            }
            BuildEvent::ImageDiscarded { image, reason } => {
                eprintln!("discarded OS image {image}: {reason}");
            }
        }
    }
}
