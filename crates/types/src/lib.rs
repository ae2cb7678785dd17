#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Core type definitions for the upaas package builder
//!
//! This crate provides the data records shared by every other crate:
//! build progress snapshots, VCS revision details, distribution identity
//! and the dotted-integer version helpers used for interpreter selection.

pub mod build;
pub mod distro;
pub mod format;
pub mod version;

// Re-export commonly used types
pub use build::{BuildId, BuildResult, RevisionInfo};
pub use distro::Distro;
pub use format::bytes_to_human;
pub use uuid::Uuid;
pub use version::{
    select_best_version, select_supported_versions, version_fuzzy_compare, version_to_tuple,
    version_tuple_to_string, VersionTuple, ANY_VERSION,
};

use serde::{Deserialize, Serialize};

/// Build pipeline stage whose actions are resolved from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStage {
    System,
    Interpreter,
    Before,
    Main,
    After,
    Finalize,
}

impl ActionStage {
    /// All stages in pipeline order
    pub const ALL: [ActionStage; 6] = [
        Self::System,
        Self::Interpreter,
        Self::Before,
        Self::Main,
        Self::After,
        Self::Finalize,
    ];

    /// Stages an application is allowed to provide
    pub const APPLICATION: [ActionStage; 3] = [Self::Before, Self::Main, Self::After];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Interpreter => "interpreter",
            Self::Before => "before",
            Self::Main => "main",
            Self::After => "after",
            Self::Finalize => "finalize",
        }
    }
}

impl std::fmt::Display for ActionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of build, decided when the parent image is selected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildKind {
    /// Built on top of the base OS image
    Fresh,
    /// Built on top of a previously produced application package
    Incremental,
}

impl BuildKind {
    #[must_use]
    pub fn is_fresh(self) -> bool {
        matches!(self, Self::Fresh)
    }
}

/// How build commands are isolated from the host
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxMode {
    /// `chroot(2)` into the workspace, requires root
    #[default]
    Chroot,
    /// Run commands with the workspace as working directory, no root change
    Directory,
}

impl std::fmt::Display for SandboxMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Chroot => f.write_str("chroot"),
            Self::Directory => f.write_str("directory"),
        }
    }
}
