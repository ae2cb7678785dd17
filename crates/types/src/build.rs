//! Build progress records

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier of a single build invocation
pub type BuildId = Uuid;

/// VCS revision details captured during incremental builds
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionInfo {
    pub id: Option<String>,
    pub author: Option<String>,
    pub date: Option<String>,
    pub description: Option<String>,
    pub changelog: Option<String>,
}

impl RevisionInfo {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.id.is_none()
            && self.author.is_none()
            && self.date.is_none()
            && self.description.is_none()
            && self.changelog.is_none()
    }
}

/// Progress snapshot published after every pipeline stage
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildResult {
    /// Percent complete, never decreases
    pub progress: u8,
    /// Storage key of the image this build started from, `None` for the empty image
    pub parent: Option<String>,
    pub interpreter_version: Option<String>,
    pub distro_name: String,
    pub distro_version: String,
    pub distro_arch: String,
    /// Storage key of the produced package
    pub filename: Option<String>,
    pub checksum: Option<String>,
    /// Package archive size in bytes
    pub bytes: u64,
    /// Storage handler the package was uploaded with
    pub storage: Option<String>,
    pub revision: RevisionInfo,
}

impl BuildResult {
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.progress >= 100
    }

    /// Advance the progress marker. Lower values are ignored so the
    /// published sequence never goes backwards.
    pub fn advance(&mut self, progress: u8) {
        self.progress = self.progress.max(progress.min(100));
    }
}

impl fmt::Display for BuildResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.progress)?;
        if let Some(version) = &self.interpreter_version {
            write!(f, " interpreter={version}")?;
        }
        if let Some(filename) = &self.filename {
            write!(f, " package={filename}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_never_goes_backwards() {
        let mut result = BuildResult::default();
        result.advance(20);
        result.advance(10);
        assert_eq!(result.progress, 20);
        result.advance(250);
        assert_eq!(result.progress, 100);
        assert!(result.is_finished());
    }

    #[test]
    fn revision_info_emptiness() {
        let mut info = RevisionInfo::default();
        assert!(info.is_empty());
        info.author = Some("dev <dev@example.com>".into());
        assert!(!info.is_empty());
    }
}
