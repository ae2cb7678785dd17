//! Worker distribution identity

use serde::{Deserialize, Serialize};
use std::fmt;

/// Distribution the builder runs on. Determines which base OS image is used
/// and which per-distro packages from application metadata apply.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Distro {
    pub name: String,
    pub version: String,
    pub arch: String,
}

impl Distro {
    pub fn new(name: impl Into<String>, version: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            arch: arch.into(),
        }
    }

    /// Parse `/etc/os-release` style content (`ID` and `VERSION_ID`).
    #[must_use]
    pub fn from_os_release(content: &str, arch: impl Into<String>) -> Self {
        let mut name = String::from("unknown");
        let mut version = String::from("unknown");
        for line in content.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim().trim_matches('"').trim_matches('\'');
            match key.trim() {
                "ID" => name = value.to_string(),
                "VERSION_ID" => version = value.to_string(),
                _ => {}
            }
        }
        Self::new(name, version, arch)
    }

    /// Storage key of the base OS image for this distribution:
    /// `<name>-<version>-<arch>.tar.gz` with path separators replaced.
    #[must_use]
    pub fn image_filename(&self) -> String {
        format!("{}-{}-{}.tar.gz", self.name, self.version, self.arch).replace('/', "-")
    }
}

impl fmt::Display for Distro {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.name, self.version, self.arch)
    }
}
