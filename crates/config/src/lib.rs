#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Configuration management for upaas
//!
//! This crate turns raw configuration text into validated, typed objects:
//! - builder configuration (`builder.toml`), one per worker
//! - application metadata (`upaas.yml`), one per application
//!
//! The build engine never parses configuration text itself.

pub mod builder;
pub mod constants;
pub mod metadata;
pub mod vcs;

pub use builder::{
    AppsConfig, BootstrapConfig, BuildConfig, CommandsConfig, GlobalActions, InterpreterActions,
    InterpreterVersionConfig, InterpretersConfig, PackageCommand, PathsConfig, SandboxConfig,
    StorageConfig,
};
pub use metadata::{
    InterpreterSpec, Metadata, MetadataActions, OsPackages, RepositoryConfig, RevisionCommands,
    SetupActions,
};
pub use vcs::Vcs;

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;

/// A list of shell commands. Accepts a single string or a list of strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Script(Vec<String>);

impl Script {
    #[must_use]
    pub fn new(commands: Vec<String>) -> Self {
        Self(commands)
    }

    #[must_use]
    pub fn single(command: impl Into<String>) -> Self {
        Self(vec![command.into()])
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<String> {
        self.0
    }
}

impl Deref for Script {
    type Target = [String];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Vec<String>> for Script {
    fn from(commands: Vec<String>) -> Self {
        Self(commands)
    }
}

impl<'de> Deserialize<'de> for Script {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            One(String),
            Many(Vec<String>),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::One(command) => Self(vec![command]),
            Repr::Many(commands) => Self(commands),
        })
    }
}

/// A scalar read as text. YAML turns `2.1` and `8` into numbers; version
/// lists and keys still need them as strings. Floats lose trailing zeros
/// (`2.10` reads as `2.1`), such values must be quoted.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct ScalarString(pub(crate) String);

impl<'de> Deserialize<'de> for ScalarString {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct Visitor;

        impl serde::de::Visitor<'_> for Visitor {
            type Value = ScalarString;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a string or a number")
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
                Ok(ScalarString(v.to_string()))
            }

            fn visit_string<E: serde::de::Error>(self, v: String) -> Result<Self::Value, E> {
                Ok(ScalarString(v))
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Self::Value, E> {
                Ok(ScalarString(v.to_string()))
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(ScalarString(v.to_string()))
            }

            fn visit_f64<E: serde::de::Error>(self, v: f64) -> Result<Self::Value, E> {
                Ok(ScalarString(v.to_string()))
            }

            fn visit_bool<E: serde::de::Error>(self, v: bool) -> Result<Self::Value, E> {
                Ok(ScalarString(v.to_string()))
            }
        }

        deserializer.deserialize_any(Visitor)
    }
}

/// Deserialize a list of scalars as strings
pub(crate) fn scalar_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = Vec::<ScalarString>::deserialize(deserializer)?;
    Ok(values.into_iter().map(|v| v.0).collect())
}

/// Deserialize a map of scalars as strings, e.g. environment variables
pub(crate) fn scalar_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = BTreeMap::<ScalarString, ScalarString>::deserialize(deserializer)?;
    Ok(values.into_iter().map(|(k, v)| (k.0, v.0)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Holder {
        script: Script,
        #[serde(default, deserialize_with = "scalar_list")]
        versions: Vec<String>,
    }

    #[test]
    fn script_from_string_or_list() {
        let one: Holder = serde_yml::from_str("script: echo hi").unwrap();
        assert_eq!(&*one.script, ["echo hi".to_string()]);

        let many: Holder = serde_yml::from_str("script:\n  - a\n  - b\n").unwrap();
        assert_eq!(many.script.len(), 2);
    }

    #[test]
    fn numeric_versions_become_strings() {
        let holder: Holder =
            serde_yml::from_str("script: x\nversions:\n  - 2\n  - 2.1\n  - 1.8.7\n").unwrap();
        assert_eq!(holder.versions, vec!["2", "2.1", "1.8.7"]);
    }
}
