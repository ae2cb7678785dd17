//! Application metadata, one per application

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::fs;
use tracing::debug;
use upaas_errors::{ConfigError, Error};

use crate::{scalar_list, scalar_map, Script, Vcs};

/// Application metadata (`upaas.yml`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub interpreter: InterpreterSpec,
    pub repository: RepositoryConfig,
    #[serde(default, deserialize_with = "scalar_map")]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub actions: MetadataActions,
    /// Files written verbatim before application actions, path -> content
    #[serde(default)]
    pub files: BTreeMap<String, String>,
    /// Extra OS packages keyed by distribution name
    #[serde(default)]
    pub os: BTreeMap<String, OsPackages>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterpreterSpec {
    #[serde(rename = "type")]
    pub kind: String,
    /// Acceptable versions, each may be a prefix such as `2` or `2.1`
    #[serde(default, deserialize_with = "scalar_list")]
    pub versions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    #[serde(default, deserialize_with = "scalar_map")]
    pub env: BTreeMap<String, String>,
    /// Fresh checkout into `%destination%`
    pub clone: Script,
    /// Update of an existing checkout in `%destination%`
    pub update: Script,
    #[serde(default)]
    pub info: RevisionCommands,
    /// Changes between `%old%` and `%new%` revisions
    #[serde(default)]
    pub changelog: Script,
}

/// Revision introspection commands, each defaults from the detected VCS
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RevisionCommands {
    #[serde(default)]
    pub revision: Script,
    #[serde(default)]
    pub author: Script,
    #[serde(default)]
    pub date: Script,
    #[serde(default)]
    pub description: Script,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataActions {
    #[serde(default)]
    pub setup: SetupActions,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SetupActions {
    #[serde(default)]
    pub before: Script,
    #[serde(default)]
    pub main: Script,
    #[serde(default)]
    pub after: Script,
}

/// Packages for one distribution, plus per-release tables
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OsPackages {
    #[serde(default)]
    pub packages: Vec<String>,
    #[serde(flatten, deserialize_with = "release_map")]
    pub releases: BTreeMap<String, ReleasePackages>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReleasePackages {
    #[serde(default)]
    pub packages: Vec<String>,
}

fn release_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, ReleasePackages>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let values = BTreeMap::<crate::ScalarString, ReleasePackages>::deserialize(deserializer)?;
    Ok(values.into_iter().map(|(k, v)| (k.0, v)).collect())
}

impl Metadata {
    /// Parse metadata text. Revision commands missing from the text are
    /// filled from the VCS detected in `base_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid YAML or fails validation.
    pub fn from_yaml_str(content: &str, base_dir: Option<&Path>) -> Result<Self, Error> {
        let mut metadata: Self =
            serde_yml::from_str(content).map_err(|e| ConfigError::ParseError {
                message: e.to_string(),
            })?;
        metadata.apply_vcs_defaults(Vcs::detect(base_dir));
        metadata.validate()?;
        Ok(metadata)
    }

    /// Load metadata from a file, detecting the VCS next to it
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub async fn load_from_file(path: &Path) -> Result<Self, Error> {
        let contents = fs::read_to_string(path)
            .await
            .map_err(|_| ConfigError::NotFound {
                path: path.display().to_string(),
            })?;
        debug!(path = %path.display(), "loaded application metadata");
        Self::from_yaml_str(&contents, path.parent())
    }

    fn apply_vcs_defaults(&mut self, vcs: Vcs) {
        let info = &mut self.repository.info;
        if info.revision.is_empty() {
            info.revision = vcs.revision();
        }
        if info.author.is_empty() {
            info.author = vcs.author();
        }
        if info.date.is_empty() {
            info.date = vcs.date();
        }
        if info.description.is_empty() {
            info.description = vcs.description();
        }
        if self.repository.changelog.is_empty() {
            self.repository.changelog = vcs.changelog();
        }
    }

    fn validate(&self) -> Result<(), Error> {
        if self.interpreter.kind.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "interpreter.type".to_string(),
            }
            .into());
        }
        if self.repository.clone.is_empty() {
            return Err(ConfigError::MissingField {
                field: "repository.clone".to_string(),
            }
            .into());
        }
        if self.repository.update.is_empty() {
            return Err(ConfigError::MissingField {
                field: "repository.update".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Extra packages for a distribution name and release
    pub fn os_packages<'a>(&'a self, distro: &str, release: &str) -> impl Iterator<Item = &'a String> {
        let entry = self.os.get(distro);
        let base = entry.into_iter().flat_map(|os| os.packages.iter());
        let versioned = entry
            .and_then(|os| os.releases.get(release))
            .into_iter()
            .flat_map(|r| r.packages.iter());
        base.chain(versioned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DETECT: &str = r#"
interpreter:
  type: ruby
  versions:
    - 2.1.0

repository:
  clone: echo "Cloned"
  update: echo "Updated"
"#;

    const MANUAL: &str = r#"
interpreter:
  type: ruby
  versions:
    - 2.1.0

repository:
  clone: echo "Cloned"
  update: echo "Updated"
  info:
    revision: revision cmd
    author: author cmd
    date: date cmd
    description: description cmd
  changelog: changelog cmd
"#;

    #[test]
    fn revision_commands_detected() {
        let meta = Metadata::from_yaml_str(DETECT, None).unwrap();
        let info = &meta.repository.info;
        assert_eq!(&*info.revision, ["git rev-parse HEAD".to_string()]);
        assert_eq!(&*info.author, ["git log -1 --pretty='%aN <%aE>'".to_string()]);
        assert_eq!(&*info.date, ["git log -1 --pretty='%at'".to_string()]);
        assert_eq!(&*info.description, ["git log -1 --pretty='%B'".to_string()]);
    }

    #[test]
    fn revision_commands_manual() {
        let meta = Metadata::from_yaml_str(MANUAL, None).unwrap();
        let info = &meta.repository.info;
        assert_eq!(&*info.revision, ["revision cmd".to_string()]);
        assert_eq!(&*info.author, ["author cmd".to_string()]);
        assert_eq!(&*info.date, ["date cmd".to_string()]);
        assert_eq!(&*info.description, ["description cmd".to_string()]);
        assert_eq!(&*meta.repository.changelog, ["changelog cmd".to_string()]);
    }

    #[test]
    fn os_packages_by_release() {
        let content = format!(
            "{DETECT}\nos:\n  debian:\n    packages: [libpq-dev]\n    8:\n      packages: [libssl1.0.0]\n  ubuntu:\n    packages: [libpq5]\n"
        );
        let meta = Metadata::from_yaml_str(&content, None).unwrap();
        let debian8: Vec<&String> = meta.os_packages("debian", "8").collect();
        assert_eq!(debian8, ["libpq-dev", "libssl1.0.0"]);
        let debian9: Vec<&String> = meta.os_packages("debian", "9").collect();
        assert_eq!(debian9, ["libpq-dev"]);
        assert_eq!(meta.os_packages("centos", "7").count(), 0);
    }

    #[test]
    fn clone_is_required() {
        let content = "interpreter:\n  type: ruby\nrepository:\n  update: x\n";
        assert!(Metadata::from_yaml_str(content, None).is_err());
    }
}
