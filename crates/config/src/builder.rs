//! Builder configuration, one per worker

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::debug;
use upaas_errors::{ConfigError, Error};
use upaas_types::{SandboxMode, ANY_VERSION};

use crate::constants::{
    CONFIG_DIR_ENV, CONFIG_FILENAME, DEFAULT_APP_HOME, DEFAULT_IMAGE_MAX_AGE_DAYS,
    PACKAGE_PLACEHOLDER, SYSTEM_CONFIG_DIR,
};
use crate::Script;

/// Complete builder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    pub paths: PathsConfig,
    pub storage: StorageConfig,
    pub bootstrap: BootstrapConfig,
    pub commands: CommandsConfig,
    pub apps: AppsConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub interpreters: InterpretersConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Parent directory for build workspaces, must exist
    pub workdir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Registered storage handler name, e.g. `local` or `mongodb`
    pub handler: String,
    /// Handler specific settings, validated by the handler itself
    #[serde(default = "empty_settings")]
    pub settings: serde_json::Value,
}

fn empty_settings() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// Base OS image creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Seconds allowed for each bootstrap command
    pub timelimit: u64,
    /// Days after which a cached OS image is rebuilt
    #[serde(default = "default_maxage")]
    pub maxage: u64,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Commands creating the OS tree in `%workdir%`
    pub commands: Script,
    /// Packages installed into every fresh OS image
    #[serde(default)]
    pub packages: Vec<String>,
}

fn default_maxage() -> u64 {
    DEFAULT_IMAGE_MAX_AGE_DAYS
}

impl BootstrapConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timelimit)
    }

    #[must_use]
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.maxage.saturating_mul(24 * 60 * 60))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandsConfig {
    /// Seconds allowed for each build command
    pub timelimit: u64,
    pub install: PackageCommand,
    pub uninstall: PackageCommand,
}

impl CommandsConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timelimit)
    }
}

/// OS package command template with a `%package%` placeholder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageCommand {
    pub cmd: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl PackageCommand {
    /// Substitute the package name into the template
    #[must_use]
    pub fn render(&self, package: &str) -> String {
        self.cmd.replace(PACKAGE_PLACEHOLDER, package)
    }
}

/// Ownership and location of application files inside the build root
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppsConfig {
    #[serde(default = "default_app_home")]
    pub home: PathBuf,
    pub uid: u32,
    pub gid: u32,
}

fn default_app_home() -> PathBuf {
    PathBuf::from(DEFAULT_APP_HOME)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default)]
    pub mode: SandboxMode,
}

/// Interpreter matrix: global actions plus `<type>.<version|any>` tables
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InterpretersConfig {
    #[serde(default)]
    pub actions: GlobalActions,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub packages: Vec<String>,
    /// interpreter type -> version (or `any`) -> settings
    #[serde(flatten)]
    pub types: BTreeMap<String, BTreeMap<String, InterpreterVersionConfig>>,
}

impl InterpretersConfig {
    /// Versions configured for an interpreter type, without the wildcard entry
    pub fn supported_versions<'a>(&'a self, interpreter: &str) -> impl Iterator<Item = &'a str> + Clone {
        self.types
            .get(interpreter)
            .into_iter()
            .flat_map(BTreeMap::keys)
            .map(String::as_str)
            .filter(|version| *version != ANY_VERSION)
    }

    /// Settings for one interpreter type and version key
    #[must_use]
    pub fn version(&self, interpreter: &str, version: &str) -> Option<&InterpreterVersionConfig> {
        self.types.get(interpreter)?.get(version)
    }
}

/// Stages only the worker configuration may define
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalActions {
    #[serde(default)]
    pub system: Script,
    #[serde(default)]
    pub finalize: Script,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InterpreterVersionConfig {
    #[serde(default)]
    pub actions: InterpreterActions,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub packages: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InterpreterActions {
    #[serde(default)]
    pub interpreter: Script,
    #[serde(default)]
    pub before: Script,
    #[serde(default)]
    pub main: Script,
    #[serde(default)]
    pub after: Script,
}

impl BuildConfig {
    /// Parse and validate configuration text
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML, required fields are
    /// missing, or validation fails.
    pub fn from_toml_str(content: &str) -> Result<Self, Error> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file
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
        debug!(path = %path.display(), "loaded builder configuration");
        Self::from_toml_str(&contents)
    }

    /// Load configuration from an explicit path, or search the default
    /// locations: `$UPAAS_CONFIG_DIR`, the current directory, `/etc/upaas`.
    ///
    /// # Errors
    ///
    /// Returns an error if no configuration file is found, or it cannot be
    /// read, parsed or validated.
    pub async fn load(path: Option<&Path>) -> Result<Self, Error> {
        if let Some(path) = path {
            return Self::load_from_file(path).await;
        }
        for candidate in Self::search_paths() {
            if fs::try_exists(&candidate).await.unwrap_or(false) {
                return Self::load_from_file(&candidate).await;
            }
        }
        Err(ConfigError::NotFound {
            path: CONFIG_FILENAME.to_string(),
        }
        .into())
    }

    /// Candidate configuration files, in search order
    #[must_use]
    pub fn search_paths() -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV) {
            dirs.push(PathBuf::from(dir));
        }
        dirs.push(PathBuf::from("."));
        dirs.push(PathBuf::from(SYSTEM_CONFIG_DIR));
        dirs.into_iter().map(|dir| dir.join(CONFIG_FILENAME)).collect()
    }

    /// Validate values serde cannot check
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid value.
    pub fn validate(&self) -> Result<(), Error> {
        if !self.paths.workdir.is_dir() {
            return Err(ConfigError::PathNotFound {
                path: self.paths.workdir.display().to_string(),
            }
            .into());
        }
        if self.storage.handler.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "storage.handler".to_string(),
            }
            .into());
        }
        if self.bootstrap.timelimit == 0 {
            return Err(invalid("bootstrap.timelimit", "0"));
        }
        if self.commands.timelimit == 0 {
            return Err(invalid("commands.timelimit", "0"));
        }
        if self.bootstrap.commands.is_empty() {
            return Err(ConfigError::MissingField {
                field: "bootstrap.commands".to_string(),
            }
            .into());
        }
        if !self.apps.home.is_absolute() {
            return Err(invalid("apps.home", &self.apps.home.display().to_string()));
        }
        Ok(())
    }

    /// Install command for a single OS package
    #[must_use]
    pub fn install_command(&self, package: &str) -> String {
        self.commands.install.render(package)
    }

    /// Uninstall command for a single OS package
    #[must_use]
    pub fn uninstall_command(&self, package: &str) -> String {
        self.commands.uninstall.render(package)
    }
}

fn invalid(field: &str, value: &str) -> Error {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    }
    .into()
}
