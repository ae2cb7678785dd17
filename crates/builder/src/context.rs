//! Shared state of a builder

use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use upaas_config::BuildConfig;
use upaas_errors::{CommandError, Error, StorageError};
use upaas_events::{AppEvent, EventEmitter, EventSender, StorageEvent};
use upaas_platform::{detect_distro, Reaper, Sandbox, SandboxScope, ShellCommand};
use upaas_store::{Storage, StorageRegistry};
use upaas_types::Distro;

/// Worker configuration, storage backend and distribution, shared by
/// package and OS image builds
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub config: Arc<BuildConfig>,
    pub storage: Arc<dyn Storage>,
    pub distro: Distro,
    pub events: Option<EventSender>,
    pub cancel: CancellationToken,
    pub reaper: Reaper,
}

impl BuildContext {
    pub fn new(config: BuildConfig, storage: Arc<dyn Storage>, distro: Distro) -> Self {
        Self {
            config: Arc::new(config),
            storage,
            distro,
            events: None,
            cancel: CancellationToken::new(),
            reaper: Reaper::default(),
        }
    }

    /// Context for this worker: storage handler from the configuration,
    /// distribution detected from the running system
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the storage handler is unknown or
    /// rejects its settings.
    pub async fn from_config(config: BuildConfig) -> Result<Self, Error> {
        let storage = StorageRegistry::new().for_config(&config.storage)?;
        let distro = detect_distro().await;
        info!(distro = %distro, storage = storage.name(), "builder context ready");
        Ok(Self::new(config, storage, distro))
    }

    /// Storage key of the base OS image for this worker
    #[must_use]
    pub fn image_filename(&self) -> String {
        self.distro.image_filename()
    }

    /// Build command running in `scope` with the configured time limit
    pub(crate) fn command(&self, scope: &SandboxScope<'_>, command: impl Into<String>) -> ShellCommand {
        scope
            .command(command)
            .timeout(self.config.commands.timeout())
            .strip_unsafe_env(true)
            .output_level(Level::INFO)
            .cancel(self.cancel.clone())
    }

    /// Install OS packages one by one inside `sandbox`
    pub(crate) async fn install_packages<'a, I>(&self, sandbox: &Sandbox, packages: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let install = &self.config.commands.install;
        for package in packages {
            let scope = sandbox.enter(Path::new("/"))?;
            info!(package = %package, "installing package");
            let outcome = self
                .command(&scope, install.render(package))
                .envs(&install.env)
                .execute()
                .await;
            if let Err(e) = outcome {
                match &e {
                    Error::Command(CommandError::Timeout { .. }) => {
                        error!(package = %package, "installing package is taking too long, aborting");
                    }
                    _ => error!(package = %package, error = %e, "installing package failed"),
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Upload `local` under `key`. An existing blob with the same key is
    /// accepted: keys are derived from content or distribution identity.
    pub(crate) async fn upload(&self, local: &Path, key: &str, bytes: u64) -> Result<(), Error> {
        match self.storage.put(local, key).await {
            Ok(()) => {
                info!(key = %key, handler = self.storage.name(), "uploaded");
                self.emit(AppEvent::Storage(StorageEvent::Uploaded {
                    handler: self.storage.name().to_string(),
                    key: key.to_string(),
                    bytes,
                }));
                Ok(())
            }
            Err(Error::Storage(StorageError::FileAlreadyExists { .. })) => {
                warn!(key = %key, "file already stored, keeping existing copy");
                self.emit_warning_with_context("file already stored, keeping existing copy", key);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub(crate) async fn download(&self, key: &str, local: &Path) -> Result<(), Error> {
        self.storage.get(key, local).await?;
        info!(key = %key, handler = self.storage.name(), "downloaded");
        self.emit(AppEvent::Storage(StorageEvent::Downloaded {
            handler: self.storage.name().to_string(),
            key: key.to_string(),
        }));
        Ok(())
    }

    pub(crate) async fn delete(&self, key: &str) -> Result<(), Error> {
        self.storage.delete(key).await?;
        self.emit(AppEvent::Storage(StorageEvent::Deleted {
            handler: self.storage.name().to_string(),
            key: key.to_string(),
        }));
        Ok(())
    }
}

impl EventEmitter for BuildContext {
    fn event_sender(&self) -> Option<&EventSender> {
        self.events.as_ref()
    }
}
