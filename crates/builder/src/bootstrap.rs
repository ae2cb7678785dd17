//! Base OS image creation
//!
//! A fresh build starts from the image stored under the distribution's
//! image filename. When it is missing or older than `bootstrap.maxage`
//! days it is rebuilt from the `[bootstrap]` commands, packed and uploaded.

use std::path::Path;
use std::time::Instant;

use chrono::{TimeDelta, Utc};
use tracing::{error, info, warn, Level};
use upaas_errors::{BuildError, Error};
use upaas_events::{AppEvent, BuildEvent, EventEmitter, FailureContext};
use upaas_platform::{pack, ShellCommand};
use upaas_types::bytes_to_human;

use crate::context::BuildContext;
use crate::workspace::Workspace;

/// Placeholder for the root of the tree being bootstrapped
pub const WORKDIR_PLACEHOLDER: &str = "%workdir%";

const WORKSPACE_PREFIX: &str = "upaas_bootstrap_";
const ARCHIVE_NAME: &str = "image.tar.gz";

/// Creates and validates base OS images for the worker's distribution
#[derive(Debug)]
pub struct OsImageBuilder<'a> {
    ctx: &'a BuildContext,
}

impl<'a> OsImageBuilder<'a> {
    #[must_use]
    pub fn new(ctx: &'a BuildContext) -> Self {
        Self { ctx }
    }

    /// Storage key of the image
    #[must_use]
    pub fn image_filename(&self) -> String {
        self.ctx.image_filename()
    }

    /// Whether a usable image is stored. Images older than the configured
    /// maximum age are deleted and reported as missing.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the backend cannot be queried.
    pub async fn has_valid_os_image(&self) -> Result<bool, Error> {
        let image = self.image_filename();
        let storage = &self.ctx.storage;
        if !storage.exists(&image).await? {
            info!(image = %image, "no OS image found");
            return Ok(false);
        }

        let age = Utc::now() - storage.mtime(&image).await?;
        let max_age = TimeDelta::from_std(self.ctx.config.bootstrap.max_age()).unwrap_or(TimeDelta::MAX);
        if age > max_age {
            info!(image = %image, days = age.num_days(), "OS image is too old, deleting");
            self.ctx.delete(&image).await?;
            self.ctx.emit(AppEvent::Build(BuildEvent::ImageDiscarded {
                image,
                reason: format!("older than {} days", max_age.num_days()),
            }));
            return Ok(false);
        }

        info!(image = %image, days = age.num_days(), "valid OS image found");
        Ok(true)
    }

    /// Build a fresh image and upload it. The temporary directory is always
    /// removed afterwards.
    ///
    /// # Errors
    ///
    /// Command failures are reported as `BuildError::OsBootstrap`, packing
    /// and upload failures as `BuildError::System`.
    pub async fn bootstrap_os(&self) -> Result<(), Error> {
        let image = self.image_filename();
        let config = &self.ctx.config;
        info!(image = %image, "bootstrapping OS image");
        self.ctx.emit(AppEvent::Build(BuildEvent::BootstrapStarted {
            image: image.clone(),
        }));

        let started = Instant::now();
        let outcome = match Workspace::create(&config.paths.workdir, WORKSPACE_PREFIX, config.sandbox.mode) {
            Ok(workspace) => {
                let outcome = self.bootstrap_in(&workspace, &image).await;
                let dir = workspace.dir().to_path_buf();
                if let Err(e) = workspace.remove(&self.ctx.reaper).await {
                    warn!(error = %e, "bootstrap directory left behind");
                    self.ctx.emit_workspace_left_behind(&dir, e);
                }
                outcome
            }
            Err(e) => Err(BuildError::system(format!("creating bootstrap directory failed: {e}")).into()),
        };

        match outcome {
            Ok(bytes) => {
                info!(image = %image, size = %bytes_to_human(bytes), elapsed = ?started.elapsed(), "OS image ready");
                self.ctx.emit(AppEvent::Build(BuildEvent::BootstrapCompleted { image, bytes }));
                Ok(())
            }
            Err(e) => {
                let e = if self.ctx.cancel.is_cancelled() { Error::Cancelled } else { e };
                error!(image = %image, error = %e, "OS bootstrap failed");
                self.ctx.emit(AppEvent::Build(BuildEvent::BootstrapFailed {
                    image,
                    failure: FailureContext::from_error(&e),
                }));
                Err(e)
            }
        }
    }

    async fn bootstrap_in(&self, workspace: &Workspace, image: &str) -> Result<u64, Error> {
        let bootstrap = &self.ctx.config.bootstrap;
        let root = workspace.root();
        let root_str = root.display().to_string();

        for command in bootstrap.commands.iter() {
            ShellCommand::new(command.replace(WORKDIR_PLACEHOLDER, &root_str))
                .cwd(root)
                .timeout(bootstrap.timeout())
                .envs(&bootstrap.env)
                .strip_unsafe_env(true)
                .output_level(Level::INFO)
                .cancel(self.ctx.cancel.clone())
                .execute()
                .await
                .map_err(bootstrap_error)?;
        }

        self.ctx
            .install_packages(workspace.sandbox(), &bootstrap.packages)
            .await
            .map_err(bootstrap_error)?;

        let archive = workspace.dir().join(ARCHIVE_NAME);
        let bytes = pack_with_timeout(root, &archive, bootstrap.timeout()).await?;
        self.ctx
            .upload(&archive, image, bytes)
            .await
            .map_err(|e| BuildError::system(format!("OS image upload failed: {e}")))?;
        Ok(bytes)
    }
}

async fn pack_with_timeout(root: &Path, archive: &Path, timeout: std::time::Duration) -> Result<u64, Error> {
    match tokio::time::timeout(timeout, pack(root, archive)).await {
        Ok(Ok(bytes)) => Ok(bytes),
        Ok(Err(e)) => Err(BuildError::system(format!("packing OS image failed: {e}")).into()),
        Err(_) => Err(BuildError::system(format!(
            "packing OS image took longer than {} seconds",
            timeout.as_secs()
        ))
        .into()),
    }
}

fn bootstrap_error(err: Error) -> Error {
    match err {
        Error::Cancelled | Error::Build(_) => err,
        other => BuildError::OsBootstrap {
            message: other.to_string(),
        }
        .into(),
    }
}
