//! Package builder entry point

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use upaas_config::{BuildConfig, Metadata};
use upaas_errors::Error;
use upaas_events::EventSender;
use upaas_platform::Reaper;
use upaas_store::Storage;
use upaas_types::Distro;

use crate::bootstrap::OsImageBuilder;
use crate::build_plan::BuildPlan;
use crate::context::BuildContext;
use crate::session::BuildSession;

/// Inputs of a single package build
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildRequest {
    /// Storage key of a previously built package to update. When it is
    /// missing from storage the build starts from the OS image instead.
    pub base_package: Option<String>,
    /// Revision id recorded by the build that produced `base_package`
    pub previous_revision: Option<String>,
}

impl BuildRequest {
    /// Build on top of the base OS image
    #[must_use]
    pub fn fresh() -> Self {
        Self::default()
    }

    /// Build on top of an existing package
    pub fn incremental(base_package: impl Into<String>) -> Self {
        Self {
            base_package: Some(base_package.into()),
            previous_revision: None,
        }
    }

    #[must_use]
    pub fn with_previous_revision(mut self, revision: impl Into<String>) -> Self {
        self.previous_revision = Some(revision.into());
        self
    }
}

/// Builds packages of one application on this worker
#[derive(Debug)]
pub struct Builder {
    pub(crate) ctx: BuildContext,
    pub(crate) metadata: Metadata,
    pub(crate) plan: BuildPlan,
}

impl Builder {
    /// Builder using the configured storage handler and the detected
    /// distribution
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an unusable storage handler and
    /// `BuildError::UnsupportedInterpreterVersion` when no requested
    /// interpreter version is configured.
    pub async fn new(config: BuildConfig, metadata: Metadata) -> Result<Self, Error> {
        let ctx = BuildContext::from_config(config).await?;
        Self::from_context(ctx, metadata)
    }

    /// Builder with an explicit storage backend and distribution
    ///
    /// # Errors
    ///
    /// Returns `BuildError::UnsupportedInterpreterVersion` when no requested
    /// interpreter version is configured.
    pub fn with_storage(
        config: BuildConfig,
        metadata: Metadata,
        storage: Arc<dyn Storage>,
        distro: Distro,
    ) -> Result<Self, Error> {
        Self::from_context(BuildContext::new(config, storage, distro), metadata)
    }

    /// # Errors
    ///
    /// Returns `BuildError::UnsupportedInterpreterVersion` when no requested
    /// interpreter version is configured.
    pub fn from_context(ctx: BuildContext, metadata: Metadata) -> Result<Self, Error> {
        let plan = BuildPlan::resolve(&ctx.config, &metadata, &ctx.distro)?;
        Ok(Self { ctx, metadata, plan })
    }

    #[must_use]
    pub fn with_events(mut self, events: EventSender) -> Self {
        self.ctx.events = Some(events);
        self
    }

    /// Token that interrupts the running command and aborts the build
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.ctx.cancel = token;
        self
    }

    #[must_use]
    pub fn with_reaper(mut self, reaper: Reaper) -> Self {
        self.ctx.reaper = reaper;
        self
    }

    #[must_use]
    pub fn config(&self) -> &BuildConfig {
        &self.ctx.config
    }

    #[must_use]
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Actions, environment and packages resolved for this application
    #[must_use]
    pub fn plan(&self) -> &BuildPlan {
        &self.plan
    }

    #[must_use]
    pub fn distro(&self) -> &Distro {
        &self.ctx.distro
    }

    #[must_use]
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.ctx.storage
    }

    #[must_use]
    pub fn context(&self) -> &BuildContext {
        &self.ctx
    }

    #[must_use]
    pub fn os_builder(&self) -> OsImageBuilder<'_> {
        OsImageBuilder::new(&self.ctx)
    }

    /// See [`OsImageBuilder::has_valid_os_image`]
    ///
    /// # Errors
    ///
    /// Returns a storage error if the backend cannot be queried.
    pub async fn has_valid_os_image(&self) -> Result<bool, Error> {
        self.os_builder().has_valid_os_image().await
    }

    /// See [`OsImageBuilder::bootstrap_os`]
    ///
    /// # Errors
    ///
    /// Returns `BuildError::OsBootstrap` or `BuildError::System`.
    pub async fn bootstrap_os(&self) -> Result<(), Error> {
        self.os_builder().bootstrap_os().await
    }

    /// Start a package build. Nothing runs until the session is polled.
    #[must_use]
    pub fn build_package(&self, request: BuildRequest) -> BuildSession<'_> {
        BuildSession::new(self, request)
    }
}
