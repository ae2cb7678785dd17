//! Package build state machine
//!
//! A [`BuildSession`] runs one stage per call to [`BuildSession::next`] and
//! returns the updated [`BuildResult`]. Nothing runs between calls, so a
//! consumer that stops polling stops the build; [`BuildSession::abort`]
//! then removes the workspace. Any stage failure removes the workspace
//! before the error is returned and ends the session.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use futures::Stream;
use tracing::{error, info, warn};
use upaas_config::Script;
use upaas_errors::{BuildError, Error};
use upaas_events::{AppEvent, BuildEvent, EventEmitter, FailureContext};
use upaas_hash::{calculate_file_sha256, verify_file, Checksum};
use upaas_platform::{pack, umount_filesystems, unpack, SandboxScope};
use upaas_types::{bytes_to_human, ActionStage, BuildId, BuildKind, BuildResult, Uuid};

use crate::builder::{BuildRequest, Builder};
use crate::workspace::Workspace;

/// Placeholder for the checkout directory in clone and update commands
pub const DESTINATION_PLACEHOLDER: &str = "%destination%";
pub const OLD_REVISION_PLACEHOLDER: &str = "%old%";
pub const NEW_REVISION_PLACEHOLDER: &str = "%new%";

/// Set to `true` in the environment of fresh builds
pub const FRESH_PACKAGE_ENV: &str = "UPAAS_FRESH_PACKAGE";

const WORKSPACE_PREFIX: &str = "upaas_package_";
const SANITY_CHECK: &str = "true";

/// Pipeline stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Prepare,
    System,
    Packages,
    Interpreter,
    Repository,
    Revision,
    Files,
    Application,
    Finalize,
    Ownership,
    Unmount,
    Archive,
    Checksum,
    Upload,
}

impl Stage {
    /// Progress reported once the stage completed
    #[must_use]
    pub fn progress(self) -> u8 {
        match self {
            Self::Prepare => 10,
            Self::System => 20,
            Self::Packages => 35,
            Self::Interpreter => 40,
            Self::Repository => 45,
            Self::Revision => 46,
            Self::Files => 49,
            Self::Application => 85,
            Self::Finalize => 88,
            Self::Ownership => 89,
            Self::Unmount => 90,
            Self::Archive => 93,
            Self::Checksum => 96,
            Self::Upload => 100,
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Prepare => "prepare",
            Self::System => "system",
            Self::Packages => "packages",
            Self::Interpreter => "interpreter",
            Self::Repository => "repository",
            Self::Revision => "revision",
            Self::Files => "files",
            Self::Application => "application",
            Self::Finalize => "finalize",
            Self::Ownership => "ownership",
            Self::Unmount => "unmount",
            Self::Archive => "archive",
            Self::Checksum => "checksum",
            Self::Upload => "upload",
        }
    }

    /// Failures of this stage are caused by the application
    #[must_use]
    pub fn is_user_stage(self) -> bool {
        matches!(
            self,
            Self::Packages | Self::Repository | Self::Revision | Self::Files | Self::Application
        )
    }

    fn failure_message(self, kind: BuildKind) -> &'static str {
        match self {
            Self::Prepare => "Unpacking OS image failed",
            Self::System => "System actions failed",
            Self::Packages => "Failed to install OS packages",
            Self::Interpreter => "Interpreter actions failed",
            Self::Repository if kind.is_fresh() => "Cloning repository failed",
            Self::Repository => "Updating repository failed",
            Self::Revision => "Reading repository revision failed",
            Self::Files => "Creating files from metadata failed",
            Self::Application => "Application actions failed",
            Self::Finalize => "Finalize actions failed",
            Self::Ownership => "Setting file ownership failed",
            Self::Unmount => "Failed to unmount filesystems",
            Self::Archive => "Creating package file failed",
            Self::Checksum => "Calculating package checksum failed",
            Self::Upload => "Package upload failed",
        }
    }

    /// Stage run after this one, `None` after the upload
    fn following(self, kind: BuildKind) -> Option<Self> {
        let next = match self {
            Self::Prepare => Self::System,
            Self::System => Self::Packages,
            Self::Packages => Self::Interpreter,
            Self::Interpreter => Self::Repository,
            Self::Repository if kind.is_fresh() => Self::Files,
            Self::Repository => Self::Revision,
            Self::Revision => Self::Files,
            Self::Files => Self::Application,
            Self::Application => Self::Finalize,
            Self::Finalize => Self::Ownership,
            Self::Ownership => Self::Unmount,
            Self::Unmount => Self::Archive,
            Self::Archive => Self::Checksum,
            Self::Checksum => Self::Upload,
            Self::Upload => return None,
        };
        Some(next)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Image a build starts from
struct Parent {
    key: String,
    kind: BuildKind,
    /// The OS image was created by this session
    bootstrapped: bool,
}

/// One package build in progress
#[derive(Debug)]
pub struct BuildSession<'a> {
    builder: &'a Builder,
    request: BuildRequest,
    build_id: BuildId,
    kind: BuildKind,
    stage: Option<Stage>,
    result: BuildResult,
    workspace: Option<Workspace>,
    env: BTreeMap<String, String>,
    started: Instant,
}

impl<'a> BuildSession<'a> {
    pub(crate) fn new(builder: &'a Builder, request: BuildRequest) -> Self {
        let distro = &builder.ctx.distro;
        let result = BuildResult {
            interpreter_version: Some(builder.plan.interpreter_version.clone()),
            distro_name: distro.name.clone(),
            distro_version: distro.version.clone(),
            distro_arch: distro.arch.clone(),
            ..BuildResult::default()
        };
        Self {
            builder,
            request,
            build_id: Uuid::new_v4(),
            kind: BuildKind::Fresh,
            stage: Some(Stage::Prepare),
            result,
            workspace: None,
            env: BTreeMap::new(),
            started: Instant::now(),
        }
    }

    #[must_use]
    pub fn build_id(&self) -> BuildId {
        self.build_id
    }

    /// Latest published snapshot
    #[must_use]
    pub fn result(&self) -> &BuildResult {
        &self.result
    }

    /// Stage the next call runs, `None` once the session ended
    #[must_use]
    pub fn stage(&self) -> Option<Stage> {
        self.stage
    }

    /// Build root of the running build
    #[must_use]
    pub fn workspace_root(&self) -> Option<&Path> {
        self.workspace.as_ref().map(Workspace::root)
    }

    /// Run the next stage. Returns `None` once the package was uploaded or
    /// a stage failed.
    pub async fn next(&mut self) -> Option<Result<BuildResult, Error>> {
        let stage = self.stage?;
        if self.builder.ctx.cancel.is_cancelled() {
            return Some(Err(self.fail(stage, Error::Cancelled).await));
        }

        info!(build_id = %self.build_id, stage = %stage, "running stage");
        self.builder.ctx.emit_build_stage(self.build_id, stage.name());
        if let Err(e) = self.run_stage(stage).await {
            return Some(Err(self.fail(stage, e).await));
        }

        self.stage = stage.following(self.kind);
        self.result.advance(stage.progress());
        self.builder.ctx.emit_build_progress(self.build_id, &self.result);
        Some(Ok(self.result.clone()))
    }

    /// Drive the build through every stage
    ///
    /// # Errors
    ///
    /// Returns the error of the failed stage.
    pub async fn run_to_completion(mut self) -> Result<BuildResult, Error> {
        while let Some(item) = self.next().await {
            item?;
        }
        Ok(self.result.clone())
    }

    /// Progress snapshots as a stream
    pub fn into_stream(self) -> impl Stream<Item = Result<BuildResult, Error>> + 'a {
        futures::stream::unfold(self, |mut session| async move {
            let item = session.next().await?;
            Some((item, session))
        })
    }

    /// Stop the build and remove its workspace
    ///
    /// # Errors
    ///
    /// Returns an error if the workspace cannot be removed.
    pub async fn abort(&mut self) -> Result<(), Error> {
        if self.stage.take().is_some() {
            warn!(build_id = %self.build_id, "build aborted");
        }
        match self.workspace.take() {
            Some(workspace) => workspace.remove(&self.builder.ctx.reaper).await,
            None => Ok(()),
        }
    }

    async fn run_stage(&mut self, stage: Stage) -> Result<(), Error> {
        let home = self.builder.ctx.config.apps.home.clone();
        match stage {
            Stage::Prepare => self.prepare().await,
            Stage::System => self.run_actions(ActionStage::System, Path::new("/")).await,
            Stage::Packages => self.install_packages().await,
            Stage::Interpreter => self.run_actions(ActionStage::Interpreter, Path::new("/")).await,
            Stage::Repository => self.sync_repository(&home).await,
            Stage::Revision => self.read_revision(&home).await,
            Stage::Files => self.write_files(&home).await,
            Stage::Application => {
                for action in ActionStage::APPLICATION {
                    self.run_actions(action, &home).await?;
                }
                Ok(())
            }
            Stage::Finalize => self.run_actions(ActionStage::Finalize, Path::new("/")).await,
            Stage::Ownership => self.chown_home(&home).await,
            Stage::Unmount => self.unmount().await,
            Stage::Archive => self.archive().await,
            Stage::Checksum => self.checksum().await,
            Stage::Upload => self.upload().await,
        }
    }

    /// Classify `err`, remove the workspace and end the session
    async fn fail(&mut self, stage: Stage, err: Error) -> Error {
        self.stage = None;
        let err = if self.builder.ctx.cancel.is_cancelled() {
            Error::Cancelled
        } else {
            match err {
                Error::Build(_) | Error::Cancelled => err,
                other => {
                    let message = format!("{}: {other}", stage.failure_message(self.kind));
                    if stage.is_user_stage() {
                        BuildError::user(message).into()
                    } else {
                        BuildError::system(message).into()
                    }
                }
            }
        };
        error!(build_id = %self.build_id, stage = %stage, error = %err, "build failed");

        if let Some(workspace) = self.workspace.take() {
            let dir = workspace.dir().to_path_buf();
            if let Err(e) = workspace.remove(&self.builder.ctx.reaper).await {
                error!(build_id = %self.build_id, error = %e, "failed to remove workspace");
                self.builder.ctx.emit_workspace_left_behind(&dir, e);
            }
        }

        self.builder.ctx.emit(AppEvent::Build(BuildEvent::Failed {
            build_id: self.build_id,
            stage: stage.name().to_string(),
            user_error: err.is_user_error(),
            failure: FailureContext::from_error(&err),
        }));
        err
    }

    fn workspace(&self) -> Result<&Workspace, Error> {
        self.workspace
            .as_ref()
            .ok_or_else(|| Error::internal("build workspace is not available"))
    }

    async fn prepare(&mut self) -> Result<(), Error> {
        let builder = self.builder;
        let config = &builder.ctx.config;
        let parent = self.select_parent().await?;
        self.kind = parent.kind;
        if !parent.kind.is_fresh() {
            self.result.parent = Some(parent.key.clone());
        }
        builder.ctx.emit(AppEvent::Build(BuildEvent::SessionStarted {
            build_id: self.build_id,
            interpreter: builder.plan.interpreter.clone(),
            interpreter_version: builder.plan.interpreter_version.clone(),
            parent: self.result.parent.clone(),
        }));

        self.workspace = Some(Workspace::create(
            &config.paths.workdir,
            WORKSPACE_PREFIX,
            config.sandbox.mode,
        )?);
        self.env = self.build_env()?;

        match self.unpack_parent(&parent.key).await {
            Ok(()) => Ok(()),
            Err(e) if parent.kind.is_fresh() && !parent.bootstrapped => {
                warn!(image = %parent.key, error = %e, "OS image is unusable, bootstrapping it again");
                let os = builder.os_builder();
                builder.ctx.delete(&parent.key).await?;
                builder.ctx.emit(AppEvent::Build(BuildEvent::ImageDiscarded {
                    image: parent.key.clone(),
                    reason: e.to_string(),
                }));
                os.bootstrap_os().await?;
                self.workspace()?.clear_root().await?;
                self.unpack_parent(&parent.key).await
            }
            Err(e) => Err(e),
        }
    }

    async fn select_parent(&self) -> Result<Parent, Error> {
        let builder = self.builder;
        if let Some(base) = &self.request.base_package {
            if builder.ctx.storage.exists(base).await? {
                info!(package = %base, "building on top of previous package");
                return Ok(Parent {
                    key: base.clone(),
                    kind: BuildKind::Incremental,
                    bootstrapped: false,
                });
            }
            warn!(package = %base, "previous package not found, building fresh package");
            builder
                .ctx
                .emit_warning_with_context("previous package not found, building fresh package", base.clone());
        }

        let os = builder.os_builder();
        let bootstrapped = if os.has_valid_os_image().await? {
            false
        } else {
            os.bootstrap_os().await?;
            true
        };
        Ok(Parent {
            key: os.image_filename(),
            kind: BuildKind::Fresh,
            bootstrapped,
        })
    }

    /// Download and unpack the parent image, then check that commands run
    async fn unpack_parent(&self, key: &str) -> Result<(), Error> {
        let ctx = &self.builder.ctx;
        let workspace = self.workspace()?;
        let image = workspace.image_path();
        ctx.download(key, &image).await?;
        // package keys are their sha256, image keys are not
        if let Ok(expected) = Checksum::from_hex(key) {
            if !verify_file(&image, &expected).await? {
                return Err(BuildError::system(format!(
                    "package {key} does not match its checksum"
                ))
                .into());
            }
        }
        unpack(&image, workspace.root()).await?;
        if let Err(e) = tokio::fs::remove_file(&image).await {
            warn!(path = %image.display(), error = %e, "failed to remove downloaded image");
        }

        let scope = workspace.sandbox().enter(Path::new("/"))?;
        ctx.command(&scope, SANITY_CHECK).execute().await?;
        Ok(())
    }

    fn build_env(&self) -> Result<BTreeMap<String, String>, Error> {
        let builder = self.builder;
        let sandbox = self.workspace()?.sandbox();
        let mut env = builder.plan.env.clone();
        let home = sandbox.jail_path(&builder.ctx.config.apps.home);
        env.insert("HOME".to_string(), home.display().to_string());
        if self.kind.is_fresh() {
            env.insert(FRESH_PACKAGE_ENV.to_string(), "true".to_string());
        }
        Ok(env)
    }

    async fn run_actions(&self, stage: ActionStage, workdir: &Path) -> Result<(), Error> {
        let ctx = &self.builder.ctx;
        let commands = self.builder.plan.actions(stage);
        if commands.is_empty() {
            info!("no commands for '{stage}' action");
            return Ok(());
        }
        let scope = self.workspace()?.sandbox().enter(workdir)?;
        for command in commands {
            ctx.command(&scope, command).envs(&self.env).execute().await?;
        }
        Ok(())
    }

    async fn install_packages(&self) -> Result<(), Error> {
        let packages = &self.builder.plan.packages;
        if packages.is_empty() {
            info!("no packages to install");
            return Ok(());
        }
        self.builder
            .ctx
            .install_packages(self.workspace()?.sandbox(), packages)
            .await
    }

    async fn sync_repository(&self, home: &Path) -> Result<(), Error> {
        let ctx = &self.builder.ctx;
        let repository = &self.builder.metadata.repository;
        let (workdir, commands) = if self.kind.is_fresh() {
            info!("cloning repository");
            (Path::new("/"), &repository.clone)
        } else {
            info!("updating repository");
            (home, &repository.update)
        };

        let scope = self.workspace()?.sandbox().enter(workdir)?;
        let destination = scope.resolve(home).display().to_string();
        for command in commands.iter() {
            ctx.command(&scope, command.replace(DESTINATION_PLACEHOLDER, &destination))
                .envs(&self.env)
                .envs(&repository.env)
                .execute()
                .await?;
        }
        Ok(())
    }

    async fn read_revision(&mut self, home: &Path) -> Result<(), Error> {
        let builder = self.builder;
        let repository = &builder.metadata.repository;
        let scope = self.workspace()?.sandbox().enter(home)?;

        let mut revision = self.result.revision.clone();
        revision.id = self.capture(&scope, &repository.info.revision, &[]).await?;
        revision.author = self.capture(&scope, &repository.info.author, &[]).await?;
        revision.date = self.capture(&scope, &repository.info.date, &[]).await?;
        revision.description = self.capture(&scope, &repository.info.description, &[]).await?;
        info!(revision = ?revision.id, author = ?revision.author, "repository revision");

        if let (Some(old), Some(new)) = (&self.request.previous_revision, &revision.id) {
            if old != new {
                let replacements = [(OLD_REVISION_PLACEHOLDER, old.as_str()), (NEW_REVISION_PLACEHOLDER, new.as_str())];
                revision.changelog = self.capture(&scope, &repository.changelog, &replacements).await?;
            }
        }
        drop(scope);
        self.result.revision = revision;
        Ok(())
    }

    /// Output of the last command of `script`, `None` when empty
    async fn capture(
        &self,
        scope: &SandboxScope<'_>,
        script: &Script,
        replacements: &[(&str, &str)],
    ) -> Result<Option<String>, Error> {
        let mut text = String::new();
        for command in script.iter() {
            let command = replacements
                .iter()
                .fold(command.clone(), |cmd, &(from, to)| cmd.replace(from, to));
            let output = self
                .builder
                .ctx
                .command(scope, command)
                .envs(&self.env)
                .envs(&self.builder.metadata.repository.env)
                .execute()
                .await?;
            text = output.text();
        }
        Ok(Some(text).filter(|text| !text.is_empty()))
    }

    async fn write_files(&self, home: &Path) -> Result<(), Error> {
        let files = &self.builder.metadata.files;
        if files.is_empty() {
            info!("no files to create");
            return Ok(());
        }
        let scope = self.workspace()?.sandbox().enter(home)?;
        for (path, content) in files {
            let target: PathBuf = scope.resolve(&home.join(path));
            info!(path = %path, "creating file");
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| Error::io_with_path(&e, parent))?;
            }
            tokio::fs::write(&target, content)
                .await
                .map_err(|e| Error::io_with_path(&e, &target))?;
        }
        Ok(())
    }

    async fn chown_home(&self, home: &Path) -> Result<(), Error> {
        let ctx = &self.builder.ctx;
        let apps = &ctx.config.apps;
        let scope = self.workspace()?.sandbox().enter(Path::new("/"))?;
        let command = format!(
            "chown -R {}:{} {}",
            apps.uid,
            apps.gid,
            scope.resolve(home).display()
        );
        ctx.command(&scope, command).execute().await?;
        Ok(())
    }

    async fn unmount(&self) -> Result<(), Error> {
        let timeout = self.builder.ctx.config.bootstrap.timeout();
        umount_filesystems(self.workspace()?.root(), timeout).await
    }

    async fn archive(&mut self) -> Result<(), Error> {
        let workspace = self.workspace()?;
        let bytes = pack(workspace.root(), &workspace.package_path()).await?;
        info!(size = %bytes_to_human(bytes), "package file created");
        self.result.bytes = bytes;
        Ok(())
    }

    async fn checksum(&mut self) -> Result<(), Error> {
        let checksum = calculate_file_sha256(&self.workspace()?.package_path()).await?;
        info!(checksum = %checksum, "package checksum");
        self.result.checksum = Some(checksum);
        Ok(())
    }

    async fn upload(&mut self) -> Result<(), Error> {
        let ctx = &self.builder.ctx;
        let checksum = self
            .result
            .checksum
            .clone()
            .ok_or_else(|| Error::internal("package checksum is missing"))?;
        ctx.upload(&self.workspace()?.package_path(), &checksum, self.result.bytes)
            .await?;

        if let Some(workspace) = self.workspace.take() {
            let dir = workspace.dir().to_path_buf();
            if let Err(e) = workspace.remove(&ctx.reaper).await {
                warn!(build_id = %self.build_id, error = %e, "workspace left behind after upload");
                ctx.emit_workspace_left_behind(&dir, e);
            }
        }

        self.result.filename = Some(checksum.clone());
        self.result.storage = Some(ctx.storage.name().to_string());
        info!(
            build_id = %self.build_id,
            package = %checksum,
            size = %bytes_to_human(self.result.bytes),
            elapsed = ?self.started.elapsed(),
            "package built"
        );
        ctx.emit(AppEvent::Build(BuildEvent::Completed {
            build_id: self.build_id,
            filename: checksum,
            bytes: self.result.bytes,
            duration: self.started.elapsed(),
        }));
        Ok(())
    }
}

impl Drop for BuildSession<'_> {
    fn drop(&mut self) {
        if let Some(workspace) = &self.workspace {
            warn!(
                build_id = %self.build_id,
                path = %workspace.dir().display(),
                "build session dropped without cleanup, workspace left behind"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_strictly_increases() {
        for kind in [BuildKind::Fresh, BuildKind::Incremental] {
            let mut stage = Stage::Prepare;
            while let Some(next) = stage.following(kind) {
                assert!(next.progress() > stage.progress(), "{stage} -> {next}");
                stage = next;
            }
            assert_eq!(stage, Stage::Upload);
            assert_eq!(stage.progress(), 100);
        }
    }

    #[test]
    fn revision_runs_only_on_incremental_builds() {
        assert_eq!(Stage::Repository.following(BuildKind::Fresh), Some(Stage::Files));
        assert_eq!(
            Stage::Repository.following(BuildKind::Incremental),
            Some(Stage::Revision)
        );
    }

    #[test]
    fn stage_classification() {
        assert!(Stage::Packages.is_user_stage());
        assert!(Stage::Application.is_user_stage());
        assert!(!Stage::Prepare.is_user_stage());
        assert!(!Stage::Upload.is_user_stage());
        assert_eq!(
            Stage::Repository.failure_message(BuildKind::Incremental),
            "Updating repository failed"
        );
    }
}
