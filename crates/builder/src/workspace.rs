//! Temporary build directories

use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use upaas_errors::Error;
use upaas_platform::{Reaper, Sandbox};
use upaas_types::SandboxMode;

/// Private directory holding the build root (`workdir`) plus the files
/// produced around it. Never removed implicitly: call [`Workspace::remove`].
#[derive(Debug)]
pub struct Workspace {
    dir: PathBuf,
    sandbox: Sandbox,
}

impl Workspace {
    /// Create `<parent>/<prefix>XXXXXX/workdir`
    ///
    /// # Errors
    ///
    /// Returns an error if the directories cannot be created.
    pub fn create(parent: &Path, prefix: &str, mode: SandboxMode) -> Result<Self, Error> {
        let dir = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir_in(parent)
            .map_err(|e| Error::io_with_path(&e, parent))?
            .keep();
        let root = dir.join("workdir");
        std::fs::DirBuilder::new()
            .mode(0o755)
            .create(&root)
            .map_err(|e| Error::io_with_path(&e, &root))?;
        info!(path = %root.display(), "working directory created");
        Ok(Self {
            sandbox: Sandbox::new(root, mode),
            dir,
        })
    }

    /// Top level directory
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Build root, the directory that gets archived
    #[must_use]
    pub fn root(&self) -> &Path {
        self.sandbox.root()
    }

    #[must_use]
    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    /// Download location of the parent image
    #[must_use]
    pub fn image_path(&self) -> PathBuf {
        self.dir.join("os.image")
    }

    /// Location of the packed build root
    #[must_use]
    pub fn package_path(&self) -> PathBuf {
        self.dir.join("package")
    }

    /// Empty the build root, keeping the directory itself
    ///
    /// # Errors
    ///
    /// Returns an error if the tree cannot be removed or recreated.
    pub async fn clear_root(&self) -> Result<(), Error> {
        let root = self.root();
        tokio::fs::remove_dir_all(root)
            .await
            .map_err(|e| Error::io_with_path(&e, root))?;
        std::fs::DirBuilder::new()
            .mode(0o755)
            .create(root)
            .map_err(|e| Error::io_with_path(&e, root))
    }

    /// Kill leftover processes, unmount and delete everything
    ///
    /// # Errors
    ///
    /// Returns an error if the directory tree cannot be removed.
    pub async fn remove(self, reaper: &Reaper) -> Result<(), Error> {
        let result = reaper.kill_and_remove_dir(&self.dir).await;
        if let Err(e) = &result {
            warn!(path = %self.dir.display(), error = %e, "failed to remove workspace");
        }
        result
    }
}
