//! Build sandboxes
//!
//! A sandbox is a directory tree every build command runs in. In
//! [`SandboxMode::Chroot`] the process root is switched with `chroot(2)`
//! for the lifetime of a [`SandboxScope`]. In [`SandboxMode::Directory`]
//! nothing global changes and jail paths are translated to host paths under
//! the sandbox root.

use std::path::{Component, Path, PathBuf};

use tracing::debug;
use upaas_errors::{Error, PlatformError};
use upaas_types::SandboxMode;

use crate::chroot::{mode_from_octal, ChrootGuard, DEFAULT_UMASK};
use crate::command::ShellCommand;

/// Root directory of a build plus the isolation mode used to enter it
#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
    mode: SandboxMode,
    umask: u32,
}

impl Sandbox {
    pub fn new(root: impl Into<PathBuf>, mode: SandboxMode) -> Self {
        Self {
            root: root.into(),
            mode,
            umask: DEFAULT_UMASK,
        }
    }

    #[must_use]
    pub fn with_umask(mut self, umask: u32) -> Self {
        self.umask = umask;
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn mode(&self) -> SandboxMode {
        self.mode
    }

    /// Host path of a path inside the jail
    #[must_use]
    pub fn host_path(&self, path: &Path) -> PathBuf {
        let relative: PathBuf = path
            .components()
            .filter(|c| matches!(c, Component::Normal(_)))
            .collect();
        self.root.join(relative)
    }

    /// Path a sandboxed process uses to reach `path` inside the jail: the
    /// path itself under `chroot(2)`, the host path in directory mode
    #[must_use]
    pub fn jail_path(&self, path: &Path) -> PathBuf {
        match self.mode {
            SandboxMode::Chroot => path.to_path_buf(),
            SandboxMode::Directory => self.host_path(path),
        }
    }

    /// Enter the sandbox with `workdir` (a jail path) as working directory.
    /// The working directory is created when missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the working directory cannot be created or the
    /// jail cannot be entered.
    pub fn enter(&self, workdir: &Path) -> Result<SandboxScope<'_>, Error> {
        let host_workdir = self.host_path(workdir);
        std::fs::create_dir_all(&host_workdir).map_err(|e| PlatformError::FilesystemOperationFailed {
            operation: format!("create {}", host_workdir.display()),
            message: e.to_string(),
        })?;

        let guard = match self.mode {
            SandboxMode::Chroot => Some(ChrootGuard::enter(
                &self.root,
                workdir,
                mode_from_octal(self.umask),
            )?),
            SandboxMode::Directory => {
                debug!(root = %self.root.display(), workdir = %workdir.display(), "entering directory sandbox");
                None
            }
        };
        Ok(SandboxScope {
            sandbox: self,
            workdir: workdir.to_path_buf(),
            guard,
        })
    }
}

/// Active sandbox. Leaving the scope restores the previous root.
#[derive(Debug)]
pub struct SandboxScope<'a> {
    sandbox: &'a Sandbox,
    workdir: PathBuf,
    guard: Option<ChrootGuard>,
}

impl SandboxScope<'_> {
    /// Path a process in this scope must use to reach `path` inside the jail
    #[must_use]
    pub fn resolve(&self, path: &Path) -> PathBuf {
        self.sandbox.jail_path(path)
    }

    /// Working directory of commands in this scope
    #[must_use]
    pub fn cwd(&self) -> PathBuf {
        self.resolve(&self.workdir)
    }

    /// Command running in the scope's working directory
    pub fn command(&self, command: impl Into<String>) -> ShellCommand {
        ShellCommand::new(command).cwd(self.cwd())
    }

    /// Leave the jail past its boundary instead of the saved root handle
    ///
    /// # Errors
    ///
    /// Returns an error if escaping the chroot fails.
    pub fn escape(mut self) -> Result<(), Error> {
        if let Some(guard) = self.guard.take() {
            guard.escape()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_path_ignores_absolute_and_parent_components() {
        let sandbox = Sandbox::new("/srv/build", SandboxMode::Directory);
        assert_eq!(
            sandbox.host_path(Path::new("/home/app")),
            Path::new("/srv/build/home/app")
        );
        assert_eq!(
            sandbox.host_path(Path::new("/../etc/passwd")),
            Path::new("/srv/build/etc/passwd")
        );
        assert_eq!(sandbox.host_path(Path::new("/")), Path::new("/srv/build"));
    }

    #[tokio::test]
    async fn directory_scope_runs_in_workdir() {
        let root = tempfile::tempdir().unwrap();
        let sandbox = Sandbox::new(root.path(), SandboxMode::Directory);
        let before = std::env::current_dir().unwrap();
        {
            let scope = sandbox.enter(Path::new("/home/app")).unwrap();
            assert_eq!(scope.cwd(), root.path().join("home/app"));
            let out = scope.command("pwd").execute().await.unwrap();
            let expected = root.path().canonicalize().unwrap().join("home/app");
            assert_eq!(out.lines, vec![format!("{}\n", expected.display())]);
        }
        assert!(root.path().join("home/app").is_dir());
        assert_eq!(std::env::current_dir().unwrap(), before);
    }
}
