//! Scoped `chroot(2)` jail
//!
//! Entering saves the real root as an open directory handle together with
//! the working directory and umask. Dropping the guard restores all three.
//! The root directory is process wide, so only one jail may be active at a time.

use std::fs::File;
use std::os::fd::AsRawFd;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use nix::sys::stat::{umask, Mode};
use nix::unistd::{chdir, chroot, fchdir};
use tracing::{debug, warn};
use upaas_errors::PlatformError;

/// Default umask inside a jail
pub const DEFAULT_UMASK: u32 = 0o022;

/// Active jail. The real root is restored when the guard is dropped.
#[derive(Debug)]
pub struct ChrootGuard {
    root: PathBuf,
    realroot: Option<File>,
    realdir: PathBuf,
    old_umask: Mode,
}

impl ChrootGuard {
    /// Change root to `root` and the working directory to `workdir`
    /// (a path inside the jail), installing `mask` as the umask.
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::ChrootFailed` if the current state cannot be
    /// saved, `chroot(2)` fails or `workdir` does not exist inside the jail.
    /// A failed `chdir` leaves the jail again before returning.
    pub fn enter(root: &Path, workdir: &Path, mask: Mode) -> Result<Self, PlatformError> {
        debug!(root = %root.display(), workdir = %workdir.display(), "entering chroot");
        let failed = |message: String| PlatformError::ChrootFailed {
            root: root.display().to_string(),
            message,
        };

        let realdir = std::env::current_dir().map_err(|e| failed(e.to_string()))?;
        let realroot = File::open("/").map_err(|e| failed(e.to_string()))?;
        chroot(root).map_err(|e| failed(e.to_string()))?;

        let guard = Self {
            root: root.to_path_buf(),
            realroot: Some(realroot),
            realdir,
            old_umask: umask(mask),
        };
        chdir(workdir).map_err(|e| failed(format!("chdir {}: {e}", workdir.display())))?;
        Ok(guard)
    }

    /// Host path of the jail
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Leave the jail by walking up past its boundary from the real root
    /// handle, then restore the saved state
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::ChrootFailed` if the walk or the final
    /// `chroot(".")` fails.
    pub fn escape(mut self) -> Result<(), PlatformError> {
        let Some(realroot) = self.realroot.take() else {
            return Ok(());
        };
        let failed = |message: String| PlatformError::ChrootFailed {
            root: self.root.display().to_string(),
            message,
        };
        if fchdir(realroot.as_raw_fd()).is_err() {
            return Ok(());
        }
        loop {
            let current = std::fs::metadata(".").map_err(|e| failed(e.to_string()))?;
            let parent = std::fs::metadata("..").map_err(|e| failed(e.to_string()))?;
            if current.dev() == parent.dev() && current.ino() == parent.ino() {
                break;
            }
            chdir("..").map_err(|e| failed(e.to_string()))?;
        }
        chroot(".").map_err(|e| failed(e.to_string()))?;
        self.restore_cwd_and_umask();
        debug!(root = %self.root.display(), "escaped from chroot");
        Ok(())
    }

    fn restore(&mut self) {
        let Some(realroot) = self.realroot.take() else {
            return;
        };
        // An invalid handle means the jail was already left
        if fchdir(realroot.as_raw_fd()).is_err() {
            return;
        }
        if let Err(e) = chroot(".") {
            warn!(root = %self.root.display(), error = %e, "failed to restore real root");
            return;
        }
        self.restore_cwd_and_umask();
        debug!(root = %self.root.display(), "exited from chroot");
    }

    fn restore_cwd_and_umask(&self) {
        if let Err(e) = chdir(&self.realdir) {
            warn!(dir = %self.realdir.display(), error = %e, "failed to restore working directory");
        }
        umask(self.old_umask);
    }
}

impl Drop for ChrootGuard {
    fn drop(&mut self) {
        self.restore();
    }
}

/// Umask value from its octal representation
#[must_use]
pub fn mode_from_octal(bits: u32) -> Mode {
    Mode::from_bits_truncate(bits)
}
