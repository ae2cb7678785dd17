//! Build directory teardown
//!
//! Kills every process still using a directory, unmounts whatever is
//! mounted below it and removes the tree.

use std::path::Path;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, error, info, warn};
use upaas_errors::Error;

use crate::mounts::umount_filesystems;
use crate::process::{directory_pids, kill_pid};

/// Discovery rounds before surviving processes are left behind
const MAX_ROUNDS: usize = 16;

/// Teardown settings
#[derive(Debug, Clone)]
pub struct Reaper {
    term_timeout: Duration,
    umount_timeout: Duration,
}

impl Default for Reaper {
    fn default() -> Self {
        Self {
            term_timeout: Duration::from_secs(60),
            umount_timeout: Duration::from_secs(30),
        }
    }
}

impl Reaper {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Time a process gets to exit after SIGTERM before SIGKILL is sent
    #[must_use]
    pub fn with_term_timeout(mut self, timeout: Duration) -> Self {
        self.term_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_umount_timeout(mut self, timeout: Duration) -> Self {
        self.umount_timeout = timeout;
        self
    }

    /// Kill processes using `dir`, unmount nested filesystems and remove
    /// the directory. A missing directory is not an error, and unmount
    /// failures are logged without preventing removal.
    ///
    /// # Errors
    ///
    /// Returns an error only if the directory tree cannot be removed.
    pub async fn kill_and_remove_dir(&self, dir: &Path) -> Result<(), Error> {
        if !tokio::fs::try_exists(dir).await.unwrap_or(false) {
            debug!(dir = %dir.display(), "no such directory, nothing to reap");
            return Ok(());
        }

        self.kill_processes(dir).await;

        if let Err(e) = umount_filesystems(dir, self.umount_timeout).await {
            error!(dir = %dir.display(), error = %e, "error while unmounting filesystems inside directory");
        }

        info!(dir = %dir.display(), "removing directory");
        match tokio::fs::remove_dir_all(dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io_with_path(&e, dir)),
        }
    }

    async fn kill_processes(&self, dir: &Path) {
        let own = std::process::id();
        for _ in 0..MAX_ROUNDS {
            let scan_dir = dir.to_path_buf();
            let pids = match tokio::task::spawn_blocking(move || directory_pids(&scan_dir)).await {
                Ok(pids) => pids,
                Err(e) => {
                    warn!(error = %e, "process scan failed");
                    return;
                }
            };
            let pids: Vec<i32> = pids
                .into_iter()
                .filter(|pid| u32::try_from(*pid).map_or(true, |pid| pid != own))
                .collect();
            if pids.is_empty() {
                return;
            }
            info!(dir = %dir.display(), count = pids.len(), "terminating processes");
            join_all(pids.into_iter().map(|pid| kill_pid(pid, self.term_timeout))).await;
        }
        warn!(dir = %dir.display(), "processes still running after {MAX_ROUNDS} rounds");
    }
}

/// [`Reaper::kill_and_remove_dir`] with default timeouts
///
/// # Errors
///
/// Returns an error if the directory tree cannot be removed.
pub async fn kill_and_remove_dir(dir: &Path) -> Result<(), Error> {
    Reaper::default().kill_and_remove_dir(dir).await
}
