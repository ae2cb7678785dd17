//! Mount table inspection and unmounting

use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::mount::{umount2, MntFlags};
use tracing::{info, warn};
use upaas_errors::{Error, PlatformError};

/// Kernel mount table of the current process
pub const MOUNTS_FILE: &str = "/proc/self/mounts";

/// One line of the mount table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub source: String,
    pub target: PathBuf,
    pub fstype: String,
}

/// Parse `/proc/self/mounts` content. Octal escapes such as `\040` in the
/// source and target fields are decoded.
#[must_use]
pub fn parse_mounts(content: &str) -> Vec<MountEntry> {
    content
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let source = fields.next()?;
            let target = fields.next()?;
            let fstype = fields.next()?;
            Some(MountEntry {
                source: decode_octal(source),
                target: PathBuf::from(decode_octal(target)),
                fstype: fstype.to_string(),
            })
        })
        .collect()
}

fn decode_octal(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() {
            let value = std::str::from_utf8(&bytes[i + 1..i + 4])
                .ok()
                .and_then(|digits| u8::from_str_radix(digits, 8).ok());
            if let Some(value) = value {
                out.push(value);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Mount points located under `dir`, deepest first. Stacked mounts appear
/// once per mount.
///
/// # Errors
///
/// Returns an error if the mount table cannot be read.
pub async fn mounted_under(dir: &Path) -> Result<Vec<PathBuf>, Error> {
    let content = tokio::fs::read_to_string(MOUNTS_FILE)
        .await
        .map_err(|e| Error::io_with_path(&e, MOUNTS_FILE))?;
    let dir = tokio::fs::canonicalize(dir)
        .await
        .unwrap_or_else(|_| dir.to_path_buf());
    Ok(mounts_below(&parse_mounts(&content), &dir))
}

fn mounts_below(entries: &[MountEntry], dir: &Path) -> Vec<PathBuf> {
    let mut targets: Vec<PathBuf> = entries
        .iter()
        .filter(|entry| entry.target.starts_with(dir))
        .map(|entry| entry.target.clone())
        .collect();
    targets.sort_by_key(|target| std::cmp::Reverse(target.components().count()));
    targets
}

/// Unmount every filesystem mounted under `dir`, deepest first. Each
/// unmount is bounded by `timeout` and retried lazily (`MNT_DETACH`) when
/// the regular unmount fails or hangs.
///
/// # Errors
///
/// Returns the first `PlatformError::UnmountFailed` after attempting every
/// mount point.
pub async fn umount_filesystems(dir: &Path, timeout: Duration) -> Result<(), Error> {
    let mut first_error = None;
    for target in mounted_under(dir).await? {
        info!(path = %target.display(), "unmounting filesystem");
        if let Err(e) = umount_one(&target, timeout).await {
            warn!(path = %target.display(), error = %e, "unmount failed");
            first_error.get_or_insert(e);
        }
    }
    match first_error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

async fn umount_one(target: &Path, timeout: Duration) -> Result<(), PlatformError> {
    let failed = |message: String| PlatformError::UnmountFailed {
        path: target.display().to_string(),
        message,
    };

    let path = target.to_path_buf();
    let regular = tokio::task::spawn_blocking(move || umount2(&path, MntFlags::empty()));
    match tokio::time::timeout(timeout, regular).await {
        Ok(Ok(Ok(()))) => return Ok(()),
        Ok(Ok(Err(e))) => warn!(path = %target.display(), error = %e, "regular unmount failed, detaching"),
        Ok(Err(e)) => return Err(failed(e.to_string())),
        Err(_) => warn!(path = %target.display(), "unmount timed out, detaching"),
    }

    let path = target.to_path_buf();
    tokio::task::spawn_blocking(move || umount2(&path, MntFlags::MNT_DETACH))
        .await
        .map_err(|e| failed(e.to_string()))?
        .map_err(|e| failed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MOUNTS: &str = "\
sysfs /sys sysfs rw,nosuid,nodev,noexec,relatime 0 0
proc /srv/build/proc proc rw,nosuid,nodev,noexec,relatime 0 0
devpts /srv/build/dev/pts devpts rw 0 0
udev /srv/build/dev devtmpfs rw 0 0
/dev/sdb1 /srv/build\\040old ext4 rw 0 0
tmpfs /srv/builder tmpfs rw 0 0
";

    #[test]
    fn decodes_escaped_paths() {
        let entries = parse_mounts(MOUNTS);
        assert_eq!(entries.len(), 6);
        assert_eq!(entries[4].target, Path::new("/srv/build old"));
        assert_eq!(entries[1].fstype, "proc");
    }

    #[test]
    fn selects_nested_mounts_deepest_first() {
        let targets = mounts_below(&parse_mounts(MOUNTS), Path::new("/srv/build"));
        assert_eq!(targets[0], Path::new("/srv/build/dev/pts"));
        assert_eq!(targets.len(), 3);
        assert!(!targets.contains(&PathBuf::from("/srv/builder")));
        assert!(!targets.contains(&PathBuf::from("/srv/build old")));
    }

    #[tokio::test]
    async fn nothing_mounted_in_fresh_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(mounted_under(dir.path()).await.unwrap().is_empty());
        umount_filesystems(dir.path(), Duration::from_secs(1))
            .await
            .unwrap();
    }
}
