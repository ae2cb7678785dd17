//! Gzip compressed tar archives of build trees

use std::fs::File;
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use nix::unistd::geteuid;
use tracing::{debug, warn};
use upaas_errors::{Error, PlatformError};

/// Pack the contents of `dir` into a `.tar.gz` at `archive`. Entries are
/// stored relative to `dir`, symlinks are kept as links. Returns the size
/// of the archive in bytes. A partially written archive is removed on error.
///
/// # Errors
///
/// Returns `PlatformError::ArchiveFailed` if packing fails.
pub async fn pack(dir: &Path, archive: &Path) -> Result<u64, Error> {
    debug!(dir = %dir.display(), archive = %archive.display(), "packing archive");
    let (dir, archive) = (dir.to_path_buf(), archive.to_path_buf());
    let result = tokio::task::spawn_blocking(move || {
        let outcome = pack_blocking(&dir, &archive);
        if outcome.is_err() {
            match std::fs::remove_file(&archive) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => warn!(archive = %archive.display(), error = %e, "could not remove incomplete archive"),
                _ => {}
            }
        }
        outcome
    })
    .await
    .map_err(|e| Error::internal(format!("pack task failed: {e}")))?;
    result.map_err(|e| archive_error("pack", &e).into())
}

fn pack_blocking(dir: &Path, archive: &Path) -> std::io::Result<u64> {
    let file = File::create(archive)?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    builder.follow_symlinks(false);
    builder.append_dir_all(".", dir)?;
    builder.into_inner()?.finish()?.sync_all()?;
    Ok(std::fs::metadata(archive)?.len())
}

/// Unpack a `.tar.gz` into `dest`, preserving permissions. Ownership is
/// preserved only when running as root.
///
/// # Errors
///
/// Returns `PlatformError::ArchiveFailed` if the archive cannot be read or
/// extracted.
pub async fn unpack(archive: &Path, dest: &Path) -> Result<(), Error> {
    debug!(archive = %archive.display(), dest = %dest.display(), "unpacking archive");
    let (archive, dest) = (archive.to_path_buf(), dest.to_path_buf());
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let file = File::open(&archive)?;
        let mut tar = tar::Archive::new(GzDecoder::new(file));
        tar.set_preserve_permissions(true);
        tar.set_preserve_ownerships(geteuid().is_root());
        tar.set_overwrite(true);
        tar.unpack(&dest)
    })
    .await
    .map_err(|e| Error::internal(format!("unpack task failed: {e}")))?
    .map_err(|e| archive_error("unpack", &e).into())
}

fn archive_error(operation: &str, err: &std::io::Error) -> PlatformError {
    PlatformError::ArchiveFailed {
        operation: operation.to_string(),
        message: err.to_string(),
    }
}
