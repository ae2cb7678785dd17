//! Filesystem backend

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;
use upaas_errors::{ConfigError, Error, StorageError};

use crate::Storage;

/// Settings of the `local` handler
#[derive(Debug, Clone, Deserialize)]
pub struct LocalSettings {
    /// Existing directory all keys are stored in
    pub dir: PathBuf,
}

/// Blobs stored as plain files below one directory
#[derive(Debug, Clone)]
pub struct LocalStorage {
    dir: PathBuf,
}

impl LocalStorage {
    pub const NAME: &'static str = "local";

    /// # Errors
    ///
    /// Returns `ConfigError::InvalidStorageSettings` if `dir` is not an
    /// existing directory.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, Error> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(ConfigError::InvalidStorageSettings {
                handler: Self::NAME.to_string(),
                message: format!("directory does not exist: {}", dir.display()),
            }
            .into());
        }
        Ok(Self { dir })
    }

    /// Construct from handler settings (`{"dir": "..."}`)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidStorageSettings` if the settings do not
    /// deserialize or the directory is missing.
    pub fn from_settings(settings: &serde_json::Value) -> Result<Self, Error> {
        let settings: LocalSettings =
            serde_json::from_value(settings.clone()).map_err(|e| ConfigError::InvalidStorageSettings {
                handler: Self::NAME.to_string(),
                message: e.to_string(),
            })?;
        Self::new(settings.dir)
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn join(&self, remote: &str) -> PathBuf {
        self.dir.join(remote.trim_start_matches('/'))
    }

    async fn existing(&self, remote: &str) -> Result<PathBuf, Error> {
        let path = self.join(remote);
        if fs::try_exists(&path).await.unwrap_or(false) {
            Ok(path)
        } else {
            Err(StorageError::FileNotFound {
                path: remote.to_string(),
            }
            .into())
        }
    }
}

#[async_trait]
impl Storage for LocalStorage {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn get(&self, remote: &str, local: &Path) -> Result<(), Error> {
        let source = self.existing(remote).await?;
        info!(from = %source.display(), to = %local.display(), "[GET] copying file");
        fs::copy(&source, local)
            .await
            .map_err(|e| StorageError::from_io_with_path(&e, local))?;
        Ok(())
    }

    async fn put(&self, local: &Path, remote: &str) -> Result<(), Error> {
        let dest = self.join(remote);
        info!(from = %local.display(), to = %dest.display(), "[PUT] copying file");
        fs::copy(local, &dest)
            .await
            .map_err(|e| StorageError::from_io_with_path(&e, local))?;
        Ok(())
    }

    async fn delete(&self, remote: &str) -> Result<(), Error> {
        let path = self.existing(remote).await?;
        info!(path = %path.display(), "[DELETE] removing file");
        fs::remove_file(&path)
            .await
            .map_err(|e| StorageError::from_io_with_path(&e, &path))?;
        Ok(())
    }

    async fn exists(&self, remote: &str) -> Result<bool, Error> {
        Ok(fs::try_exists(self.join(remote)).await.unwrap_or(false))
    }

    async fn size(&self, remote: &str) -> Result<u64, Error> {
        let path = self.existing(remote).await?;
        let metadata = fs::metadata(&path)
            .await
            .map_err(|e| StorageError::from_io_with_path(&e, &path))?;
        Ok(metadata.len())
    }

    async fn mtime(&self, remote: &str) -> Result<DateTime<Utc>, Error> {
        let path = self.existing(remote).await?;
        let modified = fs::metadata(&path)
            .await
            .and_then(|metadata| metadata.modified())
            .map_err(|e| StorageError::from_io_with_path(&e, &path))?;
        Ok(DateTime::<Utc>::from(modified))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_joined_below_dir() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).unwrap();
        assert_eq!(storage.join("/abc"), dir.path().join("abc"));
        assert_eq!(storage.join("debian-12-x86_64.tar.gz"), dir.path().join("debian-12-x86_64.tar.gz"));
    }

    #[test]
    fn missing_dir_is_rejected() {
        let err = LocalStorage::new("/nonexistent/upaas-storage").unwrap_err();
        assert!(matches!(
            err,
            Error::Config(ConfigError::InvalidStorageSettings { .. })
        ));
    }
}
