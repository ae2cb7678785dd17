#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Blob storage for OS images and built packages
//!
//! Every backend implements [`Storage`]. Keys are opaque strings: either a
//! distribution image filename or the hex checksum of a package archive.
//! Backends are looked up by handler name through a [`StorageRegistry`].

mod gridfs;
mod local;
mod registry;

pub use gridfs::{MongoDbSettings, MongoDbStorage};
pub use local::{LocalSettings, LocalStorage};
pub use registry::{StorageFactory, StorageRegistry};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;
use upaas_errors::Error;

/// Blob store capability set
#[async_trait]
pub trait Storage: Send + Sync + std::fmt::Debug {
    /// Handler name the backend is registered under
    fn name(&self) -> &'static str;

    /// Download `remote` into the local file `local`
    async fn get(&self, remote: &str, local: &Path) -> Result<(), Error>;

    /// Upload the local file `local` as `remote`
    async fn put(&self, local: &Path, remote: &str) -> Result<(), Error>;

    async fn delete(&self, remote: &str) -> Result<(), Error>;

    async fn exists(&self, remote: &str) -> Result<bool, Error>;

    /// Size of a stored blob in bytes
    async fn size(&self, remote: &str) -> Result<u64, Error>;

    /// Modification time of a stored blob (upload time for document stores)
    async fn mtime(&self, remote: &str) -> Result<DateTime<Utc>, Error>;
}
