#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! SHA-256 content addressing for upaas
//!
//! Built packages are stored under the hex digest of their archive, which
//! doubles as the integrity checksum reported with the build result.

use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use upaas_errors::{Error, StorageError};

/// Size of chunks for streaming hash computation
const CHUNK_SIZE: usize = 64 * 1024; // 64KB

/// A SHA-256 hash value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Checksum {
    bytes: [u8; 32],
}

impl Checksum {
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    /// Parse from hex string
    ///
    /// # Errors
    /// Returns an error if the input is not valid hexadecimal or is not exactly 64 characters.
    pub fn from_hex(s: &str) -> Result<Self, Error> {
        let bytes = hex::decode(s).map_err(|e| StorageError::IoError {
            message: format!("invalid hex checksum: {e}"),
        })?;

        let array: [u8; 32] = bytes.try_into().map_err(|bytes: Vec<u8>| StorageError::IoError {
            message: format!("checksum must be 32 bytes, got {}", bytes.len()),
        })?;
        Ok(Self::from_bytes(array))
    }

    /// Compute hash of a byte slice
    #[must_use]
    pub fn from_data(data: &[u8]) -> Self {
        Self::from_bytes(Sha256::digest(data).into())
    }

    /// Compute hash of a file, streaming it in chunks
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or read.
    pub async fn hash_file(path: &Path) -> Result<Self, Error> {
        let mut file = File::open(path)
            .await
            .map_err(|e| StorageError::from_io_with_path(&e, path))?;

        let mut hasher = Sha256::new();
        let mut buffer = vec![0; CHUNK_SIZE];

        loop {
            let n = file
                .read(&mut buffer)
                .await
                .map_err(|e| StorageError::from_io_with_path(&e, path))?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }

        Ok(Self::from_bytes(hasher.finalize().into()))
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Hex SHA-256 digest of a file
///
/// # Errors
/// Returns an error if the file cannot be read.
pub async fn calculate_file_sha256(path: &Path) -> Result<String, Error> {
    Ok(Checksum::hash_file(path).await?.to_hex())
}

/// Hex SHA-256 digest of a string
#[must_use]
pub fn calculate_string_sha256(content: &str) -> String {
    Checksum::from_data(content.as_bytes()).to_hex()
}

/// Verify a file against an expected checksum
///
/// # Errors
/// Returns an error if the file cannot be read.
pub async fn verify_file(path: &Path, expected: &Checksum) -> Result<bool, Error> {
    Ok(&Checksum::hash_file(path).await? == expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn string_digest() {
        assert_eq!(calculate_string_sha256(""), EMPTY);
        assert_eq!(
            calculate_string_sha256("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn hex_roundtrip() {
        let checksum = Checksum::from_hex(EMPTY).unwrap();
        assert_eq!(checksum.to_string(), EMPTY);
        assert!(Checksum::from_hex("1234").is_err());
        assert!(Checksum::from_hex("zz").is_err());
    }
}
