//! Integration tests for hash crate

#[cfg(test)]
mod tests {
    use tempfile::tempdir;
    use tokio::fs;
    use upaas_hash::*;

    #[tokio::test]
    async fn test_file_checksum_matches_string_checksum() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("test.txt");

        // larger than one read chunk
        let content = "upaas".repeat(40_000);
        fs::write(&file_path, &content).await.unwrap();

        let from_file = calculate_file_sha256(&file_path).await.unwrap();
        assert_eq!(from_file, calculate_string_sha256(&content));
        assert_eq!(from_file.len(), 64);
    }

    #[tokio::test]
    async fn test_verify_file() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("test.txt");
        fs::write(&file_path, b"verify this content").await.unwrap();

        let good = Checksum::from_data(b"verify this content");
        assert!(verify_file(&file_path, &good).await.unwrap());

        let wrong = Checksum::from_data(b"different content");
        assert!(!verify_file(&file_path, &wrong).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_file() {
        let dir = tempdir().unwrap();
        let err = calculate_file_sha256(&dir.path().join("nope"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            upaas_errors::Error::Storage(upaas_errors::StorageError::FileNotFound { .. })
        ));
    }
}
