/*!
Tests for run results, digests and archive integrity checks.
*/

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::Write;

    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    use crate::metadata::{compute_hash, hash_file, BackupResult, DigestWriter};
    use crate::BackupError;

    fn result_for(path: std::path::PathBuf, sha256: String) -> BackupResult {
        let started_at = Utc::now();
        BackupResult {
            object_count: 2,
            archive_name: "cluster-backup-20250101-000000.tar.gz".to_string(),
            archive_size: fs::metadata(&path).map(|m| m.len()).unwrap_or(0),
            archive_path: path,
            sha256,
            compression_algorithm: "gzip".to_string(),
            started_at,
            completed_at: started_at + Duration::seconds(3),
        }
    }

    #[test]
    fn test_known_digest() {
        assert_eq!(
            compute_hash(b"test data"),
            "916f0027a575074ce72a331777c3478d6513f786a591bd892da1a577bf2335f9"
        );
    }

    #[test]
    fn test_digest_writer_matches_buffered_hash() {
        let mut writer = DigestWriter::new(Vec::new());
        writer.write_all(b"test ").unwrap();
        writer.write_all(b"data").unwrap();
        assert_eq!(writer.bytes_written(), 9);

        let (inner, digest, bytes) = writer.finish().unwrap();
        assert_eq!(inner, b"test data");
        assert_eq!(digest, compute_hash(b"test data"));
        assert_eq!(bytes, 9);
    }

    #[test]
    fn test_hash_file_matches_content_hash() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("archive.bin");
        let data = vec![7u8; 200_000];
        fs::write(&path, &data).unwrap();

        assert_eq!(hash_file(&path).unwrap(), compute_hash(&data));
    }

    #[test]
    fn test_integrity_verification() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("archive.tar.gz");
        fs::write(&path, b"archive bytes").unwrap();

        let result = result_for(path.clone(), compute_hash(b"archive bytes"));
        assert!(result.verify_integrity().is_ok());
        assert_eq!(result.duration(), Duration::seconds(3));

        fs::write(&path, b"tampered").unwrap();
        let err = result.verify_integrity().unwrap_err();
        assert!(matches!(err, BackupError::IntegrityCheckFailed { .. }));
    }

    #[test]
    fn test_result_serialization_roundtrip() {
        let result = result_for("/backups/archive.tar.gz".into(), "abcd".to_string());
        let json = serde_json::to_string(&result).unwrap();
        let back: BackupResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
    }
}
