/*!
Run results and archive metadata.
*/

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{BackupError, Result};

/// An archive file found at a destination.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ArchiveInfo {
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified: DateTime<Utc>,
}

/// Outcome of a successful backup run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BackupResult {
    /// Number of objects written into the archive (may be zero)
    pub object_count: usize,

    /// File name of the archive inside the destination directory
    pub archive_name: String,

    /// Full path of the archive
    pub archive_path: PathBuf,

    /// Size of the compressed archive in bytes
    pub archive_size: u64,

    /// SHA-256 of the archive file, hex encoded
    pub sha256: String,

    /// Compression algorithm of the container
    pub compression_algorithm: String,

    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl BackupResult {
    pub fn duration(&self) -> chrono::Duration {
        self.completed_at - self.started_at
    }

    /// Re-hash the archive on disk and compare it with the recorded digest.
    pub fn verify_integrity(&self) -> Result<()> {
        let actual = hash_file(&self.archive_path)?;
        if actual == self.sha256 {
            Ok(())
        } else {
            Err(BackupError::IntegrityCheckFailed {
                expected: self.sha256.clone(),
                actual,
            })
        }
    }
}

/// Outcome of a successful restore run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RestoreResult {
    pub archive_name: String,

    /// Objects created or updated
    pub applied: usize,
    pub created: usize,
    pub updated: usize,

    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// Compute SHA-256 of the provided data as lowercase hex.
pub fn compute_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Compute SHA-256 of a file as lowercase hex.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Writer that hashes and counts everything passing through it.
pub struct DigestWriter<W: Write> {
    inner: W,
    hasher: Sha256,
    bytes_written: u64,
}

impl<W: Write> DigestWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            bytes_written: 0,
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Flush and return the inner writer, the hex digest and the byte count.
    pub fn finish(mut self) -> io::Result<(W, String, u64)> {
        self.inner.flush()?;
        let digest = format!("{:x}", self.hasher.finalize());
        Ok((self.inner, digest, self.bytes_written))
    }
}

impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.hasher.update(&buf[..written]);
        self.bytes_written += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
