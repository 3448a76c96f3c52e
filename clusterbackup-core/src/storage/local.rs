/*!
Local filesystem archive store.
*/

use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::metadata::ArchiveInfo;
use crate::{BackupError, Result};

/// File name prefix shared by every archive.
pub const ARCHIVE_PREFIX: &str = "cluster-backup-";

/// Timestamp layout used in archive names. Fixed width, so name order is
/// chronological order.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Archive file name for a run started at `started_at`.
///
/// # Example
/// ```rust
/// use chrono::{TimeZone, Utc};
/// use clusterbackup_core::storage::archive_file_name;
///
/// let started = Utc.with_ymd_and_hms(2025, 3, 9, 14, 5, 0).unwrap();
/// assert_eq!(archive_file_name(started, "tar.gz"), "cluster-backup-20250309-140500.tar.gz");
/// ```
pub fn archive_file_name(started_at: DateTime<Utc>, extension: &str) -> String {
    format!(
        "{ARCHIVE_PREFIX}{}.{extension}",
        started_at.format(TIMESTAMP_FORMAT)
    )
}

/// Archives of one format kept in one directory.
///
/// The directory is created on the first write and never removed. Only
/// files named `cluster-backup-*.<extension>` are treated as archives.
#[derive(Debug, Clone)]
pub struct LocalArchiveStore {
    dir: PathBuf,
    extension: String,
}

impl LocalArchiveStore {
    pub fn new<P: Into<PathBuf>, E: Into<String>>(dir: P, extension: E) -> Self {
        Self {
            dir: dir.into(),
            extension: extension.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_of(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    fn is_archive_name(&self, name: &str) -> bool {
        name.strip_prefix(ARCHIVE_PREFIX)
            .and_then(|rest| rest.strip_suffix(self.extension.as_str()))
            .is_some_and(|stem| stem.len() > 1 && stem.ends_with('.'))
    }

    /// Create the directory if it does not exist yet.
    pub fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            BackupError::storage(format!(
                "Failed to create directory {}: {}",
                self.dir.display(),
                e
            ))
        })
    }

    /// Archives in the directory, oldest first.
    ///
    /// A missing directory holds no archives.
    pub fn list(&self) -> Result<Vec<ArchiveInfo>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(BackupError::storage(format!(
                    "Failed to read directory {}: {}",
                    self.dir.display(),
                    e
                )))
            }
        };

        let mut archives = Vec::new();
        for entry in entries {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !self.is_archive_name(&name) {
                continue;
            }
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            if !metadata.is_file() {
                continue;
            }
            archives.push(ArchiveInfo {
                path: entry.path(),
                name,
                size_bytes: metadata.len(),
                modified: DateTime::<Utc>::from(metadata.modified()?),
            });
        }

        archives.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(archives)
    }

    /// Fail with [`BackupError::ArchiveExists`] if `name` is already taken.
    ///
    /// Lets a run detect a name collision before doing any work. [`create`]
    /// still refuses to overwrite if the name is taken in between.
    ///
    /// [`create`]: LocalArchiveStore::create
    pub fn ensure_available(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        let path = self.path_of(name);
        match fs::symlink_metadata(&path) {
            Ok(_) => Err(BackupError::ArchiveExists(path.display().to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BackupError::storage(format!(
                "Failed to inspect archive {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Create a new archive file. Existing archives are never overwritten.
    pub fn create(&self, name: &str) -> Result<File> {
        validate_name(name)?;
        self.ensure_dir()?;
        let path = self.path_of(name);
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => BackupError::ArchiveExists(path.display().to_string()),
                _ => BackupError::storage(format!(
                    "Failed to create archive {}: {}",
                    path.display(),
                    e
                )),
            })
    }

    pub fn open(&self, name: &str) -> Result<File> {
        validate_name(name)?;
        let path = self.path_of(name);
        File::open(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => BackupError::ArchiveNotFound(path.display().to_string()),
            _ => BackupError::storage(format!("Failed to open archive {}: {}", path.display(), e)),
        })
    }

    /// Delete an archive. Returns `false` if it was already gone.
    pub fn delete(&self, name: &str) -> Result<bool> {
        validate_name(name)?;
        match fs::remove_file(self.path_of(name)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(source) => Err(BackupError::Retention {
                file: name.to_string(),
                source,
            }),
        }
    }
}

/// Archive names are plain file names inside the destination directory.
fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(BackupError::validation("archive name must not be empty"));
    }
    if name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(BackupError::validation(format!(
            "archive name {name:?} must be a plain file name"
        )));
    }
    Ok(())
}
