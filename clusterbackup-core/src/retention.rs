/*!
Retention-based pruning of archives at a destination.

Cleanup runs two independent phases. The age phase deletes archives whose
modification time is older than the age threshold. The count phase then
re-lists the directory and deletes the oldest archives, by name, until at
most `max_count` remain.
*/

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::storage::LocalArchiveStore;
use crate::Result;

/// How many archives to keep and for how long.
///
/// Either limit, both or neither may be set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub max_age_days: Option<u32>,
    pub max_count: Option<usize>,
}

impl RetentionPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_age_days(mut self, days: u32) -> Self {
        self.max_age_days = Some(days);
        self
    }

    pub fn max_count(mut self, count: usize) -> Self {
        self.max_count = Some(count);
        self
    }

    /// A policy that deletes every archive.
    pub fn purge_all() -> Self {
        Self::new().max_count(0)
    }

    pub fn is_unbounded(&self) -> bool {
        self.max_age_days.is_none() && self.max_count.is_none()
    }
}

/// Archives deleted by one cleanup run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub deleted_by_age: Vec<String>,
    pub deleted_by_count: Vec<String>,
    /// Archives left at the destination afterwards
    pub retained: usize,
}

impl CleanupReport {
    pub fn deleted(&self) -> usize {
        self.deleted_by_age.len() + self.deleted_by_count.len()
    }
}

/// Apply `policy` to the archives in `store`, measuring age against `now`.
///
/// A missing directory has nothing to prune. The first deletion failure
/// aborts the run.
pub fn apply_retention(
    store: &LocalArchiveStore,
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
) -> Result<CleanupReport> {
    let mut report = CleanupReport::default();

    // Thresholds too large to represent delete nothing.
    let cutoff = policy
        .max_age_days
        .and_then(|days| Duration::try_days(i64::from(days)))
        .and_then(|max_age| now.checked_sub_signed(max_age));
    if let Some(cutoff) = cutoff {
        for archive in store.list()? {
            if archive.modified < cutoff && store.delete(&archive.name)? {
                debug!(archive = %archive.name, modified = %archive.modified, "Deleted expired archive");
                report.deleted_by_age.push(archive.name);
            }
        }
    }

    // Re-read from disk so the count phase sees the age phase's deletions.
    let remaining = store.list()?;
    report.retained = remaining.len();

    if let Some(max_count) = policy.max_count {
        let excess = remaining.len().saturating_sub(max_count);
        for archive in remaining.into_iter().take(excess) {
            if store.delete(&archive.name)? {
                debug!(archive = %archive.name, "Deleted archive over count limit");
                report.deleted_by_count.push(archive.name);
            }
            report.retained -= 1;
        }
    }

    if report.deleted() > 0 {
        info!(
            dir = %store.dir().display(),
            deleted = report.deleted(),
            retained = report.retained,
            "Pruned archives"
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use std::time::{Duration as StdDuration, SystemTime};
    use tempfile::TempDir;

    fn write_archive(dir: &std::path::Path, name: &str, age: StdDuration) {
        let path = dir.join(name);
        fs::write(&path, b"archive").unwrap();
        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(SystemTime::now() - age)
            .unwrap();
    }

    fn names(store: &LocalArchiveStore) -> Vec<String> {
        store.list().unwrap().into_iter().map(|a| a.name).collect()
    }

    #[test]
    fn test_count_only() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalArchiveStore::new(temp_dir.path(), "tar.gz");
        for day in 1..=5 {
            write_archive(
                temp_dir.path(),
                &format!("cluster-backup-2025010{day}-000000.tar.gz"),
                StdDuration::from_secs(0),
            );
        }

        let report = apply_retention(&store, &RetentionPolicy::new().max_count(2), Utc::now()).unwrap();
        assert_eq!(report.deleted_by_count.len(), 3);
        assert_eq!(report.retained, 2);
        assert_eq!(
            names(&store),
            vec!["cluster-backup-20250104-000000.tar.gz", "cluster-backup-20250105-000000.tar.gz"]
        );
    }

    #[test]
    fn test_age_only() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalArchiveStore::new(temp_dir.path(), "tar.gz");
        write_archive(temp_dir.path(), "cluster-backup-20250101-000000.tar.gz", StdDuration::from_secs(3 * 86_400));
        write_archive(temp_dir.path(), "cluster-backup-20250104-000000.tar.gz", StdDuration::from_secs(60));

        let report = apply_retention(&store, &RetentionPolicy::new().max_age_days(2), Utc::now()).unwrap();
        assert_eq!(report.deleted_by_age, vec!["cluster-backup-20250101-000000.tar.gz"]);
        assert!(report.deleted_by_count.is_empty());
        assert_eq!(report.retained, 1);
    }

    #[test]
    fn test_purge_all_and_missing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalArchiveStore::new(temp_dir.path(), "tar.gz");
        write_archive(temp_dir.path(), "cluster-backup-20250101-000000.tar.gz", StdDuration::from_secs(0));

        let report = apply_retention(&store, &RetentionPolicy::purge_all(), Utc::now()).unwrap();
        assert_eq!(report.deleted(), 1);
        assert!(names(&store).is_empty());

        let missing = LocalArchiveStore::new(temp_dir.path().join("absent"), "tar.gz");
        let report = apply_retention(&missing, &RetentionPolicy::purge_all(), Utc::now()).unwrap();
        assert_eq!(report, CleanupReport::default());
        assert!(!temp_dir.path().join("absent").exists());
    }

    #[test]
    fn test_unbounded_policy_keeps_everything() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalArchiveStore::new(temp_dir.path(), "tar.gz");
        write_archive(temp_dir.path(), "cluster-backup-20200101-000000.tar.gz", StdDuration::from_secs(900 * 86_400));

        assert!(RetentionPolicy::new().is_unbounded());
        let report = apply_retention(&store, &RetentionPolicy::new(), Utc::now()).unwrap();
        assert_eq!(report.deleted(), 0);
        assert_eq!(report.retained, 1);
    }
}
