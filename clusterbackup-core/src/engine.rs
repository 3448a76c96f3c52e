/*!
Backup, restore and cleanup runs.

The engine owns no cluster connection: each run receives the capabilities
it needs from the caller. It decides which failures are advisory and which
abort the run:

- a group/version that fails discovery, a resource type that fails to list,
  and an object that fails to serialize or write are logged and skipped
- a namespace listing failure, a packaging failure and cancellation abort
  the backup
- any entry that cannot be decoded and any failed create or update abort
  the restore
*/

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cluster::{
    object_name, Applier, Discoverer, DiscoveryReport, Lister, ObjectDocument, ResourceCoordinate,
};
use crate::config::{Destination, EngineConfig};
use crate::discovery::{default_resource_types, select_resources, KindFilter};
use crate::format::{ArchiveFormat, TarGzFormat};
use crate::layout::ArchiveEntry;
use crate::metadata::{ArchiveInfo, BackupResult, DigestWriter, RestoreResult};
use crate::namespaces::NamespaceResolver;
use crate::observability;
use crate::restore::{apply_items, read_items};
use crate::retention::{apply_retention, CleanupReport, RetentionPolicy};
use crate::serializer::serialize_object;
use crate::storage::{archive_file_name, LocalArchiveStore};
use crate::{BackupError, CancelToken, Result};

/// What a backup run captures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupOptions {
    /// Namespaces to capture; empty means every namespace
    pub include_namespaces: Vec<String>,
    /// Namespaces to skip when `include_namespaces` is empty
    pub exclude_namespaces: Vec<String>,
    /// Capture cluster-scoped resources
    pub include_cluster_resources: bool,
    /// Kind names to capture, case-insensitive; empty means the default set
    pub resource_types: Vec<String>,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            include_namespaces: Vec::new(),
            exclude_namespaces: Vec::new(),
            include_cluster_resources: true,
            resource_types: Vec::new(),
        }
    }
}

impl BackupOptions {
    pub fn kind_filter(&self) -> KindFilter {
        if self.resource_types.is_empty() {
            KindFilter::from_kinds(default_resource_types())
        } else {
            KindFilter::from_kinds(&self.resource_types)
        }
    }
}

/// Runs backups, restores and retention cleanup against destinations.
#[derive(Debug, Clone)]
pub struct BackupEngine<F: ArchiveFormat = TarGzFormat> {
    config: EngineConfig,
    format: F,
}

impl BackupEngine<TarGzFormat> {
    /// Create an engine writing gzip-compressed tar archives.
    pub fn new(config: EngineConfig) -> Self {
        let format = TarGzFormat::with_level(config.compression_level);
        Self { config, format }
    }
}

impl Default for BackupEngine<TarGzFormat> {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl<F: ArchiveFormat> BackupEngine<F> {
    /// Create an engine with a custom container format.
    pub fn with_format(config: EngineConfig, format: F) -> Self {
        Self { config, format }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn format(&self) -> &F {
        &self.format
    }

    /// Concrete directory for a destination string.
    pub fn resolve_destination(&self, destination: &str) -> Result<PathBuf> {
        Ok(Destination::parse(destination)?.resolve(&self.config.host_root))
    }

    fn store(&self, destination: &str) -> Result<LocalArchiveStore> {
        let dir = self.resolve_destination(destination)?;
        Ok(LocalArchiveStore::new(dir, self.format.extension()))
    }

    /// Capture the cluster into a new archive at `destination`.
    pub fn run_backup<D, L>(
        &self,
        discoverer: &D,
        lister: &L,
        destination: &str,
        options: &BackupOptions,
        cancel: &CancelToken,
    ) -> Result<BackupResult>
    where
        D: Discoverer + ?Sized,
        L: Lister + ?Sized,
    {
        let timer = Instant::now();
        let result = self.backup(discoverer, lister, destination, options, cancel);
        match &result {
            Ok(backup) => {
                observability::record_backup_success(backup.object_count, timer.elapsed());
                info!(
                    archive = %backup.archive_path.display(),
                    objects = backup.object_count,
                    size_bytes = backup.archive_size,
                    "Backup completed"
                );
            }
            Err(e) => {
                observability::record_backup_failure();
                warn!(destination, error = %e, "Backup failed");
            }
        }
        result
    }

    fn backup<D, L>(
        &self,
        discoverer: &D,
        lister: &L,
        destination: &str,
        options: &BackupOptions,
        cancel: &CancelToken,
    ) -> Result<BackupResult>
    where
        D: Discoverer + ?Sized,
        L: Lister + ?Sized,
    {
        let started_at = Utc::now();
        let store = self.store(destination)?;
        let archive_name = archive_file_name(started_at, self.format.extension());
        store.ensure_available(&archive_name)?;
        cancel.check()?;
        info!(dir = %store.dir().display(), archive = %archive_name, "Starting backup");

        let staging = self.staging_dir()?;
        let object_count = self.capture(discoverer, lister, options, staging.path(), cancel)?;
        cancel.check()?;

        let (archive_size, sha256) = self.write_archive(&store, &archive_name, staging.path())?;

        Ok(BackupResult {
            object_count,
            archive_path: store.path_of(&archive_name),
            archive_name,
            archive_size,
            sha256,
            compression_algorithm: self.format.algorithm_name().to_string(),
            started_at,
            completed_at: Utc::now(),
        })
    }

    fn staging_dir(&self) -> Result<tempfile::TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("clusterbackup-");
        let staging = match &self.config.staging_dir {
            Some(parent) => {
                fs::create_dir_all(parent)?;
                builder.tempdir_in(parent)
            }
            None => builder.tempdir(),
        };
        staging.map_err(|e| BackupError::storage(format!("Failed to create staging directory: {e}")))
    }

    /// Write every eligible object under `staging` and return how many were written.
    fn capture<D, L>(
        &self,
        discoverer: &D,
        lister: &L,
        options: &BackupOptions,
        staging: &Path,
        cancel: &CancelToken,
    ) -> Result<usize>
    where
        D: Discoverer + ?Sized,
        L: Lister + ?Sized,
    {
        let report = match discoverer.discover(cancel) {
            Ok(report) => report,
            Err(e) if e.is_cancelled() => return Err(BackupError::Cancelled),
            Err(e) => {
                warn!(error = %e, "Resource discovery failed, no resource types will be captured");
                DiscoveryReport::default()
            }
        };
        for failure in &report.failures {
            warn!(
                group_version = %failure.group_version,
                error = %failure.error,
                "Skipping API group that failed discovery"
            );
        }

        let resources = select_resources(report.coordinates, &options.kind_filter());
        debug!(count = resources.len(), "Selected resource types");

        let mut namespaces =
            NamespaceResolver::new(&options.include_namespaces, &options.exclude_namespaces);
        let mut object_count = 0;

        for resource in &resources {
            cancel.check()?;
            if resource.namespaced {
                for namespace in namespaces.resolve(lister, cancel)? {
                    object_count += self.capture_resource(
                        lister,
                        resource,
                        Some(namespace.as_str()),
                        staging,
                        cancel,
                    )?;
                }
            } else if options.include_cluster_resources {
                object_count += self.capture_resource(lister, resource, None, staging, cancel)?;
            }
        }
        Ok(object_count)
    }

    fn capture_resource<L: Lister + ?Sized>(
        &self,
        lister: &L,
        resource: &ResourceCoordinate,
        namespace: Option<&str>,
        staging: &Path,
        cancel: &CancelToken,
    ) -> Result<usize> {
        let objects = match lister.list(resource, namespace, cancel) {
            Ok(objects) => objects,
            Err(e) if e.is_cancelled() => return Err(BackupError::Cancelled),
            Err(e) => {
                warn!(
                    resource = %resource.gvr,
                    namespace = namespace.unwrap_or_default(),
                    error = %e,
                    "Failed to list resource, skipping"
                );
                return Ok(0);
            }
        };
        debug!(
            resource = %resource.gvr,
            namespace = namespace.unwrap_or_default(),
            count = objects.len(),
            "Listed objects"
        );

        let mut written = 0;
        for object in objects {
            let Some(name) = object_name(&object).map(str::to_string) else {
                warn!(resource = %resource.gvr, "Skipping object without a name");
                continue;
            };
            let entry = ArchiveEntry::new(resource.gvr.clone(), namespace, name);
            match write_object(staging, &entry, object) {
                Ok(()) => written += 1,
                Err(e) => warn!(entry = %entry, error = %e, "Failed to write object, skipping"),
            }
        }
        Ok(written)
    }

    /// Package `staging` into a new archive, removing the partial file on failure.
    fn write_archive(&self, store: &LocalArchiveStore, name: &str, staging: &Path) -> Result<(u64, String)> {
        let file = store.create(name)?;
        let written = self.pack_into(file, staging);
        if written.is_err() {
            if let Err(e) = store.delete(name) {
                warn!(archive = name, error = %e, "Failed to remove partial archive");
            }
        }
        written
    }

    fn pack_into(&self, file: File, staging: &Path) -> Result<(u64, String)> {
        let mut writer = DigestWriter::new(BufWriter::new(file));
        self.format.pack(staging, &mut writer)?;
        let (buffered, digest, size) = writer.finish()?;
        let file = buffered
            .into_inner()
            .map_err(|e| BackupError::archive(format!("Failed to flush archive: {}", e.error())))?;
        file.sync_all()?;
        Ok((size, digest))
    }

    /// Apply every object in `archive_name` at `destination` to the cluster.
    pub fn run_restore<A: Applier + ?Sized>(
        &self,
        applier: &A,
        destination: &str,
        archive_name: &str,
        cancel: &CancelToken,
    ) -> Result<RestoreResult> {
        let started_at = Utc::now();
        if archive_name.trim().is_empty() {
            return Err(BackupError::validation("archive name must not be empty"));
        }
        let store = self.store(destination)?;
        cancel.check()?;

        let file = store.open(archive_name)?;
        let mut reader = BufReader::new(file);
        let items = read_items(&self.format, &mut reader)?;
        info!(archive = archive_name, entries = items.len(), "Restoring archive");

        let summary = apply_items(applier, items, cancel)?;
        observability::record_objects_applied(summary.applied());
        info!(
            archive = archive_name,
            created = summary.created,
            updated = summary.updated,
            "Restore completed"
        );

        Ok(RestoreResult {
            archive_name: archive_name.to_string(),
            applied: summary.applied(),
            created: summary.created,
            updated: summary.updated,
            started_at,
            completed_at: Utc::now(),
        })
    }

    /// Delete archives at `destination` outside the retention policy.
    pub fn run_cleanup(&self, destination: &str, policy: &RetentionPolicy) -> Result<CleanupReport> {
        let store = self.store(destination)?;
        let report = apply_retention(&store, policy, Utc::now())?;
        observability::record_archives_pruned(report.deleted());
        Ok(report)
    }

    /// Delete every archive at `destination`.
    pub fn run_purge(&self, destination: &str) -> Result<CleanupReport> {
        self.run_cleanup(destination, &RetentionPolicy::purge_all())
    }

    /// Archives at `destination`, oldest first.
    pub fn list_archives(&self, destination: &str) -> Result<Vec<ArchiveInfo>> {
        self.store(destination)?.list()
    }
}

fn write_object(staging: &Path, entry: &ArchiveEntry, object: ObjectDocument) -> Result<()> {
    let rendered = serialize_object(object)?;
    let path = staging.join(entry.path());
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, rendered)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::memory::InMemoryCluster;
    use crate::cluster::{ClusterError, DiscoveryFailure, GroupVersionResource, MockDiscoverer};
    use serde_json::json;
    use tempfile::TempDir;

    fn engine_in(root: &Path) -> BackupEngine {
        BackupEngine::new(EngineConfig::with_host_root(root))
    }

    fn seeded_cluster() -> InMemoryCluster {
        let cluster = InMemoryCluster::with_standard_resources();
        for ns in ["default", "kube-system"] {
            cluster
                .seed(
                    &GroupVersionResource::namespaces(),
                    None,
                    json!({"apiVersion": "v1", "kind": "Namespace", "metadata": {"name": ns}}),
                )
                .unwrap();
        }
        cluster
            .seed(
                &GroupVersionResource::new("", "v1", "configmaps"),
                Some("default"),
                json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "settings"}, "data": {"a": "b"}}),
            )
            .unwrap();
        cluster
    }

    #[test]
    fn test_default_options() {
        let options = BackupOptions::default();
        assert!(options.include_cluster_resources);
        assert!(options.kind_filter().matches("Deployment"));
        assert!(!options.kind_filter().matches("Event"));
    }

    #[test]
    fn test_total_discovery_failure_yields_empty_archive() {
        let temp_dir = TempDir::new().unwrap();
        let engine = engine_in(temp_dir.path());
        let cluster = seeded_cluster();

        let mut discoverer = MockDiscoverer::new();
        discoverer
            .expect_discover()
            .times(1)
            .returning(|_| Err(ClusterError::Transport("connection refused".to_string())));

        let result = engine
            .run_backup(&discoverer, &cluster, "host:///backups", &BackupOptions::default(), &CancelToken::new())
            .unwrap();
        assert_eq!(result.object_count, 0);
        assert!(result.archive_path.starts_with(temp_dir.path().join("backups")));
        assert!(result.archive_path.exists());
    }

    #[test]
    fn test_partial_discovery_failure_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let engine = engine_in(temp_dir.path());
        let cluster = seeded_cluster();

        let mut discoverer = MockDiscoverer::new();
        discoverer.expect_discover().returning(|_| {
            Ok(DiscoveryReport {
                coordinates: vec![ResourceCoordinate::new(
                    GroupVersionResource::new("", "v1", "configmaps"),
                    "ConfigMap",
                    true,
                )
                .with_verbs(["list"])],
                failures: vec![DiscoveryFailure {
                    group_version: "metrics.k8s.io/v1beta1".to_string(),
                    error: ClusterError::Api {
                        code: 503,
                        message: "service unavailable".to_string(),
                    },
                }],
            })
        });

        let result = engine
            .run_backup(&discoverer, &cluster, "host:///backups", &BackupOptions::default(), &CancelToken::new())
            .unwrap();
        assert_eq!(result.object_count, 1);
    }

    #[test]
    fn test_cancelled_discovery_aborts() {
        let temp_dir = TempDir::new().unwrap();
        let engine = engine_in(temp_dir.path());
        let cluster = seeded_cluster();

        let mut discoverer = MockDiscoverer::new();
        discoverer.expect_discover().returning(|_| Err(ClusterError::Cancelled));

        let err = engine
            .run_backup(&discoverer, &cluster, "host:///backups", &BackupOptions::default(), &CancelToken::new())
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(engine.list_archives("host:///backups").unwrap().is_empty());
    }

    #[test]
    fn test_unsupported_destination_is_rejected_before_discovery() {
        let engine: BackupEngine = BackupEngine::default();
        let cluster = seeded_cluster();
        let mut discoverer = MockDiscoverer::new();
        discoverer.expect_discover().never();

        let err = engine
            .run_backup(&discoverer, &cluster, "s3://bucket/path", &BackupOptions::default(), &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, BackupError::Validation(_)));
    }

    #[test]
    fn test_name_collision_is_rejected_before_discovery() {
        let temp_dir = TempDir::new().unwrap();
        let engine = engine_in(temp_dir.path());
        let cluster = seeded_cluster();
        let dir = temp_dir.path().join("backups");
        fs::create_dir_all(&dir).unwrap();
        let now = Utc::now();
        for offset in 0..=3 {
            let taken = archive_file_name(now + chrono::Duration::seconds(offset), "tar.gz");
            fs::write(dir.join(taken), b"earlier run").unwrap();
        }

        let mut discoverer = MockDiscoverer::new();
        discoverer.expect_discover().never();

        let err = engine
            .run_backup(&discoverer, &cluster, "host:///backups", &BackupOptions::default(), &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, BackupError::ArchiveExists(_)));
    }

    #[test]
    fn test_empty_archive_name_is_rejected() {
        let engine: BackupEngine = BackupEngine::default();
        let cluster = seeded_cluster();
        let err = engine
            .run_restore(&cluster, "host:///backups", " ", &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, BackupError::Validation(_)));
    }
}
