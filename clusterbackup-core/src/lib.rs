/*!
# Cluster Backup Core Engine

Captures the live API objects of a cluster into a portable archive, restores
archives back into a cluster, and prunes old archives.

The engine provides:

- Resource discovery filtering and lazy namespace resolution
- Field stripping and canonical JSON serialization of captured objects
- Streaming packaging of a staging tree into a `tar.gz` container
- Idempotent create-or-update restore, cluster-scoped objects first
- Age and count based retention of archives
- Sandboxed `host://` destination addressing

## Architecture

The engine never talks to an API server itself. Callers build the cluster
capabilities once ([`Discoverer`], [`Lister`], [`Applier`]) and pass them
into each run. [`InMemoryCluster`] implements all three offline; the `kube`
feature adds an implementation over the Kubernetes dynamic API.

## Usage

```rust
use clusterbackup_core::{BackupEngine, BackupOptions, CancelToken, EngineConfig, InMemoryCluster};

# fn main() -> clusterbackup_core::Result<()> {
# let dir = tempfile::TempDir::new()?;
let engine = BackupEngine::new(EngineConfig::with_host_root(dir.path()));
let cluster = InMemoryCluster::with_standard_resources();
let cancel = CancelToken::new();

let backup = engine.run_backup(&cluster, &cluster, "host:///backups", &BackupOptions::default(), &cancel)?;
let restored = engine.run_restore(&cluster, "host:///backups", &backup.archive_name, &cancel)?;
assert_eq!(restored.applied, backup.object_count);
# Ok(())
# }
```
*/

pub mod cancel;
pub mod cluster;
pub mod config;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod format;
pub mod layout;
pub mod metadata;
#[cfg(test)]
mod metadata_tests;
pub mod namespaces;
pub mod observability;
pub mod restore;
pub mod retention;
pub mod serializer;
pub mod storage;

pub use cancel::CancelToken;
pub use cluster::memory::InMemoryCluster;
pub use cluster::{
    Applier, ClusterError, Discoverer, DiscoveryFailure, DiscoveryReport, GroupVersionResource,
    Lister, ObjectDocument, ResourceCoordinate,
};
pub use config::{Destination, EngineConfig};
pub use discovery::{default_resource_types, KindFilter, DEFAULT_RESOURCE_TYPES};
pub use engine::{BackupEngine, BackupOptions};
pub use error::{ApplyAction, BackupError, Result};
pub use format::{ArchiveFormat, TarGzFormat};
pub use layout::ArchiveEntry;
pub use metadata::{ArchiveInfo, BackupResult, RestoreResult};
pub use observability::init_observability;
pub use retention::{CleanupReport, RetentionPolicy};
pub use storage::LocalArchiveStore;

#[cfg(feature = "metrics")]
pub use observability::{gather_metrics, BackupMetrics};

#[cfg(feature = "kube")]
pub use cluster::kube::KubeCluster;
