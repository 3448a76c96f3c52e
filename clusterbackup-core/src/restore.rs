/*!
Reading archives back and applying them to a live cluster.

Restore is all-or-nothing at the parse stage: every entry is decoded and its
identity resolved before the first object is applied. Cluster-scoped
objects are applied before namespaced ones so that namespaces exist before
the objects inside them. Each object is created, or updated in place when it
already exists.
*/

use std::io::Read;

use serde_json::Value;
use tracing::debug;

use crate::cluster::{metadata_mut, object_name, resource_version, Applier, ClusterError, ObjectDocument};
use crate::error::ApplyAction;
use crate::format::ArchiveFormat;
use crate::layout::{ArchiveEntry, ENTRY_SUFFIX};
use crate::{BackupError, CancelToken, Result};

/// One object decoded from an archive, ready to apply.
#[derive(Debug, Clone, PartialEq)]
pub struct RestoreItem {
    pub entry: ArchiveEntry,
    pub object: ObjectDocument,
}

/// How an object ended up in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created,
    Updated,
}

/// Per-run counts of applied objects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub created: usize,
    pub updated: usize,
}

impl ApplySummary {
    pub fn applied(&self) -> usize {
        self.created + self.updated
    }
}

/// Decode every object entry of an archive.
///
/// Non-JSON files are skipped. Fails on the first entry whose path or body
/// cannot be resolved.
pub fn read_items<F: ArchiveFormat + ?Sized>(format: &F, input: &mut dyn Read) -> Result<Vec<RestoreItem>> {
    let mut items = Vec::new();
    format.for_each_file(input, &mut |path, contents| {
        if !path.ends_with(ENTRY_SUFFIX) {
            return Ok(());
        }
        let entry = ArchiveEntry::parse(path)?;
        let object = match serde_json::from_slice::<Value>(&contents) {
            Ok(Value::Object(object)) => object,
            Ok(_) => return Err(BackupError::malformed(path, "body is not a JSON object")),
            Err(e) => return Err(BackupError::malformed(path, format!("invalid JSON body: {e}"))),
        };
        items.push(prepare_item(path, entry, object)?);
        Ok(())
    })?;
    Ok(items)
}

/// Reconcile the entry identity with the object body.
///
/// The name embedded in the body wins over the one in the path. Namespaced
/// objects always get the namespace from their path.
pub fn prepare_item(path: &str, mut entry: ArchiveEntry, mut object: ObjectDocument) -> Result<RestoreItem> {
    if let Some(embedded) = object_name(&object) {
        if embedded != entry.name {
            debug!(path, name = embedded, "Archive path and object disagree on name, using object");
            entry.name = embedded.to_string();
        }
    }
    if entry.name.is_empty() {
        return Err(BackupError::MissingName {
            path: path.to_string(),
        });
    }

    let metadata = metadata_mut(&mut object);
    metadata.insert("name".into(), Value::String(entry.name.clone()));
    if let Some(ns) = &entry.namespace {
        metadata.insert("namespace".into(), Value::String(ns.clone()));
    }

    Ok(RestoreItem { entry, object })
}

fn apply_error(action: ApplyAction, entry: &ArchiveEntry, source: ClusterError) -> BackupError {
    if source.is_cancelled() {
        return BackupError::Cancelled;
    }
    BackupError::Apply {
        action,
        namespace: entry.namespace.clone().unwrap_or_default(),
        name: entry.name.clone(),
        source,
    }
}

/// Create the object, or update it in place if it already exists.
pub fn apply_item<A: Applier + ?Sized>(
    applier: &A,
    item: &RestoreItem,
    cancel: &CancelToken,
) -> Result<ApplyOutcome> {
    let entry = &item.entry;
    let namespace = entry.namespace.as_deref();

    match applier.create(&entry.gvr, namespace, &item.object, cancel) {
        Ok(_) => Ok(ApplyOutcome::Created),
        Err(e) if e.is_already_exists() => {
            let live = applier
                .get(&entry.gvr, namespace, &entry.name, cancel)
                .map_err(|e| apply_error(ApplyAction::Fetch, entry, e))?;

            let mut desired = item.object.clone();
            if let Some(version) = resource_version(&live) {
                metadata_mut(&mut desired)
                    .insert("resourceVersion".into(), Value::String(version.to_string()));
            }
            applier
                .update(&entry.gvr, namespace, &desired, cancel)
                .map_err(|e| apply_error(ApplyAction::Update, entry, e))?;
            Ok(ApplyOutcome::Updated)
        }
        Err(e) => Err(apply_error(ApplyAction::Create, entry, e)),
    }
}

/// Apply all items, cluster-scoped first, stopping at the first failure.
pub fn apply_items<A: Applier + ?Sized>(
    applier: &A,
    items: Vec<RestoreItem>,
    cancel: &CancelToken,
) -> Result<ApplySummary> {
    let (cluster_scoped, namespaced): (Vec<_>, Vec<_>) = items
        .into_iter()
        .partition(|item| item.entry.is_cluster_scoped());

    let mut summary = ApplySummary::default();
    for item in cluster_scoped.iter().chain(namespaced.iter()) {
        cancel.check()?;
        let outcome = apply_item(applier, item, cancel)?;
        debug!(entry = %item.entry, ?outcome, "Applied object");
        match outcome {
            ApplyOutcome::Created => summary.created += 1,
            ApplyOutcome::Updated => summary.updated += 1,
        }
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::memory::InMemoryCluster;
    use crate::cluster::GroupVersionResource;
    use serde_json::json;

    fn document(value: Value) -> ObjectDocument {
        value.as_object().cloned().unwrap()
    }

    fn namespace_item(name: &str) -> RestoreItem {
        let entry = ArchiveEntry::new(GroupVersionResource::namespaces(), None, name);
        let object = document(json!({"apiVersion": "v1", "kind": "Namespace", "metadata": {"name": name}}));
        prepare_item(&entry.path(), entry, object).unwrap()
    }

    fn configmap_item(namespace: &str, name: &str, value: &str) -> RestoreItem {
        let entry = ArchiveEntry::new(GroupVersionResource::new("", "v1", "configmaps"), Some(namespace), name);
        let object = document(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": name},
            "data": {"key": value}
        }));
        prepare_item(&entry.path(), entry, object).unwrap()
    }

    #[test]
    fn test_embedded_name_wins() {
        let entry = ArchiveEntry::parse("namespaces/web/v1/configmaps/from-path.json").unwrap();
        let object = document(json!({"metadata": {"name": "from-body", "namespace": "elsewhere"}}));

        let item = prepare_item("namespaces/web/v1/configmaps/from-path.json", entry, object).unwrap();
        assert_eq!(item.entry.name, "from-body");
        assert_eq!(item.object["metadata"]["namespace"], "web");
    }

    #[test]
    fn test_name_from_path_is_stamped() {
        let entry = ArchiveEntry::parse("cluster/v1/namespaces/restore-ns.json").unwrap();
        let item = prepare_item("p", entry, document(json!({"kind": "Namespace"}))).unwrap();
        assert_eq!(item.object["metadata"]["name"], "restore-ns");
    }

    #[test]
    fn test_missing_name_is_fatal() {
        let entry = ArchiveEntry::parse("cluster/v1/namespaces/.json").unwrap();
        let err = prepare_item("cluster/v1/namespaces/.json", entry, document(json!({}))).unwrap_err();
        assert!(matches!(err, BackupError::MissingName { .. }));
    }

    #[test]
    fn test_cluster_scoped_applied_first() {
        let cluster = InMemoryCluster::with_standard_resources();
        let items = vec![configmap_item("restore-ns", "sample-config", "a"), namespace_item("restore-ns")];

        let summary = apply_items(&cluster, items, &CancelToken::new()).unwrap();
        assert_eq!(summary, ApplySummary { created: 2, updated: 0 });
    }

    #[test]
    fn test_existing_objects_are_updated() {
        let cluster = InMemoryCluster::with_standard_resources();
        apply_items(
            &cluster,
            vec![namespace_item("restore-ns"), configmap_item("restore-ns", "sample-config", "old")],
            &CancelToken::new(),
        )
        .unwrap();

        let summary = apply_items(
            &cluster,
            vec![namespace_item("restore-ns"), configmap_item("restore-ns", "sample-config", "new")],
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(summary.updated, 2);
        assert_eq!(summary.applied(), 2);
        let live = cluster
            .object(&GroupVersionResource::new("", "v1", "configmaps"), Some("restore-ns"), "sample-config")
            .unwrap();
        assert_eq!(live["data"]["key"], "new");
        assert_eq!(cluster.object_count(), 2);
    }

    #[test]
    fn test_create_failure_aborts() {
        let cluster = InMemoryCluster::with_standard_resources();
        let err = apply_items(
            &cluster,
            vec![configmap_item("missing-ns", "sample-config", "a")],
            &CancelToken::new(),
        )
        .unwrap_err();

        match err {
            BackupError::Apply { action, namespace, name, .. } => {
                assert_eq!(action, ApplyAction::Create);
                assert_eq!(namespace, "missing-ns");
                assert_eq!(name, "sample-config");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    fn existing_cluster() -> InMemoryCluster {
        let cluster = InMemoryCluster::with_standard_resources();
        apply_items(
            &cluster,
            vec![namespace_item("restore-ns"), configmap_item("restore-ns", "sample-config", "old")],
            &CancelToken::new(),
        )
        .unwrap();
        cluster
    }

    fn assert_apply_aborted(cluster: &InMemoryCluster, expected: ApplyAction) {
        let err = apply_items(
            cluster,
            vec![
                namespace_item("restore-ns"),
                configmap_item("restore-ns", "sample-config", "new"),
                configmap_item("restore-ns", "later-config", "x"),
            ],
            &CancelToken::new(),
        )
        .unwrap_err();

        match err {
            BackupError::Apply { action, name, .. } => {
                assert_eq!(action, expected);
                assert_eq!(name, "sample-config");
            }
            other => panic!("unexpected error: {other}"),
        }
        let configmaps = GroupVersionResource::new("", "v1", "configmaps");
        let live = cluster.object(&configmaps, Some("restore-ns"), "sample-config").unwrap();
        assert_eq!(live["data"]["key"], "old");
        assert!(cluster.object(&configmaps, Some("restore-ns"), "later-config").is_none());
    }

    #[test]
    fn test_update_failure_after_conflict_aborts() {
        let cluster = existing_cluster();
        cluster.fail_update(&GroupVersionResource::new("", "v1", "configmaps"), Some("restore-ns"));
        assert_apply_aborted(&cluster, ApplyAction::Update);
    }

    #[test]
    fn test_fetch_failure_after_conflict_aborts() {
        let cluster = existing_cluster();
        cluster.fail_get(&GroupVersionResource::new("", "v1", "configmaps"), Some("restore-ns"));
        assert_apply_aborted(&cluster, ApplyAction::Fetch);
    }

    #[test]
    fn test_cancelled_before_apply() {
        let cluster = InMemoryCluster::with_standard_resources();
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = apply_items(&cluster, vec![namespace_item("restore-ns")], &cancel).unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(cluster.object_count(), 0);
    }
}
