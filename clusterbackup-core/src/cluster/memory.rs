/*!
In-memory cluster implementing every capability.

Behaves like a minimal API server: it assigns resource versions and UIDs on
create, rejects duplicate creates with [`ClusterError::AlreadyExists`],
rejects updates carrying a stale resource version, and refuses namespaced
objects whose namespace object does not exist. Failures can be injected per
group/version (discovery) and per resource type and namespace (list, get
and update).
*/

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use serde_json::{json, Value};

use super::{
    metadata_mut, object_name, resource_version, Applier, ClusterError, Discoverer, DiscoveryFailure,
    DiscoveryReport, GroupVersionResource, Lister, ObjectDocument, ResourceCoordinate,
};
use crate::cancel::CancelToken;

type ObjectKey = (GroupVersionResource, Option<String>, String);
type ScopeKey = (GroupVersionResource, Option<String>);

#[derive(Debug, Default)]
struct ClusterState {
    resources: Vec<ResourceCoordinate>,
    objects: BTreeMap<ObjectKey, ObjectDocument>,
    next_version: u64,
    discovery_down: bool,
    failing_group_versions: BTreeSet<String>,
    failing_lists: BTreeSet<ScopeKey>,
    failing_gets: BTreeSet<ScopeKey>,
    failing_updates: BTreeSet<ScopeKey>,
}

/// Thread-safe in-memory cluster.
#[derive(Debug, Default)]
pub struct InMemoryCluster {
    state: Mutex<ClusterState>,
}

impl InMemoryCluster {
    /// Create an empty cluster with no registered resource kinds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a cluster exposing a typical set of core, apps and RBAC kinds,
    /// plus a subresource and a kind that cannot be listed.
    pub fn with_standard_resources() -> Self {
        let full = ["create", "delete", "get", "list", "update", "watch"];
        let cluster = Self::new();
        cluster.register(ResourceCoordinate::namespaces().with_verbs(full));
        for (group, resource, kind, namespaced) in [
            ("", "configmaps", "ConfigMap", true),
            ("", "secrets", "Secret", true),
            ("", "services", "Service", true),
            ("", "pods", "Pod", true),
            ("", "persistentvolumes", "PersistentVolume", false),
            ("apps", "deployments", "Deployment", true),
            ("rbac.authorization.k8s.io", "clusterroles", "ClusterRole", false),
        ] {
            cluster.register(
                ResourceCoordinate::new(GroupVersionResource::new(group, "v1", resource), kind, namespaced)
                    .with_verbs(full),
            );
        }
        cluster.register(
            ResourceCoordinate::new(GroupVersionResource::new("", "v1", "pods/log"), "Pod", true)
                .with_verbs(["get"]),
        );
        cluster.register(
            ResourceCoordinate::new(
                GroupVersionResource::new("authorization.k8s.io", "v1", "selfsubjectaccessreviews"),
                "SelfSubjectAccessReview",
                false,
            )
            .with_verbs(["create"]),
        );
        cluster
    }

    /// Register a resource kind for discovery and object storage.
    pub fn register(&self, coordinate: ResourceCoordinate) {
        self.lock().resources.push(coordinate);
    }

    /// Store an object as if it had been created through the API, including
    /// server-populated fields (resource version, UID, timestamps, status).
    pub fn seed(
        &self,
        gvr: &GroupVersionResource,
        namespace: Option<&str>,
        object: Value,
    ) -> Result<(), ClusterError> {
        let mut object = match object {
            Value::Object(map) => map,
            _ => {
                return Err(ClusterError::Api {
                    code: 400,
                    message: "object must be a JSON object".to_string(),
                })
            }
        };
        let name = required_name(&object)?;
        let mut state = self.lock();
        let version = state.bump_version();
        let metadata = metadata_mut(&mut object);
        if let Some(ns) = namespace {
            metadata.insert("namespace".into(), json!(ns));
        }
        metadata.insert("resourceVersion".into(), json!(version.to_string()));
        metadata.insert("uid".into(), json!(format!("uid-{version}")));
        metadata.insert("creationTimestamp".into(), json!("2025-01-01T00:00:00Z"));
        metadata.insert("generation".into(), json!(1));
        metadata.insert(
            "managedFields".into(),
            json!([{"manager": "kubectl", "operation": "Apply"}]),
        );
        object.insert("status".into(), json!({"phase": "Active"}));
        state
            .objects
            .insert((gvr.clone(), namespace.map(str::to_string), name), object);
        Ok(())
    }

    /// Make the whole discovery call fail.
    pub fn fail_discovery(&self) {
        self.lock().discovery_down = true;
    }

    /// Make one group/version (e.g. `apps/v1`) fail to resolve during discovery.
    pub fn fail_group_version<S: Into<String>>(&self, group_version: S) {
        self.lock().failing_group_versions.insert(group_version.into());
    }

    /// Make listing `gvr` in `namespace` fail.
    pub fn fail_list(&self, gvr: &GroupVersionResource, namespace: Option<&str>) {
        self.lock()
            .failing_lists
            .insert((gvr.clone(), namespace.map(str::to_string)));
    }

    /// Make fetching any object of `gvr` in `namespace` fail.
    pub fn fail_get(&self, gvr: &GroupVersionResource, namespace: Option<&str>) {
        self.lock()
            .failing_gets
            .insert((gvr.clone(), namespace.map(str::to_string)));
    }

    /// Make updating any object of `gvr` in `namespace` fail.
    pub fn fail_update(&self, gvr: &GroupVersionResource, namespace: Option<&str>) {
        self.lock()
            .failing_updates
            .insert((gvr.clone(), namespace.map(str::to_string)));
    }

    /// Fetch a stored object without going through the capability traits.
    pub fn object(
        &self,
        gvr: &GroupVersionResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Option<ObjectDocument> {
        self.lock()
            .objects
            .get(&(gvr.clone(), namespace.map(str::to_string), name.to_string()))
            .cloned()
    }

    pub fn object_count(&self) -> usize {
        self.lock().objects.len()
    }

    fn lock(&self) -> MutexGuard<'_, ClusterState> {
        // A poisoned lock only means a test panicked mid-call; the map is still usable.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ClusterState {
    fn bump_version(&mut self) -> u64 {
        self.next_version += 1;
        self.next_version
    }

    fn coordinate(&self, gvr: &GroupVersionResource) -> Result<&ResourceCoordinate, ClusterError> {
        self.resources
            .iter()
            .find(|coordinate| &coordinate.gvr == gvr)
            .ok_or_else(|| ClusterError::Api {
                code: 404,
                message: format!("the server could not find the requested resource ({gvr})"),
            })
    }

    fn check_scope(
        &self,
        gvr: &GroupVersionResource,
        namespace: Option<&str>,
    ) -> Result<(), ClusterError> {
        let coordinate = self.coordinate(gvr)?;
        match (coordinate.namespaced, namespace) {
            (true, Some(ns)) => {
                let key = (GroupVersionResource::namespaces(), None, ns.to_string());
                if self.objects.contains_key(&key) {
                    Ok(())
                } else {
                    Err(ClusterError::NotFound {
                        resource: "namespaces".to_string(),
                        name: ns.to_string(),
                    })
                }
            }
            (true, None) => Err(ClusterError::Api {
                code: 400,
                message: format!("{gvr} is namespaced; a namespace is required"),
            }),
            (false, Some(_)) => Err(ClusterError::Api {
                code: 400,
                message: format!("{gvr} is cluster-scoped"),
            }),
            (false, None) => Ok(()),
        }
    }
}

fn injected(
    failing: &BTreeSet<ScopeKey>,
    gvr: &GroupVersionResource,
    namespace: Option<&str>,
    call: &str,
) -> Result<(), ClusterError> {
    if failing.contains(&(gvr.clone(), namespace.map(str::to_string))) {
        Err(ClusterError::Api {
            code: 500,
            message: format!("injected {call} failure for {gvr}"),
        })
    } else {
        Ok(())
    }
}

fn check_cancel(cancel: &CancelToken) -> Result<(), ClusterError> {
    if cancel.is_cancelled() {
        Err(ClusterError::Cancelled)
    } else {
        Ok(())
    }
}

fn required_name(object: &ObjectDocument) -> Result<String, ClusterError> {
    object_name(object)
        .map(str::to_string)
        .ok_or_else(|| ClusterError::Api {
            code: 422,
            message: "metadata.name is required".to_string(),
        })
}

impl Discoverer for InMemoryCluster {
    fn discover(&self, cancel: &CancelToken) -> Result<DiscoveryReport, ClusterError> {
        check_cancel(cancel)?;
        let state = self.lock();
        if state.discovery_down {
            return Err(ClusterError::Transport(
                "discovery endpoint unavailable".to_string(),
            ));
        }

        let mut report = DiscoveryReport::default();
        for coordinate in &state.resources {
            let group_version = coordinate.gvr.api_version();
            if state.failing_group_versions.contains(&group_version) {
                if !report
                    .failures
                    .iter()
                    .any(|failure| failure.group_version == group_version)
                {
                    report.failures.push(DiscoveryFailure {
                        error: ClusterError::Api {
                            code: 503,
                            message: format!("{group_version} is unavailable"),
                        },
                        group_version,
                    });
                }
                continue;
            }
            report.coordinates.push(coordinate.clone());
        }
        Ok(report)
    }
}

impl Lister for InMemoryCluster {
    fn list(
        &self,
        resource: &ResourceCoordinate,
        namespace: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<Vec<ObjectDocument>, ClusterError> {
        check_cancel(cancel)?;
        let state = self.lock();
        state.coordinate(&resource.gvr)?;
        injected(&state.failing_lists, &resource.gvr, namespace, "list")?;

        Ok(state
            .objects
            .iter()
            .filter(|((gvr, ns, _), _)| {
                gvr == &resource.gvr && (namespace.is_none() || ns.as_deref() == namespace)
            })
            .map(|(_, object)| object.clone())
            .collect())
    }
}

impl Applier for InMemoryCluster {
    fn create(
        &self,
        gvr: &GroupVersionResource,
        namespace: Option<&str>,
        object: &ObjectDocument,
        cancel: &CancelToken,
    ) -> Result<ObjectDocument, ClusterError> {
        check_cancel(cancel)?;
        let mut state = self.lock();
        state.check_scope(gvr, namespace)?;
        let name = required_name(object)?;
        let key = (gvr.clone(), namespace.map(str::to_string), name.clone());
        if state.objects.contains_key(&key) {
            return Err(ClusterError::AlreadyExists {
                resource: gvr.resource.clone(),
                name,
            });
        }

        let version = state.bump_version();
        let mut stored = object.clone();
        let metadata = metadata_mut(&mut stored);
        metadata.insert("resourceVersion".into(), json!(version.to_string()));
        metadata.insert("uid".into(), json!(format!("uid-{version}")));
        state.objects.insert(key, stored.clone());
        Ok(stored)
    }

    fn get(
        &self,
        gvr: &GroupVersionResource,
        namespace: Option<&str>,
        name: &str,
        cancel: &CancelToken,
    ) -> Result<ObjectDocument, ClusterError> {
        check_cancel(cancel)?;
        let state = self.lock();
        state.coordinate(gvr)?;
        injected(&state.failing_gets, gvr, namespace, "get")?;
        state
            .objects
            .get(&(gvr.clone(), namespace.map(str::to_string), name.to_string()))
            .cloned()
            .ok_or_else(|| ClusterError::NotFound {
                resource: gvr.resource.clone(),
                name: name.to_string(),
            })
    }

    fn update(
        &self,
        gvr: &GroupVersionResource,
        namespace: Option<&str>,
        object: &ObjectDocument,
        cancel: &CancelToken,
    ) -> Result<ObjectDocument, ClusterError> {
        check_cancel(cancel)?;
        let mut state = self.lock();
        state.check_scope(gvr, namespace)?;
        injected(&state.failing_updates, gvr, namespace, "update")?;
        let name = required_name(object)?;
        let key = (gvr.clone(), namespace.map(str::to_string), name.clone());
        let current = state.objects.get(&key).ok_or_else(|| ClusterError::NotFound {
            resource: gvr.resource.clone(),
            name: name.clone(),
        })?;

        if resource_version(object) != resource_version(current) {
            return Err(ClusterError::Api {
                code: 409,
                message: format!(
                    "the object {name:?} has been modified; resource version mismatch"
                ),
            });
        }

        let uid = current
            .get("metadata")
            .and_then(|metadata| metadata.get("uid"))
            .cloned();
        let version = state.bump_version();
        let mut stored = object.clone();
        let metadata = metadata_mut(&mut stored);
        metadata.insert("resourceVersion".into(), json!(version.to_string()));
        if let Some(uid) = uid {
            metadata.insert("uid".into(), uid);
        }
        state.objects.insert(key, stored.clone());
        Ok(stored)
    }
}
