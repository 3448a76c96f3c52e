/*!
Cluster capabilities consumed by the engine.

The engine never talks to an API server directly. The caller constructs the
capability implementations once and passes them by reference into each
operation:

- [`Discoverer`] enumerates resource kinds and their coordinates
- [`Lister`] lists the objects of one resource type, optionally per namespace
- [`Applier`] creates, fetches and updates objects during restore

Every call takes a [`CancelToken`] and must return [`ClusterError::Cancelled`]
promptly once it is cancelled.
*/

#[cfg(feature = "async-rt")]
pub mod blocking;
#[cfg(feature = "kube")]
pub mod kube;
pub mod memory;

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cancel::CancelToken;

/// An API object as an untyped document (map of string to JSON value).
pub type ObjectDocument = serde_json::Map<String, serde_json::Value>;

/// Group, version and plural resource name of a resource type.
///
/// The core group is the empty string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupVersionResource {
    pub group: String,
    pub version: String,
    pub resource: String,
}

impl GroupVersionResource {
    pub fn new<G, V, R>(group: G, version: V, resource: R) -> Self
    where
        G: Into<String>,
        V: Into<String>,
        R: Into<String>,
    {
        Self {
            group: group.into(),
            version: version.into(),
            resource: resource.into(),
        }
    }

    /// The core `v1/namespaces` resource.
    pub fn namespaces() -> Self {
        Self::new("", "v1", "namespaces")
    }

    /// `apiVersion` string for objects of this resource (`v1` or `apps/v1`).
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for GroupVersionResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, Resource={}", self.api_version(), self.resource)
    }
}

/// A resource kind as exposed by server discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceCoordinate {
    pub gvr: GroupVersionResource,
    pub kind: String,
    pub namespaced: bool,
    pub verbs: BTreeSet<String>,
}

impl ResourceCoordinate {
    pub fn new<K: Into<String>>(gvr: GroupVersionResource, kind: K, namespaced: bool) -> Self {
        Self {
            gvr,
            kind: kind.into(),
            namespaced,
            verbs: BTreeSet::new(),
        }
    }

    pub fn with_verbs<I, S>(mut self, verbs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.verbs = verbs.into_iter().map(Into::into).collect();
        self
    }

    /// Coordinate of the core `Namespace` kind.
    pub fn namespaces() -> Self {
        Self::new(GroupVersionResource::namespaces(), "Namespace", false)
            .with_verbs(["create", "get", "list", "update"])
    }

    pub fn supports(&self, verb: &str) -> bool {
        self.verbs.contains(verb)
    }

    /// Subresources such as `pods/log` carry a slash in their resource name.
    pub fn is_subresource(&self) -> bool {
        self.gvr.resource.contains('/')
    }
}

/// A group/version whose resources could not be resolved during discovery.
#[derive(Debug)]
pub struct DiscoveryFailure {
    pub group_version: String,
    pub error: ClusterError,
}

/// Outcome of preferred-version discovery.
///
/// Discovery is advisory: groups that fail to resolve are reported in
/// `failures` while the rest of the coordinates are still returned.
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    pub coordinates: Vec<ResourceCoordinate>,
    pub failures: Vec<DiscoveryFailure>,
}

/// Errors returned by cluster capability implementations.
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("{resource} {name:?} already exists")]
    AlreadyExists { resource: String, name: String },

    #[error("{resource} {name:?} not found")]
    NotFound { resource: String, name: String },

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl ClusterError {
    pub fn is_already_exists(&self) -> bool {
        matches!(self, ClusterError::AlreadyExists { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ClusterError::Cancelled)
    }
}

/// Enumerates the resource kinds the server exposes, one version per group.
#[cfg_attr(test, mockall::automock)]
pub trait Discoverer {
    fn discover(&self, cancel: &CancelToken) -> Result<DiscoveryReport, ClusterError>;
}

/// Lists the objects of one resource type.
pub trait Lister {
    /// List objects of `resource`. `namespace` is `None` for cluster-scoped
    /// resources, or to list a namespaced resource across all namespaces.
    fn list(
        &self,
        resource: &ResourceCoordinate,
        namespace: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<Vec<ObjectDocument>, ClusterError>;
}

/// Writes objects back into a live cluster.
pub trait Applier {
    fn create(
        &self,
        gvr: &GroupVersionResource,
        namespace: Option<&str>,
        object: &ObjectDocument,
        cancel: &CancelToken,
    ) -> Result<ObjectDocument, ClusterError>;

    fn get(
        &self,
        gvr: &GroupVersionResource,
        namespace: Option<&str>,
        name: &str,
        cancel: &CancelToken,
    ) -> Result<ObjectDocument, ClusterError>;

    fn update(
        &self,
        gvr: &GroupVersionResource,
        namespace: Option<&str>,
        object: &ObjectDocument,
        cancel: &CancelToken,
    ) -> Result<ObjectDocument, ClusterError>;
}

/// `metadata.name` of an object document, if present and non-empty.
pub fn object_name(object: &ObjectDocument) -> Option<&str> {
    object
        .get("metadata")
        .and_then(|metadata| metadata.get("name"))
        .and_then(|name| name.as_str())
        .filter(|name| !name.is_empty())
}

/// `metadata.namespace` of an object document, if present and non-empty.
pub fn object_namespace(object: &ObjectDocument) -> Option<&str> {
    object
        .get("metadata")
        .and_then(|metadata| metadata.get("namespace"))
        .and_then(|namespace| namespace.as_str())
        .filter(|namespace| !namespace.is_empty())
}

/// Mutable access to `metadata`, replacing a missing or non-object value with
/// an empty map.
pub fn metadata_mut(object: &mut ObjectDocument) -> &mut ObjectDocument {
    let metadata = object
        .entry("metadata")
        .or_insert_with(|| serde_json::Value::Object(ObjectDocument::new()));
    if !metadata.is_object() {
        *metadata = serde_json::Value::Object(ObjectDocument::new());
    }
    match metadata {
        serde_json::Value::Object(map) => map,
        _ => unreachable!("metadata was just replaced with an object"),
    }
}

/// `metadata.resourceVersion` of an object document.
pub fn resource_version(object: &ObjectDocument) -> Option<&str> {
    object
        .get("metadata")
        .and_then(|metadata| metadata.get("resourceVersion"))
        .and_then(|version| version.as_str())
}
