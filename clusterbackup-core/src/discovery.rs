/*!
Resource eligibility and kind filtering.

A discovered [`ResourceCoordinate`] is captured only when it can be listed,
is not a subresource and, if a kind filter is configured, its kind is a
member of the filter (case-insensitive).
*/

use std::collections::BTreeSet;

use crate::cluster::ResourceCoordinate;

/// Kinds captured when a backup does not name any resource types.
pub const DEFAULT_RESOURCE_TYPES: &[&str] = &[
    "Namespace",
    "ConfigMap",
    "Secret",
    "Service",
    "ServiceAccount",
    "PersistentVolume",
    "PersistentVolumeClaim",
    "Pod",
    "Deployment",
    "StatefulSet",
    "DaemonSet",
    "ReplicaSet",
    "Job",
    "CronJob",
    "Ingress",
    "NetworkPolicy",
    "Endpoints",
    "Role",
    "RoleBinding",
    "ClusterRole",
    "ClusterRoleBinding",
    "StorageClass",
    "CustomResourceDefinition",
];

/// The built-in kind set as owned strings.
pub fn default_resource_types() -> Vec<String> {
    DEFAULT_RESOURCE_TYPES.iter().map(|kind| kind.to_string()).collect()
}

/// Normalized, case-insensitive set of kind names.
///
/// An empty filter matches every kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KindFilter {
    kinds: BTreeSet<String>,
}

impl KindFilter {
    /// Build a filter from raw kind names, trimming and lowercasing each and
    /// dropping entries that end up empty.
    pub fn from_kinds<I, S>(kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let kinds = kinds
            .into_iter()
            .map(|kind| kind.as_ref().trim().to_lowercase())
            .filter(|kind| !kind.is_empty())
            .collect();
        Self { kinds }
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    pub fn matches(&self, kind: &str) -> bool {
        self.kinds.is_empty() || self.kinds.contains(&kind.to_lowercase())
    }
}

/// Whether a coordinate can be captured at all, regardless of kind filter.
pub fn is_listable(coordinate: &ResourceCoordinate) -> bool {
    coordinate.supports("list") && !coordinate.is_subresource()
}

/// Keep the coordinates eligible for capture under `filter`, in discovery order.
pub fn select_resources(
    coordinates: Vec<ResourceCoordinate>,
    filter: &KindFilter,
) -> Vec<ResourceCoordinate> {
    coordinates
        .into_iter()
        .filter(|coordinate| is_listable(coordinate) && filter.matches(&coordinate.kind))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::GroupVersionResource;

    fn coordinate(resource: &str, kind: &str, verbs: &[&str]) -> ResourceCoordinate {
        ResourceCoordinate::new(GroupVersionResource::new("", "v1", resource), kind, true)
            .with_verbs(verbs.iter().copied())
    }

    #[test]
    fn test_filter_is_normalized() {
        let filter = KindFilter::from_kinds(["  ConfigMap ", "SECRET", ""]);
        assert!(filter.matches("configmap"));
        assert!(filter.matches("Secret"));
        assert!(!filter.matches("Pod"));
    }

    #[test]
    fn test_blank_filter_matches_everything() {
        let filter = KindFilter::from_kinds(["", "   "]);
        assert!(filter.is_empty());
        assert!(filter.matches("Anything"));
    }

    #[test]
    fn test_select_drops_unlistable_and_subresources() {
        let selected = select_resources(
            vec![
                coordinate("configmaps", "ConfigMap", &["get", "list"]),
                coordinate("pods/log", "Pod", &["get", "list"]),
                coordinate("bindings", "Binding", &["create"]),
                coordinate("pods", "Pod", &["list"]),
            ],
            &KindFilter::from_kinds(default_resource_types()),
        );

        let resources: Vec<_> = selected.iter().map(|c| c.gvr.resource.as_str()).collect();
        assert_eq!(resources, vec!["configmaps", "pods"]);
    }

    #[test]
    fn test_default_set_covers_common_kinds() {
        let filter = KindFilter::from_kinds(default_resource_types());
        for kind in ["Namespace", "Deployment", "ClusterRoleBinding", "Ingress"] {
            assert!(filter.matches(kind), "{kind} missing from defaults");
        }
        assert!(!filter.matches("Event"));
    }
}
