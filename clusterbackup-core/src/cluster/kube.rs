/*!
Kubernetes implementation of the cluster capabilities.

Discovery walks the core API and every API group, resolving only the
preferred version of each group so a kind is never captured twice under
different versions. A group/version that fails to resolve is recorded as a
[`DiscoveryFailure`] and skipped. Objects are read and written through the
dynamic API as untyped documents.
*/

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::APIResourceList;
use kube::api::{Api, ApiResource, DynamicObject, ListParams, PostParams};
use kube::core::TypeMeta;
use kube::Client;
use serde_json::Value;
use tracing::debug;

use super::blocking::{block_on, AsyncCluster, BlockingCluster};
use super::{
    object_name, ClusterError, DiscoveryFailure, DiscoveryReport, GroupVersionResource,
    ObjectDocument, ResourceCoordinate,
};

/// Dynamic-API client for a live cluster.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using the in-cluster configuration or the local kubeconfig.
    pub async fn try_default() -> Result<Self, ClusterError> {
        let client = Client::try_default()
            .await
            .map_err(|e| ClusterError::Transport(format!("Failed to create client: {e}")))?;
        Ok(Self::new(client))
    }

    /// Connect and wrap the client for use by the blocking engine.
    pub fn connect() -> Result<BlockingCluster<KubeCluster>, ClusterError> {
        block_on(Self::try_default()).map(BlockingCluster::new)
    }

    fn api(
        &self,
        gvr: &GroupVersionResource,
        kind: &str,
        namespace: Option<&str>,
    ) -> Api<DynamicObject> {
        let resource = ApiResource {
            group: gvr.group.clone(),
            version: gvr.version.clone(),
            api_version: gvr.api_version(),
            kind: kind.to_string(),
            plural: gvr.resource.clone(),
        };
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &resource),
            None => Api::all_with(self.client.clone(), &resource),
        }
    }
}

fn classify(err: kube::Error, resource: &str, name: &str) -> ClusterError {
    match err {
        kube::Error::Api(response) => match (response.code, response.reason.as_str()) {
            (409, "AlreadyExists") => ClusterError::AlreadyExists {
                resource: resource.to_string(),
                name: name.to_string(),
            },
            (404, _) => ClusterError::NotFound {
                resource: resource.to_string(),
                name: name.to_string(),
            },
            (code, _) => ClusterError::Api {
                code,
                message: response.message,
            },
        },
        other => ClusterError::Transport(other.to_string()),
    }
}

fn coordinates_from_list(group: &str, version: &str, list: &APIResourceList) -> Vec<ResourceCoordinate> {
    list.resources
        .iter()
        .map(|resource| {
            ResourceCoordinate::new(
                GroupVersionResource::new(group, version, resource.name.as_str()),
                resource.kind.as_str(),
                resource.namespaced,
            )
            .with_verbs(resource.verbs.iter().cloned())
        })
        .collect()
}

fn to_document(object: &DynamicObject) -> Result<ObjectDocument, ClusterError> {
    match serde_json::to_value(object) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ClusterError::Transport(
            "API object did not serialize to a JSON object".to_string(),
        )),
        Err(e) => Err(ClusterError::Transport(format!(
            "Failed to encode API object: {e}"
        ))),
    }
}

fn from_document(object: &ObjectDocument) -> Result<(DynamicObject, String, String), ClusterError> {
    let name = object_name(object).map(str::to_string).ok_or_else(|| ClusterError::Api {
        code: 422,
        message: "metadata.name is required".to_string(),
    })?;
    let kind = object
        .get("kind")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let dynamic = serde_json::from_value::<DynamicObject>(Value::Object(object.clone()))
        .map_err(|e| ClusterError::Api {
            code: 422,
            message: format!("Invalid object {name:?}: {e}"),
        })?;
    Ok((dynamic, name, kind))
}

#[async_trait]
impl AsyncCluster for KubeCluster {
    async fn discover(&self) -> Result<DiscoveryReport, ClusterError> {
        let mut report = DiscoveryReport::default();

        match self.client.list_core_api_versions().await {
            Ok(core) => {
                let version = core
                    .versions
                    .first()
                    .cloned()
                    .unwrap_or_else(|| "v1".to_string());
                match self.client.list_core_api_resources(&version).await {
                    Ok(list) => report
                        .coordinates
                        .extend(coordinates_from_list("", &version, &list)),
                    Err(e) => report.failures.push(DiscoveryFailure {
                        error: classify(e, "", ""),
                        group_version: version,
                    }),
                }
            }
            Err(e) => report.failures.push(DiscoveryFailure {
                group_version: "v1".to_string(),
                error: classify(e, "", ""),
            }),
        }

        let groups = match self.client.list_api_groups().await {
            Ok(groups) => groups,
            Err(e) => {
                report.failures.push(DiscoveryFailure {
                    group_version: "apis".to_string(),
                    error: classify(e, "", ""),
                });
                return Ok(report);
            }
        };

        for group in &groups.groups {
            let Some(preferred) = group
                .preferred_version
                .as_ref()
                .or_else(|| group.versions.first())
            else {
                continue;
            };
            debug!(group_version = %preferred.group_version, "Resolving API group resources");
            match self
                .client
                .list_api_group_resources(&preferred.group_version)
                .await
            {
                Ok(list) => report.coordinates.extend(coordinates_from_list(
                    &group.name,
                    &preferred.version,
                    &list,
                )),
                Err(e) => report.failures.push(DiscoveryFailure {
                    group_version: preferred.group_version.clone(),
                    error: classify(e, "", ""),
                }),
            }
        }

        Ok(report)
    }

    async fn list(
        &self,
        resource: &ResourceCoordinate,
        namespace: Option<&str>,
    ) -> Result<Vec<ObjectDocument>, ClusterError> {
        let api = self.api(&resource.gvr, &resource.kind, namespace);
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| classify(e, &resource.gvr.resource, ""))?;

        // List items come back without apiVersion/kind.
        list.items
            .into_iter()
            .map(|mut object| {
                if object.types.is_none() {
                    object.types = Some(TypeMeta {
                        api_version: resource.gvr.api_version(),
                        kind: resource.kind.clone(),
                    });
                }
                to_document(&object)
            })
            .collect()
    }

    async fn create(
        &self,
        gvr: &GroupVersionResource,
        namespace: Option<&str>,
        object: &ObjectDocument,
    ) -> Result<ObjectDocument, ClusterError> {
        let (dynamic, name, kind) = from_document(object)?;
        let created = self
            .api(gvr, &kind, namespace)
            .create(&PostParams::default(), &dynamic)
            .await
            .map_err(|e| classify(e, &gvr.resource, &name))?;
        to_document(&created)
    }

    async fn get(
        &self,
        gvr: &GroupVersionResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<ObjectDocument, ClusterError> {
        let live = self
            .api(gvr, "", namespace)
            .get(name)
            .await
            .map_err(|e| classify(e, &gvr.resource, name))?;
        to_document(&live)
    }

    async fn update(
        &self,
        gvr: &GroupVersionResource,
        namespace: Option<&str>,
        object: &ObjectDocument,
    ) -> Result<ObjectDocument, ClusterError> {
        let (dynamic, name, kind) = from_document(object)?;
        let updated = self
            .api(gvr, &kind, namespace)
            .replace(&name, &PostParams::default(), &dynamic)
            .await
            .map_err(|e| classify(e, &gvr.resource, &name))?;
        to_document(&updated)
    }
}
