//! [`ClusterClient`] backed by a live Kubernetes API server through kube-rs.

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::core::ApiResource;
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::Client;
use serde_json::{json, Value};
use tokio_stream::StreamExt;
use tracing::warn;

use super::{set_type_meta, ClusterClient, ClusterError, ObjectKey, WatchEvent, WatchStream};

/// Substrate backed by the cluster the process's kubeconfig points at.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl std::fmt::Debug for KubeCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeCluster").finish_non_exhaustive()
    }
}

impl KubeCluster {
    /// Connect using in-cluster config or the local kubeconfig.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::Backend`] when no usable configuration exists.
    pub async fn try_default() -> Result<Self, ClusterError> {
        let client = Client::try_default()
            .await
            .map_err(|e| ClusterError::Backend(e.to_string()))?;
        Ok(Self { client })
    }

    /// Wrap an existing client.
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, resource: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(namespace) => Api::namespaced_with(self.client.clone(), namespace, resource),
            None => Api::all_with(self.client.clone(), resource),
        }
    }
}

fn map_error(resource: &ApiResource, key: &ObjectKey, error: kube::Error) -> ClusterError {
    match error {
        kube::Error::Api(response) => match response.code {
            404 => ClusterError::NotFound {
                kind: resource.kind.clone(),
                key: key.clone(),
            },
            409 if response.reason == "AlreadyExists" => ClusterError::AlreadyExists {
                kind: resource.kind.clone(),
                key: key.clone(),
            },
            409 => ClusterError::Conflict {
                kind: resource.kind.clone(),
                key: key.clone(),
                detail: response.message,
            },
            422 => ClusterError::Invalid(response.message),
            _ => ClusterError::Backend(response.message),
        },
        other => ClusterError::Backend(other.to_string()),
    }
}

fn to_raw(object: DynamicObject, resource: &ApiResource) -> Result<Value, ClusterError> {
    let mut raw = serde_json::to_value(object)?;
    // List items come back without type information.
    set_type_meta(&mut raw, resource);
    Ok(raw)
}

fn from_raw(object: Value) -> Result<DynamicObject, ClusterError> {
    Ok(serde_json::from_value(object)?)
}

#[async_trait]
impl ClusterClient for KubeCluster {
    async fn get(
        &self,
        resource: &ApiResource,
        key: &ObjectKey,
    ) -> Result<Option<Value>, ClusterError> {
        let api = self.api(resource, key.namespace.as_deref());
        let found = api
            .get_opt(&key.name)
            .await
            .map_err(|e| map_error(resource, key, e))?;
        found.map(|object| to_raw(object, resource)).transpose()
    }

    async fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
    ) -> Result<Vec<Value>, ClusterError> {
        let api = self.api(resource, namespace);
        let key = ObjectKey::new(namespace, "*");
        let listed = api
            .list(&ListParams::default())
            .await
            .map_err(|e| map_error(resource, &key, e))?;
        listed
            .items
            .into_iter()
            .map(|object| to_raw(object, resource))
            .collect()
    }

    async fn create(&self, resource: &ApiResource, object: Value) -> Result<Value, ClusterError> {
        let key = ObjectKey::from_raw(&object)?;
        let api = self.api(resource, key.namespace.as_deref());
        let created = api
            .create(&PostParams::default(), &from_raw(object)?)
            .await
            .map_err(|e| map_error(resource, &key, e))?;
        to_raw(created, resource)
    }

    async fn replace(&self, resource: &ApiResource, object: Value) -> Result<Value, ClusterError> {
        let key = ObjectKey::from_raw(&object)?;
        let api = self.api(resource, key.namespace.as_deref());
        let replaced = api
            .replace(&key.name, &PostParams::default(), &from_raw(object)?)
            .await
            .map_err(|e| map_error(resource, &key, e))?;
        to_raw(replaced, resource)
    }

    async fn replace_status(
        &self,
        resource: &ApiResource,
        object: Value,
    ) -> Result<Value, ClusterError> {
        let key = ObjectKey::from_raw(&object)?;
        let api = self.api(resource, key.namespace.as_deref());
        // A merge patch carrying metadata.resourceVersion is rejected with 409
        // when the version is stale, which gives the same optimistic check as
        // a full status replace.
        let resource_version = object
            .pointer("/metadata/resourceVersion")
            .cloned()
            .unwrap_or(Value::Null);
        let status = object.get("status").cloned().unwrap_or(Value::Null);
        let patch = json!({
            "metadata": { "resourceVersion": resource_version },
            "status": status,
        });
        let patched = api
            .patch_status(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_error(resource, &key, e))?;
        to_raw(patched, resource)
    }

    async fn delete(&self, resource: &ApiResource, key: &ObjectKey) -> Result<bool, ClusterError> {
        let api = self.api(resource, key.namespace.as_deref());
        match api.delete(&key.name, &DeleteParams::background()).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(response)) if response.code == 404 => Ok(false),
            Err(e) => Err(map_error(resource, key, e)),
        }
    }

    fn watch(&self, resource: &ApiResource, namespace: Option<&str>) -> WatchStream {
        let api = self.api(resource, namespace);
        let resource = resource.clone();
        let stream = watcher::watcher(api, watcher::Config::default())
            .default_backoff()
            .filter_map(move |event| {
                let (applied, object) = match event {
                    Ok(Event::Apply(object) | Event::InitApply(object)) => (true, object),
                    Ok(Event::Delete(object)) => (false, object),
                    Ok(Event::Init | Event::InitDone) => return None,
                    Err(e) => {
                        warn!(kind = %resource.kind, error = %e, "watch stream error");
                        return None;
                    }
                };
                match to_raw(object, &resource) {
                    Ok(raw) if applied => Some(WatchEvent::Applied(raw)),
                    Ok(raw) => Some(WatchEvent::Deleted(raw)),
                    Err(e) => {
                        warn!(kind = %resource.kind, error = %e, "undecodable watch object");
                        None
                    }
                }
            });
        Box::pin(stream)
    }

    fn backend(&self) -> &'static str {
        "kube"
    }
}
