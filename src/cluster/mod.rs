//! Orchestration substrate abstraction.
//!
//! Every read and write the operator and the adapters perform goes through
//! [`ClusterClient`], an object-safe seam over raw JSON objects addressed by
//! [`ApiResource`]. Two backends exist: [`kube_backend::KubeCluster`] talks to a
//! real API server, [`memory::InMemoryCluster`] models the parts of its
//! semantics the pipeline relies on (resource versions, generations,
//! cascade delete, watches). Typed access goes through [`ObjectApi`].

pub mod informer;
pub mod kube_backend;
pub mod memory;
mod object_api;

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::ApiResource;
use serde_json::Value;
use tokio_stream::Stream;

pub use object_api::ObjectApi;

/// Errors produced by substrate operations.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    /// The addressed object does not exist.
    #[error("{kind} {key} not found")]
    NotFound {
        /// Kind of the missing object.
        kind: String,
        /// Namespace/name of the missing object.
        key: ObjectKey,
    },

    /// A create collided with an existing object.
    #[error("{kind} {key} already exists")]
    AlreadyExists {
        /// Kind of the existing object.
        kind: String,
        /// Namespace/name of the existing object.
        key: ObjectKey,
    },

    /// The write carried a stale resource version.
    #[error("conflict writing {kind} {key}: {detail}")]
    Conflict {
        /// Kind of the contended object.
        kind: String,
        /// Namespace/name of the contended object.
        key: ObjectKey,
        /// Backend-provided detail.
        detail: String,
    },

    /// The object is malformed (missing name, wrong shape).
    #[error("invalid object: {0}")]
    Invalid(String),

    /// JSON conversion between typed and raw objects failed.
    #[error("object serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Transport or API server failure.
    #[error("substrate request failed: {0}")]
    Backend(String),
}

impl ClusterError {
    /// Whether the error is an optimistic-concurrency conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Whether the error reports a missing object.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Namespace and name of an object. Cluster-scoped objects have no namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    /// Namespace, `None` for cluster-scoped kinds.
    pub namespace: Option<String>,
    /// Object name.
    pub name: String,
}

impl ObjectKey {
    /// Key of a namespaced object.
    pub fn namespaced(namespace: &str, name: &str) -> Self {
        Self {
            namespace: Some(namespace.to_owned()),
            name: name.to_owned(),
        }
    }

    /// Key of a cluster-scoped object.
    pub fn cluster(name: &str) -> Self {
        Self {
            namespace: None,
            name: name.to_owned(),
        }
    }

    /// Key with an optional namespace.
    pub fn new(namespace: Option<&str>, name: &str) -> Self {
        Self {
            namespace: namespace.map(str::to_owned),
            name: name.to_owned(),
        }
    }

    /// Read the key out of a raw object's metadata.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::Invalid`] when the object has no name.
    pub fn from_raw(object: &Value) -> Result<Self, ClusterError> {
        let metadata = raw_metadata(object)?;
        let name = metadata
            .name
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ClusterError::Invalid("object has no metadata.name".to_owned()))?;
        Ok(Self {
            namespace: metadata.namespace.filter(|ns| !ns.is_empty()),
            name,
        })
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{namespace}/{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Decode the `metadata` block of a raw object.
///
/// # Errors
///
/// Returns [`ClusterError::Serialization`] when the block has the wrong shape.
pub fn raw_metadata(object: &Value) -> Result<ObjectMeta, ClusterError> {
    match object.get("metadata") {
        Some(metadata) => Ok(serde_json::from_value(metadata.clone())?),
        None => Ok(ObjectMeta::default()),
    }
}

/// A change observed on a watched kind.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    /// The object was created or modified (or listed on watch start).
    Applied(Value),
    /// The object was removed.
    Deleted(Value),
}

/// Stream of watch events for one kind.
pub type WatchStream = Pin<Box<dyn Stream<Item = WatchEvent> + Send>>;

/// Object-safe CRUD + watch seam over the substrate.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Fetch an object; `Ok(None)` when it does not exist.
    async fn get(&self, resource: &ApiResource, key: &ObjectKey)
        -> Result<Option<Value>, ClusterError>;

    /// List objects of a kind, in one namespace or across all of them.
    async fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
    ) -> Result<Vec<Value>, ClusterError>;

    /// Create an object. Fails with [`ClusterError::AlreadyExists`] on collision.
    async fn create(&self, resource: &ApiResource, object: Value) -> Result<Value, ClusterError>;

    /// Replace an object's spec and metadata. A non-empty
    /// `metadata.resourceVersion` must match the stored one.
    async fn replace(&self, resource: &ApiResource, object: Value) -> Result<Value, ClusterError>;

    /// Replace an object's status subresource, with the same version check.
    async fn replace_status(
        &self,
        resource: &ApiResource,
        object: Value,
    ) -> Result<Value, ClusterError>;

    /// Delete an object. Returns `false` when it was already gone.
    async fn delete(&self, resource: &ApiResource, key: &ObjectKey) -> Result<bool, ClusterError>;

    /// Watch a kind. The stream starts with an `Applied` event per existing object.
    fn watch(&self, resource: &ApiResource, namespace: Option<&str>) -> WatchStream;

    /// Short backend name for logs.
    fn backend(&self) -> &'static str;
}

/// Stamp `apiVersion` and `kind` onto a raw object.
pub(crate) fn set_type_meta(object: &mut Value, resource: &ApiResource) {
    if let Some(map) = object.as_object_mut() {
        map.insert(
            "apiVersion".to_owned(),
            Value::String(resource.api_version.clone()),
        );
        map.insert("kind".to_owned(), Value::String(resource.kind.clone()));
    }
}
