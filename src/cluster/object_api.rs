//! Typed facade over [`ClusterClient`].

use std::marker::PhantomData;
use std::sync::Arc;

use kube::core::ApiResource;
use kube::ResourceExt;
use serde_json::Value;

use crate::api::ClusterResource;

use super::{set_type_meta, ClusterClient, ClusterError, ObjectKey};

/// Typed CRUD access to one kind.
pub struct ObjectApi<K> {
    client: Arc<dyn ClusterClient>,
    resource: ApiResource,
    _kind: PhantomData<fn() -> K>,
}

impl<K> Clone for ObjectApi<K> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            resource: self.resource.clone(),
            _kind: PhantomData,
        }
    }
}

impl<K: ClusterResource> ObjectApi<K> {
    /// Typed access to `K` through `client`.
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self {
            client,
            resource: K::api_resource(),
            _kind: PhantomData,
        }
    }

    /// Fetch by namespace and name.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or an undecodable object.
    pub async fn get(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>, ClusterError> {
        let key = ObjectKey::new(namespace, name);
        match self.client.get(&self.resource, &key).await? {
            Some(raw) => Ok(Some(self.decode(raw)?)),
            None => Ok(None),
        }
    }

    /// List in one namespace, or across all when `namespace` is `None`.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or an undecodable object.
    pub async fn list(&self, namespace: Option<&str>) -> Result<Vec<K>, ClusterError> {
        self.client
            .list(&self.resource, namespace)
            .await?
            .into_iter()
            .map(|raw| self.decode(raw))
            .collect()
    }

    /// Create `object` and return the stored copy.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::AlreadyExists`] on collision.
    pub async fn create(&self, object: &K) -> Result<K, ClusterError> {
        let raw = self.encode(object)?;
        let stored = self.client.create(&self.resource, raw).await?;
        self.decode(stored)
    }

    /// Replace `object`'s spec and metadata.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::Conflict`] when the resource version is stale.
    pub async fn replace(&self, object: &K) -> Result<K, ClusterError> {
        let raw = self.encode(object)?;
        let stored = self.client.replace(&self.resource, raw).await?;
        self.decode(stored)
    }

    /// Replace `object`'s status.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::Conflict`] when the resource version is stale.
    pub async fn replace_status(&self, object: &K) -> Result<K, ClusterError> {
        let raw = self.encode(object)?;
        let stored = self.client.replace_status(&self.resource, raw).await?;
        self.decode(stored)
    }

    /// Delete by namespace and name; `Ok(false)` when already absent.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure.
    pub async fn delete(&self, namespace: Option<&str>, name: &str) -> Result<bool, ClusterError> {
        let key = ObjectKey::new(namespace, name);
        self.client.delete(&self.resource, &key).await
    }

    fn encode(&self, object: &K) -> Result<Value, ClusterError> {
        let mut raw = serde_json::to_value(object)?;
        set_type_meta(&mut raw, &self.resource);
        Ok(raw)
    }

    fn decode(&self, mut raw: Value) -> Result<K, ClusterError> {
        set_type_meta(&mut raw, &self.resource);
        Ok(serde_json::from_value(raw)?)
    }
}
