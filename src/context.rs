//! Process-wide dependencies, built once at startup and handed to every
//! component constructor.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use tracing::info;

use crate::api::ClusterResource;
use crate::cluster::kube_backend::KubeCluster;
use crate::cluster::memory::InMemoryCluster;
use crate::cluster::{ClusterClient, ObjectApi};
use crate::config::{Backend, NimbusConfig};
use crate::pipeline::{RetryPolicy, StatusAggregator};

/// Shared handles for the operator and the adapters.
#[derive(Clone)]
pub struct Context {
    /// Substrate access.
    pub client: Arc<dyn ClusterClient>,
    /// Effective configuration.
    pub config: Arc<NimbusConfig>,
    /// Conflict-retrying status writer.
    pub status: StatusAggregator,
}

impl Context {
    /// Wire a context around an existing client.
    pub fn new(client: Arc<dyn ClusterClient>, config: NimbusConfig) -> Self {
        let status = StatusAggregator::new(Arc::clone(&client), RetryPolicy::from(&config.status));
        Self {
            client,
            config: Arc::new(config),
            status,
        }
    }

    /// Connect to the backend named in `config`.
    ///
    /// # Errors
    ///
    /// Fails when the Kubernetes client cannot be configured.
    pub async fn connect(config: NimbusConfig) -> Result<Self> {
        let client: Arc<dyn ClusterClient> = match config.cluster.backend {
            Backend::Kube => Arc::new(
                KubeCluster::try_default()
                    .await
                    .context("failed to build Kubernetes client")?,
            ),
            Backend::Memory => Arc::new(InMemoryCluster::new()),
        };
        info!(backend = client.backend(), "cluster client ready");
        Ok(Self::new(client, config))
    }

    /// Typed access to kind `K`.
    pub fn api<K: ClusterResource>(&self) -> ObjectApi<K> {
        ObjectApi::new(Arc::clone(&self.client))
    }
}
