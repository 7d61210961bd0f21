//! Multi-document YAML in and out of the substrate, for offline runs.

use std::sync::Arc;

use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::api::networking::v1::NetworkPolicy;
use kube::core::ApiResource;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::api::{
    ClusterNimbusPolicy, ClusterPolicy, ClusterResource, ClusterSecurityIntentBinding,
    KubeArmorPolicy, NimbusPolicy, Policy, SecurityIntent, SecurityIntentBinding,
};
use crate::cluster::{ClusterClient, ClusterError};

/// A manifest could not be loaded.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    /// Malformed YAML.
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML that has no JSON equivalent.
    #[error("manifest is not representable as JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A document without `kind`, or of a kind offline runs do not accept.
    #[error("unsupported manifest kind `{0}`")]
    UnsupportedKind(String),

    /// The substrate rejected an object.
    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

/// Kinds a manifest file may contain.
pub fn input_resources() -> Vec<ApiResource> {
    vec![
        Namespace::api_resource(),
        SecurityIntent::api_resource(),
        SecurityIntentBinding::api_resource(),
        ClusterSecurityIntentBinding::api_resource(),
    ]
}

/// Kinds produced by the pipeline, in output order.
pub fn output_resources() -> Vec<ApiResource> {
    vec![
        NimbusPolicy::api_resource(),
        ClusterNimbusPolicy::api_resource(),
        KubeArmorPolicy::api_resource(),
        NetworkPolicy::api_resource(),
        Policy::api_resource(),
        ClusterPolicy::api_resource(),
        CronJob::api_resource(),
    ]
}

/// Split a multi-document YAML stream into JSON objects, skipping empty
/// documents.
///
/// # Errors
///
/// [`ManifestError::Yaml`] / [`ManifestError::Json`] on malformed input.
pub fn parse(text: &str) -> Result<Vec<Value>, ManifestError> {
    let mut objects = Vec::new();
    for document in serde_yaml::Deserializer::from_str(text) {
        let value = serde_yaml::Value::deserialize(document)?;
        if value.is_null() {
            continue;
        }
        objects.push(serde_json::to_value(value)?);
    }
    Ok(objects)
}

/// Create every object in `objects`, inputs first (namespaces, then
/// intents, then bindings). Returns how many were created.
///
/// # Errors
///
/// [`ManifestError::UnsupportedKind`] for kinds outside
/// [`input_resources`]; substrate errors from create.
pub async fn apply(
    client: &Arc<dyn ClusterClient>,
    objects: Vec<Value>,
) -> Result<usize, ManifestError> {
    let resources = input_resources();
    let mut ordered: Vec<(usize, ApiResource, Value)> = Vec::with_capacity(objects.len());
    for object in objects {
        let kind = object
            .get("kind")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        let Some((rank, resource)) = resources
            .iter()
            .enumerate()
            .find(|(_, resource)| resource.kind == kind)
        else {
            return Err(ManifestError::UnsupportedKind(kind));
        };
        ordered.push((rank, resource.clone(), object));
    }
    ordered.sort_by_key(|(rank, _, _)| *rank);

    let count = ordered.len();
    for (_, resource, object) in ordered {
        let created = client.create(&resource, object).await?;
        debug!(kind = %resource.kind, name = ?created.pointer("/metadata/name"), "manifest applied");
    }
    Ok(count)
}

/// Every pipeline output currently stored, as multi-document YAML.
///
/// # Errors
///
/// Substrate list failures or serialization failures.
pub async fn render_outputs(client: &Arc<dyn ClusterClient>) -> Result<String, ManifestError> {
    let mut out = String::new();
    for resource in output_resources() {
        for object in client.list(&resource, None).await? {
            out.push_str("---\n");
            out.push_str(&serde_yaml::to_string(&object)?);
        }
    }
    Ok(out)
}
