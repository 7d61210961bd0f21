//! Resolves the intents a binding references.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Namespace;
use kube::ResourceExt;
use tracing::{debug, warn};

use crate::api::{
    ClusterSecurityIntentBinding, MatchIntent, NamespaceSelector, SecurityIntent,
    SecurityIntentBinding,
};
use crate::cluster::{ClusterClient, ClusterError, ObjectApi};

/// Everything the synthesizer needs from one binding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BindingInfo {
    /// Intents that resolved, in binding order.
    pub intents: Vec<SecurityIntent>,
    /// Names of the resolved intents, parallel to `intents`.
    pub intent_names: Vec<String>,
    /// Name of the binding (one entry per binding folded into this info).
    pub binding_names: Vec<String>,
    /// Namespace of each binding; empty string for cluster bindings.
    pub binding_namespaces: Vec<String>,
    /// Namespaces a cluster binding covers. Empty for namespaced bindings.
    pub namespaces: Vec<String>,
}

impl BindingInfo {
    /// Whether every referenced intent resolved.
    pub fn is_complete(&self, referenced: usize) -> bool {
        self.intents.len() == referenced
    }
}

/// Fetches intents (and for cluster bindings, namespaces) from the substrate.
#[derive(Clone)]
pub struct IntentBinder {
    intents: ObjectApi<SecurityIntent>,
    namespaces: ObjectApi<Namespace>,
}

impl IntentBinder {
    /// Binder reading through `client`.
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self {
            intents: ObjectApi::new(Arc::clone(&client)),
            namespaces: ObjectApi::new(client),
        }
    }

    /// Resolve a namespaced binding.
    ///
    /// Missing intents are logged and skipped; the result may hold fewer
    /// intents than the binding references.
    ///
    /// # Errors
    ///
    /// Any substrate error other than not-found.
    pub async fn bind(&self, binding: &SecurityIntentBinding) -> Result<BindingInfo, ClusterError> {
        let (intents, intent_names) = self.resolve_intents(&binding.spec.intents).await?;
        Ok(BindingInfo {
            intents,
            intent_names,
            binding_names: vec![binding.name_any()],
            binding_namespaces: vec![binding.namespace().unwrap_or_default()],
            namespaces: Vec::new(),
        })
    }

    /// Resolve a cluster binding, including the namespaces it covers.
    ///
    /// # Errors
    ///
    /// Any substrate error other than not-found.
    pub async fn bind_cluster(
        &self,
        binding: &ClusterSecurityIntentBinding,
    ) -> Result<BindingInfo, ClusterError> {
        let (intents, intent_names) = self.resolve_intents(&binding.spec.intents).await?;
        let namespaces = self
            .matched_namespaces(&binding.spec.selector.ns_selector)
            .await?;
        Ok(BindingInfo {
            intents,
            intent_names,
            binding_names: vec![binding.name_any()],
            binding_namespaces: vec![String::new()],
            namespaces,
        })
    }

    /// Names of live namespaces covered by `selector`, sorted.
    ///
    /// # Errors
    ///
    /// Substrate list failure.
    pub async fn matched_namespaces(
        &self,
        selector: &NamespaceSelector,
    ) -> Result<Vec<String>, ClusterError> {
        let live: Vec<String> = self
            .namespaces
            .list(None)
            .await?
            .iter()
            .map(ResourceExt::name_any)
            .collect();
        Ok(select_namespaces(&live, selector))
    }

    async fn resolve_intents(
        &self,
        references: &[MatchIntent],
    ) -> Result<(Vec<SecurityIntent>, Vec<String>), ClusterError> {
        let mut intents = Vec::with_capacity(references.len());
        let mut names = Vec::with_capacity(references.len());
        for reference in references {
            match self.intents.get(None, &reference.name).await? {
                Some(intent) => {
                    debug!(intent = %reference.name, id = %intent.spec.intent.id, "intent resolved");
                    names.push(reference.name.clone());
                    intents.push(intent);
                }
                None => warn!(intent = %reference.name, "referenced intent not found; skipped"),
            }
        }
        Ok((intents, names))
    }
}

/// Filter `live` namespace names through `selector`.
///
/// An empty include list or a `*` entry covers everything; exclusions always
/// win. Output is sorted and deduplicated.
pub fn select_namespaces(live: &[String], selector: &NamespaceSelector) -> Vec<String> {
    let everything = selector.match_names.is_empty()
        || selector.match_names.iter().any(|name| name == "*");
    let mut selected: Vec<String> = live
        .iter()
        .filter(|name| everything || selector.match_names.contains(name))
        .filter(|name| !selector.exclude_names.contains(name))
        .cloned()
        .collect();
    selected.sort();
    selected.dedup();
    selected
}
