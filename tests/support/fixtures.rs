//! Shared builders for integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Namespace;
use kube::api::ObjectMeta;

use nimbus::api::{
    ClusterSecurityIntentBinding, ClusterSecurityIntentBindingSpec, ClusterSelector, Intent,
    MatchIntent, NamespaceSelector, NimbusPolicy, SecurityIntent, SecurityIntentBinding,
    SecurityIntentBindingSpec, Selector, WorkloadSelector,
};
use nimbus::cluster::memory::InMemoryCluster;
use nimbus::cluster::ClusterClient;
use nimbus::config::NimbusConfig;
use nimbus::context::Context;
use nimbus::operator::Operator;

/// A fresh in-memory substrate and a context over it.
pub fn memory_context() -> (Arc<InMemoryCluster>, Context) {
    let cluster = Arc::new(InMemoryCluster::new());
    let client: Arc<dyn ClusterClient> = cluster.clone();
    let ctx = Context::new(client, NimbusConfig::default());
    (cluster, ctx)
}

pub fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
        .collect()
}

/// Intent named `name` with the given ID and action.
pub fn intent(name: &str, id: &str, action: &str) -> SecurityIntent {
    SecurityIntent::with_intent(
        name,
        Intent {
            id: id.to_owned(),
            description: format!("{id} test intent"),
            action: action.to_owned(),
            mode: "strict".to_owned(),
            ..Intent::default()
        },
    )
}

/// Same as [`intent`] with one parameter set.
pub fn intent_with_param(name: &str, id: &str, action: &str, key: &str, value: &str) -> SecurityIntent {
    let mut intent = intent(name, id, action);
    intent
        .spec
        .intent
        .params
        .insert(key.to_owned(), vec![value.to_owned()]);
    intent
}

pub fn binding(
    namespace: &str,
    name: &str,
    intents: &[&str],
    match_labels: &[(&str, &str)],
) -> SecurityIntentBinding {
    let mut binding = SecurityIntentBinding::new(
        name,
        SecurityIntentBindingSpec {
            intents: intents.iter().map(|name| MatchIntent::named(*name)).collect(),
            selector: Selector {
                match_labels: labels(match_labels),
                ..Selector::default()
            },
        },
    );
    binding.metadata.namespace = Some(namespace.to_owned());
    binding
}

pub fn cluster_binding(
    name: &str,
    intents: &[&str],
    match_names: &[&str],
    exclude_names: &[&str],
    match_labels: &[(&str, &str)],
) -> ClusterSecurityIntentBinding {
    ClusterSecurityIntentBinding::new(
        name,
        ClusterSecurityIntentBindingSpec {
            intents: intents.iter().map(|name| MatchIntent::named(*name)).collect(),
            selector: ClusterSelector {
                ns_selector: NamespaceSelector {
                    match_names: match_names.iter().map(|n| (*n).to_owned()).collect(),
                    exclude_names: exclude_names.iter().map(|n| (*n).to_owned()).collect(),
                },
                workload_selector: WorkloadSelector {
                    match_labels: labels(match_labels),
                },
                cel: Vec::new(),
            },
        },
    )
}

pub fn namespace(name: &str) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_owned()),
            ..ObjectMeta::default()
        },
        ..Namespace::default()
    }
}

/// Store intents and a namespaced binding, run the operator on it, and
/// return the synthesized document.
pub async fn synthesized_document(
    ctx: &Context,
    namespace: &str,
    name: &str,
    intents: Vec<SecurityIntent>,
    match_labels: &[(&str, &str)],
) -> NimbusPolicy {
    let mut names = Vec::new();
    for intent in &intents {
        let stored = ctx
            .api::<SecurityIntent>()
            .create(intent)
            .await
            .expect("intent should be created");
        names.push(kube::ResourceExt::name_any(&stored));
    }
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    ctx.api::<SecurityIntentBinding>()
        .create(&binding(namespace, name, &refs, match_labels))
        .await
        .expect("binding should be created");

    Operator::new(ctx.clone())
        .reconcile_binding(namespace, name, false)
        .await
        .expect("binding should reconcile");

    ctx.api::<NimbusPolicy>()
        .get(Some(namespace), name)
        .await
        .expect("document lookup should succeed")
        .expect("document should exist")
}
