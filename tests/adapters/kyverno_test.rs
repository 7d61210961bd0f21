//! Kyverno builder tests, namespaced and cluster-wide.

use k8s_openapi::api::core::v1::Namespace;

use nimbus::adapter::engines::{KyvernoClusterEngine, KyvernoEngine};
use nimbus::adapter::AdapterReconciler;
use nimbus::api::{ClusterPolicy, ClusterSecurityIntentBinding, Policy, SecurityIntent};
use nimbus::config::KyvernoConfig;
use nimbus::context::Context;
use nimbus::idpool;
use nimbus::operator::Operator;

use crate::fixtures::{
    cluster_binding, intent, intent_with_param, labels, memory_context, namespace,
    synthesized_document,
};

async fn stored_policy(ctx: &Context, name: &str) -> Policy {
    ctx.api::<Policy>()
        .get(Some("default"), name)
        .await
        .expect("lookup should succeed")
        .expect("policy should exist")
}

async fn reconcile_namespaced(ctx: &Context) {
    AdapterReconciler::new(ctx.clone(), KyvernoEngine::new(KyvernoConfig::default()))
        .reconcile(Some("default"), "web")
        .await
        .expect("reconcile should succeed");
}

#[tokio::test]
async fn escape_to_host_enforces_baseline_pod_security() {
    let (_, ctx) = memory_context();
    synthesized_document(
        &ctx,
        "default",
        "web",
        vec![intent("escape", idpool::ESCAPE_TO_HOST, "Block")],
        &[("app", "web")],
    )
    .await;
    reconcile_namespaced(&ctx).await;

    let policy = stored_policy(&ctx, "web-escapetohost").await;
    let body = &policy.spec.body;
    assert_eq!(body.validation_failure_action, "Enforce");
    assert!(body.background);
    assert_eq!(body.rules.len(), 1);

    let rule = &body.rules[0];
    let filter = &rule.match_resources.any[0].resources;
    assert_eq!(filter.kinds, vec!["v1/Pod".to_owned()]);
    assert_eq!(
        filter.selector.as_ref().map(|s| s.match_labels.clone()),
        Some(labels(&[("app", "web")]))
    );
    let pod_security = rule
        .validate
        .as_ref()
        .and_then(|v| v.pod_security.as_ref())
        .expect("pod security should be set");
    assert_eq!(pod_security.level, "baseline");
    assert_eq!(pod_security.version, "latest");
}

#[tokio::test]
async fn psa_level_param_and_audit_action_are_honoured() {
    let (_, ctx) = memory_context();
    synthesized_document(
        &ctx,
        "default",
        "web",
        vec![intent_with_param(
            "escape",
            idpool::ESCAPE_TO_HOST,
            "Audit",
            "psaLevel",
            "restricted",
        )],
        &[("app", "web")],
    )
    .await;
    reconcile_namespaced(&ctx).await;

    let policy = stored_policy(&ctx, "web-escapetohost").await;
    assert_eq!(policy.spec.body.validation_failure_action, "Audit");
    let level = policy.spec.body.rules[0]
        .validate
        .as_ref()
        .and_then(|v| v.pod_security.as_ref())
        .map(|p| p.level.clone());
    assert_eq!(level.as_deref(), Some("restricted"));
}

#[tokio::test]
async fn cluster_document_becomes_cluster_policy() {
    let (_, ctx) = memory_context();
    for name in ["default", "kube-system"] {
        ctx.api::<Namespace>()
            .create(&namespace(name))
            .await
            .expect("namespace should be created");
    }
    ctx.api::<SecurityIntent>()
        .create(&intent("escape", idpool::ESCAPE_TO_HOST, "Block"))
        .await
        .expect("intent should be created");
    ctx.api::<ClusterSecurityIntentBinding>()
        .create(&cluster_binding(
            "guard",
            &["escape"],
            &["*"],
            &["kube-system"],
            &[("app", "web")],
        ))
        .await
        .expect("binding should be created");
    Operator::new(ctx.clone())
        .reconcile_cluster_binding("guard", false)
        .await
        .expect("operator pass should succeed");

    let summary =
        AdapterReconciler::new(ctx.clone(), KyvernoClusterEngine::new(KyvernoConfig::default()))
            .reconcile(None, "guard")
            .await
            .expect("reconcile should succeed");
    assert_eq!(summary.created, vec!["guard-escapetohost".to_owned()]);

    let policy = ctx
        .api::<ClusterPolicy>()
        .get(None, "guard-escapetohost")
        .await
        .expect("lookup should succeed")
        .expect("cluster policy should exist");
    let rule = &policy.spec.body.rules[0];
    assert!(rule.match_resources.any[0].resources.namespaces.is_empty());
    let excluded = rule
        .exclude
        .as_ref()
        .map(|exclude| exclude.any[0].resources.namespaces.clone());
    assert_eq!(excluded, Some(vec!["kube-system".to_owned()]));
}
