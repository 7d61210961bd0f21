//! TLS assessment scheduling tests.

use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::Namespace;

use nimbus::adapter::engines::K8tlsEngine;
use nimbus::adapter::AdapterReconciler;
use nimbus::api::{ClusterNimbusPolicy, ClusterSecurityIntentBinding, SecurityIntent};
use nimbus::config::K8tlsConfig;
use nimbus::context::Context;
use nimbus::idpool;
use nimbus::operator::Operator;

use crate::fixtures::{cluster_binding, intent, intent_with_param, memory_context, namespace};

async fn cluster_document(ctx: &Context, tls_intent: SecurityIntent) {
    ctx.api::<Namespace>()
        .create(&namespace("default"))
        .await
        .expect("namespace should be created");
    ctx.api::<SecurityIntent>()
        .create(&tls_intent)
        .await
        .expect("intent should be created");
    ctx.api::<ClusterSecurityIntentBinding>()
        .create(&cluster_binding("tls", &["tls"], &["*"], &[], &[]))
        .await
        .expect("binding should be created");
    Operator::new(ctx.clone())
        .reconcile_cluster_binding("tls", false)
        .await
        .expect("operator pass should succeed");
}

async fn stored_job(ctx: &Context) -> CronJob {
    ctx.api::<CronJob>()
        .get(Some("nimbus-k8tls-env"), "tls-assesstls")
        .await
        .expect("lookup should succeed")
        .expect("cron job should exist")
}

#[tokio::test]
async fn scan_job_runs_in_dedicated_namespace_on_default_schedule() {
    let (_, ctx) = memory_context();
    cluster_document(&ctx, intent("tls", idpool::ASSESS_TLS, "Audit")).await;
    assert!(ctx
        .api::<ClusterNimbusPolicy>()
        .get(None, "tls")
        .await
        .expect("lookup should succeed")
        .is_some());

    let summary = AdapterReconciler::new(ctx.clone(), K8tlsEngine::new(K8tlsConfig::default()))
        .reconcile(None, "tls")
        .await
        .expect("reconcile should succeed");
    assert_eq!(summary.created, vec!["tls-assesstls".to_owned()]);

    let job = stored_job(&ctx).await;
    let spec = job.spec.expect("cron job spec should be set");
    assert_eq!(spec.schedule, "@weekly");
    let pod = spec
        .job_template
        .spec
        .and_then(|job| job.template.spec)
        .expect("pod spec should be set");
    assert_eq!(pod.restart_policy.as_deref(), Some("Never"));
    assert_eq!(pod.containers[0].image.as_deref(), Some("kubearmor/k8tls:latest"));
}

#[tokio::test]
async fn schedule_param_overrides_default() {
    let (_, ctx) = memory_context();
    cluster_document(
        &ctx,
        intent_with_param("tls", idpool::ASSESS_TLS, "Audit", "schedule", "0 3 * * *"),
    )
    .await;

    AdapterReconciler::new(ctx.clone(), K8tlsEngine::new(K8tlsConfig::default()))
        .reconcile(None, "tls")
        .await
        .expect("reconcile should succeed");

    let spec = stored_job(&ctx).await.spec.expect("cron job spec should be set");
    assert_eq!(spec.schedule, "0 3 * * *");
}

#[tokio::test]
async fn cluster_document_status_tracks_the_job() {
    let (_, ctx) = memory_context();
    cluster_document(&ctx, intent("tls", idpool::ASSESS_TLS, "Audit")).await;

    AdapterReconciler::new(ctx.clone(), K8tlsEngine::new(K8tlsConfig::default()))
        .reconcile(None, "tls")
        .await
        .expect("reconcile should succeed");

    let status = ctx
        .api::<ClusterNimbusPolicy>()
        .get(None, "tls")
        .await
        .expect("lookup should succeed")
        .and_then(|document| document.status)
        .expect("status should be written");
    assert_eq!(status.status, "Created");
    assert_eq!(status.number_of_adapter_policies, 1);
    assert_eq!(status.adapter_policies, vec!["CronJob/tls-assesstls".to_owned()]);
}
