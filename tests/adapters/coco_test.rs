//! Confidential-computing builder tests.

use kube::ResourceExt;
use serde_json::Value;

use nimbus::adapter::engines::{CocoEngine, KyvernoEngine};
use nimbus::adapter::AdapterReconciler;
use nimbus::api::Policy;
use nimbus::config::{CocoConfig, KyvernoConfig};
use nimbus::context::Context;
use nimbus::idpool;

use crate::fixtures::{intent, intent_with_param, memory_context, synthesized_document};

async fn runtime_class(ctx: &Context) -> Option<String> {
    let policy = ctx
        .api::<Policy>()
        .get(Some("default"), "web-cocoworkload")
        .await
        .expect("lookup should succeed")
        .expect("policy should exist");
    let rule = &policy.spec.body.rules[0];
    assert_eq!(
        rule.match_resources.any[0].resources.kinds,
        vec!["apps/v1/Deployment".to_owned()]
    );
    rule.mutate
        .as_ref()
        .and_then(|m| m.patch_strategic_merge.pointer("/spec/template/spec/runtimeClassName"))
        .and_then(Value::as_str)
        .map(str::to_owned)
}

#[tokio::test]
async fn default_runtime_class_is_patched_in() {
    let (_, ctx) = memory_context();
    synthesized_document(
        &ctx,
        "default",
        "web",
        vec![intent("coco", idpool::COCO_WORKLOAD, "Block")],
        &[("app", "web")],
    )
    .await;
    AdapterReconciler::new(ctx.clone(), CocoEngine::new(CocoConfig::default()))
        .reconcile(Some("default"), "web")
        .await
        .expect("reconcile should succeed");

    assert_eq!(runtime_class(&ctx).await.as_deref(), Some("kata-clh"));
}

#[tokio::test]
async fn runtime_class_param_overrides_default() {
    let (_, ctx) = memory_context();
    synthesized_document(
        &ctx,
        "default",
        "web",
        vec![intent_with_param(
            "coco",
            idpool::COCO_WORKLOAD,
            "Block",
            "runtimeClass",
            "kata-qemu-snp",
        )],
        &[("app", "web")],
    )
    .await;
    AdapterReconciler::new(ctx.clone(), CocoEngine::new(CocoConfig::default()))
        .reconcile(Some("default"), "web")
        .await
        .expect("reconcile should succeed");

    assert_eq!(runtime_class(&ctx).await.as_deref(), Some("kata-qemu-snp"));
}

#[tokio::test]
async fn engines_sharing_a_kind_do_not_collect_each_other() {
    let (_, ctx) = memory_context();
    synthesized_document(
        &ctx,
        "default",
        "web",
        vec![
            intent("coco", idpool::COCO_WORKLOAD, "Block"),
            intent("escape", idpool::ESCAPE_TO_HOST, "Block"),
        ],
        &[("app", "web")],
    )
    .await;
    let coco = AdapterReconciler::new(ctx.clone(), CocoEngine::new(CocoConfig::default()));
    let kyverno = AdapterReconciler::new(ctx.clone(), KyvernoEngine::new(KyvernoConfig::default()));

    coco.reconcile(Some("default"), "web")
        .await
        .expect("coco pass should succeed");
    kyverno
        .reconcile(Some("default"), "web")
        .await
        .expect("kyverno pass should succeed");
    let again = coco
        .reconcile(Some("default"), "web")
        .await
        .expect("second coco pass should succeed");
    assert!(again.deleted.is_empty());

    let mut names: Vec<String> = ctx
        .api::<Policy>()
        .list(Some("default"))
        .await
        .expect("list should succeed")
        .iter()
        .map(ResourceExt::name_any)
        .collect();
    names.sort();
    assert_eq!(
        names,
        vec!["web-cocoworkload".to_owned(), "web-escapetohost".to_owned()]
    );
}
