//! Manifest parsing, ordered apply, and rendering of pipeline outputs.

use std::sync::Arc;

use nimbus::adapter::engines::handlers;
use nimbus::api::{SecurityIntent, SecurityIntentBinding};
use nimbus::cluster::memory::InMemoryCluster;
use nimbus::cluster::ClusterClient;
use nimbus::config::NimbusConfig;
use nimbus::context::Context;
use nimbus::manifests::{self, ManifestError};
use nimbus::operator::Operator;

const DNS_MANIFEST: &str = r#"
apiVersion: intent.security.nimbus.com/v1alpha1
kind: SecurityIntentBinding
metadata:
  name: dns-binding
  namespace: default
spec:
  intents:
    - name: dns-manipulation
  selector:
    matchLabels:
      app: nginx
---
apiVersion: intent.security.nimbus.com/v1alpha1
kind: SecurityIntent
metadata:
  name: dns-manipulation
spec:
  intent:
    id: dnsManipulation
    description: An adversary can manipulate DNS requests to redirect network traffic
    action: Block
---
---
apiVersion: v1
kind: Namespace
metadata:
  name: default
"#;

fn memory_context() -> Context {
    let client: Arc<dyn ClusterClient> = Arc::new(InMemoryCluster::new());
    Context::new(client, NimbusConfig::default())
}

#[test]
fn empty_documents_are_skipped() {
    let objects = manifests::parse(DNS_MANIFEST).expect("manifest should parse");
    assert_eq!(objects.len(), 3);
    assert_eq!(objects[0]["kind"], "SecurityIntentBinding");
    assert_eq!(objects[2]["metadata"]["name"], "default");
}

#[test]
fn malformed_yaml_is_rejected() {
    let result = manifests::parse("kind: [unterminated\n");
    assert!(matches!(result, Err(ManifestError::Yaml(_))));
}

#[tokio::test]
async fn unsupported_kind_is_rejected() {
    let ctx = memory_context();
    let objects = manifests::parse("apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: x\n")
        .expect("manifest should parse");
    let result = manifests::apply(&ctx.client, objects).await;
    assert!(matches!(result, Err(ManifestError::UnsupportedKind(kind)) if kind == "ConfigMap"));
}

#[tokio::test]
async fn apply_loads_every_input() {
    let ctx = memory_context();
    let objects = manifests::parse(DNS_MANIFEST).expect("manifest should parse");
    let count = manifests::apply(&ctx.client, objects)
        .await
        .expect("apply should succeed");
    assert_eq!(count, 3);

    let intent = ctx
        .api::<SecurityIntent>()
        .get(None, "dns-manipulation")
        .await
        .expect("lookup should succeed")
        .expect("intent should be stored");
    assert_eq!(intent.spec.intent.mode, "best-effort");
    assert!(ctx
        .api::<SecurityIntentBinding>()
        .get(Some("default"), "dns-binding")
        .await
        .expect("lookup should succeed")
        .is_some());
}

#[tokio::test]
async fn offline_pass_renders_document_and_engine_policy() {
    let ctx = memory_context();
    let objects = manifests::parse(DNS_MANIFEST).expect("manifest should parse");
    manifests::apply(&ctx.client, objects)
        .await
        .expect("apply should succeed");

    Operator::new(ctx.clone())
        .reconcile_all()
        .await
        .expect("operator pass should succeed");
    for handler in handlers(&ctx, "kubearmor").expect("kubearmor should build") {
        handler.resync_all().await.expect("adapter pass should succeed");
    }

    let rendered = manifests::render_outputs(&ctx.client)
        .await
        .expect("render should succeed");
    assert!(rendered.starts_with("---\n"));
    assert!(rendered.contains("kind: NimbusPolicy"));
    assert!(rendered.contains("kind: KubeArmorPolicy"));
    assert!(rendered.contains("dns-binding-dnsmanipulation"));
    let document_at = rendered.find("kind: NimbusPolicy").expect("document rendered");
    let policy_at = rendered.find("kind: KubeArmorPolicy").expect("policy rendered");
    assert!(document_at < policy_at);
}

#[tokio::test]
async fn nothing_rendered_before_any_pass() {
    let ctx = memory_context();
    let objects = manifests::parse(DNS_MANIFEST).expect("manifest should parse");
    manifests::apply(&ctx.client, objects)
        .await
        .expect("apply should succeed");
    let rendered = manifests::render_outputs(&ctx.client)
        .await
        .expect("render should succeed");
    assert!(rendered.is_empty());
}
