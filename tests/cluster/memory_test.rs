//! In-memory substrate tests.

use kube::core::ApiResource;
use serde_json::{json, Value};

use nimbus::api::{ClusterResource, KubeArmorPolicy, NimbusPolicy, SecurityIntentBinding};
use nimbus::cluster::memory::InMemoryCluster;
use nimbus::cluster::{ClusterClient, ClusterError, ObjectKey};

fn document(name: &str, app: &str) -> Value {
    json!({
        "metadata": { "name": name, "namespace": "default" },
        "spec": { "selector": { "matchLabels": { "app": app } }, "rules": [] }
    })
}

fn str_at<'a>(object: &'a Value, pointer: &str) -> &'a str {
    object.pointer(pointer).and_then(Value::as_str).unwrap_or_default()
}

fn generation(object: &Value) -> i64 {
    object
        .pointer("/metadata/generation")
        .and_then(Value::as_i64)
        .unwrap_or_default()
}

fn resource() -> ApiResource {
    NimbusPolicy::api_resource()
}

#[tokio::test]
async fn create_assigns_identity_and_first_generation() {
    let cluster = InMemoryCluster::new();
    let stored = cluster
        .create(&resource(), document("web", "web"))
        .await
        .expect("create should succeed");

    assert!(!str_at(&stored, "/metadata/uid").is_empty());
    assert!(!str_at(&stored, "/metadata/resourceVersion").is_empty());
    assert_eq!(generation(&stored), 1);
    assert_eq!(str_at(&stored, "/kind"), "NimbusPolicy");
    assert_eq!(
        str_at(&stored, "/apiVersion"),
        "intent.security.nimbus.com/v1alpha1"
    );
}

#[tokio::test]
async fn duplicate_create_is_rejected() {
    let cluster = InMemoryCluster::new();
    cluster
        .create(&resource(), document("web", "web"))
        .await
        .expect("create should succeed");
    let result = cluster.create(&resource(), document("web", "other")).await;
    assert!(matches!(result, Err(ClusterError::AlreadyExists { .. })));
}

#[tokio::test]
async fn generation_moves_only_on_spec_change() {
    let cluster = InMemoryCluster::new();
    cluster
        .create(&resource(), document("web", "web"))
        .await
        .expect("create should succeed");

    let mut relabelled = document("web", "web");
    relabelled["metadata"]["labels"] = json!({ "team": "a" });
    let stored = cluster
        .replace(&resource(), relabelled)
        .await
        .expect("replace should succeed");
    assert_eq!(generation(&stored), 1);

    let stored = cluster
        .replace(&resource(), document("web", "api"))
        .await
        .expect("replace should succeed");
    assert_eq!(generation(&stored), 2);
}

#[tokio::test]
async fn stale_resource_version_conflicts() {
    let cluster = InMemoryCluster::new();
    let created = cluster
        .create(&resource(), document("web", "web"))
        .await
        .expect("create should succeed");

    let mut first = created.clone();
    first["spec"]["selector"]["matchLabels"]["app"] = json!("first");
    cluster
        .replace(&resource(), first)
        .await
        .expect("first writer should win");

    let mut second = created;
    second["spec"]["selector"]["matchLabels"]["app"] = json!("second");
    let result = cluster.replace(&resource(), second).await;
    assert!(matches!(result, Err(ref e) if e.is_conflict()));
}

#[tokio::test]
async fn status_writes_leave_spec_and_generation_alone() {
    let cluster = InMemoryCluster::new();
    let created = cluster
        .create(&resource(), document("web", "web"))
        .await
        .expect("create should succeed");

    let mut update = created.clone();
    update["spec"]["selector"]["matchLabels"]["app"] = json!("ignored");
    update["status"] = json!({ "status": "Created", "numberOfAdapterPolicies": 1 });
    let stored = cluster
        .replace_status(&resource(), update)
        .await
        .expect("status write should succeed");

    assert_eq!(str_at(&stored, "/spec/selector/matchLabels/app"), "web");
    assert_eq!(str_at(&stored, "/status/status"), "Created");
    assert_eq!(generation(&stored), 1);
    assert_ne!(
        str_at(&stored, "/metadata/resourceVersion"),
        str_at(&created, "/metadata/resourceVersion")
    );

    // A spec replace keeps the stored status.
    let replaced = cluster
        .replace(&resource(), document("web", "api"))
        .await
        .expect("replace should succeed");
    assert_eq!(str_at(&replaced, "/status/status"), "Created");
}

#[tokio::test]
async fn delete_cascades_through_owner_chain() {
    let cluster = InMemoryCluster::new();
    let binding = cluster
        .create(
            &SecurityIntentBinding::api_resource(),
            json!({
                "metadata": { "name": "web", "namespace": "default" },
                "spec": { "intents": [] }
            }),
        )
        .await
        .expect("binding should be created");

    let owned_by = |owner: &Value, kind: &str| {
        json!([{
            "apiVersion": "intent.security.nimbus.com/v1alpha1",
            "kind": kind,
            "name": str_at(owner, "/metadata/name"),
            "uid": str_at(owner, "/metadata/uid"),
        }])
    };

    let mut doc = document("web", "web");
    doc["metadata"]["ownerReferences"] = owned_by(&binding, "SecurityIntentBinding");
    let doc = cluster
        .create(&resource(), doc)
        .await
        .expect("document should be created");

    let policy = json!({
        "metadata": {
            "name": "web-dnsmanipulation",
            "namespace": "default",
            "ownerReferences": owned_by(&doc, "NimbusPolicy"),
        },
        "spec": { "selector": { "matchLabels": {} }, "action": "Block" }
    });
    cluster
        .create(&KubeArmorPolicy::api_resource(), policy)
        .await
        .expect("policy should be created");

    let unrelated = document("other", "other");
    cluster
        .create(&resource(), unrelated)
        .await
        .expect("unrelated document should be created");

    let deleted = cluster
        .delete(
            &SecurityIntentBinding::api_resource(),
            &ObjectKey::namespaced("default", "web"),
        )
        .await
        .expect("delete should succeed");
    assert!(deleted);
    assert_eq!(cluster.count(&resource()), 1);
    assert_eq!(cluster.count(&KubeArmorPolicy::api_resource()), 0);

    let again = cluster
        .delete(
            &SecurityIntentBinding::api_resource(),
            &ObjectKey::namespaced("default", "web"),
        )
        .await
        .expect("second delete should succeed");
    assert!(!again);
}

#[tokio::test]
async fn list_filters_by_namespace() {
    let cluster = InMemoryCluster::new();
    cluster
        .create(&resource(), document("web", "web"))
        .await
        .expect("create should succeed");
    let mut elsewhere = document("api", "api");
    elsewhere["metadata"]["namespace"] = json!("prod");
    cluster
        .create(&resource(), elsewhere)
        .await
        .expect("create should succeed");

    let all = cluster.list(&resource(), None).await.expect("list should succeed");
    let prod = cluster
        .list(&resource(), Some("prod"))
        .await
        .expect("list should succeed");
    assert_eq!(all.len(), 2);
    assert_eq!(prod.len(), 1);
    assert_eq!(str_at(&prod[0], "/metadata/name"), "api");
}
