//! Informer and generation filter tests.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};

use nimbus::api::{ClusterResource, NimbusPolicy};
use nimbus::cluster::informer::{EventAction, GenerationCache, Informer, ObjectEvent};
use nimbus::cluster::memory::InMemoryCluster;
use nimbus::cluster::{ClusterClient, WatchEvent};

fn object(name: &str, generation: i64) -> Value {
    json!({
        "metadata": { "name": name, "namespace": "default", "generation": generation },
        "spec": {}
    })
}

fn document(app: &str) -> Value {
    json!({
        "metadata": { "name": "web", "namespace": "default" },
        "spec": { "selector": { "matchLabels": { "app": app } }, "rules": [] }
    })
}

async fn next_event(rx: &mut mpsc::Receiver<ObjectEvent>) -> ObjectEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("event should arrive in time")
        .expect("queue should stay open")
}

async fn assert_quiet(rx: &mut mpsc::Receiver<ObjectEvent>) {
    let waited = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
    assert!(waited.is_err(), "unexpected event: {waited:?}");
}

#[test]
fn first_sighting_is_added() {
    let mut cache = GenerationCache::new();
    let event = cache
        .classify("NimbusPolicy", &WatchEvent::Applied(object("web", 1)))
        .expect("first sighting should pass");
    assert_eq!(event.action, EventAction::Added);
    assert_eq!(event.key.name, "web");
    assert_eq!(event.key.namespace.as_deref(), Some("default"));
    assert_eq!(event.generation, Some(1));
    assert!(!event.resync);
    assert_eq!(cache.len(), 1);
}

#[test]
fn unchanged_generation_is_dropped() {
    let mut cache = GenerationCache::new();
    cache.classify("NimbusPolicy", &WatchEvent::Applied(object("web", 1)));
    assert!(cache
        .classify("NimbusPolicy", &WatchEvent::Applied(object("web", 1)))
        .is_none());
}

#[test]
fn new_generation_is_an_update() {
    let mut cache = GenerationCache::new();
    cache.classify("NimbusPolicy", &WatchEvent::Applied(object("web", 1)));
    let event = cache
        .classify("NimbusPolicy", &WatchEvent::Applied(object("web", 2)))
        .expect("generation change should pass");
    assert_eq!(event.action, EventAction::Updated);
    assert_eq!(event.generation, Some(2));
}

#[test]
fn deletion_forgets_the_object() {
    let mut cache = GenerationCache::new();
    cache.classify("NimbusPolicy", &WatchEvent::Applied(object("web", 1)));
    let event = cache
        .classify("NimbusPolicy", &WatchEvent::Deleted(object("web", 1)))
        .expect("deletion should pass");
    assert_eq!(event.action, EventAction::Deleted);
    assert!(cache.is_empty());

    let again = cache
        .classify("NimbusPolicy", &WatchEvent::Applied(object("web", 1)))
        .expect("recreation should pass");
    assert_eq!(again.action, EventAction::Added);
}

#[test]
fn resync_redelivers_regardless_of_generation() {
    let mut cache = GenerationCache::new();
    cache.classify("NimbusPolicy", &WatchEvent::Applied(object("web", 1)));
    let event = cache
        .resync("NimbusPolicy", &object("web", 1))
        .expect("resync should deliver");
    assert_eq!(event.action, EventAction::Updated);
    assert!(event.resync);
}

#[test]
fn unnamed_objects_are_dropped() {
    let mut cache = GenerationCache::new();
    let nameless = json!({ "metadata": {}, "spec": {} });
    assert!(cache
        .classify("NimbusPolicy", &WatchEvent::Applied(nameless))
        .is_none());
}

#[tokio::test]
async fn informer_filters_status_churn() {
    let cluster = Arc::new(InMemoryCluster::new());
    let client: Arc<dyn ClusterClient> = cluster.clone();
    let resource = NimbusPolicy::api_resource();
    let (tx, mut rx) = mpsc::channel(16);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let created = client
        .create(&resource, document("web"))
        .await
        .expect("create should succeed");
    let handle = Informer::new(Arc::clone(&client), resource.clone()).spawn(tx, shutdown_rx);

    let added = next_event(&mut rx).await;
    assert_eq!(added.action, EventAction::Added);
    assert_eq!(added.kind, "NimbusPolicy");

    let mut with_status = created;
    with_status["status"] = json!({ "status": "Created" });
    client
        .replace_status(&resource, with_status)
        .await
        .expect("status write should succeed");
    assert_quiet(&mut rx).await;

    client
        .replace(&resource, document("api"))
        .await
        .expect("replace should succeed");
    let updated = next_event(&mut rx).await;
    assert_eq!(updated.action, EventAction::Updated);
    assert_eq!(updated.generation, Some(2));

    shutdown_tx.send(true).expect("informer should be listening");
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("informer should stop")
        .expect("informer task should not panic");
}

#[tokio::test]
async fn informer_resync_redelivers_known_objects() {
    let cluster = Arc::new(InMemoryCluster::new());
    let client: Arc<dyn ClusterClient> = cluster.clone();
    let resource = NimbusPolicy::api_resource();
    let (tx, mut rx) = mpsc::channel(16);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    client
        .create(&resource, document("web"))
        .await
        .expect("create should succeed");
    let _handle = Informer::new(Arc::clone(&client), resource)
        .with_resync(Some(Duration::from_millis(50)))
        .spawn(tx, shutdown_rx);

    assert_eq!(next_event(&mut rx).await.action, EventAction::Added);
    let resynced = next_event(&mut rx).await;
    assert_eq!(resynced.action, EventAction::Updated);
    assert!(resynced.resync);
}
