//! Watch subscriptions that turn raw substrate changes into per-object
//! add/update/delete notifications on a bounded queue.
//!
//! Updates whose `metadata.generation` did not move are dropped here, before
//! they reach any handler: status and metadata churn must not cause reconcile
//! storms. Periodic resync re-delivers every known object regardless of
//! generation, which is how failed passes get retried.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::core::ApiResource;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, info, trace, warn};

use super::{raw_metadata, ClusterClient, ObjectKey, WatchEvent};

/// What happened to an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventAction {
    /// First sighting of the object.
    Added,
    /// The object's generation moved, or a resync re-delivered it.
    Updated,
    /// The object is gone.
    Deleted,
}

/// A filtered change notification for one object.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectEvent {
    /// Kind of the object.
    pub kind: String,
    /// What happened.
    pub action: EventAction,
    /// Namespace and name.
    pub key: ObjectKey,
    /// Owner references at the time of the event.
    pub owner_references: Vec<OwnerReference>,
    /// Generation at the time of the event.
    pub generation: Option<i64>,
    /// Whether the event came from a periodic resync.
    pub resync: bool,
}

impl ObjectEvent {
    fn from_raw(kind: &str, action: EventAction, object: &Value) -> Option<Self> {
        let key = match ObjectKey::from_raw(object) {
            Ok(key) => key,
            Err(e) => {
                warn!(kind, error = %e, "dropping event for unnamed object");
                return None;
            }
        };
        let metadata = raw_metadata(object).ok()?;
        Some(Self {
            kind: kind.to_owned(),
            action,
            key,
            owner_references: metadata.owner_references.unwrap_or_default(),
            generation: metadata.generation,
            resync: false,
        })
    }
}

/// Last generation seen per object; classifies raw watch events.
#[derive(Debug, Default)]
pub struct GenerationCache {
    seen: HashMap<ObjectKey, Option<i64>>,
}

impl GenerationCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify a raw watch event, or `None` when it should be dropped.
    pub fn classify(&mut self, kind: &str, event: &WatchEvent) -> Option<ObjectEvent> {
        match event {
            WatchEvent::Applied(object) => {
                let event = ObjectEvent::from_raw(kind, EventAction::Added, object)?;
                match self.seen.insert(event.key.clone(), event.generation) {
                    None => Some(event),
                    Some(previous) if previous == event.generation => {
                        trace!(kind, key = %event.key, "generation unchanged; update dropped");
                        None
                    }
                    Some(_) => Some(ObjectEvent {
                        action: EventAction::Updated,
                        ..event
                    }),
                }
            }
            WatchEvent::Deleted(object) => {
                let event = ObjectEvent::from_raw(kind, EventAction::Deleted, object)?;
                self.seen.remove(&event.key);
                Some(event)
            }
        }
    }

    /// Turn a listed object into a resync notification.
    pub fn resync(&mut self, kind: &str, object: &Value) -> Option<ObjectEvent> {
        let event = ObjectEvent::from_raw(kind, EventAction::Updated, object)?;
        self.seen.insert(event.key.clone(), event.generation);
        Some(ObjectEvent {
            resync: true,
            ..event
        })
    }

    /// Number of objects currently tracked.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Whether no object is tracked.
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// A long-lived watch on one kind feeding one bounded queue.
pub struct Informer {
    client: Arc<dyn ClusterClient>,
    resource: ApiResource,
    namespace: Option<String>,
    resync: Option<Duration>,
}

impl Informer {
    /// Watch `resource` cluster-wide.
    pub fn new(client: Arc<dyn ClusterClient>, resource: ApiResource) -> Self {
        Self {
            client,
            resource,
            namespace: None,
            resync: None,
        }
    }

    /// Restrict the watch to one namespace.
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Re-deliver every object every `period`. `None` or zero disables resync.
    pub fn with_resync(mut self, period: Option<Duration>) -> Self {
        self.resync = period.filter(|period| !period.is_zero());
        self
    }

    /// Run the informer as a background task until shutdown or until the
    /// queue's receiver is dropped.
    pub fn spawn(
        self,
        queue: mpsc::Sender<ObjectEvent>,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run(queue, shutdown))
    }

    async fn run(self, queue: mpsc::Sender<ObjectEvent>, mut shutdown: watch::Receiver<bool>) {
        let kind = self.resource.kind.clone();
        if *shutdown.borrow_and_update() {
            debug!(kind = %kind, "shutdown already signalled; informer not started");
            return;
        }
        info!(kind = %kind, namespace = ?self.namespace, "informer started");

        let mut stream = self
            .client
            .watch(&self.resource, self.namespace.as_deref());
        let mut cache = GenerationCache::new();
        let period = self.resync.unwrap_or(Duration::from_secs(3600));
        let mut resync = tokio::time::interval(period);
        // The first tick fires immediately; the watch replay covers it.
        resync.tick().await;

        loop {
            tokio::select! {
                next = stream.next() => {
                    let Some(raw) = next else {
                        warn!(kind = %kind, "watch stream ended");
                        break;
                    };
                    if let Some(event) = cache.classify(&kind, &raw) {
                        debug!(kind = %kind, key = %event.key, action = ?event.action, "informer event");
                        if queue.send(event).await.is_err() {
                            break;
                        }
                    }
                }
                _ = resync.tick(), if self.resync.is_some() => {
                    if !self.resync_all(&mut cache, &queue).await {
                        break;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(kind = %kind, "informer stopped");
    }

    /// Returns `false` when the queue is closed.
    async fn resync_all(&self, cache: &mut GenerationCache, queue: &mpsc::Sender<ObjectEvent>) -> bool {
        let kind = &self.resource.kind;
        let objects = match self
            .client
            .list(&self.resource, self.namespace.as_deref())
            .await
        {
            Ok(objects) => objects,
            Err(e) => {
                warn!(kind = %kind, error = %e, "resync list failed");
                return true;
            }
        };
        debug!(kind = %kind, count = objects.len(), "resync");
        for object in &objects {
            if let Some(event) = cache.resync(kind, object) {
                if queue.send(event).await.is_err() {
                    return false;
                }
            }
        }
        true
    }
}
