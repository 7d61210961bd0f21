//! In-process substrate used by tests and the offline `dry-run` command.
//!
//! Models the API server behaviour the pipeline depends on:
//! - monotonically increasing resource versions, checked on every write;
//! - `metadata.generation` that only moves when the spec changes;
//! - a status subresource that ignores everything but `status`;
//! - owner-reference cascade delete;
//! - watches that replay current objects before live changes.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use kube::core::ApiResource;
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use super::{
    raw_metadata, set_type_meta, ClusterClient, ClusterError, ObjectKey, WatchEvent, WatchStream,
};

/// Capacity of the watch fan-out channel.
const WATCH_BUFFER: usize = 1024;

/// Top-level fields that are not part of an object's spec.
const NON_SPEC_FIELDS: &[&str] = &["apiVersion", "kind", "metadata", "status"];

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct StoreKey {
    api_version: String,
    kind: String,
    namespace: String,
    name: String,
}

impl StoreKey {
    fn new(resource: &ApiResource, key: &ObjectKey) -> Self {
        Self {
            api_version: resource.api_version.clone(),
            kind: resource.kind.clone(),
            namespace: key.namespace.clone().unwrap_or_default(),
            name: key.name.clone(),
        }
    }

    fn object_key(&self) -> ObjectKey {
        if self.namespace.is_empty() {
            ObjectKey::cluster(&self.name)
        } else {
            ObjectKey::namespaced(&self.namespace, &self.name)
        }
    }
}

#[derive(Debug, Clone)]
struct Broadcast {
    api_version: String,
    kind: String,
    namespace: Option<String>,
    event: WatchEvent,
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<StoreKey, Value>,
    last_version: u64,
}

impl State {
    fn next_version(&mut self) -> String {
        self.last_version = self.last_version.saturating_add(1);
        self.last_version.to_string()
    }
}

/// In-process implementation of [`ClusterClient`].
#[derive(Debug)]
pub struct InMemoryCluster {
    state: Mutex<State>,
    events: broadcast::Sender<Broadcast>,
    injected_conflicts: AtomicUsize,
    status_writes: AtomicUsize,
}

impl Default for InMemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCluster {
    /// Create an empty substrate.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_BUFFER);
        Self {
            state: Mutex::new(State::default()),
            events,
            injected_conflicts: AtomicUsize::new(0),
            status_writes: AtomicUsize::new(0),
        }
    }

    /// Make the next `count` status writes fail with a conflict, as if another
    /// writer got there first.
    pub fn inject_status_conflicts(&self, count: usize) {
        self.injected_conflicts.store(count, Ordering::SeqCst);
    }

    /// Number of status writes attempted so far, including failed ones.
    pub fn status_write_attempts(&self) -> usize {
        self.status_writes.load(Ordering::SeqCst)
    }

    /// Number of stored objects of `resource`'s kind.
    pub fn count(&self, resource: &ApiResource) -> usize {
        self.lock()
            .objects
            .keys()
            .filter(|key| key.api_version == resource.api_version && key.kind == resource.kind)
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A poisoned lock only means another test thread panicked mid-write;
        // the map itself is still consistent.
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn publish(&self, key: &StoreKey, event: WatchEvent) {
        // No subscribers is fine.
        let _ = self.events.send(Broadcast {
            api_version: key.api_version.clone(),
            kind: key.kind.clone(),
            namespace: key.object_key().namespace,
            event,
        });
    }

    fn take_injected_conflict(&self) -> bool {
        self.injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn check_version(
        stored: &Value,
        incoming: &Value,
        resource: &ApiResource,
        key: &ObjectKey,
    ) -> Result<(), ClusterError> {
        let incoming_version = raw_metadata(incoming)?.resource_version.unwrap_or_default();
        if incoming_version.is_empty() {
            return Ok(());
        }
        let stored_version = raw_metadata(stored)?.resource_version.unwrap_or_default();
        if incoming_version != stored_version {
            return Err(ClusterError::Conflict {
                kind: resource.kind.clone(),
                key: key.clone(),
                detail: format!(
                    "resource version {incoming_version} is stale (current {stored_version})"
                ),
            });
        }
        Ok(())
    }

    /// Remove `root` and, transitively, every object whose owners are all gone.
    fn delete_cascading(&self, state: &mut State, root: &StoreKey) {
        let mut pending = vec![root.clone()];
        while let Some(key) = pending.pop() {
            let Some(removed) = state.objects.remove(&key) else {
                continue;
            };
            debug!(kind = %key.kind, key = %key.object_key(), "object deleted");
            self.publish(&key, WatchEvent::Deleted(removed));

            let snapshot: &State = state;
            let dependents: Vec<StoreKey> = snapshot
                .objects
                .iter()
                .filter(|(_, object)| Self::all_owners_gone(snapshot, object))
                .map(|(dependent, _)| dependent.clone())
                .collect();
            pending.extend(dependents);
        }
    }

    fn all_owners_gone(state: &State, object: &Value) -> bool {
        let Ok(metadata) = raw_metadata(object) else {
            return false;
        };
        let owners = metadata.owner_references.unwrap_or_default();
        if owners.is_empty() {
            return false;
        }
        owners.iter().all(|owner| {
            !state
                .objects
                .values()
                .any(|candidate| uid_of(candidate).as_deref() == Some(owner.uid.as_str()))
        })
    }
}

fn uid_of(object: &Value) -> Option<String> {
    object
        .get("metadata")
        .and_then(|metadata| metadata.get("uid"))
        .and_then(Value::as_str)
        .map(str::to_owned)
}

fn metadata_mut(object: &mut Value) -> Result<&mut Map<String, Value>, ClusterError> {
    let map = object
        .as_object_mut()
        .ok_or_else(|| ClusterError::Invalid("object is not a JSON map".to_owned()))?;
    let metadata = map
        .entry("metadata")
        .or_insert_with(|| Value::Object(Map::new()));
    metadata
        .as_object_mut()
        .ok_or_else(|| ClusterError::Invalid("metadata is not a JSON map".to_owned()))
}

fn spec_fields(object: &Value) -> BTreeMap<String, Value> {
    object
        .as_object()
        .map(|map| {
            map.iter()
                .filter(|(field, _)| !NON_SPEC_FIELDS.contains(&field.as_str()))
                .map(|(field, value)| (field.clone(), value.clone()))
                .collect()
        })
        .unwrap_or_default()
}

fn generation_of(object: &Value) -> i64 {
    object
        .get("metadata")
        .and_then(|metadata| metadata.get("generation"))
        .and_then(Value::as_i64)
        .unwrap_or(1)
}

/// Copy a field of the stored object's metadata onto the incoming one.
fn carry_metadata(stored: &Value, incoming: &mut Map<String, Value>, field: &str) {
    if let Some(value) = stored.get("metadata").and_then(|metadata| metadata.get(field)) {
        incoming.insert(field.to_owned(), value.clone());
    }
}

#[async_trait]
impl ClusterClient for InMemoryCluster {
    async fn get(
        &self,
        resource: &ApiResource,
        key: &ObjectKey,
    ) -> Result<Option<Value>, ClusterError> {
        let state = self.lock();
        Ok(state.objects.get(&StoreKey::new(resource, key)).cloned())
    }

    async fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
    ) -> Result<Vec<Value>, ClusterError> {
        let state = self.lock();
        Ok(state
            .objects
            .iter()
            .filter(|(key, _)| key.api_version == resource.api_version && key.kind == resource.kind)
            .filter(|(key, _)| namespace.is_none_or(|ns| key.namespace == ns))
            .map(|(_, object)| object.clone())
            .collect())
    }

    async fn create(&self, resource: &ApiResource, mut object: Value) -> Result<Value, ClusterError> {
        let key = ObjectKey::from_raw(&object)?;
        let store_key = StoreKey::new(resource, &key);
        let mut state = self.lock();
        if state.objects.contains_key(&store_key) {
            return Err(ClusterError::AlreadyExists {
                kind: resource.kind.clone(),
                key,
            });
        }

        let version = state.next_version();
        set_type_meta(&mut object, resource);
        let metadata = metadata_mut(&mut object)?;
        metadata.insert(
            "uid".to_owned(),
            Value::String(uuid::Uuid::new_v4().to_string()),
        );
        metadata.insert("resourceVersion".to_owned(), Value::String(version));
        metadata.insert("generation".to_owned(), Value::from(1_i64));
        metadata.insert(
            "creationTimestamp".to_owned(),
            Value::String(chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)),
        );

        state.objects.insert(store_key.clone(), object.clone());
        debug!(kind = %resource.kind, %key, "object created");
        self.publish(&store_key, WatchEvent::Applied(object.clone()));
        Ok(object)
    }

    async fn replace(&self, resource: &ApiResource, mut object: Value) -> Result<Value, ClusterError> {
        let key = ObjectKey::from_raw(&object)?;
        let store_key = StoreKey::new(resource, &key);
        let mut state = self.lock();
        let stored = state
            .objects
            .get(&store_key)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound {
                kind: resource.kind.clone(),
                key: key.clone(),
            })?;
        Self::check_version(&stored, &object, resource, &key)?;

        let spec_changed = spec_fields(&stored) != spec_fields(&object);
        let generation = if spec_changed {
            generation_of(&stored).saturating_add(1)
        } else {
            generation_of(&stored)
        };
        let version = state.next_version();

        set_type_meta(&mut object, resource);
        if let Some(map) = object.as_object_mut() {
            match stored.get("status") {
                Some(status) => map.insert("status".to_owned(), status.clone()),
                None => map.remove("status"),
            };
        }
        let metadata = metadata_mut(&mut object)?;
        carry_metadata(&stored, metadata, "uid");
        carry_metadata(&stored, metadata, "creationTimestamp");
        metadata.insert("resourceVersion".to_owned(), Value::String(version));
        metadata.insert("generation".to_owned(), Value::from(generation));

        state.objects.insert(store_key.clone(), object.clone());
        debug!(kind = %resource.kind, %key, generation, "object replaced");
        self.publish(&store_key, WatchEvent::Applied(object.clone()));
        Ok(object)
    }

    async fn replace_status(
        &self,
        resource: &ApiResource,
        object: Value,
    ) -> Result<Value, ClusterError> {
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        let key = ObjectKey::from_raw(&object)?;
        if self.take_injected_conflict() {
            return Err(ClusterError::Conflict {
                kind: resource.kind.clone(),
                key,
                detail: "injected conflict".to_owned(),
            });
        }

        let store_key = StoreKey::new(resource, &key);
        let mut state = self.lock();
        let mut stored = state
            .objects
            .get(&store_key)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound {
                kind: resource.kind.clone(),
                key: key.clone(),
            })?;
        Self::check_version(&stored, &object, resource, &key)?;

        let version = state.next_version();
        if let Some(map) = stored.as_object_mut() {
            match object.get("status") {
                Some(status) => map.insert("status".to_owned(), status.clone()),
                None => map.remove("status"),
            };
        }
        metadata_mut(&mut stored)?.insert("resourceVersion".to_owned(), Value::String(version));

        state.objects.insert(store_key.clone(), stored.clone());
        self.publish(&store_key, WatchEvent::Applied(stored.clone()));
        Ok(stored)
    }

    async fn delete(&self, resource: &ApiResource, key: &ObjectKey) -> Result<bool, ClusterError> {
        let store_key = StoreKey::new(resource, key);
        let mut state = self.lock();
        if !state.objects.contains_key(&store_key) {
            return Ok(false);
        }
        self.delete_cascading(&mut state, &store_key);
        Ok(true)
    }

    fn watch(&self, resource: &ApiResource, namespace: Option<&str>) -> WatchStream {
        // Subscribe before snapshotting so no change falls between the two.
        let receiver = self.events.subscribe();
        let api_version = resource.api_version.clone();
        let kind = resource.kind.clone();
        let namespace = namespace.map(str::to_owned);

        let initial: Vec<WatchEvent> = {
            let state = self.lock();
            state
                .objects
                .iter()
                .filter(|(key, _)| key.api_version == api_version && key.kind == kind)
                .filter(|(key, _)| namespace.as_deref().is_none_or(|ns| key.namespace == ns))
                .map(|(_, object)| WatchEvent::Applied(object.clone()))
                .collect()
        };

        let live = BroadcastStream::new(receiver).filter_map(move |received| match received {
            Ok(broadcast) => {
                let same_kind = broadcast.api_version == api_version && broadcast.kind == kind;
                let same_namespace = namespace.is_none() || broadcast.namespace == namespace;
                (same_kind && same_namespace).then_some(broadcast.event)
            }
            Err(lagged) => {
                warn!(error = %lagged, "in-memory watch lagged; events dropped");
                None
            }
        });

        Box::pin(tokio_stream::iter(initial).chain(live))
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
