//! Event fan-in: one informer and one bounded queue per watched kind, a
//! single consumer draining their union.
//!
//! Handlers run synchronously on the consumer task, so two events for the
//! same object are never handled concurrently within one process.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::core::ApiResource;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{StreamExt, StreamMap};
use tracing::{debug, info, warn};

use crate::cluster::informer::{Informer, ObjectEvent};
use crate::cluster::ClusterClient;
use crate::config::DispatcherConfig;
use crate::pipeline::ReconcileError;

/// One kind a handler wants to hear about.
#[derive(Debug, Clone)]
pub struct WatchTarget {
    /// Kind to watch.
    pub resource: ApiResource,
    /// Restrict to one namespace; `None` watches all.
    pub namespace: Option<String>,
}

impl WatchTarget {
    /// Watch `resource` everywhere.
    pub fn all(resource: ApiResource) -> Self {
        Self {
            resource,
            namespace: None,
        }
    }
}

/// A consumer of filtered object events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Kinds to subscribe to.
    fn watches(&self) -> Vec<WatchTarget>;

    /// Handle one event. Failures are logged by the handler; the dispatcher
    /// keeps draining.
    async fn handle(&self, event: ObjectEvent);

    /// One full pass over everything the handler owns, outside the event
    /// stream.
    ///
    /// # Errors
    ///
    /// Fails when the handler's inputs cannot be listed.
    async fn resync_all(&self) -> Result<(), ReconcileError>;
}

/// Runs informers and feeds their events to a handler.
pub struct Dispatcher {
    client: Arc<dyn ClusterClient>,
    queue_capacity: usize,
    resync: Option<Duration>,
}

impl Dispatcher {
    /// Dispatcher sized from `[dispatcher]`.
    pub fn new(client: Arc<dyn ClusterClient>, config: &DispatcherConfig) -> Self {
        Self {
            client,
            queue_capacity: config.queue_capacity.max(1),
            resync: config.resync_period(),
        }
    }

    /// Drain events into `handler` until shutdown is signalled or every
    /// informer has stopped.
    pub async fn run(&self, handler: Arc<dyn EventHandler>, mut shutdown: watch::Receiver<bool>) {
        let name = handler.name().to_owned();
        let mut queues = StreamMap::new();
        let mut informers = Vec::new();

        for (index, target) in handler.watches().into_iter().enumerate() {
            let (tx, rx) = mpsc::channel(self.queue_capacity);
            let mut informer = Informer::new(Arc::clone(&self.client), target.resource)
                .with_resync(self.resync);
            if let Some(namespace) = target.namespace {
                informer = informer.in_namespace(namespace);
            }
            informers.push(informer.spawn(tx, shutdown.clone()));
            queues.insert(index, ReceiverStream::new(rx));
        }
        info!(handler = %name, queues = queues.len(), "dispatcher started");

        if !*shutdown.borrow() {
            loop {
                tokio::select! {
                    next = queues.next() => {
                        let Some((_, event)) = next else {
                            warn!(handler = %name, "all event queues closed");
                            break;
                        };
                        debug!(handler = %name, kind = %event.kind, key = %event.key, action = ?event.action, "dispatching");
                        handler.handle(event).await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!(handler = %name, "dispatcher shutting down");
                            break;
                        }
                    }
                }
            }
        }

        // Closing the queues stops any informer still blocked on a send.
        drop(queues);
        for informer in informers {
            if let Err(e) = informer.await {
                warn!(handler = %name, error = %e, "informer task failed");
            }
        }
        info!(handler = %name, "dispatcher stopped");
    }
}
