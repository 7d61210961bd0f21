//! Descendant bookkeeping on intermediate documents.
//!
//! Several adapter processes write the same document's status with no lock
//! between them. Every write is a fetch → mutate → write cycle guarded by the
//! resource version; a conflict restarts the whole cycle after a bounded
//! exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::api::{ClusterResource, NimbusPolicyStatus, PolicyDocument};
use crate::cluster::{ClusterClient, ClusterError, ObjectApi};
use crate::config::StatusRetryConfig;

/// Bounded exponential backoff for conflicting writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub steps: u32,
    /// Delay before the second attempt.
    pub initial: Duration,
    /// Multiplier applied to the delay after each attempt.
    pub factor: u32,
    /// Upper bound for a single delay.
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            steps: 5,
            initial: Duration::from_millis(10),
            factor: 2,
            cap: Duration::from_secs(1),
        }
    }
}

impl From<&StatusRetryConfig> for RetryPolicy {
    fn from(config: &StatusRetryConfig) -> Self {
        Self {
            steps: config.steps.max(1),
            initial: Duration::from_millis(config.initial_delay_ms),
            factor: config.factor.max(1),
            cap: Duration::from_millis(config.max_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after `attempt` (1-based) failed.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let multiplier = self.factor.saturating_pow(exponent);
        self.initial.saturating_mul(multiplier).min(self.cap)
    }

    /// Backoff before retrying after `attempt` failed with `error`, or `None`
    /// when the error is final.
    pub fn retry_after(&self, error: &ClusterError, attempt: u32) -> Option<Duration> {
        (error.is_conflict() && attempt < self.steps).then(|| self.delay_after(attempt))
    }
}

/// Record one descendant change on a status value.
///
/// Adds `full_name` (and bumps the count) when absent; when `decrement` is
/// set, additionally removes the first exact match and lowers the count.
pub fn record_descendant(status: &mut NimbusPolicyStatus, full_name: &str, decrement: bool) {
    if !status.adapter_policies.iter().any(|name| name == full_name) {
        status.adapter_policies.push(full_name.to_owned());
        status.number_of_adapter_policies = status.number_of_adapter_policies.saturating_add(1);
    }
    if decrement {
        if let Some(position) = status.adapter_policies.iter().position(|name| name == full_name) {
            status.adapter_policies.remove(position);
            status.number_of_adapter_policies = status.number_of_adapter_policies.saturating_sub(1);
        }
    }
    status.last_updated = Some(chrono::Utc::now());
}

/// Writes status under optimistic concurrency.
#[derive(Clone)]
pub struct StatusAggregator {
    client: Arc<dyn ClusterClient>,
    retry: RetryPolicy,
}

impl StatusAggregator {
    /// Aggregator writing through `client`.
    pub fn new(client: Arc<dyn ClusterClient>, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    /// Record that descendant `full_name` of document `document` was
    /// created (or confirmed) or, with `decrement`, deleted.
    ///
    /// A missing document is not an error: it is being garbage collected and
    /// its status no longer matters.
    ///
    /// # Errors
    ///
    /// Returns the last conflict once the retry budget is spent, or any
    /// other substrate error.
    pub async fn update_status<D: PolicyDocument>(
        &self,
        full_name: &str,
        document: &str,
        namespace: Option<&str>,
        decrement: bool,
    ) -> Result<(), ClusterError> {
        let updated = self
            .modify_status::<D, _>(namespace, document, |doc| {
                record_descendant(doc.status_mut(), full_name, decrement);
            })
            .await
            .inspect_err(|e| {
                warn!(document, policy = full_name, decrement, error = %e, "failed to update document status");
            })?;
        if updated.is_none() {
            debug!(document, policy = full_name, "document gone; status update skipped");
        }
        Ok(())
    }

    /// Fetch the latest `K`, apply `mutate`, write its status back; retried on
    /// conflict. Returns `Ok(None)` when the object does not exist.
    ///
    /// # Errors
    ///
    /// Returns the last conflict once the retry budget is spent, or any
    /// other substrate error.
    pub async fn modify_status<K, F>(
        &self,
        namespace: Option<&str>,
        name: &str,
        mut mutate: F,
    ) -> Result<Option<K>, ClusterError>
    where
        K: ClusterResource,
        F: FnMut(&mut K),
    {
        let api = ObjectApi::<K>::new(Arc::clone(&self.client));
        let mut attempt: u32 = 1;
        loop {
            let outcome = match api.get(namespace, name).await {
                Ok(Some(mut object)) => {
                    mutate(&mut object);
                    api.replace_status(&object).await.map(Some)
                }
                Ok(None) => Ok(None),
                Err(e) => Err(e),
            };
            match outcome {
                Err(e) => match self.retry.retry_after(&e, attempt) {
                    Some(delay) => {
                        debug!(
                            %name,
                            attempt,
                            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            error = %e,
                            "status write conflict, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt = attempt.saturating_add(1);
                    }
                    None => return Err(e),
                },
                done => return done,
            }
        }
    }
}
