//! Adapters translate intermediate documents into one security engine's
//! native policy objects.
//!
//! Every engine plugs into the same [`AdapterReconciler`]: it names the
//! document kind it reads, the policy kind it writes, and a registry of
//! builders keyed by intent ID. Naming, ownership, drift repair and status
//! bookkeeping are shared.

pub mod engines;
mod reconciler;

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use crate::api::{HasSpec, NimbusRule, PolicyDocument};

pub use reconciler::{AdapterReconciler, ReconcileSummary};

/// One object produced by a builder, before naming and ownership are
/// applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Built<P> {
    /// Set when one rule expands into several objects.
    pub sub_policy: Option<String>,
    /// The object; name, namespace, owner and labels are filled in later.
    pub policy: P,
}

impl<P> Built<P> {
    /// The only object a rule produces.
    pub fn single(policy: P) -> Self {
        Self {
            sub_policy: None,
            policy,
        }
    }

    /// One of several objects a rule produces.
    pub fn sub(sub_policy: &str, policy: P) -> Self {
        Self {
            sub_policy: Some(sub_policy.to_owned()),
            policy,
        }
    }
}

/// Builds the engine objects for one rule of one document.
pub type Builder<E> = fn(
    &E,
    &<E as Engine>::Document,
    &NimbusRule,
) -> Vec<Built<<E as Engine>::Policy>>;

/// Intent ID → builder.
pub struct Registry<E: Engine> {
    builders: BTreeMap<&'static str, Builder<E>>,
}

impl<E: Engine> Default for Registry<E> {
    fn default() -> Self {
        Self {
            builders: BTreeMap::new(),
        }
    }
}

impl<E: Engine> Registry<E> {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `builder` for intent `id`.
    #[must_use]
    pub fn with(mut self, id: &'static str, builder: Builder<E>) -> Self {
        self.builders.insert(id, builder);
        self
    }

    /// Builder for `id`, if this engine supports it.
    pub fn get(&self, id: &str) -> Option<Builder<E>> {
        self.builders.get(id).copied()
    }

    /// Supported intent IDs, sorted.
    pub fn ids(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.builders.keys().copied()
    }
}

/// A downstream security engine.
pub trait Engine: Send + Sync + Sized + 'static {
    /// Document kind the engine reads.
    type Document: PolicyDocument;
    /// Policy kind the engine writes.
    type Policy: HasSpec;

    /// Short name; goes into logs and the managed-by label.
    fn name(&self) -> &'static str;

    /// Supported intent IDs and their builders.
    fn registry(&self) -> &Registry<Self>;

    /// Namespace derived objects are written to. Defaults to the
    /// document's own namespace.
    fn target_namespace(&self, document: &Self::Document) -> Option<String> {
        kube::ResourceExt::namespace(document)
    }
}

/// Deserialize a builder's JSON template into a typed spec, logging and
/// dropping it on mismatch.
pub(crate) fn from_template<T: DeserializeOwned>(engine: &str, rule: &str, template: Value) -> Option<T> {
    match serde_json::from_value(template) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(engine, rule, error = %e, "policy template rejected");
            None
        }
    }
}
