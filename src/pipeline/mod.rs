//! Intent-to-policy pipeline: selector resolution, intent binding, document
//! synthesis, plus the naming, ownership and status helpers every adapter
//! shares.

pub mod binder;
pub mod naming;
pub mod orphan;
pub mod selector;
pub mod status;
pub mod synthesizer;

pub use binder::{BindingInfo, IntentBinder};
pub use naming::{full_name, owner_from_derived_name, DerivedName};
pub use orphan::is_orphan;
pub use selector::SelectorError;
pub use status::{RetryPolicy, StatusAggregator};

use crate::cluster::ClusterError;

/// Why no document could be synthesized for a binding.
#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    /// None of the referenced intents exist.
    #[error("no intents could be resolved")]
    NoIntents,

    /// The binding info names no binding.
    #[error("no bindings to synthesize from")]
    NoBindings,

    /// The selector yielded no labels; publishing would match every workload.
    #[error("selector of binding `{0}` resolved to no labels")]
    EmptySelector(String),

    /// A CEL expression failed.
    #[error(transparent)]
    Selector(#[from] SelectorError),

    /// Substrate failure while resolving inputs.
    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

/// Why a reconcile pass was abandoned. The pass is retried on the next
/// watch event or resync.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// The document could not be synthesized.
    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    /// A substrate read or write failed.
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    /// An object the pass must own others by has no UID yet.
    #[error("{0} has no uid")]
    MissingUid(String),
}
