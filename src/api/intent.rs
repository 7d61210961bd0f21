//! `SecurityIntent`: an abstract, engine-agnostic security requirement.

use std::collections::{BTreeMap, BTreeSet};

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Spec of a [`SecurityIntent`].
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "intent.security.nimbus.com",
    version = "v1alpha1",
    kind = "SecurityIntent",
    shortname = "si",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct SecurityIntentSpec {
    /// The declared intent.
    pub intent: Intent,
}

/// What the operator wants enforced, independent of any engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Intent {
    /// Key into the adapters' builder registries (see [`crate::idpool`]).
    pub id: String,
    /// Free-form description, copied onto derived policies as their message.
    #[serde(default)]
    pub description: String,
    /// Requested action: `Block`, `Audit` or `Allow`.
    pub action: String,
    /// Enforcement strictness.
    #[serde(default = "default_mode")]
    pub mode: String,
    /// Relative severity.
    #[serde(default)]
    pub severity: i32,
    /// Free-form classification tags.
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Engine-specific tuning knobs.
    #[serde(default)]
    pub params: BTreeMap<String, Vec<String>>,
}

fn default_mode() -> String {
    "best-effort".to_owned()
}

impl SecurityIntent {
    /// Shorthand used by tests and the dry-run loader.
    pub fn with_intent(name: &str, intent: Intent) -> Self {
        Self::new(name, SecurityIntentSpec { intent })
    }
}
