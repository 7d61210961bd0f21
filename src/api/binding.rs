//! Bindings associate intents with the workloads they protect.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Spec of a namespaced [`SecurityIntentBinding`].
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "intent.security.nimbus.com",
    version = "v1alpha1",
    kind = "SecurityIntentBinding",
    shortname = "sib",
    namespaced,
    status = "SecurityIntentBindingStatus",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct SecurityIntentBindingSpec {
    /// Intents to apply, in order.
    pub intents: Vec<MatchIntent>,
    /// Workloads the intents apply to.
    #[serde(default, alias = "workloadSelector")]
    pub selector: Selector,
}

/// Spec of a cluster-wide [`ClusterSecurityIntentBinding`].
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "intent.security.nimbus.com",
    version = "v1alpha1",
    kind = "ClusterSecurityIntentBinding",
    shortname = "csib",
    status = "SecurityIntentBindingStatus",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSecurityIntentBindingSpec {
    /// Intents to apply, in order.
    pub intents: Vec<MatchIntent>,
    /// Namespaces and workloads the intents apply to.
    #[serde(default)]
    pub selector: ClusterSelector,
}

/// Reference to a [`crate::api::SecurityIntent`] by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct MatchIntent {
    /// Name of the referenced intent.
    pub name: String,
}

impl MatchIntent {
    /// Reference the intent called `name`.
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Workload selector of a namespaced binding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    /// Filters any of which may match.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub any: Vec<ResourceFilter>,
    /// Filters all of which must match.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub all: Vec<ResourceFilter>,
    /// CEL expressions evaluating to literal label maps.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cel: Vec<String>,
    /// Plain label selector.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,
}

/// One label filter group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ResourceFilter {
    /// The filtered resources.
    pub resources: Resources,
}

/// Resource kind, namespace and labels matched by a [`ResourceFilter`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Resources {
    /// Workload kind, e.g. `Pod`.
    #[serde(default)]
    pub kind: String,
    /// Namespace the filter is restricted to.
    #[serde(default)]
    pub namespace: String,
    /// Labels the workload must carry.
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
}

/// Selector of a cluster binding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSelector {
    /// Which namespaces are covered.
    #[serde(default)]
    pub ns_selector: NamespaceSelector,
    /// Which workloads inside those namespaces are covered.
    #[serde(default)]
    pub workload_selector: WorkloadSelector,
    /// CEL expressions evaluating to literal label maps.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cel: Vec<String>,
}

/// Namespace inclusion and exclusion lists. `*` or an empty include list
/// covers every namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceSelector {
    /// Namespaces to include.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_names: Vec<String>,
    /// Namespaces to leave out, even when included.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_names: Vec<String>,
}

/// Plain label selector for workloads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSelector {
    /// Labels the workload must carry.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,
}

/// Status shared by both binding kinds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecurityIntentBindingStatus {
    /// `Pending` until the first reconcile, `Created` afterwards.
    #[serde(default)]
    pub status: String,
    /// When the status was last written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    /// Length of `bound_intents`.
    #[serde(default)]
    pub number_of_bound_intents: i32,
    /// Referenced intents that exist, in binding order.
    #[serde(default)]
    pub bound_intents: Vec<String>,
    /// Name of the synthesized `NimbusPolicy` (namespaced bindings).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub nimbus_policy: String,
    /// Name of the synthesized `ClusterNimbusPolicy` (cluster bindings).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cluster_nimbus_policy: String,
    /// Documents currently synthesized from this binding.
    #[serde(default)]
    pub number_of_nimbus_policies: i32,
    /// Namespaces a cluster binding fanned a `NimbusPolicy` out to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nimbus_policy_namespaces: Vec<String>,
}

impl SecurityIntentBindingStatus {
    /// Whether the binding has not been picked up yet.
    pub fn is_pending(&self) -> bool {
        self.status.is_empty() || self.status == super::STATUS_PENDING
    }
}

/// Names of the intents referenced by a binding spec, in order.
pub fn intent_names(intents: &[MatchIntent]) -> Vec<String> {
    intents.iter().map(|intent| intent.name.clone()).collect()
}
