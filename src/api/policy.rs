//! Intermediate policy documents: the engine-agnostic synthesis output every
//! adapter watches.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::binding::NamespaceSelector;

/// Spec of a namespaced [`NimbusPolicy`].
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "intent.security.nimbus.com",
    version = "v1alpha1",
    kind = "NimbusPolicy",
    shortname = "np",
    namespaced,
    status = "NimbusPolicyStatus",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct NimbusPolicySpec {
    /// Resolved workload selector.
    pub selector: LabelSelector,
    /// One rule per resolved intent, in binding order.
    pub rules: Vec<NimbusRule>,
}

/// Spec of a [`ClusterNimbusPolicy`].
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "intent.security.nimbus.com",
    version = "v1alpha1",
    kind = "ClusterNimbusPolicy",
    shortname = "cwnp",
    status = "NimbusPolicyStatus",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterNimbusPolicySpec {
    /// Namespaces covered by the document.
    #[serde(default)]
    pub ns_selector: NamespaceSelector,
    /// Workloads covered inside those namespaces.
    #[serde(default)]
    pub workload_selector: LabelSelector,
    /// One rule per resolved intent, in binding order.
    pub rules: Vec<NimbusRule>,
}

/// Flat label match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    /// Labels a workload must carry to be selected. Empty selects nothing.
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
}

/// A single synthesized rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct NimbusRule {
    /// Intent ID; selects the adapter builder.
    pub id: String,
    /// Copied from the intent.
    #[serde(default)]
    pub description: String,
    /// What to enforce.
    pub rule: Rule,
}

/// Action, mode and parameters copied verbatim from the intent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    /// `Block`, `Audit` or `Allow`.
    pub rule_action: String,
    /// Enforcement strictness.
    #[serde(default)]
    pub mode: String,
    /// Engine-specific tuning knobs.
    #[serde(default)]
    pub params: BTreeMap<String, Vec<String>>,
}

impl Rule {
    /// First value of parameter `key`, if present and non-empty.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .get(key)
            .and_then(|values| values.first())
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }
}

/// Status shared by both document kinds. Written concurrently by every
/// adapter; see [`crate::pipeline::status`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NimbusPolicyStatus {
    /// `Pending` or `Created`.
    #[serde(default)]
    pub status: String,
    /// When the status was last written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    /// Length of `adapter_policies`.
    #[serde(default)]
    pub number_of_adapter_policies: i32,
    /// `Kind/Name` of every live derived policy.
    #[serde(default)]
    pub adapter_policies: Vec<String>,
}

/// Read access shared by [`NimbusPolicy`] and [`ClusterNimbusPolicy`].
pub trait PolicyDocument: super::ClusterResource {
    /// Owner kinds accepted by the orphan filter for this document kind.
    const OWNER_KINDS: &'static [&'static str];

    /// Whether documents of this kind live in a namespace.
    const NAMESPACED: bool;

    /// The document's rules.
    fn rules(&self) -> &[NimbusRule];

    /// Current status, if any adapter or the operator wrote one.
    fn status(&self) -> Option<&NimbusPolicyStatus>;

    /// Mutable status, created on first access.
    fn status_mut(&mut self) -> &mut NimbusPolicyStatus;
}

impl PolicyDocument for NimbusPolicy {
    const OWNER_KINDS: &'static [&'static str] =
        &["SecurityIntentBinding", "ClusterSecurityIntentBinding"];
    const NAMESPACED: bool = true;

    fn rules(&self) -> &[NimbusRule] {
        &self.spec.rules
    }

    fn status(&self) -> Option<&NimbusPolicyStatus> {
        self.status.as_ref()
    }

    fn status_mut(&mut self) -> &mut NimbusPolicyStatus {
        self.status.get_or_insert_with(NimbusPolicyStatus::default)
    }
}

impl PolicyDocument for ClusterNimbusPolicy {
    const OWNER_KINDS: &'static [&'static str] = &["ClusterSecurityIntentBinding"];
    const NAMESPACED: bool = false;

    fn rules(&self) -> &[NimbusRule] {
        &self.spec.rules
    }

    fn status(&self) -> Option<&NimbusPolicyStatus> {
        self.status.as_ref()
    }

    fn status_mut(&mut self) -> &mut NimbusPolicyStatus {
        self.status.get_or_insert_with(NimbusPolicyStatus::default)
    }
}

impl super::HasSpec for NimbusPolicy {
    type Spec = NimbusPolicySpec;

    fn spec(&self) -> &NimbusPolicySpec {
        &self.spec
    }

    fn set_spec(&mut self, spec: NimbusPolicySpec) {
        self.spec = spec;
    }
}

impl super::HasSpec for ClusterNimbusPolicy {
    type Spec = ClusterNimbusPolicySpec;

    fn spec(&self) -> &ClusterNimbusPolicySpec {
        &self.spec
    }

    fn set_spec(&mut self, spec: ClusterNimbusPolicySpec) {
        self.spec = spec;
    }
}
