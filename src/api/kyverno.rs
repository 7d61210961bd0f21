//! The subset of `kyverno.io/v1` `Policy` and `ClusterPolicy` written by the
//! admission and confidential-computing adapters.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Spec of a namespaced Kyverno [`Policy`].
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "kyverno.io",
    version = "v1",
    kind = "Policy",
    shortname = "pol",
    namespaced,
    derive = "PartialEq"
)]
pub struct PolicySpec {
    /// Rules and enforcement settings.
    #[serde(flatten)]
    pub body: PolicyBody,
}

/// Spec of a Kyverno [`ClusterPolicy`].
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "kyverno.io",
    version = "v1",
    kind = "ClusterPolicy",
    shortname = "cpol",
    derive = "PartialEq"
)]
pub struct ClusterPolicySpec {
    /// Rules and enforcement settings.
    #[serde(flatten)]
    pub body: PolicyBody,
}

/// Fields shared by both Kyverno policy kinds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PolicyBody {
    /// `Enforce` or `Audit`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub validation_failure_action: String,
    /// Also scan existing resources.
    #[serde(default)]
    pub background: bool,
    /// Evaluated in order.
    pub rules: Vec<KyvernoRule>,
}

/// One admission rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct KyvernoRule {
    /// Unique within the policy.
    pub name: String,
    /// Resources the rule applies to.
    #[serde(rename = "match")]
    pub match_resources: MatchResources,
    /// Resources exempt from the rule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude: Option<MatchResources>,
    /// Validation to enforce.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validate: Option<Validation>,
    /// Mutation to apply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mutate: Option<Mutation>,
}

/// Resource filters any of which may match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct MatchResources {
    /// Alternatives.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub any: Vec<ResourceFilter>,
}

/// Wrapper around one resource description.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ResourceFilter {
    /// The described resources.
    pub resources: ResourceDescription,
}

/// Kinds, namespaces and labels, all of which must match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ResourceDescription {
    /// Resource kinds, e.g. `v1/Pod`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kinds: Vec<String>,
    /// Namespace names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,
    /// Label selector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<KyvernoLabelSelector>,
}

/// Flat label match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KyvernoLabelSelector {
    /// Labels the resource must carry.
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
}

/// Validation block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Validation {
    /// Reported on rejection.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    /// Pod Security Standards check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_security: Option<PodSecurity>,
}

/// Pod Security Standards level and version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PodSecurity {
    /// `privileged`, `baseline` or `restricted`.
    pub level: String,
    /// Standards version, usually `latest`.
    pub version: String,
}

/// Mutation block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Mutation {
    /// Strategic merge patch applied to matching resources.
    pub patch_strategic_merge: serde_json::Value,
}
