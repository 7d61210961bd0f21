//! The subset of `security.kubearmor.com/v1 KubeArmorPolicy` written by the
//! process-confinement adapter.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Spec of a [`KubeArmorPolicy`].
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "security.kubearmor.com",
    version = "v1",
    kind = "KubeArmorPolicy",
    shortname = "ksp",
    namespaced,
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct KubeArmorPolicySpec {
    /// Pods the policy confines.
    pub selector: KspSelector,
    /// Process execution rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<ProcessType>,
    /// File access rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileType>,
    /// Linux capability rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<CapabilitiesType>,
    /// `Block`, `Audit` or `Allow`.
    pub action: String,
    /// Shown in KubeArmor alerts.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    /// Alert severity.
    #[serde(default)]
    pub severity: i32,
    /// Alert tags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Label match for the confined pods.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KspSelector {
    /// Labels the pod must carry.
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
}

/// Executables matched by path or directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProcessType {
    /// Single executables.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_paths: Vec<MatchPath>,
    /// Executables under a directory.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_directories: Vec<MatchDirectory>,
}

/// Files matched by path or directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FileType {
    /// Single files.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_paths: Vec<MatchPath>,
    /// Files under a directory.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_directories: Vec<MatchDirectory>,
}

/// One path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MatchPath {
    /// Absolute path.
    pub path: String,
    /// Allow reads, block writes.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub read_only: bool,
}

/// One directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MatchDirectory {
    /// Directory path with a trailing slash.
    pub dir: String,
    /// Include subdirectories.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub recursive: bool,
    /// Allow reads, block writes.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub read_only: bool,
}

/// Capabilities matched by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitiesType {
    /// Matched capabilities.
    #[serde(default)]
    pub match_capabilities: Vec<MatchCapability>,
}

/// One capability, lowercase without the `CAP_` prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct MatchCapability {
    /// Capability name, e.g. `sys_admin`.
    pub capability: String,
}

impl MatchPath {
    /// Match a single path.
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_owned(),
            read_only: false,
        }
    }
}

impl MatchDirectory {
    /// Match every file below `dir`.
    pub fn recursive(dir: &str) -> Self {
        Self {
            dir: dir.to_owned(),
            recursive: true,
            read_only: false,
        }
    }
}
