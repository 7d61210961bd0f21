//! Ownership guard for watched objects.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

/// Whether an object should be ignored because its owner is not one of
/// `expected_kinds`.
///
/// Objects without owner references are orphans. Otherwise only the
/// **first** reference is inspected: everything this operator creates
/// carries exactly one owner reference, so objects with several owners were
/// not written by us and are judged by their first owner alone.
pub fn is_orphan(owner_references: &[OwnerReference], expected_kinds: &[&str]) -> bool {
    match owner_references.first() {
        Some(owner) => !expected_kinds.contains(&owner.kind.as_str()),
        None => true,
    }
}
