//! Deterministic names for derived policies.
//!
//! A derived object is named `<document>-<lowercase(rule id)>`, with an extra
//! `-<lowercase(sub policy)>` when one rule expands into several objects of
//! the same kind. Status bookkeeping and drift repair both rely on this
//! format, so it must stay bit-exact.

use std::fmt;

/// Structured form of a derived object's name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DerivedName {
    /// Name of the owning intermediate document.
    pub owner: String,
    /// Rule ID that caused the object.
    pub rule_id: String,
    /// Sub-policy name when one rule maps to several objects.
    pub sub_policy: Option<String>,
}

impl DerivedName {
    /// Name for the single object a rule produces.
    pub fn new(owner: &str, rule_id: &str) -> Self {
        Self {
            owner: owner.to_owned(),
            rule_id: rule_id.to_owned(),
            sub_policy: None,
        }
    }

    /// Name for one of several objects a rule produces.
    pub fn with_sub_policy(owner: &str, rule_id: &str, sub_policy: &str) -> Self {
        Self {
            owner: owner.to_owned(),
            rule_id: rule_id.to_owned(),
            sub_policy: Some(sub_policy.to_owned()),
        }
    }
}

impl fmt::Display for DerivedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.owner, self.rule_id.to_lowercase())?;
        if let Some(sub_policy) = &self.sub_policy {
            write!(f, "-{}", sub_policy.to_lowercase())?;
        }
        Ok(())
    }
}

/// Recover the owning document's name from a derived object's name by
/// dropping the last `-`-separated segment.
///
/// Lossy: a sub-policy suffix, or a hyphen inside the rule ID, leaves extra
/// segments behind (`np-escapetohost-capabilities` yields `np-escapetohost`).
/// Callers treat a lookup miss as "nothing to repair".
pub fn owner_from_derived_name(name: &str) -> Option<&str> {
    name.rsplit_once('-').map(|(owner, _)| owner)
}

/// `Kind/Name` key recorded in document status.
pub fn full_name(kind: &str, name: &str) -> String {
    format!("{kind}/{name}")
}
