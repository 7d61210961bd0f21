//! Binding selectors → flat workload label maps.

use std::collections::{BTreeMap, HashMap};

use cel_interpreter::objects::Key;
use cel_interpreter::{Context, Program, Value};
use tracing::trace;

use crate::api::{ClusterSelector, ResourceFilter, Selector};

/// Prefixes removed from every extracted label key.
pub const RESERVED_PREFIXES: &[&str] = &["any:", "all:", "cel:"];

/// Name of the map variable visible to selector expressions.
pub const LABEL_VARIABLE: &str = "label";

/// A selector expression could not be turned into labels.
#[derive(Debug, thiserror::Error)]
pub enum SelectorError {
    /// The expression is not valid CEL.
    #[error("CEL expression `{expression}` failed to compile: {reason}")]
    Compile {
        /// The offending expression.
        expression: String,
        /// Parser message.
        reason: String,
    },

    /// The expression compiled but failed at evaluation time.
    #[error("CEL expression `{expression}` failed to evaluate: {reason}")]
    Evaluate {
        /// The offending expression.
        expression: String,
        /// Interpreter message.
        reason: String,
    },
}

/// Resolve a namespaced binding's selector.
///
/// Sources are applied in order (CEL, `any`, `all`, `matchLabels`); a later
/// source overwrites a key set by an earlier one.
///
/// # Errors
///
/// Returns [`SelectorError`] when any CEL expression fails; nothing partial
/// is returned.
pub fn resolve_selector(selector: &Selector) -> Result<BTreeMap<String, String>, SelectorError> {
    let mut labels = evaluate_cel(&selector.cel)?;
    merge_filters(&mut labels, &selector.any);
    merge_filters(&mut labels, &selector.all);
    merge_labels(&mut labels, &selector.match_labels);
    Ok(labels)
}

/// Resolve the workload half of a cluster binding's selector (CEL, then
/// `workloadSelector.matchLabels`).
///
/// # Errors
///
/// Returns [`SelectorError`] when any CEL expression fails.
pub fn resolve_cluster_selector(
    selector: &ClusterSelector,
) -> Result<BTreeMap<String, String>, SelectorError> {
    let mut labels = evaluate_cel(&selector.cel)?;
    merge_labels(&mut labels, &selector.workload_selector.match_labels);
    Ok(labels)
}

/// Evaluate selector expressions into labels.
///
/// Each expression runs with [`LABEL_VARIABLE`] bound to an empty map; only
/// literal map results contribute, and only their string entries. The
/// expressions therefore describe labels, they do not query live objects.
///
/// # Errors
///
/// Returns [`SelectorError`] on the first compile or evaluation failure.
pub fn evaluate_cel(expressions: &[String]) -> Result<BTreeMap<String, String>, SelectorError> {
    let mut labels = BTreeMap::new();
    for expression in expressions {
        let program = Program::compile(expression).map_err(|e| SelectorError::Compile {
            expression: expression.clone(),
            reason: e.to_string(),
        })?;

        let mut context = Context::default();
        context.add_variable_from_value(LABEL_VARIABLE, HashMap::<String, String>::new());

        let value = program
            .execute(&context)
            .map_err(|e| SelectorError::Evaluate {
                expression: expression.clone(),
                reason: e.to_string(),
            })?;

        let Value::Map(map) = value else {
            trace!(%expression, "selector expression yielded no label map");
            continue;
        };
        let mut pairs: Vec<(String, String)> = map
            .map
            .iter()
            .filter_map(|(key, value)| match (key, value) {
                (Key::String(key), Value::String(value)) => {
                    Some((key.to_string(), value.to_string()))
                }
                _ => None,
            })
            .collect();
        pairs.sort();
        for (key, value) in pairs {
            labels.insert(strip_reserved_prefix(&key).to_owned(), value);
        }
    }
    Ok(labels)
}

/// Remove a leading `any:`, `all:` or `cel:` from a label key.
pub fn strip_reserved_prefix(key: &str) -> &str {
    RESERVED_PREFIXES
        .iter()
        .find_map(|prefix| key.strip_prefix(prefix))
        .unwrap_or(key)
}

fn merge_filters(labels: &mut BTreeMap<String, String>, filters: &[ResourceFilter]) {
    for filter in filters {
        merge_labels(labels, &filter.resources.match_labels);
    }
}

fn merge_labels(labels: &mut BTreeMap<String, String>, source: &BTreeMap<String, String>) {
    for (key, value) in source {
        labels.insert(strip_reserved_prefix(key).to_owned(), value.clone());
    }
}
