//! Builds intermediate policy documents from resolved bindings.
//!
//! Output is a pure function of the binding and its resolved intents, so
//! re-synthesizing unchanged inputs yields an equal document. Persisting the
//! result is the caller's job.

use std::collections::BTreeMap;

use kube::api::ObjectMeta;
use kube::ResourceExt;

use super::binder::BindingInfo;
use super::selector::{resolve_cluster_selector, resolve_selector};
use super::SynthesisError;
use crate::api::{
    owner_reference, ClusterNimbusPolicy, ClusterNimbusPolicySpec, ClusterResource,
    ClusterSecurityIntentBinding, LabelSelector, NimbusPolicy, NimbusPolicySpec, NimbusRule, Rule,
    SecurityIntent, SecurityIntentBinding, BINDING_GENERATION_ANNOTATION,
};

/// One rule per intent, in order, with action, mode and params copied
/// verbatim.
pub fn rules_from_intents(intents: &[SecurityIntent]) -> Vec<NimbusRule> {
    intents
        .iter()
        .map(|intent| {
            let intent = &intent.spec.intent;
            NimbusRule {
                id: intent.id.clone(),
                description: intent.description.clone(),
                rule: Rule {
                    rule_action: intent.action.clone(),
                    mode: intent.mode.clone(),
                    params: intent.params.clone(),
                },
            }
        })
        .collect()
}

/// Build the `NimbusPolicy` for a namespaced binding.
///
/// # Errors
///
/// [`SynthesisError::NoIntents`] / [`SynthesisError::NoBindings`] on an
/// empty [`BindingInfo`], [`SynthesisError::Selector`] when a CEL expression
/// fails, [`SynthesisError::EmptySelector`] when the selector resolves to no
/// labels.
pub fn build_nimbus_policy(
    info: &BindingInfo,
    binding: &SecurityIntentBinding,
) -> Result<NimbusPolicy, SynthesisError> {
    check_info(info)?;
    let labels = resolve_selector(&binding.spec.selector)?;
    if labels.is_empty() {
        return Err(SynthesisError::EmptySelector(binding.name_any()));
    }

    let mut policy = NimbusPolicy::new(
        &binding.name_any(),
        NimbusPolicySpec {
            selector: LabelSelector {
                match_labels: labels,
            },
            rules: rules_from_intents(&info.intents),
        },
    );
    policy.metadata = document_metadata(binding, binding.namespace());
    Ok(policy)
}

/// Build the `ClusterNimbusPolicy` for a cluster binding.
///
/// An empty workload selector is allowed here: cluster-level rules such as
/// TLS assessment do not select workloads.
///
/// # Errors
///
/// As [`build_nimbus_policy`], minus the empty-selector check.
pub fn build_cluster_nimbus_policy(
    info: &BindingInfo,
    binding: &ClusterSecurityIntentBinding,
) -> Result<ClusterNimbusPolicy, SynthesisError> {
    check_info(info)?;
    let labels = resolve_cluster_selector(&binding.spec.selector)?;

    let mut policy = ClusterNimbusPolicy::new(
        &binding.name_any(),
        ClusterNimbusPolicySpec {
            ns_selector: binding.spec.selector.ns_selector.clone(),
            workload_selector: LabelSelector {
                match_labels: labels,
            },
            rules: rules_from_intents(&info.intents),
        },
    );
    policy.metadata = document_metadata(binding, None);
    Ok(policy)
}

/// Build one `NimbusPolicy` per namespace a cluster binding covers, each
/// owned by the cluster binding and named after it.
///
/// Returns nothing when the workload selector is empty: a namespaced
/// document never selects every workload.
///
/// # Errors
///
/// As [`build_cluster_nimbus_policy`].
pub fn build_namespaced_policies(
    info: &BindingInfo,
    binding: &ClusterSecurityIntentBinding,
) -> Result<Vec<NimbusPolicy>, SynthesisError> {
    check_info(info)?;
    let labels = resolve_cluster_selector(&binding.spec.selector)?;
    if labels.is_empty() {
        return Ok(Vec::new());
    }

    let rules = rules_from_intents(&info.intents);
    Ok(info
        .namespaces
        .iter()
        .map(|namespace| {
            let mut policy = NimbusPolicy::new(
                &binding.name_any(),
                NimbusPolicySpec {
                    selector: LabelSelector {
                        match_labels: labels.clone(),
                    },
                    rules: rules.clone(),
                },
            );
            policy.metadata = document_metadata(binding, Some(namespace.clone()));
            policy
        })
        .collect())
}

/// Binding generation a document was synthesized from, if stamped.
pub fn synthesized_generation<K: ClusterResource>(document: &K) -> Option<i64> {
    document
        .annotations()
        .get(BINDING_GENERATION_ANNOTATION)
        .and_then(|value| value.parse().ok())
}

fn check_info(info: &BindingInfo) -> Result<(), SynthesisError> {
    if info.intents.is_empty() {
        return Err(SynthesisError::NoIntents);
    }
    if info.binding_names.is_empty() {
        return Err(SynthesisError::NoBindings);
    }
    Ok(())
}

fn document_metadata<B: ClusterResource>(binding: &B, namespace: Option<String>) -> ObjectMeta {
    let annotations = binding.meta().generation.map(|generation| {
        BTreeMap::from([(
            BINDING_GENERATION_ANNOTATION.to_owned(),
            generation.to_string(),
        )])
    });
    ObjectMeta {
        name: Some(binding.name_any()),
        namespace,
        annotations,
        owner_references: owner_reference(binding).map(|owner| vec![owner]),
        ..ObjectMeta::default()
    }
}
