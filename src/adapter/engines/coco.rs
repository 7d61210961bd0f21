//! Confidential-computing placement: a Kyverno mutation that moves matching
//! deployments onto a confidential runtime class.

use serde_json::json;

use crate::adapter::{Built, Engine, Registry};
use crate::api::kyverno::{
    KyvernoLabelSelector, KyvernoRule, MatchResources, Mutation, ResourceDescription,
    ResourceFilter,
};
use crate::api::{NimbusPolicy, NimbusRule, Policy, PolicyBody, PolicySpec};
use crate::config::CocoConfig;
use crate::idpool;

/// Builds mutating Kyverno `Policy` objects from `NimbusPolicy` documents.
pub struct CocoEngine {
    config: CocoConfig,
    registry: Registry<Self>,
}

impl CocoEngine {
    /// Engine with every supported rule registered.
    pub fn new(config: CocoConfig) -> Self {
        let registry = Registry::<Self>::new().with(idpool::COCO_WORKLOAD, coco_workload);
        Self { config, registry }
    }
}

impl Engine for CocoEngine {
    type Document = NimbusPolicy;
    type Policy = Policy;

    fn name(&self) -> &'static str {
        "coco"
    }

    fn registry(&self) -> &Registry<Self> {
        &self.registry
    }
}

fn coco_workload(engine: &CocoEngine, document: &NimbusPolicy, rule: &NimbusRule) -> Vec<Built<Policy>> {
    let runtime_class = rule
        .rule
        .param("runtimeClass")
        .unwrap_or(engine.config.default_runtime_class.as_str());
    let body = PolicyBody {
        validation_failure_action: String::new(),
        background: false,
        rules: vec![KyvernoRule {
            name: "runtime-class".to_owned(),
            match_resources: MatchResources {
                any: vec![ResourceFilter {
                    resources: ResourceDescription {
                        kinds: vec!["apps/v1/Deployment".to_owned()],
                        selector: Some(KyvernoLabelSelector {
                            match_labels: document.spec.selector.match_labels.clone(),
                        }),
                        ..ResourceDescription::default()
                    },
                }],
            },
            exclude: None,
            validate: None,
            mutate: Some(Mutation {
                patch_strategic_merge: json!({
                    "spec": { "template": { "spec": { "runtimeClassName": runtime_class } } }
                }),
            }),
        }],
    };
    vec![Built::single(Policy::new("", PolicySpec { body }))]
}
