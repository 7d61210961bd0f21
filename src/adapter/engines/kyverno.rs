//! Admission policies (Kyverno `Policy` and `ClusterPolicy`).

use std::collections::BTreeMap;

use crate::adapter::{Built, Engine, Registry};
use crate::api::kyverno::{
    KyvernoLabelSelector, KyvernoRule, MatchResources, PodSecurity, ResourceDescription,
    ResourceFilter, Validation,
};
use crate::api::{
    ClusterNimbusPolicy, ClusterPolicy, ClusterPolicySpec, HasSpec, NimbusPolicy, NimbusRule,
    Policy, PolicyBody, PolicySpec,
};
use crate::config::KyvernoConfig;
use crate::idpool;

/// Pod security standard version validated against.
const POD_SECURITY_VERSION: &str = "latest";

/// Builds namespaced Kyverno `Policy` objects from `NimbusPolicy` documents.
pub struct KyvernoEngine {
    config: KyvernoConfig,
    registry: Registry<Self>,
}

impl KyvernoEngine {
    /// Engine with every supported rule registered.
    pub fn new(config: KyvernoConfig) -> Self {
        let registry = Registry::<Self>::new().with(idpool::ESCAPE_TO_HOST, escape_to_host);
        Self { config, registry }
    }
}

impl Engine for KyvernoEngine {
    type Document = NimbusPolicy;
    type Policy = Policy;

    fn name(&self) -> &'static str {
        "kyverno"
    }

    fn registry(&self) -> &Registry<Self> {
        &self.registry
    }
}

/// Builds Kyverno `ClusterPolicy` objects from `ClusterNimbusPolicy`
/// documents.
pub struct KyvernoClusterEngine {
    config: KyvernoConfig,
    registry: Registry<Self>,
}

impl KyvernoClusterEngine {
    /// Engine with every supported rule registered.
    pub fn new(config: KyvernoConfig) -> Self {
        let registry =
            Registry::<Self>::new().with(idpool::ESCAPE_TO_HOST, cluster_escape_to_host);
        Self { config, registry }
    }
}

impl Engine for KyvernoClusterEngine {
    type Document = ClusterNimbusPolicy;
    type Policy = ClusterPolicy;

    fn name(&self) -> &'static str {
        "kyverno"
    }

    fn registry(&self) -> &Registry<Self> {
        &self.registry
    }
}

impl HasSpec for Policy {
    type Spec = PolicySpec;

    fn spec(&self) -> &PolicySpec {
        &self.spec
    }

    fn set_spec(&mut self, spec: PolicySpec) {
        self.spec = spec;
    }
}

impl HasSpec for ClusterPolicy {
    type Spec = ClusterPolicySpec;

    fn spec(&self) -> &ClusterPolicySpec {
        &self.spec
    }

    fn set_spec(&mut self, spec: ClusterPolicySpec) {
        self.spec = spec;
    }
}

/// `Audit` rules never block admission; anything else follows config.
fn failure_action(config: &KyvernoConfig, rule: &NimbusRule) -> String {
    if rule.rule.rule_action.eq_ignore_ascii_case("audit") {
        "Audit".to_owned()
    } else {
        config.validation_failure_action.clone()
    }
}

/// Pod-security validation rule for pods matching `labels`, optionally
/// scoped to `namespaces` and excluding `excluded`.
fn pod_security_rule(
    config: &KyvernoConfig,
    rule: &NimbusRule,
    labels: &BTreeMap<String, String>,
    namespaces: Vec<String>,
    excluded: Vec<String>,
) -> KyvernoRule {
    let level = rule
        .rule
        .param("psaLevel")
        .unwrap_or(config.default_psa_level.as_str())
        .to_owned();
    let selector = (!labels.is_empty()).then(|| KyvernoLabelSelector {
        match_labels: labels.clone(),
    });
    let exclude = (!excluded.is_empty()).then(|| MatchResources {
        any: vec![ResourceFilter {
            resources: ResourceDescription {
                namespaces: excluded,
                ..ResourceDescription::default()
            },
        }],
    });
    KyvernoRule {
        name: "pod-security".to_owned(),
        match_resources: MatchResources {
            any: vec![ResourceFilter {
                resources: ResourceDescription {
                    kinds: vec!["v1/Pod".to_owned()],
                    namespaces,
                    selector,
                },
            }],
        },
        exclude,
        validate: Some(Validation {
            message: rule.description.clone(),
            pod_security: Some(PodSecurity {
                level,
                version: POD_SECURITY_VERSION.to_owned(),
            }),
        }),
        mutate: None,
    }
}

fn escape_to_host(
    engine: &KyvernoEngine,
    document: &NimbusPolicy,
    rule: &NimbusRule,
) -> Vec<Built<Policy>> {
    let body = PolicyBody {
        validation_failure_action: failure_action(&engine.config, rule),
        background: true,
        rules: vec![pod_security_rule(
            &engine.config,
            rule,
            &document.spec.selector.match_labels,
            Vec::new(),
            Vec::new(),
        )],
    };
    vec![Built::single(Policy::new("", PolicySpec { body }))]
}

fn cluster_escape_to_host(
    engine: &KyvernoClusterEngine,
    document: &ClusterNimbusPolicy,
    rule: &NimbusRule,
) -> Vec<Built<ClusterPolicy>> {
    let ns_selector = &document.spec.ns_selector;
    let namespaces = if ns_selector.match_names.iter().any(|name| name == "*") {
        Vec::new()
    } else {
        ns_selector.match_names.clone()
    };
    let body = PolicyBody {
        validation_failure_action: failure_action(&engine.config, rule),
        background: true,
        rules: vec![pod_security_rule(
            &engine.config,
            rule,
            &document.spec.workload_selector.match_labels,
            namespaces,
            ns_selector.exclude_names.clone(),
        )],
    };
    vec![Built::single(ClusterPolicy::new("", ClusterPolicySpec { body }))]
}
