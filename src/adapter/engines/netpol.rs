//! Network policies (`networking.k8s.io/v1 NetworkPolicy`).

use k8s_openapi::api::networking::v1::{NetworkPolicy, NetworkPolicySpec};
use serde_json::{json, Value};

use crate::adapter::{from_template, Built, Engine, Registry};
use crate::api::{HasSpec, NimbusPolicy, NimbusRule};
use crate::idpool;

/// Private address ranges treated as cluster-internal.
const PRIVATE_RANGES: &[&str] = &["10.0.0.0/8", "172.16.0.0/12", "192.168.0.0/16"];

/// Builds `NetworkPolicy` objects from `NimbusPolicy` documents.
pub struct NetpolEngine {
    registry: Registry<Self>,
}

impl Default for NetpolEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl NetpolEngine {
    /// Engine with every supported rule registered.
    pub fn new() -> Self {
        let registry = Registry::<Self>::new()
            .with(idpool::DNS_MANIPULATION, dns_manipulation)
            .with(idpool::DENY_EXTERNAL_NETWORK_ACCESS, deny_external_network_access);
        Self { registry }
    }
}

impl Engine for NetpolEngine {
    type Document = NimbusPolicy;
    type Policy = NetworkPolicy;

    fn name(&self) -> &'static str {
        "netpol"
    }

    fn registry(&self) -> &Registry<Self> {
        &self.registry
    }
}

impl HasSpec for NetworkPolicy {
    type Spec = Option<NetworkPolicySpec>;

    fn spec(&self) -> &Option<NetworkPolicySpec> {
        &self.spec
    }

    fn set_spec(&mut self, spec: Option<NetworkPolicySpec>) {
        self.spec = spec;
    }
}

/// Egress peer for the cluster DNS service on port 53.
fn kube_dns_egress() -> Value {
    json!({
        "to": [{
            "namespaceSelector": {
                "matchLabels": { "kubernetes.io/metadata.name": "kube-system" }
            },
            "podSelector": {
                "matchLabels": { "k8s-app": "kube-dns" }
            }
        }],
        "ports": [
            { "protocol": "UDP", "port": 53 },
            { "protocol": "TCP", "port": 53 }
        ]
    })
}

fn private_peers() -> Vec<Value> {
    PRIVATE_RANGES
        .iter()
        .map(|cidr| json!({ "ipBlock": { "cidr": cidr } }))
        .collect()
}

fn network_policy(rule: &NimbusRule, template: Value) -> Vec<Built<NetworkPolicy>> {
    from_template::<NetworkPolicySpec>("netpol", &rule.id, template)
        .map(|spec| {
            Built::single(NetworkPolicy {
                spec: Some(spec),
                ..NetworkPolicy::default()
            })
        })
        .into_iter()
        .collect()
}

/// Egress limited to the cluster DNS service.
fn dns_manipulation(
    _: &NetpolEngine,
    document: &NimbusPolicy,
    rule: &NimbusRule,
) -> Vec<Built<NetworkPolicy>> {
    let template = json!({
        "podSelector": { "matchLabels": document.spec.selector.match_labels },
        "policyTypes": ["Egress"],
        "egress": [kube_dns_egress()]
    });
    network_policy(rule, template)
}

/// Ingress and egress limited to private ranges, plus cluster DNS.
fn deny_external_network_access(
    _: &NetpolEngine,
    document: &NimbusPolicy,
    rule: &NimbusRule,
) -> Vec<Built<NetworkPolicy>> {
    let template = json!({
        "podSelector": { "matchLabels": document.spec.selector.match_labels },
        "policyTypes": ["Ingress", "Egress"],
        "ingress": [{ "from": private_peers() }],
        "egress": [{ "to": private_peers() }, kube_dns_egress()]
    });
    network_policy(rule, template)
}
