//! Process-confinement policies (`KubeArmorPolicy`).

use kube::api::ObjectMeta;

use crate::adapter::{Built, Engine, Registry};
use crate::api::kubearmor::{
    CapabilitiesType, FileType, KspSelector, MatchCapability, MatchDirectory, MatchPath,
    ProcessType,
};
use crate::api::{HasSpec, KubeArmorPolicy, KubeArmorPolicySpec, NimbusPolicy, NimbusRule};
use crate::idpool;

/// Default severity stamped on generated policies.
const DEFAULT_SEVERITY: i32 = 5;

const PACKAGE_MANAGERS: &[&str] = &[
    "/usr/bin/apt",
    "/usr/bin/apt-get",
    "/bin/apt-get",
    "/sbin/apk",
    "/usr/bin/dpkg",
    "/bin/dpkg",
    "/usr/bin/gdebi",
    "/usr/bin/make",
    "/usr/bin/yum",
    "/usr/bin/rpm",
    "/usr/bin/dnf",
    "/usr/bin/pacman",
    "/usr/bin/makepkg",
    "/usr/bin/zypper",
];

const NAMESPACE_TOOLS: &[&str] = &[
    "/usr/bin/nsenter",
    "/usr/bin/unshare",
    "/usr/sbin/chroot",
    "/usr/bin/chroot",
];

const HOST_CAPABILITIES: &[&str] = &["sys_admin", "sys_ptrace", "sys_module", "dac_read_search"];

/// Builds `KubeArmorPolicy` objects from `NimbusPolicy` documents.
pub struct KubeArmorEngine {
    registry: Registry<Self>,
}

impl Default for KubeArmorEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl KubeArmorEngine {
    /// Engine with every supported rule registered.
    pub fn new() -> Self {
        let registry = Registry::<Self>::new()
            .with(idpool::DNS_MANIPULATION, dns_manipulation)
            .with(idpool::SW_DEPLOYMENT_BLOCK, sw_deployment_block)
            .with(idpool::UNAUTHORIZED_SA_TOKEN_ACCESS, sa_token_access)
            .with(idpool::EXPLOIT_PFA, exploit_pfa)
            .with(idpool::ESCAPE_TO_HOST, escape_to_host);
        Self { registry }
    }
}

impl Engine for KubeArmorEngine {
    type Document = NimbusPolicy;
    type Policy = KubeArmorPolicy;

    fn name(&self) -> &'static str {
        "kubearmor"
    }

    fn registry(&self) -> &Registry<Self> {
        &self.registry
    }
}

impl HasSpec for KubeArmorPolicy {
    type Spec = KubeArmorPolicySpec;

    fn spec(&self) -> &KubeArmorPolicySpec {
        &self.spec
    }

    fn set_spec(&mut self, spec: KubeArmorPolicySpec) {
        self.spec = spec;
    }
}

/// Policy skeleton selecting the document's workloads with the rule's
/// action and message.
fn base(document: &NimbusPolicy, rule: &NimbusRule) -> KubeArmorPolicySpec {
    let action = if rule.rule.rule_action.is_empty() {
        "Block".to_owned()
    } else {
        rule.rule.rule_action.clone()
    };
    KubeArmorPolicySpec {
        selector: KspSelector {
            match_labels: document.spec.selector.match_labels.clone(),
        },
        action,
        message: rule.description.clone(),
        severity: rule
            .rule
            .param("severity")
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_SEVERITY),
        ..KubeArmorPolicySpec::default()
    }
}

fn policy(spec: KubeArmorPolicySpec) -> KubeArmorPolicy {
    KubeArmorPolicy {
        metadata: ObjectMeta::default(),
        spec,
    }
}

fn dns_manipulation(
    _: &KubeArmorEngine,
    document: &NimbusPolicy,
    rule: &NimbusRule,
) -> Vec<Built<KubeArmorPolicy>> {
    let spec = KubeArmorPolicySpec {
        file: Some(FileType {
            match_paths: vec![MatchPath {
                path: "/etc/resolv.conf".to_owned(),
                read_only: true,
            }],
            ..FileType::default()
        }),
        ..base(document, rule)
    };
    vec![Built::single(policy(spec))]
}

fn sw_deployment_block(
    _: &KubeArmorEngine,
    document: &NimbusPolicy,
    rule: &NimbusRule,
) -> Vec<Built<KubeArmorPolicy>> {
    let spec = KubeArmorPolicySpec {
        process: Some(ProcessType {
            match_paths: PACKAGE_MANAGERS.iter().map(|path| MatchPath::new(path)).collect(),
            ..ProcessType::default()
        }),
        ..base(document, rule)
    };
    vec![Built::single(policy(spec))]
}

fn sa_token_access(
    _: &KubeArmorEngine,
    document: &NimbusPolicy,
    rule: &NimbusRule,
) -> Vec<Built<KubeArmorPolicy>> {
    let spec = KubeArmorPolicySpec {
        file: Some(FileType {
            match_directories: vec![MatchDirectory::recursive(
                "/run/secrets/kubernetes.io/serviceaccount/",
            )],
            ..FileType::default()
        }),
        ..base(document, rule)
    };
    vec![Built::single(policy(spec))]
}

fn exploit_pfa(
    _: &KubeArmorEngine,
    document: &NimbusPolicy,
    rule: &NimbusRule,
) -> Vec<Built<KubeArmorPolicy>> {
    let spec = KubeArmorPolicySpec {
        process: Some(ProcessType {
            match_directories: ["/tmp/", "/var/tmp/", "/dev/shm/"]
                .into_iter()
                .map(MatchDirectory::recursive)
                .collect(),
            ..ProcessType::default()
        }),
        ..base(document, rule)
    };
    vec![Built::single(policy(spec))]
}

/// Two objects: one blocking namespace-switching tools, one blocking
/// host-level capabilities.
fn escape_to_host(
    _: &KubeArmorEngine,
    document: &NimbusPolicy,
    rule: &NimbusRule,
) -> Vec<Built<KubeArmorPolicy>> {
    let namespaces = KubeArmorPolicySpec {
        process: Some(ProcessType {
            match_paths: NAMESPACE_TOOLS.iter().map(|path| MatchPath::new(path)).collect(),
            ..ProcessType::default()
        }),
        ..base(document, rule)
    };
    let capabilities = KubeArmorPolicySpec {
        capabilities: Some(CapabilitiesType {
            match_capabilities: HOST_CAPABILITIES
                .iter()
                .map(|capability| MatchCapability {
                    capability: (*capability).to_owned(),
                })
                .collect(),
        }),
        ..base(document, rule)
    };
    vec![
        Built::sub("namespaces", policy(namespaces)),
        Built::sub("capabilities", policy(capabilities)),
    ]
}
