//! Intent IDs understood by at least one adapter.
//!
//! An intent's `id` selects builders in each adapter's registry; an ID no
//! adapter knows produces no policies anywhere.

/// Block writes to the resolver configuration and pin DNS egress.
pub const DNS_MANIPULATION: &str = "dnsManipulation";

/// Block package managers and build tools inside workloads.
pub const SW_DEPLOYMENT_BLOCK: &str = "swDeploymentBlock";

/// Block reads of the mounted service-account token.
pub const UNAUTHORIZED_SA_TOKEN_ACCESS: &str = "unAuthorizedSaTokenAccess";

/// Block container escape paths (host namespaces, privileged capabilities,
/// permissive pod security).
pub const ESCAPE_TO_HOST: &str = "escapeToHost";

/// Block execution from world-writable scratch directories.
pub const EXPLOIT_PFA: &str = "exploitPFA";

/// Allow only cluster-internal traffic.
pub const DENY_EXTERNAL_NETWORK_ACCESS: &str = "denyExternalNetworkAccess";

/// Schedule periodic TLS assessment of cluster services.
pub const ASSESS_TLS: &str = "assessTLS";

/// Run workloads under a confidential-computing runtime class.
pub const COCO_WORKLOAD: &str = "cocoWorkload";

/// Every known ID.
pub const ALL: &[&str] = &[
    DNS_MANIPULATION,
    SW_DEPLOYMENT_BLOCK,
    UNAUTHORIZED_SA_TOKEN_ACCESS,
    ESCAPE_TO_HOST,
    EXPLOIT_PFA,
    DENY_EXTERNAL_NETWORK_ACCESS,
    ASSESS_TLS,
    COCO_WORKLOAD,
];

/// Whether `id` is known to any adapter.
pub fn is_known(id: &str) -> bool {
    ALL.contains(&id)
}
