//! Resource types watched and written by the operator and the adapters.
//!
//! The `intent.security.nimbus.com` group holds the user-facing intents and
//! bindings plus the synthesized intermediate documents. Engine-owned kinds
//! (KubeArmor, Kyverno) are mirrored here only as far as the adapters need to
//! write them; `NetworkPolicy`, `CronJob` and `Namespace` come from
//! `k8s-openapi`.

pub mod binding;
pub mod intent;
pub mod kubearmor;
pub mod kyverno;
pub mod policy;

use std::collections::BTreeMap;
use std::fmt::Debug;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::core::ApiResource;
use kube::ResourceExt;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub use binding::{
    ClusterSecurityIntentBinding, ClusterSecurityIntentBindingSpec, ClusterSelector,
    MatchIntent, NamespaceSelector, ResourceFilter, Resources, SecurityIntentBinding,
    SecurityIntentBindingSpec, SecurityIntentBindingStatus, Selector, WorkloadSelector,
};
pub use intent::{Intent, SecurityIntent, SecurityIntentSpec};
pub use kubearmor::{KubeArmorPolicy, KubeArmorPolicySpec};
pub use kyverno::{ClusterPolicy, ClusterPolicySpec, Policy, PolicyBody, PolicySpec};
pub use policy::{
    ClusterNimbusPolicy, ClusterNimbusPolicySpec, LabelSelector, NimbusPolicy, NimbusPolicySpec,
    NimbusPolicyStatus, NimbusRule, PolicyDocument, Rule,
};

/// API group of the intent, binding and intermediate policy kinds.
pub const GROUP: &str = "intent.security.nimbus.com";

/// Version of the intent API group served by this operator.
pub const VERSION: &str = "v1alpha1";

/// Label carried by every derived object, naming the adapter that owns it.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Annotation stamping the binding generation a document was synthesized from.
pub const BINDING_GENERATION_ANNOTATION: &str = "intent.security.nimbus.com/binding-generation";

/// Lifecycle value for a binding or document that has not been processed yet.
pub const STATUS_PENDING: &str = "Pending";

/// Lifecycle value for a binding or document that has been synthesized.
pub const STATUS_CREATED: &str = "Created";

/// Any typed object the substrate can store.
///
/// Blanket-implemented for every static kube resource that round-trips
/// through JSON.
pub trait ClusterResource:
    kube::Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Type information used to address this kind on the substrate.
    fn api_resource() -> ApiResource {
        ApiResource::erase::<Self>(&())
    }

    /// `Kind/Name` as recorded in document status.
    fn full_name(&self) -> String {
        format!("{}/{}", Self::kind(&()), self.name_any())
    }
}

impl<K> ClusterResource for K where
    K: kube::Resource<DynamicType = ()>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// Explicit spec access for kinds whose spec the pipeline compares and
/// overwrites in place.
pub trait HasSpec: ClusterResource {
    /// The kind's spec type.
    type Spec: Clone + PartialEq + Debug + Send + Sync;

    /// Current spec.
    fn spec(&self) -> &Self::Spec;

    /// Replace the spec, leaving metadata and status untouched.
    fn set_spec(&mut self, spec: Self::Spec);
}

/// Build a controller owner reference pointing at `owner`.
///
/// Returns `None` when the owner has not been persisted yet (no UID).
pub fn owner_reference<K: ClusterResource>(owner: &K) -> Option<OwnerReference> {
    let uid = owner.uid()?;
    Some(OwnerReference {
        api_version: K::api_version(&()).into_owned(),
        kind: K::kind(&()).into_owned(),
        name: owner.name_any(),
        uid,
        controller: Some(true),
        block_owner_deletion: Some(true),
    })
}

/// Whether `object` lists an owner reference with the given UID.
pub fn is_owned_by<K: ClusterResource>(object: &K, owner_uid: &str) -> bool {
    object
        .owner_references()
        .iter()
        .any(|reference| reference.uid == owner_uid)
}

/// Labels identifying the adapter that manages a derived object.
pub fn managed_by_labels(engine: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(MANAGED_BY_LABEL.to_owned(), format!("nimbus-{engine}"))])
}

/// Whether `object` was created by the adapter named `engine`.
pub fn is_managed_by<K: ClusterResource>(object: &K, engine: &str) -> bool {
    object
        .labels()
        .get(MANAGED_BY_LABEL)
        .is_some_and(|value| value.strip_prefix("nimbus-") == Some(engine))
}
