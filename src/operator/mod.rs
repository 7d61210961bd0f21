//! The binding controller: watches bindings, intents, documents and
//! namespaces, and keeps one synthesized document per binding.

mod binding;
mod cluster_binding;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::ResourceExt;
use tracing::{debug, info, warn};

use crate::api::{
    ClusterNimbusPolicy, ClusterResource, ClusterSecurityIntentBinding, HasSpec, NimbusPolicy,
    PolicyDocument, SecurityIntent, SecurityIntentBinding, BINDING_GENERATION_ANNOTATION,
    STATUS_CREATED,
};
use crate::cluster::informer::{EventAction, ObjectEvent};
use crate::context::Context;
use crate::dispatcher::{EventHandler, WatchTarget};
use crate::pipeline::synthesizer::synthesized_generation;
use crate::pipeline::{is_orphan, IntentBinder, ReconcileError};

const SECURITY_INTENT_BINDING: &str = "SecurityIntentBinding";
const CLUSTER_SECURITY_INTENT_BINDING: &str = "ClusterSecurityIntentBinding";

/// What a document write did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentChange {
    /// The document did not exist and was created.
    Created,
    /// The document was stale and was overwritten.
    Updated,
    /// The stored document was already current.
    Unchanged,
}

/// Reconciles bindings into intermediate documents.
#[derive(Clone)]
pub struct Operator {
    ctx: Context,
    binder: IntentBinder,
}

impl Operator {
    /// Operator sharing `ctx`.
    pub fn new(ctx: Context) -> Self {
        let binder = IntentBinder::new(ctx.client.clone());
        Self { ctx, binder }
    }

    /// Reconcile every binding of both kinds once.
    ///
    /// # Errors
    ///
    /// Fails only when the bindings cannot be listed; individual binding
    /// failures are logged and skipped.
    pub async fn reconcile_all(&self) -> Result<(), ReconcileError> {
        for binding in self.ctx.api::<SecurityIntentBinding>().list(None).await? {
            let namespace = binding.namespace().unwrap_or_default();
            if let Err(e) = self
                .reconcile_binding(&namespace, &binding.name_any(), false)
                .await
            {
                warn!(binding = %binding.name_any(), %namespace, error = %e, "binding reconcile failed");
            }
        }
        for binding in self.ctx.api::<ClusterSecurityIntentBinding>().list(None).await? {
            if let Err(e) = self
                .reconcile_cluster_binding(&binding.name_any(), false)
                .await
            {
                warn!(binding = %binding.name_any(), error = %e, "cluster binding reconcile failed");
            }
        }
        Ok(())
    }

    /// Force-reconcile every binding that references intent `intent`.
    async fn on_intent_changed(&self, intent: &str) -> Result<(), ReconcileError> {
        let references = |names: &[crate::api::MatchIntent]| names.iter().any(|m| m.name == intent);

        for binding in self.ctx.api::<SecurityIntentBinding>().list(None).await? {
            if references(&binding.spec.intents) {
                let namespace = binding.namespace().unwrap_or_default();
                self.reconcile_binding(&namespace, &binding.name_any(), true)
                    .await?;
            }
        }
        for binding in self.ctx.api::<ClusterSecurityIntentBinding>().list(None).await? {
            if references(&binding.spec.intents) {
                self.reconcile_cluster_binding(&binding.name_any(), true)
                    .await?;
            }
        }
        Ok(())
    }

    /// A document was edited or deleted behind our back: re-synthesize it
    /// from its owning binding.
    async fn on_document_changed(
        &self,
        event: &ObjectEvent,
        expected_owners: &[&str],
    ) -> Result<(), ReconcileError> {
        if is_orphan(&event.owner_references, expected_owners) {
            debug!(kind = %event.kind, key = %event.key, "orphan document ignored");
            return Ok(());
        }
        let Some(owner) = event.owner_references.first() else {
            return Ok(());
        };
        match owner.kind.as_str() {
            SECURITY_INTENT_BINDING => {
                let namespace = event.key.namespace.clone().unwrap_or_default();
                self.reconcile_binding(&namespace, &owner.name, true).await
            }
            CLUSTER_SECURITY_INTENT_BINDING => {
                self.reconcile_cluster_binding(&owner.name, true).await
            }
            _ => Ok(()),
        }
    }

    /// Re-run every cluster binding so its namespace fan-out follows the
    /// live namespace set.
    async fn on_namespace_changed(&self) -> Result<(), ReconcileError> {
        for binding in self.ctx.api::<ClusterSecurityIntentBinding>().list(None).await? {
            self.reconcile_cluster_binding(&binding.name_any(), false)
                .await?;
        }
        Ok(())
    }

    /// Create `desired` or bring the stored copy up to date.
    ///
    /// A stored document is overwritten when the binding generation stamped
    /// on it differs from `desired`'s, or, when `force` is set, whenever its
    /// spec differs.
    async fn apply_document<D>(&self, desired: &D, force: bool) -> Result<DocumentChange, ReconcileError>
    where
        D: PolicyDocument + HasSpec,
    {
        let api = self.ctx.api::<D>();
        let namespace = desired.namespace();
        let name = desired.name_any();

        let Some(mut existing) = api.get(namespace.as_deref(), &name).await? else {
            api.create(desired).await?;
            info!(document = %desired.full_name(), namespace = ?namespace, "document created");
            self.ctx
                .status
                .modify_status::<D, _>(namespace.as_deref(), &name, |document| {
                    let status = document.status_mut();
                    status.status = STATUS_CREATED.to_owned();
                    status.last_updated = Some(chrono::Utc::now());
                })
                .await?;
            return Ok(DocumentChange::Created);
        };

        let stale = synthesized_generation(&existing) != synthesized_generation(desired);
        if !stale && !(force && existing.spec() != desired.spec()) {
            debug!(document = %desired.full_name(), "document up to date");
            return Ok(DocumentChange::Unchanged);
        }

        existing.set_spec(desired.spec().clone());
        if let Some(generation) = desired.annotations().get(BINDING_GENERATION_ANNOTATION) {
            existing
                .annotations_mut()
                .insert(BINDING_GENERATION_ANNOTATION.to_owned(), generation.clone());
        }
        existing.meta_mut().owner_references = desired.meta().owner_references.clone();
        api.replace(&existing).await?;
        info!(document = %desired.full_name(), namespace = ?namespace, stale, "document updated");
        Ok(DocumentChange::Updated)
    }
}

#[async_trait]
impl EventHandler for Operator {
    fn name(&self) -> &str {
        "operator"
    }

    fn watches(&self) -> Vec<WatchTarget> {
        vec![
            WatchTarget::all(SecurityIntentBinding::api_resource()),
            WatchTarget::all(ClusterSecurityIntentBinding::api_resource()),
            WatchTarget::all(SecurityIntent::api_resource()),
            WatchTarget::all(NimbusPolicy::api_resource()),
            WatchTarget::all(ClusterNimbusPolicy::api_resource()),
            WatchTarget::all(Namespace::api_resource()),
        ]
    }

    async fn handle(&self, event: ObjectEvent) {
        let result = match (event.kind.as_str(), event.action) {
            (SECURITY_INTENT_BINDING, EventAction::Deleted)
            | (CLUSTER_SECURITY_INTENT_BINDING, EventAction::Deleted) => {
                info!(kind = %event.kind, key = %event.key, "binding deleted; documents are garbage collected");
                Ok(())
            }
            (SECURITY_INTENT_BINDING, _) => {
                let namespace = event.key.namespace.clone().unwrap_or_default();
                self.reconcile_binding(&namespace, &event.key.name, false)
                    .await
            }
            (CLUSTER_SECURITY_INTENT_BINDING, _) => {
                self.reconcile_cluster_binding(&event.key.name, false).await
            }
            ("SecurityIntent", _) => self.on_intent_changed(&event.key.name).await,
            ("NimbusPolicy", EventAction::Updated | EventAction::Deleted) => {
                self.on_document_changed(&event, NimbusPolicy::OWNER_KINDS)
                    .await
            }
            ("ClusterNimbusPolicy", EventAction::Updated | EventAction::Deleted) => {
                self.on_document_changed(&event, ClusterNimbusPolicy::OWNER_KINDS)
                    .await
            }
            ("Namespace", EventAction::Added | EventAction::Deleted) => {
                self.on_namespace_changed().await
            }
            _ => Ok(()),
        };
        if let Err(e) = result {
            warn!(kind = %event.kind, key = %event.key, error = %e, "reconcile failed; will retry on next event");
        }
    }

    async fn resync_all(&self) -> Result<(), ReconcileError> {
        self.reconcile_all().await
    }
}
