//! The per-engine reconcile loop shared by every adapter.

use std::collections::BTreeSet;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, warn};

use super::Engine;
use crate::api::{
    is_managed_by, is_owned_by, managed_by_labels, owner_reference, ClusterResource, HasSpec,
    PolicyDocument,
};
use crate::cluster::informer::{EventAction, ObjectEvent};
use crate::context::Context;
use crate::dispatcher::{EventHandler, WatchTarget};
use crate::pipeline::{is_orphan, owner_from_derived_name, DerivedName, ReconcileError};

/// What one reconcile pass changed, by derived object name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Objects that did not exist and were created.
    pub created: Vec<String>,
    /// Objects whose spec had drifted and was overwritten.
    pub updated: Vec<String>,
    /// Objects no rule implies any more.
    pub deleted: Vec<String>,
    /// Rule IDs this engine does not implement.
    pub skipped_rules: Vec<String>,
}

fn is_recorded<D: PolicyDocument>(document: &D, full_name: &str) -> bool {
    document
        .status()
        .is_some_and(|status| status.adapter_policies.iter().any(|name| name == full_name))
}

/// Drives one [`Engine`] against the documents it reads.
pub struct AdapterReconciler<E: Engine> {
    ctx: Context,
    engine: E,
}

impl<E: Engine> AdapterReconciler<E> {
    /// Reconciler for `engine`.
    pub fn new(ctx: Context, engine: E) -> Self {
        let intents: Vec<&str> = engine.registry().ids().collect();
        debug!(engine = engine.name(), ?intents, "engine registered");
        Self { ctx, engine }
    }

    /// The wrapped engine.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Reconcile every document of the engine's document kind.
    ///
    /// # Errors
    ///
    /// Fails only when documents cannot be listed; per-document failures
    /// are logged.
    pub async fn reconcile_all(&self) -> Result<(), ReconcileError> {
        for document in self.ctx.api::<E::Document>().list(None).await? {
            let namespace = document.namespace();
            if let Err(e) = self.reconcile(namespace.as_deref(), &document.name_any()).await {
                warn!(engine = self.engine.name(), document = %document.name_any(), error = %e, "reconcile failed");
            }
        }
        Ok(())
    }

    /// Bring the engine objects derived from one document in line with its
    /// current rules.
    ///
    /// # Errors
    ///
    /// The first substrate failure aborts the pass.
    pub async fn reconcile(
        &self,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<ReconcileSummary, ReconcileError> {
        let engine = self.engine.name();
        let mut summary = ReconcileSummary::default();

        let Some(document) = self.ctx.api::<E::Document>().get(namespace, name).await? else {
            debug!(engine, document = name, "document gone; nothing to reconcile");
            return Ok(summary);
        };
        if is_orphan(document.owner_references(), <E::Document as PolicyDocument>::OWNER_KINDS) {
            debug!(engine, document = name, "orphan document ignored");
            return Ok(summary);
        }
        let owner = owner_reference(&document)
            .ok_or_else(|| ReconcileError::MissingUid(document.full_name()))?;

        let desired = self.build(&document, &owner, &mut summary);
        let desired_names: BTreeSet<String> = desired.iter().map(ResourceExt::name_any).collect();

        self.delete_dangling(&document, &owner.uid, &desired_names, &mut summary)
            .await?;

        for policy in desired {
            self.upsert(&document, policy, &mut summary).await?;
        }

        debug!(
            engine,
            document = name,
            created = summary.created.len(),
            updated = summary.updated.len(),
            deleted = summary.deleted.len(),
            "document reconciled"
        );
        Ok(summary)
    }

    /// Run every supported rule's builder and stamp name, namespace, owner
    /// and labels onto the results.
    fn build(
        &self,
        document: &E::Document,
        owner: &OwnerReference,
        summary: &mut ReconcileSummary,
    ) -> Vec<E::Policy> {
        let engine = self.engine.name();
        let document_name = document.name_any();
        let namespace = self.engine.target_namespace(document);
        let mut desired = Vec::new();

        for rule in document.rules() {
            let Some(builder) = self.engine.registry().get(&rule.id) else {
                debug!(engine, rule = %rule.id, "rule not supported by this engine; skipped");
                summary.skipped_rules.push(rule.id.clone());
                continue;
            };
            for built in builder(&self.engine, document, rule) {
                let derived = match &built.sub_policy {
                    Some(sub_policy) => {
                        DerivedName::with_sub_policy(&document_name, &rule.id, sub_policy)
                    }
                    None => DerivedName::new(&document_name, &rule.id),
                };
                let mut policy = built.policy;
                let meta = policy.meta_mut();
                meta.name = Some(derived.to_string());
                meta.namespace.clone_from(&namespace);
                meta.owner_references = Some(vec![owner.clone()]);
                meta.labels
                    .get_or_insert_with(Default::default)
                    .extend(managed_by_labels(engine));
                desired.push(policy);
            }
        }
        desired
    }

    /// Delete objects this engine created for `document` that no current
    /// rule implies.
    async fn delete_dangling(
        &self,
        document: &E::Document,
        owner_uid: &str,
        desired: &BTreeSet<String>,
        summary: &mut ReconcileSummary,
    ) -> Result<(), ReconcileError> {
        let engine = self.engine.name();
        let api = self.ctx.api::<E::Policy>();
        let namespace = self.engine.target_namespace(document);

        for existing in api.list(namespace.as_deref()).await? {
            let name = existing.name_any();
            if !is_owned_by(&existing, owner_uid)
                || !is_managed_by(&existing, engine)
                || desired.contains(&name)
            {
                continue;
            }
            if api.delete(existing.namespace().as_deref(), &name).await? {
                info!(engine, policy = %existing.full_name(), "dangling policy deleted");
                self.record(document, &existing.full_name(), true).await;
                summary.deleted.push(name);
            }
        }
        Ok(())
    }

    async fn upsert(
        &self,
        document: &E::Document,
        policy: E::Policy,
        summary: &mut ReconcileSummary,
    ) -> Result<(), ReconcileError> {
        let engine = self.engine.name();
        let api = self.ctx.api::<E::Policy>();
        let namespace = policy.namespace();
        let name = policy.name_any();

        let Some(mut existing) = api.get(namespace.as_deref(), &name).await? else {
            api.create(&policy).await?;
            info!(engine, policy = %policy.full_name(), namespace = ?namespace, "policy created");
            self.record(document, &policy.full_name(), false).await;
            summary.created.push(name);
            return Ok(());
        };

        let full_name = policy.full_name();
        // An earlier pass may have written the object but lost its status write.
        if !is_recorded(document, &full_name) {
            self.record(document, &full_name, false).await;
        }

        let labels_missing = !is_managed_by(&existing, engine);
        if existing.spec() == policy.spec() && !labels_missing {
            debug!(engine, policy = %full_name, "policy up to date");
            return Ok(());
        }

        let reason = if existing.spec() != policy.spec() {
            "spec drift"
        } else {
            "ownership labels missing"
        };
        existing.set_spec(policy.spec().clone());
        existing
            .meta_mut()
            .labels
            .get_or_insert_with(Default::default)
            .extend(managed_by_labels(engine));
        existing.meta_mut().owner_references = policy.meta().owner_references.clone();
        api.replace(&existing).await?;
        info!(engine, policy = %full_name, reason, "policy updated");
        summary.updated.push(name);
        Ok(())
    }

    /// Status bookkeeping; failures were already logged by the aggregator
    /// and do not abort the pass.
    async fn record(&self, document: &E::Document, full_name: &str, decrement: bool) {
        let namespace = document.namespace();
        let result = self
            .ctx
            .status
            .update_status::<E::Document>(
                full_name,
                &document.name_any(),
                namespace.as_deref(),
                decrement,
            )
            .await;
        if result.is_err() {
            debug!(engine = self.engine.name(), policy = full_name, "status bookkeeping skipped");
        }
    }

    /// A derived object was edited or deleted: find its document by name
    /// and reconcile it.
    async fn on_policy_changed(&self, event: &ObjectEvent) -> Result<(), ReconcileError> {
        let engine = self.engine.name();
        let document_kind = <E::Document as Resource>::kind(&());
        if is_orphan(&event.owner_references, &[document_kind.as_ref()]) {
            debug!(engine, policy = %event.key, "policy not owned by a document; ignored");
            return Ok(());
        }
        let Some(document) = owner_from_derived_name(&event.key.name) else {
            return Ok(());
        };
        let namespace = if <E::Document as PolicyDocument>::NAMESPACED {
            event.key.namespace.as_deref()
        } else {
            None
        };
        if self
            .ctx
            .api::<E::Document>()
            .get(namespace, document)
            .await?
            .is_none()
        {
            debug!(engine, policy = %event.key, document, "no document under derived name; nothing to repair");
            return Ok(());
        }
        info!(engine, policy = %event.key, action = ?event.action, "derived policy changed; repairing");
        self.reconcile(namespace, document).await?;
        Ok(())
    }
}

#[async_trait]
impl<E: Engine> EventHandler for AdapterReconciler<E> {
    fn name(&self) -> &str {
        self.engine.name()
    }

    fn watches(&self) -> Vec<WatchTarget> {
        vec![
            WatchTarget::all(<E::Document as ClusterResource>::api_resource()),
            WatchTarget::all(<E::Policy as ClusterResource>::api_resource()),
        ]
    }

    async fn handle(&self, event: ObjectEvent) {
        let engine = self.engine.name();
        let document_kind = <E::Document as Resource>::kind(&());
        let result = if event.kind == document_kind.as_ref() {
            match event.action {
                EventAction::Deleted => {
                    info!(engine, document = %event.key, "document deleted; derived policies are garbage collected");
                    Ok(())
                }
                EventAction::Added | EventAction::Updated => self
                    .reconcile(event.key.namespace.as_deref(), &event.key.name)
                    .await
                    .map(|_| ()),
            }
        } else if event.action == EventAction::Added {
            Ok(())
        } else {
            self.on_policy_changed(&event).await
        };
        if let Err(e) = result {
            warn!(engine, kind = %event.kind, key = %event.key, error = %e, "reconcile failed; will retry on next event");
        }
    }

    async fn resync_all(&self) -> Result<(), ReconcileError> {
        self.reconcile_all().await
    }
}
