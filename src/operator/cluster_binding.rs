//! Cluster bindings → `ClusterNimbusPolicy` plus one `NimbusPolicy` per
//! covered namespace.

use std::collections::BTreeSet;

use kube::ResourceExt;
use tracing::{debug, info};

use super::Operator;
use crate::api::{
    is_owned_by, ClusterNimbusPolicy, ClusterSecurityIntentBinding, NimbusPolicy,
    SecurityIntentBindingStatus, STATUS_CREATED,
};
use crate::pipeline::synthesizer::{build_cluster_nimbus_policy, build_namespaced_policies};
use crate::pipeline::{BindingInfo, ReconcileError, SynthesisError};

impl Operator {
    /// Reconcile one cluster binding and its namespace fan-out.
    ///
    /// # Errors
    ///
    /// Synthesis failures (other than "no intents") and substrate failures.
    pub async fn reconcile_cluster_binding(
        &self,
        name: &str,
        force: bool,
    ) -> Result<(), ReconcileError> {
        let Some(binding) = self
            .ctx
            .api::<ClusterSecurityIntentBinding>()
            .get(None, name)
            .await?
        else {
            debug!(binding = name, "cluster binding gone; nothing to reconcile");
            return Ok(());
        };
        let uid = binding
            .uid()
            .ok_or_else(|| ReconcileError::MissingUid(format!("ClusterSecurityIntentBinding/{name}")))?;

        if binding.status.as_ref().map_or(true, SecurityIntentBindingStatus::is_pending) {
            self.ctx
                .status
                .modify_status::<ClusterSecurityIntentBinding, _>(None, name, |binding| {
                    let status = binding.status.get_or_insert_with(Default::default);
                    status.status = STATUS_CREATED.to_owned();
                    status.last_updated = Some(chrono::Utc::now());
                })
                .await?;
        }

        let info = self.binder.bind_cluster(&binding).await?;

        let cluster_document = match build_cluster_nimbus_policy(&info, &binding) {
            Ok(document) => document,
            Err(SynthesisError::NoIntents) => {
                if self.ctx.api::<ClusterNimbusPolicy>().delete(None, name).await? {
                    info!(binding = name, "no intents resolve; cluster document deleted");
                }
                self.prune_namespaced(&uid, &BTreeSet::new()).await?;
                self.record_cluster_status(name, &info, None, Vec::new()).await?;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        self.apply_document(&cluster_document, force).await?;

        let namespaced = build_namespaced_policies(&info, &binding)?;
        let mut covered = BTreeSet::new();
        for document in &namespaced {
            // Namespace changes never bump the binding generation; always
            // compare specs for the fan-out.
            self.apply_document(document, true).await?;
            covered.insert(document.namespace().unwrap_or_default());
        }
        self.prune_namespaced(&uid, &covered).await?;

        self.record_cluster_status(
            name,
            &info,
            Some(&cluster_document.name_any()),
            covered.into_iter().collect(),
        )
        .await?;
        debug!(binding = name, "cluster binding reconciled");
        Ok(())
    }

    /// Delete fanned-out documents owned by `owner_uid` outside `keep`.
    async fn prune_namespaced(
        &self,
        owner_uid: &str,
        keep: &BTreeSet<String>,
    ) -> Result<(), ReconcileError> {
        let api = self.ctx.api::<NimbusPolicy>();
        for document in api.list(None).await? {
            if !is_owned_by(&document, owner_uid) {
                continue;
            }
            let namespace = document.namespace().unwrap_or_default();
            if keep.contains(&namespace) {
                continue;
            }
            if api.delete(Some(&namespace), &document.name_any()).await? {
                info!(document = %document.name_any(), %namespace, "namespace no longer covered; document deleted");
            }
        }
        Ok(())
    }

    async fn record_cluster_status(
        &self,
        name: &str,
        info: &BindingInfo,
        cluster_document: Option<&str>,
        namespaces: Vec<String>,
    ) -> Result<(), ReconcileError> {
        let now = chrono::Utc::now();
        let documents = usize::from(cluster_document.is_some()).saturating_add(namespaces.len());
        self.ctx
            .status
            .modify_status::<ClusterSecurityIntentBinding, _>(None, name, |binding| {
                let status = binding.status.get_or_insert_with(Default::default);
                status.status = STATUS_CREATED.to_owned();
                status.last_updated = Some(now);
                status.bound_intents = info.intent_names.clone();
                status.number_of_bound_intents =
                    i32::try_from(info.intent_names.len()).unwrap_or(i32::MAX);
                status.cluster_nimbus_policy = cluster_document.unwrap_or_default().to_owned();
                status.nimbus_policy_namespaces = namespaces.clone();
                status.number_of_nimbus_policies = i32::try_from(documents).unwrap_or(i32::MAX);
            })
            .await?;
        Ok(())
    }
}
