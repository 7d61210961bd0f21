//! Namespaced bindings → `NimbusPolicy`.

use kube::ResourceExt;
use tracing::{debug, info, warn};

use super::{DocumentChange, Operator};
use crate::api::{
    NimbusPolicy, SecurityIntentBinding, SecurityIntentBindingStatus, STATUS_CREATED,
};
use crate::pipeline::synthesizer::build_nimbus_policy;
use crate::pipeline::{BindingInfo, ReconcileError, SynthesisError};

impl Operator {
    /// Reconcile one namespaced binding.
    ///
    /// `force` re-writes the document whenever its spec drifted, even if the
    /// binding generation did not move (intent edits, document edits).
    ///
    /// # Errors
    ///
    /// Synthesis failures (other than "no intents") and substrate failures.
    pub async fn reconcile_binding(
        &self,
        namespace: &str,
        name: &str,
        force: bool,
    ) -> Result<(), ReconcileError> {
        let bindings = self.ctx.api::<SecurityIntentBinding>();
        let Some(binding) = bindings.get(Some(namespace), name).await? else {
            debug!(binding = name, namespace, "binding gone; nothing to reconcile");
            return Ok(());
        };

        if binding.status.as_ref().map_or(true, SecurityIntentBindingStatus::is_pending) {
            self.ctx
                .status
                .modify_status::<SecurityIntentBinding, _>(Some(namespace), name, |binding| {
                    let status = binding.status.get_or_insert_with(Default::default);
                    status.status = STATUS_CREATED.to_owned();
                    status.last_updated = Some(chrono::Utc::now());
                })
                .await?;
        }

        let info = self.binder.bind(&binding).await?;
        if !info.is_complete(binding.spec.intents.len()) {
            warn!(
                binding = name,
                namespace,
                referenced = binding.spec.intents.len(),
                resolved = info.intents.len(),
                "some referenced intents are missing"
            );
        }

        let document = match build_nimbus_policy(&info, &binding) {
            Ok(document) => document,
            Err(SynthesisError::NoIntents) => {
                // A document without intents must not outlive them.
                if self.ctx.api::<NimbusPolicy>().delete(Some(namespace), name).await? {
                    info!(binding = name, namespace, "no intents resolve; document deleted");
                }
                self.record_binding_status(namespace, name, &info, None).await?;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let change = self.apply_document(&document, force).await?;
        debug!(binding = name, namespace, ?change, "binding reconciled");
        if change != DocumentChange::Unchanged || force {
            self.record_binding_status(namespace, name, &info, Some(&document.name_any()))
                .await?;
        }
        Ok(())
    }

    async fn record_binding_status(
        &self,
        namespace: &str,
        name: &str,
        info: &BindingInfo,
        document: Option<&str>,
    ) -> Result<(), ReconcileError> {
        let now = chrono::Utc::now();
        self.ctx
            .status
            .modify_status::<SecurityIntentBinding, _>(Some(namespace), name, |binding| {
                let status = binding.status.get_or_insert_with(Default::default);
                status.status = STATUS_CREATED.to_owned();
                status.last_updated = Some(now);
                status.bound_intents = info.intent_names.clone();
                status.number_of_bound_intents =
                    i32::try_from(info.intent_names.len()).unwrap_or(i32::MAX);
                status.nimbus_policy = document.unwrap_or_default().to_owned();
                status.number_of_nimbus_policies = i32::from(document.is_some());
            })
            .await?;
        Ok(())
    }
}
