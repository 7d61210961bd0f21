//! TLS assessment scheduling: one `CronJob` per cluster document, run in a
//! dedicated namespace.

use k8s_openapi::api::batch::v1::{CronJob, CronJobSpec};
use serde_json::json;

use crate::adapter::{from_template, Built, Engine, Registry};
use crate::api::{ClusterNimbusPolicy, HasSpec, NimbusRule};
use crate::config::K8tlsConfig;
use crate::idpool;

/// Builds scan `CronJob`s from `ClusterNimbusPolicy` documents.
pub struct K8tlsEngine {
    config: K8tlsConfig,
    registry: Registry<Self>,
}

impl K8tlsEngine {
    /// Engine with every supported rule registered.
    pub fn new(config: K8tlsConfig) -> Self {
        let registry = Registry::<Self>::new().with(idpool::ASSESS_TLS, assess_tls);
        Self { config, registry }
    }
}

impl Engine for K8tlsEngine {
    type Document = ClusterNimbusPolicy;
    type Policy = CronJob;

    fn name(&self) -> &'static str {
        "k8tls"
    }

    fn registry(&self) -> &Registry<Self> {
        &self.registry
    }

    fn target_namespace(&self, _: &ClusterNimbusPolicy) -> Option<String> {
        Some(self.config.namespace.clone())
    }
}

impl HasSpec for CronJob {
    type Spec = Option<CronJobSpec>;

    fn spec(&self) -> &Option<CronJobSpec> {
        &self.spec
    }

    fn set_spec(&mut self, spec: Option<CronJobSpec>) {
        self.spec = spec;
    }
}

fn assess_tls(engine: &K8tlsEngine, _: &ClusterNimbusPolicy, rule: &NimbusRule) -> Vec<Built<CronJob>> {
    let schedule = rule
        .rule
        .param("schedule")
        .unwrap_or(engine.config.default_schedule.as_str());
    let template = json!({
        "schedule": schedule,
        "concurrencyPolicy": "Forbid",
        "jobTemplate": {
            "spec": {
                "template": {
                    "spec": {
                        "restartPolicy": "Never",
                        "containers": [{
                            "name": "k8tls",
                            "image": engine.config.image,
                            "command": ["./k8tls_k8s"],
                            "args": ["--outdir", "/tmp/k8tls", "--json", "/tmp/k8tls/report.json"]
                        }]
                    }
                }
            }
        }
    });
    from_template::<CronJobSpec>("k8tls", &rule.id, template)
        .map(|spec| {
            Built::single(CronJob {
                spec: Some(spec),
                ..CronJob::default()
            })
        })
        .into_iter()
        .collect()
}
