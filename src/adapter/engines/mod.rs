//! Concrete engines and the process wiring that starts them.

pub mod coco;
pub mod k8tls;
pub mod kubearmor;
pub mod kyverno;
pub mod netpol;

use std::sync::Arc;

use crate::adapter::AdapterReconciler;
use crate::context::Context;
use crate::dispatcher::EventHandler;

pub use coco::CocoEngine;
pub use k8tls::K8tlsEngine;
pub use kubearmor::KubeArmorEngine;
pub use kyverno::{KyvernoClusterEngine, KyvernoEngine};
pub use netpol::NetpolEngine;

/// Engine names accepted by `nimbus adapter`.
pub const ENGINE_NAMES: &[&str] = &["kubearmor", "netpol", "kyverno", "coco", "k8tls"];

/// Unknown engine name.
#[derive(Debug, thiserror::Error)]
#[error("unknown engine `{0}` (expected one of: kubearmor, netpol, kyverno, coco, k8tls)")]
pub struct UnknownEngine(pub String);

/// Event handlers for engine `name`. Kyverno yields two: one per document
/// scope.
///
/// # Errors
///
/// [`UnknownEngine`] for a name outside [`ENGINE_NAMES`].
pub fn handlers(ctx: &Context, name: &str) -> Result<Vec<Arc<dyn EventHandler>>, UnknownEngine> {
    let adapters = &ctx.config.adapters;
    let handlers: Vec<Arc<dyn EventHandler>> = match name {
        "kubearmor" => vec![Arc::new(AdapterReconciler::new(ctx.clone(), KubeArmorEngine::new()))],
        "netpol" => vec![Arc::new(AdapterReconciler::new(ctx.clone(), NetpolEngine::new()))],
        "kyverno" => vec![
            Arc::new(AdapterReconciler::new(
                ctx.clone(),
                KyvernoEngine::new(adapters.kyverno.clone()),
            )),
            Arc::new(AdapterReconciler::new(
                ctx.clone(),
                KyvernoClusterEngine::new(adapters.kyverno.clone()),
            )),
        ],
        "coco" => vec![Arc::new(AdapterReconciler::new(
            ctx.clone(),
            CocoEngine::new(adapters.coco.clone()),
        ))],
        "k8tls" => vec![Arc::new(AdapterReconciler::new(
            ctx.clone(),
            K8tlsEngine::new(adapters.k8tls.clone()),
        ))],
        other => return Err(UnknownEngine(other.to_owned())),
    };
    Ok(handlers)
}
