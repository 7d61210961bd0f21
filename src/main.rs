//! Nimbus CLI entry point.
//!
//! Provides `operator`, `adapter`, `run` and `dry-run` subcommands: the
//! binding controller, one or more engine adapters, both in one process, or
//! a single offline pass over YAML manifests.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context as _};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{info, warn};

use nimbus::adapter::engines::{self, ENGINE_NAMES};
use nimbus::config::{Backend, NimbusConfig};
use nimbus::context::Context;
use nimbus::dispatcher::{Dispatcher, EventHandler};
use nimbus::logging::{self, LogSink};
use nimbus::manifests;
use nimbus::operator::Operator;

/// Nimbus: intent-driven security policy for Kubernetes.
#[derive(Parser)]
#[command(name = "nimbus", version, about)]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Run the binding controller.
    Operator,
    /// Run one or more engine adapters.
    Adapter {
        /// Engines to run (kubearmor, netpol, kyverno, coco, k8tls).
        #[arg(required = true)]
        engines: Vec<String>,
    },
    /// Run the controller and every enabled adapter in one process.
    Run,
    /// Synthesize and translate manifests offline, printing the results.
    DryRun {
        /// Multi-document YAML with namespaces, intents and bindings.
        #[arg(short = 'f', long = "file")]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = NimbusConfig::load().context("failed to load configuration")?;

    match cli.command {
        Command::Operator => {
            let _logging = logging::init(LogSink::Stderr, &config.logging.level)?;
            let ctx = Context::connect(config).await?;
            let handlers: Vec<Arc<dyn EventHandler>> = vec![Arc::new(Operator::new(ctx.clone()))];
            serve(&ctx, handlers).await
        }
        Command::Adapter { engines } => {
            let _logging = logging::init(LogSink::Stderr, &config.logging.level)?;
            let ctx = Context::connect(config).await?;
            let handlers = adapter_handlers(&ctx, &engines)?;
            serve(&ctx, handlers).await
        }
        Command::Run => {
            let _logging = logging::init(
                LogSink::StderrAndFile(Path::new(&config.logging.dir)),
                &config.logging.level,
            )?;
            let ctx = Context::connect(config).await?;
            let mut handlers: Vec<Arc<dyn EventHandler>> = vec![Arc::new(Operator::new(ctx.clone()))];
            let enabled = ctx.config.adapters.enabled.clone();
            handlers.extend(adapter_handlers(&ctx, &enabled)?);
            serve(&ctx, handlers).await
        }
        Command::DryRun { file } => {
            let _logging = logging::init(LogSink::Stderr, &config.logging.level)?;
            dry_run(config, &file).await
        }
    }
}

/// Build the handlers for `names`, rejecting unknown engines.
fn adapter_handlers(ctx: &Context, names: &[String]) -> anyhow::Result<Vec<Arc<dyn EventHandler>>> {
    let mut handlers = Vec::new();
    for name in names {
        handlers.extend(
            engines::handlers(ctx, name)
                .with_context(|| format!("valid engines: {}", ENGINE_NAMES.join(", ")))?,
        );
    }
    if handlers.is_empty() {
        bail!("no adapters enabled");
    }
    Ok(handlers)
}

/// Run one dispatcher per handler until SIGINT or SIGTERM.
async fn serve(ctx: &Context, handlers: Vec<Arc<dyn EventHandler>>) -> anyhow::Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = JoinSet::new();

    for handler in handlers {
        info!(handler = handler.name(), "starting dispatcher");
        let dispatcher = Dispatcher::new(Arc::clone(&ctx.client), &ctx.config.dispatcher);
        let shutdown = shutdown_rx.clone();
        tasks.spawn(async move { dispatcher.run(handler, shutdown).await });
    }

    shutdown_signal().await;
    info!("received shutdown signal, stopping dispatchers");
    if shutdown_tx.send(true).is_err() {
        warn!("no dispatcher was listening for shutdown");
    }

    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            warn!(error = %e, "dispatcher task failed");
        }
    }
    info!("nimbus stopped");
    Ok(())
}

/// Resolves on Ctrl-C, or on SIGTERM where available.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut terminate =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(e) => {
                    warn!(error = %e, "cannot listen for SIGTERM; Ctrl-C only");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Load manifests into an in-memory cluster, run one operator pass and one
/// pass per enabled adapter, and print what was produced.
async fn dry_run(mut config: NimbusConfig, file: &Path) -> anyhow::Result<()> {
    config.cluster.backend = Backend::Memory;
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let objects = manifests::parse(&text)
        .with_context(|| format!("failed to parse {}", file.display()))?;

    let ctx = Context::connect(config).await?;
    let applied = manifests::apply(&ctx.client, objects)
        .await
        .context("failed to load manifests")?;
    info!(applied, "manifests loaded");

    Operator::new(ctx.clone())
        .reconcile_all()
        .await
        .context("operator pass failed")?;
    let enabled = ctx.config.adapters.enabled.clone();
    for handler in adapter_handlers(&ctx, &enabled)? {
        handler
            .resync_all()
            .await
            .with_context(|| format!("{} pass failed", handler.name()))?;
    }

    let rendered = manifests::render_outputs(&ctx.client)
        .await
        .context("failed to render results")?;
    print!("{rendered}");
    Ok(())
}
