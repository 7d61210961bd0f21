//! Tracing setup for the `nimbus` binary.
//!
//! Controllers running in a pod log to stderr and leave collection to the
//! container runtime. `nimbus run` is usually started by hand next to a
//! cluster, so it also keeps a day-rotated JSON trail on disk.

use std::path::Path;

use anyhow::Context as _;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Where log lines go.
#[derive(Debug, Clone, Copy)]
pub enum LogSink<'a> {
    /// Human-readable lines on stderr.
    Stderr,
    /// Stderr plus JSON lines in `<dir>/nimbus.log.YYYY-MM-DD`.
    StderrAndFile(&'a Path),
}

/// Keeps the background file writer alive. Dropping it flushes the file.
pub struct LoggingGuard {
    _file_writer: Option<WorkerGuard>,
}

/// Install the global subscriber. `RUST_LOG` overrides `default_level`.
///
/// # Errors
///
/// Fails when the log directory cannot be created or a subscriber is
/// already installed.
pub fn init(sink: LogSink<'_>, default_level: &str) -> anyhow::Result<LoggingGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let (json_file, file_writer) = match sink {
        LogSink::Stderr => (None, None),
        LogSink::StderrAndFile(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("cannot create log directory {}", dir.display()))?;
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "nimbus.log"));
            (Some(fmt::layer().json().with_writer(writer)), Some(guard))
        }
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json_file)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .context("a tracing subscriber is already installed")?;

    Ok(LoggingGuard {
        _file_writer: file_writer,
    })
}
