//! Configuration loading and management.
//!
//! Loads Nimbus configuration from `./nimbus.toml` (or `$NIMBUS_CONFIG_PATH`).
//! Environment variables override file values; file values override defaults.
//!
//! Precedence: env vars > config file > defaults.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

// ── Top-level config ────────────────────────────────────────────

/// Top-level Nimbus configuration loaded from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NimbusConfig {
    /// Which substrate backend to talk to (`[cluster]`).
    pub cluster: ClusterConfig,
    /// Event queue sizing and resync (`[dispatcher]`).
    pub dispatcher: DispatcherConfig,
    /// Optimistic-concurrency retry for status writes (`[status]`).
    pub status: StatusRetryConfig,
    /// Per-engine adapter settings (`[adapters]`).
    pub adapters: AdaptersConfig,
    /// Log filter and file output (`[logging]`).
    pub logging: LoggingConfig,
}

impl NimbusConfig {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// Config file path: `$NIMBUS_CONFIG_PATH` or `./nimbus.toml`.
    /// If the file does not exist, returns defaults.
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn load_from_file() -> Result<Self> {
        let path = Self::config_path_with(|key| std::env::var(key).ok());
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                Self::from_toml(&contents)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no config file found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "failed to read config file {}: {e}",
                path.display()
            )),
        }
    }

    /// Resolve the config path using a custom env resolver.
    pub fn config_path_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
        env("NIMBUS_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("nimbus.toml"))
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function so tests never touch the process environment.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        // Cluster.
        if let Some(v) = env("NIMBUS_BACKEND") {
            match v.parse() {
                Ok(backend) => self.cluster.backend = backend,
                Err(_) => warn_invalid("NIMBUS_BACKEND", &v),
            }
        }

        // Dispatcher.
        if let Some(v) = env("NIMBUS_RESYNC_SECS") {
            match v.parse() {
                Ok(n) => self.dispatcher.resync_secs = n,
                Err(_) => warn_invalid("NIMBUS_RESYNC_SECS", &v),
            }
        }
        if let Some(v) = env("NIMBUS_QUEUE_CAPACITY") {
            match v.parse() {
                Ok(n) => self.dispatcher.queue_capacity = n,
                Err(_) => warn_invalid("NIMBUS_QUEUE_CAPACITY", &v),
            }
        }

        // Adapters.
        if let Some(v) = env("NIMBUS_ADAPTERS") {
            self.adapters.enabled = v
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_owned)
                .collect();
        }
        if let Some(v) = env("NIMBUS_K8TLS_NAMESPACE") {
            self.adapters.k8tls.namespace = v;
        }
        if let Some(v) = env("NIMBUS_K8TLS_IMAGE") {
            self.adapters.k8tls.image = v;
        }

        // Logging.
        if let Some(v) = env("NIMBUS_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = env("NIMBUS_LOG_DIR") {
            self.logging.dir = v;
        }
    }

    /// Parse a TOML string into config.
    ///
    /// # Errors
    ///
    /// Returns an error on malformed TOML or unknown enum values.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml_str).context("failed to parse config TOML")?;
        Ok(config)
    }
}

fn warn_invalid(var: &str, value: &str) {
    tracing::warn!(var, value, "ignoring invalid env override");
}

// ── Cluster ─────────────────────────────────────────────────────

/// Substrate backend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// A real API server reached through the ambient kubeconfig.
    #[default]
    Kube,
    /// The process-local in-memory store.
    Memory,
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "kube" | "kubernetes" => Ok(Self::Kube),
            "memory" | "in-memory" => Ok(Self::Memory),
            other => Err(format!("unknown backend `{other}`")),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kube => f.write_str("kube"),
            Self::Memory => f.write_str("memory"),
        }
    }
}

/// `[cluster]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Backend to connect to.
    pub backend: Backend,
}

// ── Dispatcher ──────────────────────────────────────────────────

/// `[dispatcher]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Bounded capacity of each per-kind event queue.
    pub queue_capacity: usize,
    /// Periodic resync period in seconds; `0` disables resync.
    pub resync_secs: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            resync_secs: 300,
        }
    }
}

impl DispatcherConfig {
    /// Resync period, or `None` when disabled.
    pub fn resync_period(&self) -> Option<Duration> {
        (self.resync_secs > 0).then(|| Duration::from_secs(self.resync_secs))
    }
}

// ── Status retry ────────────────────────────────────────────────

/// `[status]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StatusRetryConfig {
    /// Total write attempts, including the first.
    pub steps: u32,
    /// Delay before the second attempt, in milliseconds.
    pub initial_delay_ms: u64,
    /// Backoff multiplier.
    pub factor: u32,
    /// Cap on a single delay, in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for StatusRetryConfig {
    fn default() -> Self {
        Self {
            steps: 5,
            initial_delay_ms: 10,
            factor: 2,
            max_delay_ms: 1000,
        }
    }
}

// ── Adapters ────────────────────────────────────────────────────

/// `[adapters]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdaptersConfig {
    /// Engines started by `nimbus run`.
    pub enabled: Vec<String>,
    /// `[adapters.k8tls]`.
    pub k8tls: K8tlsConfig,
    /// `[adapters.coco]`.
    pub coco: CocoConfig,
    /// `[adapters.kyverno]`.
    pub kyverno: KyvernoConfig,
}

impl Default for AdaptersConfig {
    fn default() -> Self {
        Self {
            enabled: ["kubearmor", "netpol", "kyverno", "coco", "k8tls"]
                .into_iter()
                .map(str::to_owned)
                .collect(),
            k8tls: K8tlsConfig::default(),
            coco: CocoConfig::default(),
            kyverno: KyvernoConfig::default(),
        }
    }
}

impl AdaptersConfig {
    /// Whether `engine` is enabled.
    pub fn is_enabled(&self, engine: &str) -> bool {
        self.enabled.iter().any(|name| name == engine)
    }
}

/// TLS scan scheduling.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct K8tlsConfig {
    /// Namespace the scan jobs run in.
    pub namespace: String,
    /// Scanner image.
    pub image: String,
    /// Cron schedule used when a rule has no `schedule` param.
    pub default_schedule: String,
}

impl Default for K8tlsConfig {
    fn default() -> Self {
        Self {
            namespace: "nimbus-k8tls-env".to_owned(),
            image: "kubearmor/k8tls:latest".to_owned(),
            default_schedule: "@weekly".to_owned(),
        }
    }
}

/// Confidential-computing workload mutation.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CocoConfig {
    /// Runtime class used when a rule has no `runtimeClass` param.
    pub default_runtime_class: String,
}

impl Default for CocoConfig {
    fn default() -> Self {
        Self {
            default_runtime_class: "kata-clh".to_owned(),
        }
    }
}

/// Admission policy generation.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KyvernoConfig {
    /// `validationFailureAction` written into generated policies.
    pub validation_failure_action: String,
    /// Pod security level used when a rule has no `psaLevel` param.
    pub default_psa_level: String,
}

impl Default for KyvernoConfig {
    fn default() -> Self {
        Self {
            validation_failure_action: "Enforce".to_owned(),
            default_psa_level: "baseline".to_owned(),
        }
    }
}

// ── Logging ─────────────────────────────────────────────────────

/// `[logging]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Directory for the rotated JSON log of `nimbus run`.
    pub dir: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            dir: "logs".to_owned(),
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────
