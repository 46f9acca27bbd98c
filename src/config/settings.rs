//! Proxy Configuration
//!
//! Defines the configuration schema for the proxy core.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener settings for the HTTP adapter
    pub server: ServerConfig,

    /// Upstream generative API settings
    pub gemini: GeminiConfig,

    /// Backend agent settings
    pub agents: AgentsConfig,

    /// Snapshot and exposition settings
    pub monitoring: MonitoringConfig,

    /// Default log level (overridden by `RUST_LOG`)
    pub log_level: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            gemini: GeminiConfig::default(),
            agents: AgentsConfig::default(),
            monitoring: MonitoringConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

/// Listener configuration, consumed by the external HTTP layer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Configuration for the upstream Gemini API
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    /// Base URL, e.g. `https://generativelanguage.googleapis.com/v1beta`
    pub endpoint: String,

    /// Total timeout for one upstream call, in seconds
    pub timeout_secs: u64,

    /// Model used when a caller does not name one
    pub default_model: String,

    /// Credential loading and reconciliation
    pub token_rotation: TokenRotationConfig,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            timeout_secs: 60,
            default_model: "gemini-pro".to_string(),
            token_rotation: TokenRotationConfig::default(),
        }
    }
}

impl GeminiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Credential sources and reconciliation policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenRotationConfig {
    /// Primary credential file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_file: Option<PathBuf>,

    /// Used when the primary file is missing or yields no credentials
    pub fallback_file: PathBuf,

    /// Seconds between reconciliation passes
    pub reconcile_interval_secs: u64,

    /// Tokens with more errors than this are deactivated on reconciliation
    pub error_threshold: u32,
}

impl Default for TokenRotationConfig {
    fn default() -> Self {
        Self {
            tokens_file: None,
            fallback_file: PathBuf::from("/app/secrets/gemini_tokens.txt"),
            reconcile_interval_secs: 30,
            error_threshold: 5,
        }
    }
}

impl TokenRotationConfig {
    /// Credential sources in priority order
    pub fn sources(&self) -> Vec<PathBuf> {
        let mut sources = Vec::with_capacity(2);
        if let Some(primary) = &self.tokens_file {
            sources.push(primary.clone());
        }
        sources.push(self.fallback_file.clone());
        sources
    }
}

/// Command used to probe whether a backend's local runtime is present
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl ProbeCommand {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// Per-backend probe commands
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeCommands {
    pub qwen: ProbeCommand,
    pub gemini: ProbeCommand,
    pub claude: ProbeCommand,
}

impl Default for ProbeCommands {
    fn default() -> Self {
        Self {
            qwen: ProbeCommand::new("which", &["qwen-cli"]),
            gemini: ProbeCommand::new("which", &["gemini-cli"]),
            claude: ProbeCommand::new("node", &["--version"]),
        }
    }
}

/// Backend agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentsConfig {
    /// Simulated work time of the stub backends, in milliseconds
    pub stub_latency_ms: u64,

    /// Seconds between health probe cycles
    pub health_interval_secs: u64,

    /// Upper bound on a single probe, in seconds
    pub probe_timeout_secs: u64,

    pub probes: ProbeCommands,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            stub_latency_ms: 200,
            health_interval_secs: 60,
            probe_timeout_secs: 5,
            probes: ProbeCommands::default(),
        }
    }
}

impl AgentsConfig {
    pub fn stub_latency(&self) -> Duration {
        Duration::from_millis(self.stub_latency_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

/// Snapshot and exposition configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Where snapshots are written (overwritten each cycle)
    pub metrics_file: PathBuf,

    /// Seconds between snapshots
    pub snapshot_interval_secs: u64,

    /// Prefix for Prometheus metric names
    pub metric_prefix: String,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            metrics_file: PathBuf::from("/app/data/proxy_metrics.json"),
            snapshot_interval_secs: 60,
            metric_prefix: "gemini_proxy".to_string(),
        }
    }
}
