//! Metrics Collection
//!
//! Server-wide counters, durable snapshots and Prometheus text exposition.

use crate::error::{ProxyError, Result};
use crate::router::agents::{AgentRouter, AgentStats};
use crate::router::backend::BackendKind;
use crate::router::token_pool::{TokenPool, TokenStatus};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Content type of the Prometheus text format
pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Request counters for the whole server
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ServerCounters {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,

    /// Mean latency of successful requests, in seconds
    pub avg_response_time: f64,
}

impl ServerCounters {
    pub fn success_rate(&self) -> f64 {
        self.successful_requests as f64 / self.total_requests.max(1) as f64
    }
}

/// Shared server-wide counters
#[derive(Debug)]
pub struct ServerStats {
    counters: Mutex<ServerCounters>,
    started_at: DateTime<Utc>,
    started: Instant,
    sessions: AtomicUsize,
}

impl Default for ServerStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerStats {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(ServerCounters::default()),
            started_at: Utc::now(),
            started: Instant::now(),
            sessions: AtomicUsize::new(0),
        }
    }

    /// Count one finished request
    ///
    /// The mean response time averages successful requests only; failed
    /// requests are counted but never enter the mean.
    pub fn record(&self, success: bool, elapsed: Duration) {
        let mut counters = self.counters.lock();
        counters.total_requests += 1;
        if success {
            counters.successful_requests += 1;
            let n = counters.successful_requests as f64;
            counters.avg_response_time =
                (counters.avg_response_time * (n - 1.0) + elapsed.as_secs_f64()) / n;
        } else {
            counters.failed_requests += 1;
        }
    }

    pub fn counters(&self) -> ServerCounters {
        *self.counters.lock()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Track a client session until the guard drops
    pub fn open_session(self: &Arc<Self>) -> SessionGuard {
        self.sessions.fetch_add(1, Ordering::Relaxed);
        SessionGuard {
            stats: Arc::clone(self),
        }
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.load(Ordering::Relaxed)
    }
}

/// An open client session; closes on drop
#[derive(Debug)]
pub struct SessionGuard {
    stats: Arc<ServerStats>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.stats.sessions.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Server block of a snapshot
#[derive(Debug, Clone, Serialize)]
pub struct ServerMetrics {
    #[serde(flatten)]
    pub counters: ServerCounters,
    pub start_time: DateTime<Utc>,
    pub uptime_seconds: f64,
}

/// Point-in-time export of counters and status
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub server_metrics: ServerMetrics,
    pub agents_metrics: BTreeMap<BackendKind, AgentStats>,
    pub tokens_status: Vec<TokenStatus>,
    pub active_sessions: usize,
}

/// Builds snapshots and writes them to a fixed path
#[derive(Debug)]
pub struct MetricsCollector {
    pool: Arc<TokenPool>,
    router: Arc<AgentRouter>,
    stats: Arc<ServerStats>,
    path: PathBuf,
}

impl MetricsCollector {
    pub fn new(
        pool: Arc<TokenPool>,
        router: Arc<AgentRouter>,
        stats: Arc<ServerStats>,
        path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            pool,
            router,
            stats,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Capture the current state; credentials appear only in redacted form
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now(),
            server_metrics: ServerMetrics {
                counters: self.stats.counters(),
                start_time: self.stats.started_at(),
                uptime_seconds: self.stats.uptime().as_secs_f64(),
            },
            agents_metrics: self.router.all_stats(),
            tokens_status: self.pool.statuses(),
            active_sessions: self.stats.active_sessions(),
        }
    }

    /// Overwrite the snapshot file with `snapshot`
    pub async fn persist(&self, snapshot: &MetricsSnapshot) -> Result<()> {
        let persistence = |e: std::io::Error| {
            ProxyError::Persistence(format!("{}: {}", self.path.display(), e))
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(persistence)?;
            }
        }

        let json = serde_json::to_string_pretty(snapshot)
            .map_err(|e| ProxyError::Persistence(e.to_string()))?;

        // Write beside the target, then swap it in
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await.map_err(persistence)?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(persistence)?;

        debug!(path = %self.path.display(), "metrics snapshot written");
        Ok(())
    }

    /// One collection cycle
    pub async fn run_once(&self) -> Result<()> {
        let snapshot = self.snapshot();
        self.persist(&snapshot).await
    }
}

/// Values exposed on the Prometheus endpoint
#[derive(Debug, Clone, Copy)]
pub struct ExpositionSample {
    pub counters: ServerCounters,
    pub uptime_seconds: f64,
    pub active_tokens: usize,
    pub active_connections: u64,
}

fn write_metric(out: &mut String, prefix: &str, name: &str, kind: &str, help: &str, value: f64) {
    let _ = writeln!(out, "# HELP {prefix}_{name} {help}");
    let _ = writeln!(out, "# TYPE {prefix}_{name} {kind}");
    let _ = writeln!(out, "{prefix}_{name} {value}");
    out.push('\n');
}

/// Render `sample` in the Prometheus text format
pub fn render_prometheus(prefix: &str, sample: &ExpositionSample) -> String {
    let c = &sample.counters;
    let metrics = [
        ("requests_total", "counter", "Total number of requests", c.total_requests as f64),
        ("requests_successful", "counter", "Total number of successful requests", c.successful_requests as f64),
        ("requests_failed", "counter", "Total number of failed requests", c.failed_requests as f64),
        ("uptime_seconds", "gauge", "Server uptime in seconds", sample.uptime_seconds),
        ("success_rate", "gauge", "Success rate (0-1)", c.success_rate()),
        ("avg_response_time", "gauge", "Average response time in seconds", c.avg_response_time),
        ("active_tokens", "gauge", "Number of active tokens", sample.active_tokens as f64),
        ("active_connections", "gauge", "Number of active connections", sample.active_connections as f64),
    ];

    let mut out = String::new();
    for (name, kind, help, value) in metrics {
        write_metric(&mut out, prefix, name, kind, help, value);
    }

    out
}
