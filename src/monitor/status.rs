//! Status Views
//!
//! Serializable read-only views for HTTP adapters to return as-is.

use crate::monitor::metrics::ServerStats;
use crate::router::agents::{AgentRouter, AgentStats};
use crate::router::backend::BackendKind;
use crate::router::token_pool::TokenPool;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Crate version reported by the health view
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Serialize)]
pub struct HealthMetrics {
    pub total_requests: u64,
    pub uptime_seconds: f64,
    pub active_tokens: usize,
    pub active_sessions: usize,
}

/// Liveness answer; the proxy reports healthy while the process serves
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub version: &'static str,
    pub metrics: HealthMetrics,
}

impl HealthReport {
    pub fn new(pool: &TokenPool, stats: &ServerStats) -> Self {
        Self {
            status: "healthy",
            timestamp: Utc::now(),
            version: VERSION,
            metrics: HealthMetrics {
                total_requests: stats.counters().total_requests,
                uptime_seconds: stats.uptime().as_secs_f64(),
                active_tokens: pool.active_count(),
                active_sessions: stats.active_sessions(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    pub status: &'static str,
    pub uptime_seconds: f64,
    pub total_requests: u64,
    pub success_rate: f64,
    pub avg_response_time: f64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct TokenTotals {
    pub total: usize,
    pub active: usize,
    pub inactive: usize,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SessionTotals {
    pub active: usize,
}

/// Whole-system overview
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub server: ServerStatus,
    pub agents: BTreeMap<BackendKind, AgentStats>,
    pub tokens: TokenTotals,
    pub sessions: SessionTotals,
    pub timestamp: DateTime<Utc>,
}

impl SystemStatus {
    pub fn new(pool: &TokenPool, router: &AgentRouter, stats: &ServerStats) -> Self {
        let counters = stats.counters();
        let pool_stats = pool.stats();
        Self {
            server: ServerStatus {
                status: "running",
                uptime_seconds: stats.uptime().as_secs_f64(),
                total_requests: counters.total_requests,
                success_rate: counters.success_rate(),
                avg_response_time: counters.avg_response_time,
            },
            agents: router.all_stats(),
            tokens: TokenTotals {
                total: pool_stats.total,
                active: pool_stats.active,
                inactive: pool_stats.inactive,
            },
            sessions: SessionTotals {
                active: stats.active_sessions(),
            },
            timestamp: Utc::now(),
        }
    }
}

/// One backend as shown by the agents view
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AgentStatus {
    pub healthy: bool,
    pub active_connections: u64,
    pub total_requests: u64,
    pub avg_response_time: f64,
}

impl From<AgentStats> for AgentStatus {
    fn from(stats: AgentStats) -> Self {
        Self {
            healthy: stats.healthy,
            active_connections: stats.in_flight,
            total_requests: stats.total_requests,
            avg_response_time: stats.avg_response_time,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentsStatus {
    pub agents: BTreeMap<BackendKind, AgentStatus>,
    pub timestamp: DateTime<Utc>,
}

impl AgentsStatus {
    pub fn new(router: &AgentRouter) -> Self {
        Self {
            agents: router
                .all_stats()
                .into_iter()
                .map(|(kind, stats)| (kind, stats.into()))
                .collect(),
            timestamp: Utc::now(),
        }
    }
}
