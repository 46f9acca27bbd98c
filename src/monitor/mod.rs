//! Monitor Module
//!
//! Health probes, metrics collection, status views and the background loops
//! that drive them.

pub mod health;
pub mod metrics;
pub mod status;
pub mod tasks;

pub use health::HealthMonitor;
pub use metrics::{
    render_prometheus, ExpositionSample, MetricsCollector, MetricsSnapshot, ServerCounters,
    ServerStats, SessionGuard, PROMETHEUS_CONTENT_TYPE,
};
pub use status::{AgentStatus, AgentsStatus, HealthReport, SystemStatus};
pub use tasks::{BackgroundTasks, TaskIntervals};
