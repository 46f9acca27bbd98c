//! Background Tasks
//!
//! Periodic reconciliation, health probing and snapshotting. Each loop owns its
//! own timer; a slow or failing cycle never stalls the others or the callers.

use crate::config::ProxyConfig;
use crate::monitor::health::HealthMonitor;
use crate::monitor::metrics::MetricsCollector;
use crate::router::token_pool::TokenPool;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

const MIN_PERIOD: Duration = Duration::from_secs(1);

/// Periods of the three background loops
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskIntervals {
    pub reconcile: Duration,
    pub health: Duration,
    pub snapshot: Duration,
}

impl TaskIntervals {
    /// Read the periods from configuration, never shorter than one second
    pub fn from_config(config: &ProxyConfig) -> Self {
        let secs = |s: u64| Duration::from_secs(s).max(MIN_PERIOD);
        Self {
            reconcile: secs(config.gemini.token_rotation.reconcile_interval_secs),
            health: secs(config.agents.health_interval_secs),
            snapshot: secs(config.monitoring.snapshot_interval_secs),
        }
    }
}

/// Handle to the running background loops
#[derive(Debug)]
pub struct BackgroundTasks {
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl BackgroundTasks {
    /// Start all three loops; they run until `shutdown` is cancelled
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        pool: Arc<TokenPool>,
        health: Arc<HealthMonitor>,
        metrics: Arc<MetricsCollector>,
        intervals: TaskIntervals,
        shutdown: CancellationToken,
    ) -> Self {
        let tracker = TaskTracker::new();

        tracker.spawn(run_every(
            "reconcile",
            intervals.reconcile,
            shutdown.clone(),
            move || {
                let pool = Arc::clone(&pool);
                async move {
                    let report = pool.reconcile();
                    if report.reactivated_all {
                        info!("reconcile reactivated every token");
                    } else if !report.deactivated.is_empty() {
                        info!(priorities = ?report.deactivated, "reconcile deactivated tokens");
                    }
                }
            },
        ));

        tracker.spawn(run_every(
            "health",
            intervals.health,
            shutdown.clone(),
            move || {
                let health = Arc::clone(&health);
                async move {
                    let results = health.run_once().await;
                    debug!(?results, "health cycle finished");
                }
            },
        ));

        tracker.spawn(run_every(
            "snapshot",
            intervals.snapshot,
            shutdown.clone(),
            move || {
                let metrics = Arc::clone(&metrics);
                async move {
                    if let Err(e) = metrics.run_once().await {
                        error!(error = %e, "failed to persist metrics snapshot");
                    }
                }
            },
        ));

        tracker.close();
        Self { shutdown, tracker }
    }

    /// Whether the loops were told to stop
    pub fn is_cancelled(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Cancel every loop and wait until all have exited
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        self.tracker.wait().await;
        info!("background tasks stopped");
    }
}

async fn run_every<F, Fut>(name: &'static str, period: Duration, shutdown: CancellationToken, mut cycle: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!(task = name, period_secs = period.as_secs_f64(), "background task started");

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => cycle().await,
        }
    }

    debug!(task = name, "background task exiting");
}
