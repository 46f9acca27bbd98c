//! Backend Health Probes
//!
//! Checks whether each backend's local runtime is present. The resulting flag
//! is advisory; routing never consults it.

use crate::config::{ProbeCommand, ProbeCommands};
use crate::error::{ProxyError, Result};
use crate::router::agents::AgentRouter;
use crate::router::backend::BackendKind;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Probes backends and records their health in the agent router
#[derive(Debug)]
pub struct HealthMonitor {
    router: Arc<AgentRouter>,
    probes: ProbeCommands,
    timeout: Duration,
}

impl HealthMonitor {
    pub fn new(router: Arc<AgentRouter>, probes: ProbeCommands, timeout: Duration) -> Self {
        Self {
            router,
            probes,
            timeout,
        }
    }

    fn command_for(&self, kind: BackendKind) -> &ProbeCommand {
        match kind {
            BackendKind::Qwen => &self.probes.qwen,
            BackendKind::Gemini => &self.probes.gemini,
            BackendKind::Claude => &self.probes.claude,
        }
    }

    /// Run the probe for one backend
    ///
    /// A command that cannot be started counts as unhealthy; one that outlives
    /// the timeout is `ProbeTimeout` and gets killed.
    pub async fn probe(&self, kind: BackendKind) -> Result<bool> {
        let probe = self.command_for(kind);
        let mut command = Command::new(&probe.program);
        command
            .args(&probe.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        match tokio::time::timeout(self.timeout, command.status()).await {
            Ok(Ok(status)) => Ok(status.success()),
            Ok(Err(e)) => {
                debug!(backend = %kind, program = %probe.program, error = %e, "probe command unavailable");
                Ok(false)
            }
            Err(_) => Err(ProxyError::ProbeTimeout {
                backend: kind.to_string(),
                timeout: self.timeout,
            }),
        }
    }

    /// Probe every backend concurrently and record the results
    pub async fn run_once(&self) -> BTreeMap<BackendKind, bool> {
        let outcomes = join_all(BackendKind::ALL.iter().map(|&kind| async move {
            (kind, self.probe(kind).await)
        }))
        .await;

        let mut results = BTreeMap::new();
        for (kind, outcome) in outcomes {
            let healthy = match outcome {
                Ok(healthy) => healthy,
                Err(e) => {
                    warn!(backend = %kind, error = %e, "health check failed");
                    false
                }
            };
            self.router.set_healthy(kind, healthy);
            debug!(backend = %kind, healthy, "health probe finished");
            results.insert(kind, healthy);
        }
        results
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn monitor(probes: ProbeCommands, timeout: Duration) -> (Arc<AgentRouter>, HealthMonitor) {
        let router = Arc::new(AgentRouter::new(Duration::ZERO));
        let monitor = HealthMonitor::new(Arc::clone(&router), probes, timeout);
        (router, monitor)
    }

    #[tokio::test]
    async fn test_probe_outcomes_recorded() {
        let probes = ProbeCommands {
            qwen: ProbeCommand::new("true", &[]),
            gemini: ProbeCommand::new("false", &[]),
            claude: ProbeCommand::new("/definitely/not/a/binary", &[]),
        };
        let (router, monitor) = monitor(probes, Duration::from_secs(5));

        let results = monitor.run_once().await;

        assert_eq!(results[&BackendKind::Qwen], true);
        assert_eq!(results[&BackendKind::Gemini], false);
        assert_eq!(results[&BackendKind::Claude], false);
        assert!(router.stats(BackendKind::Qwen).healthy);
        assert!(!router.stats(BackendKind::Gemini).healthy);
        assert!(!router.stats(BackendKind::Claude).healthy);
    }

    #[tokio::test]
    async fn test_probe_timeout() {
        let probes = ProbeCommands {
            qwen: ProbeCommand::new("sleep", &["10"]),
            ..ProbeCommands::default()
        };
        let (router, monitor) = monitor(probes, Duration::from_millis(100));

        let err = monitor.probe(BackendKind::Qwen).await.unwrap_err();
        assert!(matches!(err, ProxyError::ProbeTimeout { ref backend, .. } if backend == "qwen"));

        // Swallowed by the cycle, recorded as unhealthy
        monitor.run_once().await;
        assert!(!router.stats(BackendKind::Qwen).healthy);
    }

    #[tokio::test]
    async fn test_health_does_not_gate_routing() {
        let probes = ProbeCommands {
            claude: ProbeCommand::new("false", &[]),
            ..ProbeCommands::default()
        };
        let (router, monitor) = monitor(probes, Duration::from_secs(5));
        monitor.run_once().await;
        assert!(!router.stats(BackendKind::Claude).healthy);

        struct Unused;
        impl crate::router::agents::TextGenerator for Unused {
            async fn generate(
                &self,
                _prompt: &str,
                _model: Option<&str>,
                _params: &crate::api::GenerationParams,
            ) -> Result<crate::router::agents::Generation> {
                unreachable!("stub backends never call the generator")
            }
        }

        let result = router
            .dispatch("claude", "task", &Default::default(), &Unused)
            .await;
        assert!(result.success);
    }
}
