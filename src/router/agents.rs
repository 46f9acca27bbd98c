//! Backend Load Accounting
//!
//! Tracks in-flight work and latency per backend kind and routes tasks to
//! either the upstream generative API or a stub worker.

use crate::api::GenerationParams;
use crate::error::{ProxyError, Result};
use crate::router::backend::BackendKind;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Loosely-typed parameters accompanying a dispatched task
pub type DispatchParams = Map<String, Value>;

/// Text produced by the generative backend
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    pub elapsed: Duration,
}

/// Something that can turn a prompt into text, e.g. the request dispatcher
pub trait TextGenerator: Send + Sync {
    /// Generate text for `prompt`; `None` selects the generator's default model
    fn generate(
        &self,
        prompt: &str,
        model: Option<&str>,
        params: &GenerationParams,
    ) -> impl Future<Output = Result<Generation>> + Send;
}

/// Load statistics for one backend kind
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AgentStats {
    /// Dispatches currently running
    #[serde(rename = "connections")]
    pub in_flight: u64,

    /// Successful dispatches
    pub total_requests: u64,

    /// Mean latency of successful dispatches, in seconds
    pub avg_response_time: f64,

    /// Advisory result of the last health probe
    pub healthy: bool,
}

impl Default for AgentStats {
    fn default() -> Self {
        Self {
            in_flight: 0,
            total_requests: 0,
            avg_response_time: 0.0,
            healthy: true,
        }
    }
}

impl AgentStats {
    fn record_success(&mut self, elapsed: Duration) {
        self.total_requests += 1;
        let n = self.total_requests as f64;
        self.avg_response_time =
            (self.avg_response_time * (n - 1.0) + elapsed.as_secs_f64()) / n;
    }
}

#[derive(Debug, Default)]
struct AgentTable {
    qwen: AgentStats,
    gemini: AgentStats,
    claude: AgentStats,
}

impl AgentTable {
    fn get(&self, kind: BackendKind) -> &AgentStats {
        match kind {
            BackendKind::Qwen => &self.qwen,
            BackendKind::Gemini => &self.gemini,
            BackendKind::Claude => &self.claude,
        }
    }

    fn get_mut(&mut self, kind: BackendKind) -> &mut AgentStats {
        match kind {
            BackendKind::Qwen => &mut self.qwen,
            BackendKind::Gemini => &mut self.gemini,
            BackendKind::Claude => &mut self.claude,
        }
    }
}

/// Outcome of routing one task, in the shape adapters serialize
#[derive(Debug, Serialize)]
pub struct DispatchResult {
    pub success: bool,

    #[serde(rename = "agent", skip_serializing_if = "Option::is_none")]
    pub backend_name: Option<&'static str>,

    #[serde(rename = "agent_type")]
    pub backend_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,

    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_error"
    )]
    pub error: Option<ProxyError>,

    #[serde(rename = "execution_time", serialize_with = "serialize_secs")]
    pub elapsed: Duration,

    pub timestamp: DateTime<Utc>,
}

impl DispatchResult {
    fn success(kind: BackendKind, result: String, elapsed: Duration) -> Self {
        Self {
            success: true,
            backend_name: Some(kind.display_name()),
            backend_type: kind.as_str().to_string(),
            result: Some(result),
            error: None,
            elapsed,
            timestamp: Utc::now(),
        }
    }

    fn failure(backend_type: &str, error: ProxyError, elapsed: Duration) -> Self {
        Self {
            success: false,
            backend_name: None,
            backend_type: backend_type.to_string(),
            result: None,
            error: Some(error),
            elapsed,
            timestamp: Utc::now(),
        }
    }
}

fn serialize_error<S: Serializer>(
    error: &Option<ProxyError>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match error {
        Some(e) => serializer.serialize_str(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

fn serialize_secs<S: Serializer>(
    elapsed: &Duration,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_f64(elapsed.as_secs_f64())
}

/// Decrements `in_flight` when dropped, including when a dispatch is cancelled
pub struct InFlightGuard<'a> {
    router: &'a AgentRouter,
    kind: BackendKind,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut table = self.router.table.lock();
        let stats = table.get_mut(self.kind);
        debug_assert!(stats.in_flight > 0, "in-flight count underflow");
        stats.in_flight -= 1;
    }
}

/// Per-backend load statistics and task routing
#[derive(Debug)]
pub struct AgentRouter {
    table: Mutex<AgentTable>,
    stub_latency: Duration,
}

impl AgentRouter {
    /// Create a router whose stub backends take `stub_latency` per task
    pub fn new(stub_latency: Duration) -> Self {
        Self {
            table: Mutex::new(AgentTable::default()),
            stub_latency,
        }
    }

    /// Current statistics for one backend
    pub fn stats(&self, kind: BackendKind) -> AgentStats {
        *self.table.lock().get(kind)
    }

    /// Consistent copy of every backend's statistics
    pub fn all_stats(&self) -> BTreeMap<BackendKind, AgentStats> {
        let table = self.table.lock();
        BackendKind::ALL
            .iter()
            .map(|&kind| (kind, *table.get(kind)))
            .collect()
    }

    /// Dispatches currently running across all backends
    pub fn total_in_flight(&self) -> u64 {
        let table = self.table.lock();
        BackendKind::ALL
            .iter()
            .map(|&kind| table.get(kind).in_flight)
            .sum()
    }

    /// Record the advisory health flag for a backend
    pub fn set_healthy(&self, kind: BackendKind, healthy: bool) {
        self.table.lock().get_mut(kind).healthy = healthy;
    }

    /// Count a dispatch as in flight until the returned guard drops
    pub fn begin(&self, kind: BackendKind) -> InFlightGuard<'_> {
        self.table.lock().get_mut(kind).in_flight += 1;
        InFlightGuard { router: self, kind }
    }

    /// Fold a successful sample into the backend's running mean
    pub fn record_success(&self, kind: BackendKind, elapsed: Duration) {
        self.table.lock().get_mut(kind).record_success(elapsed);
    }

    /// Route `task` to the backend named `backend_type`
    ///
    /// Unknown names fail before any statistics are touched. Failures never
    /// count towards `total_requests` or the latency mean.
    pub async fn dispatch<G: TextGenerator>(
        &self,
        backend_type: &str,
        task: &str,
        params: &DispatchParams,
        generator: &G,
    ) -> DispatchResult {
        let start = Instant::now();

        let kind = match backend_type.parse::<BackendKind>() {
            Ok(kind) => kind,
            Err(e) => {
                warn!(backend = %backend_type, "rejected dispatch to unknown backend");
                return DispatchResult::failure(backend_type, e, start.elapsed());
            }
        };

        let _guard = self.begin(kind);
        debug!(backend = %kind, "dispatching task");

        let outcome = if kind.is_generative() {
            let model = params.get("model").and_then(Value::as_str);
            let generation_params = GenerationParams::from_map(params);
            generator
                .generate(task, model, &generation_params)
                .await
                .map(|g| g.text)
        } else {
            self.run_stub(kind, task).await
        };

        let elapsed = start.elapsed();
        match outcome {
            Ok(text) => {
                self.record_success(kind, elapsed);
                info!(backend = %kind, elapsed_ms = elapsed.as_millis() as u64, "dispatch succeeded");
                DispatchResult::success(kind, text, elapsed)
            }
            Err(e) => {
                warn!(backend = %kind, error = %e, "dispatch failed");
                DispatchResult::failure(kind.as_str(), e, elapsed)
            }
        }
    }

    async fn run_stub(&self, kind: BackendKind, task: &str) -> Result<String> {
        tokio::time::sleep(self.stub_latency).await;
        let preview: String = task.chars().take(50).collect();
        Ok(format!(
            "Result from {} agent for task: {}...",
            kind, preview
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Generator replaying scripted (latency, success) pairs
    struct ScriptedGenerator {
        script: Mutex<VecDeque<(Duration, bool)>>,
    }

    impl ScriptedGenerator {
        fn new(script: &[(u64, bool)]) -> Self {
            Self {
                script: Mutex::new(
                    script
                        .iter()
                        .map(|&(ms, ok)| (Duration::from_millis(ms), ok))
                        .collect(),
                ),
            }
        }
    }

    impl TextGenerator for ScriptedGenerator {
        async fn generate(
            &self,
            prompt: &str,
            _model: Option<&str>,
            _params: &GenerationParams,
        ) -> Result<Generation> {
            let (delay, ok) = self
                .script
                .lock()
                .pop_front()
                .unwrap_or((Duration::ZERO, true));
            tokio::time::sleep(delay).await;
            if ok {
                Ok(Generation {
                    text: format!("echo: {}", prompt),
                    elapsed: delay,
                })
            } else {
                Err(ProxyError::UpstreamHttp {
                    status: 500,
                    body: "boom".to_string(),
                })
            }
        }
    }

    fn router() -> AgentRouter {
        AgentRouter::new(Duration::from_millis(200))
    }

    #[test]
    fn test_record_success_running_mean() {
        let router = router();
        for secs in [1.0, 2.0, 4.5] {
            router.record_success(BackendKind::Qwen, Duration::from_secs_f64(secs));
        }

        let stats = router.stats(BackendKind::Qwen);
        assert_eq!(stats.total_requests, 3);
        assert!((stats.avg_response_time - 2.5).abs() < 1e-9);
        assert_eq!(router.stats(BackendKind::Claude), AgentStats::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_average_ignores_failures() {
        let router = router();
        let generator = ScriptedGenerator::new(&[
            (1000, true),
            (2000, true),
            (10_000, false),
            (3000, true),
            (6000, true),
            (50, false),
        ]);
        let params = DispatchParams::new();

        let mut successes = 0;
        for _ in 0..6 {
            let result = router.dispatch("gemini", "task", &params, &generator).await;
            if result.success {
                successes += 1;
            }
        }

        let stats = router.stats(BackendKind::Gemini);
        assert_eq!(successes, 4);
        assert_eq!(stats.total_requests, 4);
        assert!((stats.avg_response_time - 3.0).abs() < 1e-6);
        assert_eq!(stats.in_flight, 0);
    }

    #[tokio::test]
    async fn test_unknown_backend_leaves_stats_untouched() {
        let router = router();
        router.record_success(BackendKind::Claude, Duration::from_millis(10));
        let before = router.all_stats();

        let generator = ScriptedGenerator::new(&[]);
        let result = router
            .dispatch("llama", "task", &DispatchParams::new(), &generator)
            .await;

        assert!(!result.success);
        assert!(matches!(result.error, Some(ProxyError::UnknownBackendType(ref n)) if n == "llama"));
        assert_eq!(result.backend_type, "llama");
        assert_eq!(router.all_stats(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_tracks_running_dispatch() {
        let router = router();
        let generator = ScriptedGenerator::new(&[(5000, false)]);
        let params = DispatchParams::new();

        let dispatch = router.dispatch("gemini", "slow", &params, &generator);
        tokio::pin!(dispatch);

        // Poll until the generator is sleeping
        tokio::select! {
            _ = &mut dispatch => panic!("dispatch finished early"),
            _ = tokio::time::sleep(Duration::from_millis(10)) => {}
        }
        assert_eq!(router.stats(BackendKind::Gemini).in_flight, 1);
        assert_eq!(router.total_in_flight(), 1);

        let result = dispatch.await;
        assert!(!result.success);
        assert_eq!(router.stats(BackendKind::Gemini).in_flight, 0);
        assert_eq!(router.stats(BackendKind::Gemini).total_requests, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_dispatch_does_not_leak_in_flight() {
        let router = router();
        let generator = ScriptedGenerator::new(&[(60_000, true)]);
        let params = DispatchParams::new();

        let outcome = tokio::time::timeout(
            Duration::from_secs(1),
            router.dispatch("gemini", "abandoned", &params, &generator),
        )
        .await;

        assert!(outcome.is_err());
        let stats = router.stats(BackendKind::Gemini);
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.total_requests, 0);
    }

    #[tokio::test]
    async fn test_successful_dispatch_releases_exactly_once() {
        let router = AgentRouter::new(Duration::ZERO);
        let generator = ScriptedGenerator::new(&[]);
        let _held = router.begin(BackendKind::Qwen);

        let result = router
            .dispatch("qwen", "task", &DispatchParams::new(), &generator)
            .await;

        assert!(result.success);
        assert_eq!(router.stats(BackendKind::Qwen).in_flight, 1);
    }

    #[tokio::test]
    async fn test_failed_dispatch_releases_exactly_once() {
        let router = AgentRouter::new(Duration::ZERO);
        let generator = ScriptedGenerator::new(&[(0, false)]);
        let _held = router.begin(BackendKind::Gemini);

        let result = router
            .dispatch("gemini", "task", &DispatchParams::new(), &generator)
            .await;

        assert!(!result.success);
        let stats = router.stats(BackendKind::Gemini);
        assert_eq!(stats.in_flight, 1);
        assert_eq!(stats.total_requests, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stub_backend() {
        let router = router();
        let generator = ScriptedGenerator::new(&[(0, true)]);
        let task = "x".repeat(80);

        let result = router
            .dispatch("claude", &task, &DispatchParams::new(), &generator)
            .await;

        assert!(result.success);
        assert_eq!(result.backend_name, Some("Claude Agent"));
        assert_eq!(
            result.result.as_deref(),
            Some(format!("Result from claude agent for task: {}...", "x".repeat(50)).as_str())
        );
        assert!(result.elapsed >= Duration::from_millis(200));

        let stats = router.stats(BackendKind::Claude);
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.in_flight, 0);
        // The generator was never consulted
        assert_eq!(generator.script.lock().len(), 1);
        assert_eq!(router.stats(BackendKind::Gemini).total_requests, 0);
    }

    #[tokio::test]
    async fn test_dispatch_result_serialization() {
        let router = AgentRouter::new(Duration::ZERO);
        let generator = ScriptedGenerator::new(&[(0, false)]);
        let params = DispatchParams::new();

        let ok = router.dispatch("qwen", "t", &params, &generator).await;
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["agent"], "Qwen Agent");
        assert_eq!(json["agent_type"], "qwen");
        assert!(json.get("error").is_none());
        assert!(json["execution_time"].is_f64());

        let failed = router.dispatch("gemini", "t", &params, &generator).await;
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["success"], false);
        assert!(json.get("agent").is_none());
        assert_eq!(json["error"], "Gemini API error 500: boom");
    }

    #[test]
    fn test_health_flag_is_independent() {
        let router = router();
        assert!(router.stats(BackendKind::Qwen).healthy);
        router.set_healthy(BackendKind::Qwen, false);
        assert!(!router.stats(BackendKind::Qwen).healthy);
        assert!(router.stats(BackendKind::Gemini).healthy);
    }
}
