//! Gemini Proxy - credential-rotating request dispatcher
//!
//! Rotates requests across a pool of upstream Gemini API keys, accounts for
//! load per backend type, and keeps health, reconciliation and metrics loops
//! running in the background. HTTP adapters hold a [`GeminiProxy`] and call
//! into it.

use std::path::Path;
use std::sync::Arc;

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod monitor;
pub mod router;
pub mod telemetry;

use api::{ChatCompletionRequest, ChatCompletionResponse, GenerationParams};
use client::{GeminiClient, RequestDispatcher};
use config::{ConfigLoader, ProxyConfig};
use error::Result;
use monitor::{
    render_prometheus, AgentsStatus, BackgroundTasks, ExpositionSample, HealthMonitor,
    HealthReport, MetricsCollector, ServerStats, SessionGuard, SystemStatus, TaskIntervals,
};
use router::{AgentRouter, DispatchParams, DispatchResult, Generation, TokenPool};
use tokio_util::sync::CancellationToken;
use tracing::info;

pub use error::ProxyError;

/// The proxy core: every shared component, wired together
#[derive(Debug)]
pub struct GeminiProxy {
    config: ProxyConfig,
    pool: Arc<TokenPool>,
    router: Arc<AgentRouter>,
    stats: Arc<ServerStats>,
    dispatcher: RequestDispatcher,
    health: Arc<HealthMonitor>,
    metrics: Arc<MetricsCollector>,
}

impl GeminiProxy {
    /// Create a proxy from the default configuration search path
    pub fn new() -> Result<Self> {
        let loader = ConfigLoader::new()?;
        Self::from_config(loader.into_config())
    }

    /// Create a proxy from defaults plus one explicit config file
    pub fn with_config_path(path: impl AsRef<Path>) -> Result<Self> {
        let loader = ConfigLoader::from_path(path)?;
        Self::from_config(loader.into_config())
    }

    /// Create a proxy, loading credentials from the configured files
    ///
    /// Missing credentials are logged and leave the pool empty.
    pub fn from_config(config: ProxyConfig) -> Result<Self> {
        let pool = TokenPool::load(&config.gemini.token_rotation.sources());
        Self::with_pool(config, pool)
    }

    /// Create a proxy around an already-built token pool
    pub fn with_pool(config: ProxyConfig, pool: TokenPool) -> Result<Self> {
        let pool = Arc::new(pool.with_error_threshold(config.gemini.token_rotation.error_threshold));
        let router = Arc::new(AgentRouter::new(config.agents.stub_latency()));
        let stats = Arc::new(ServerStats::new());

        let client = GeminiClient::new(config.gemini.endpoint.clone(), config.gemini.timeout())?;
        info!(
            endpoint = %client.endpoint(),
            timeout_secs = client.timeout().as_secs(),
            "upstream client ready"
        );
        let dispatcher = RequestDispatcher::new(
            Arc::clone(&pool),
            Arc::clone(&router),
            Arc::clone(&stats),
            client,
            config.gemini.default_model.clone(),
        );

        let health = Arc::new(HealthMonitor::new(
            Arc::clone(&router),
            config.agents.probes.clone(),
            config.agents.probe_timeout(),
        ));
        let metrics = Arc::new(MetricsCollector::new(
            Arc::clone(&pool),
            Arc::clone(&router),
            Arc::clone(&stats),
            config.monitoring.metrics_file.clone(),
        ));

        info!(tokens = pool.len(), "gemini proxy initialized");

        Ok(Self {
            config,
            pool,
            router,
            stats,
            dispatcher,
            health,
            metrics,
        })
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn token_pool(&self) -> &Arc<TokenPool> {
        &self.pool
    }

    pub fn agent_router(&self) -> &Arc<AgentRouter> {
        &self.router
    }

    pub fn server_stats(&self) -> &Arc<ServerStats> {
        &self.stats
    }

    pub fn health_monitor(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn metrics_collector(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn default_model(&self) -> &str {
        self.dispatcher.default_model()
    }

    /// Generate text with one upstream call
    pub async fn submit(
        &self,
        prompt: &str,
        model: &str,
        params: &GenerationParams,
    ) -> Result<Generation> {
        self.dispatcher.submit(prompt, model, params).await
    }

    /// Route a task to a backend type; failures are reported in the result
    pub async fn dispatch_to_backend(
        &self,
        backend_type: &str,
        task: &str,
        params: &DispatchParams,
    ) -> DispatchResult {
        self.dispatcher
            .dispatch_to_backend(backend_type, task, params)
            .await
    }

    /// Answer an OpenAI-style chat completion request
    pub async fn chat_completion(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse> {
        let prompt = request.prompt()?;
        let generation = self
            .dispatcher
            .submit(&prompt, &request.model, &request.generation_params())
            .await?;

        Ok(ChatCompletionResponse::from_generation(
            &request.model,
            &prompt,
            &generation.text,
        ))
    }

    /// Count a client session as active until the guard drops
    pub fn open_session(&self) -> SessionGuard {
        self.stats.open_session()
    }

    pub fn health_report(&self) -> HealthReport {
        HealthReport::new(&self.pool, &self.stats)
    }

    pub fn system_status(&self) -> SystemStatus {
        SystemStatus::new(&self.pool, &self.router, &self.stats)
    }

    pub fn agents_status(&self) -> AgentsStatus {
        AgentsStatus::new(&self.router)
    }

    /// Current metrics in the Prometheus text format
    pub fn render_metrics(&self) -> String {
        let sample = ExpositionSample {
            counters: self.stats.counters(),
            uptime_seconds: self.stats.uptime().as_secs_f64(),
            active_tokens: self.pool.active_count(),
            active_connections: self.router.total_in_flight(),
        };
        render_prometheus(&self.config.monitoring.metric_prefix, &sample)
    }

    /// Start the reconcile, health and snapshot loops
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_background(&self, shutdown: CancellationToken) -> BackgroundTasks {
        BackgroundTasks::spawn(
            Arc::clone(&self.pool),
            Arc::clone(&self.health),
            Arc::clone(&self.metrics),
            TaskIntervals::from_config(&self.config),
            shutdown,
        )
    }
}
