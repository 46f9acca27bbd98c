//! Request Dispatcher
//!
//! Entry point adapters call: acquires a token, performs the upstream call and
//! records the outcome. No retries happen inside a call.

use crate::api::gemini::{GenerateContentRequest, GenerationParams};
use crate::client::http::GeminiClient;
use crate::error::Result;
use crate::monitor::metrics::ServerStats;
use crate::router::agents::{AgentRouter, DispatchParams, DispatchResult, Generation, TextGenerator};
use crate::router::token_pool::TokenPool;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error};

/// Routes generation requests through the token pool to the upstream API
#[derive(Debug)]
pub struct RequestDispatcher {
    pool: Arc<TokenPool>,
    router: Arc<AgentRouter>,
    stats: Arc<ServerStats>,
    client: GeminiClient,
    default_model: String,
}

impl RequestDispatcher {
    pub fn new(
        pool: Arc<TokenPool>,
        router: Arc<AgentRouter>,
        stats: Arc<ServerStats>,
        client: GeminiClient,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            pool,
            router,
            stats,
            client,
            default_model: default_model.into(),
        }
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Generate text for `prompt` with `model`
    ///
    /// `NoActiveToken` fails immediately. Every upstream failure, including a
    /// 200 without the expected payload, counts against the token used.
    pub async fn submit(
        &self,
        prompt: &str,
        model: &str,
        params: &GenerationParams,
    ) -> Result<Generation> {
        let start = Instant::now();
        let result = self.call_upstream(prompt, model, params).await;
        let elapsed = start.elapsed();

        self.stats.record(result.is_ok(), elapsed);

        result.map(|text| Generation { text, elapsed })
    }

    async fn call_upstream(
        &self,
        prompt: &str,
        model: &str,
        params: &GenerationParams,
    ) -> Result<String> {
        let lease = self.pool.acquire()?;
        debug!(key = %lease.redacted(), priority = lease.priority(), model, "acquired token");

        let body = GenerateContentRequest::from_prompt(prompt, params);
        match self.client.generate_content(model, lease.key(), &body).await {
            Ok(text) => {
                self.pool.report_outcome(&lease, true);
                Ok(text)
            }
            Err(e) => {
                if e.is_credential_fault() {
                    self.pool.report_outcome(&lease, false);
                }
                error!(key = %lease.redacted(), model, error = %e, "Gemini API call failed");
                Err(e)
            }
        }
    }

    /// Route a task to a backend type, accounting for it in the agent router
    pub async fn dispatch_to_backend(
        &self,
        backend_type: &str,
        task: &str,
        params: &DispatchParams,
    ) -> DispatchResult {
        self.router.dispatch(backend_type, task, params, self).await
    }
}

impl TextGenerator for RequestDispatcher {
    async fn generate(
        &self,
        prompt: &str,
        model: Option<&str>,
        params: &GenerationParams,
    ) -> Result<Generation> {
        let model = model.unwrap_or(&self.default_model);
        self.submit(prompt, model, params).await
    }
}
