use anyhow::{Context, Result};
use gemini_proxy::config::ConfigLoader;
use gemini_proxy::{telemetry, GeminiProxy};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let loader = match std::env::args_os().nth(1) {
        Some(path) => ConfigLoader::from_path(&path)
            .with_context(|| format!("failed to load config from {}", path.to_string_lossy()))?,
        None => ConfigLoader::new().context("failed to load configuration")?,
    };
    let config = loader.into_config();

    telemetry::init(&config.log_level);

    let proxy = GeminiProxy::from_config(config).context("failed to build proxy")?;
    info!(
        tokens = proxy.token_pool().len(),
        active = proxy.token_pool().active_count(),
        "proxy core ready"
    );

    let shutdown = CancellationToken::new();
    let tasks = proxy.start_background(shutdown.clone());

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown requested");

    tasks.shutdown().await;
    Ok(())
}
