//! Logging setup
//!
//! Installs a `tracing-subscriber` fmt subscriber. `RUST_LOG` takes priority
//! over the configured level.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging at `log_level` unless `RUST_LOG` is set
///
/// Safe to call more than once; later calls are ignored.
pub fn init(log_level: &str) {
    let default_filter = format!("{},gemini_proxy={}", log_level, log_level);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false))
        .try_init()
        .ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_init_is_harmless() {
        init("debug");
        init("info");
        tracing::info!("still logging");
    }
}
