//! Telemetry initialization: structured logging via `tracing` with an
//! env-filter. Filtering is controlled with the standard `RUST_LOG`
//! environment variable; without it, the default keeps the engine chatty
//! and the libraries quiet.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber. Safe to call once per process;
/// returns an error if a subscriber is already set.
pub fn init_telemetry() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tollgate=debug,sqlx=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing subscriber: {e}"))?;

    Ok(())
}
