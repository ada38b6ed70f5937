//! Auto-refill background sweeper.
//!
//! Teams can carry a periodic refill policy (amount + period). The sweeper
//! wakes on a fixed interval and applies an `allocation` to every team whose
//! period has elapsed. Rows claimed by a concurrent instance are skipped at
//! the storage layer, so running the sweeper on several replicas is safe.

use crate::config::CreditsConfig;
use crate::db::handlers::Credits;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Run the sweeper until the shutdown token fires.
pub async fn run(pool: PgPool, config: CreditsConfig, shutdown: CancellationToken) {
    if !config.refill_enabled {
        info!("auto-refill sweeper disabled by configuration");
        return;
    }

    let mut ticker = tokio::time::interval(config.refill_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!(interval = ?config.refill_interval, "auto-refill sweeper started");
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("auto-refill sweeper shutting down");
                return;
            }
            _ = ticker.tick() => {
                match sweep_once(&pool).await {
                    Ok(0) => {}
                    Ok(count) => debug!(count, "applied auto-refill allocations"),
                    Err(err) => error!("auto-refill sweep failed: {err:#}"),
                }
            }
        }
    }
}

/// One sweep pass; returns how many teams were refilled.
pub(crate) async fn sweep_once(pool: &PgPool) -> anyhow::Result<usize> {
    let mut conn = pool.acquire().await?;
    let applied = Credits::new(&mut conn)
        .run_due_refills()
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
    Ok(applied.len())
}
