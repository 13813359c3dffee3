//! Salonpass background worker.
//!
//! Runs the scheduled jobs:
//! - Plan expiration sweep (daily at 00:00 UTC): downgrades expired plans
//!   and emits graduated expiry warnings.
//! - Heartbeat (every 5 minutes).

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use salonpass_ledger::{
    ExpirationSweeper, ExpiryEmailService, NotificationDispatcher, PgLedgerStore, SweepStats,
};

fn log_sweep_stats(stats: &SweepStats) {
    info!(
        checked = stats.checked,
        expired = stats.expired,
        warned_7days = stats.warned_7days,
        warned_3days = stats.warned_3days,
        warned_1day = stats.warned_1day,
        emails_sent = stats.emails_sent,
        emails_failed = stats.emails_failed,
        errors = stats.errors,
        "Expiration sweep cycle complete"
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    dotenvy::dotenv().ok();

    info!("Starting Salonpass worker");

    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
    let pool = salonpass_shared::create_pool(&database_url).await?;
    salonpass_shared::run_migrations(&pool).await?;

    let store = Arc::new(PgLedgerStore::new(pool));
    let email = ExpiryEmailService::from_env();
    if !email.is_enabled() {
        info!("Expiry emails disabled (RESEND_API_KEY not set)");
    }
    let dispatcher = NotificationDispatcher::new(store.clone(), email);
    let sweeper = Arc::new(ExpirationSweeper::new(store, dispatcher));

    let scheduler = JobScheduler::new().await?;

    // Job 1: plan expiration sweep, daily at midnight UTC.
    let sweep = sweeper.clone();
    scheduler
        .add(Job::new_async("0 0 0 * * *", move |_uuid, _l| {
            let sweeper = sweep.clone();
            Box::pin(async move {
                info!("Running scheduled plan expiration sweep");
                match sweeper.run(OffsetDateTime::now_utc()).await {
                    Ok(stats) => log_sweep_stats(&stats),
                    Err(e) => error!(error = %e, "Expiration sweep failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: plan expiration sweep (daily at 00:00 UTC)");

    // Job 2: heartbeat (every 5 minutes).
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;
    info!("Scheduled: heartbeat (every 5 minutes)");

    info!("Starting job scheduler");
    scheduler.start().await?;

    // The scheduler runs jobs in background tasks.
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}
