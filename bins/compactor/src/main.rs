//! Tally compaction daemon
//!
//! Periodically folds settled days into checkpoints for the configured
//! principals until interrupted.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tally_core::ledger::{ContinuityAuditor, EntrySumAuditor, LedgerService};
use tally_db::{PgCounterCache, PgLedgerStore, connect_with};
use tally_shared::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tally=debug,sea_orm=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::load()?;
    if config.compactor.principals.is_empty() {
        warn!("No principals configured; set TALLY__COMPACTOR__PRINCIPALS");
    }

    let db = connect_with(&config.database).await?;
    info!("Connected to database");

    let ledger = LedgerService::new(
        Arc::new(PgLedgerStore::new(db.clone())),
        Arc::new(PgCounterCache::new(db)),
        config.ledger.clone(),
    )
    .with_auditor(Arc::new(ContinuityAuditor))
    .with_auditor(Arc::new(EntrySumAuditor));

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Shutdown signal received (SIGINT)");
        }
        shutdown.cancel();
    });

    let mut ticker = tokio::time::interval(Duration::from_secs(config.compactor.interval_secs.max(1)));
    info!(
        interval_secs = config.compactor.interval_secs,
        principals = config.compactor.principals.len(),
        "Compactor started"
    );

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let outcome = ledger.compact_all(&config.compactor.principals, &cancel).await;
                let created: usize = outcome.reports.iter().map(|r| r.created.len()).sum();
                let drifts: usize = outcome.reports.iter().map(|r| r.drifts.len()).sum();
                info!(
                    principals = outcome.reports.len(),
                    failures = outcome.failures.len(),
                    created,
                    drifts,
                    "Sweep finished"
                );
            }
        }
    }

    info!("Compactor stopped");
    Ok(())
}
