use payout_engine::{
    config::Config,
    driver::{Driver, TickOutcome},
    ledger::{LedgerClient, MockLedgerClient, RpcLedgerClient},
    store::{PayoutStore, PgStore},
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Payout Engine starting...");

    let config = Config::from_env()?;

    info!(
        funding_address = %config.funding.address,
        max_in_flight = config.pipeline.max_in_flight,
        poll_interval_ms = config.pipeline.poll_interval_ms,
        "configuration loaded"
    );

    let store = PgStore::connect(&config.database.url, config.database.max_connections).await?;
    store.ensure_schema().await?;
    let store: Arc<dyn PayoutStore> = Arc::new(store);

    let ledger: Arc<dyn LedgerClient> = if config.ledger.mock_enabled {
        warn!("mock ledger enabled, no transactions will reach a real network");
        Arc::new(
            MockLedgerClient::new(config.ledger.mock_start_sequence)
                .with_latency(Duration::from_millis(config.ledger.mock_latency_ms)),
        )
    } else {
        Arc::new(RpcLedgerClient::new(
            &config.ledger.url,
            Duration::from_millis(config.ledger.request_timeout_ms),
        )?)
    };

    let driver = Driver::new(store, ledger, &config)?;

    info!("Payout Engine initialized successfully");

    let mut interval =
        tokio::time::interval(Duration::from_millis(config.pipeline.poll_interval_ms));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match driver.tick().await {
                    Ok(TickOutcome::Completed(stats))
                        if stats.signed + stats.submitted + stats.confirmed > 0 =>
                    {
                        info!(
                            signed = stats.signed,
                            submitted = stats.submitted,
                            confirmed = stats.confirmed,
                            "tick complete"
                        );
                    }
                    Ok(_) => {}
                    Err(err) => {
                        error!(error = %err, "tick failed");
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    Ok(())
}
