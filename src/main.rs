#![allow(clippy::result_large_err)]

use dotenvy::dotenv;
use tag_ledger::{
    Ledger, Result,
    config::{self, database},
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize tracing (as early as possible)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Load .env file; env vars can also be set externally
    dotenv().ok();
    info!("Attempted to load .env file.");

    // 3. Load the application configuration
    let app_config = config::load_app_configuration()
        .inspect_err(|e| error!("Failed to load configuration: {}", e))?;
    info!(
        max_attempts = app_config.ledger.max_attempts,
        acceptable_variance = %app_config.ledger.acceptable_variance,
        "Configuration loaded"
    );

    // 4. Connect and make sure the ledger tables exist
    let db = database::create_connection(&app_config.database)
        .await
        .inspect_err(|e| error!("Failed to connect to database: {}", e))?;
    database::create_tables(&db)
        .await
        .inspect(|_| info!("Database initialized successfully."))
        .inspect_err(|e| error!("Failed to create tables: {}", e))?;

    // 5. Report the state of the ledger
    let ledger = Ledger::new(db, app_config.ledger);
    let overview = ledger.ledger_overview().await?;
    info!(
        tags = overview.tag_count,
        active_tags = overview.active_tags,
        outstanding = %overview.outstanding_balance,
        pending_refunds = overview.pending_refund_count,
        pending_refund_total = %overview.pending_refund_total,
        "Ledger ready"
    );

    Ok(())
}
