//! Database configuration module.
//!
//! This module handles the `SQLite` connection and table creation using `SeaORM`.
//! Tables are generated from the entity definitions with
//! `Schema::create_table_from_entity`, so the schema always matches the Rust
//! structs without hand-written SQL.

use crate::config::settings::DatabaseSettings;
use crate::entities::{Product, Tag, Transaction};
use crate::errors::Result;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Schema};
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Default `SQLite` location when neither config.toml nor `DATABASE_URL` set one.
pub const DEFAULT_DATABASE_URL: &str = "sqlite://data/tag_ledger.sqlite?mode=rwc";

/// Establishes a connection pool with the configured bounds.
///
/// The acquire timeout is the upper bound a request waits for storage; a
/// timed-out wait surfaces as a retryable conflict rather than a hang.
#[instrument(skip(settings), fields(url = %settings.url))]
pub async fn create_connection(settings: &DatabaseSettings) -> Result<DatabaseConnection> {
    let mut options = ConnectOptions::new(settings.url.clone());
    options
        .max_connections(settings.max_connections)
        .acquire_timeout(Duration::from_secs(settings.acquire_timeout_secs))
        .sqlx_logging(false);

    debug!("Connecting to database");
    let db = Database::connect(options).await?;
    info!("Database connection established");
    Ok(db)
}

/// Creates all necessary database tables using `SeaORM`'s schema generation
/// from entity definitions.
///
/// Safe to call on every start: existing tables are left untouched.
pub async fn create_tables<C>(db: &C) -> Result<()>
where
    C: ConnectionTrait,
{
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    let mut tag_table = schema.create_table_from_entity(Tag);
    let mut product_table = schema.create_table_from_entity(Product);
    let mut transaction_table = schema.create_table_from_entity(Transaction);

    tag_table.if_not_exists();
    product_table.if_not_exists();
    transaction_table.if_not_exists();

    db.execute(builder.build(&tag_table)).await?;
    db.execute(builder.build(&product_table)).await?;
    db.execute(builder.build(&transaction_table)).await?;

    debug!("Ledger tables ensured");
    Ok(())
}
