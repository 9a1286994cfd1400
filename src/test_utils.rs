//! Shared test utilities for the tag ledger.
//!
//! This module provides common helper functions for setting up test databases
//! and creating test entities with sensible defaults.

use crate::{
    config::settings::{DatabaseSettings, LedgerSettings},
    core::{
        Ledger,
        product::{self, NewProduct},
        tag::{NewTag, get_tag_by_id},
    },
    entities,
    errors::{Error, Result},
    money::Money,
};
use sea_orm::DatabaseConnection;
use tempfile::TempDir;

/// Staff member acting in tests
pub const STAFF_ID: i64 = 1;
/// Vendor selling in tests
pub const VENDOR_ID: i64 = 10;

/// Creates an in-memory `SQLite` database with all tables initialized.
/// This is the standard setup for all integration tests.
///
/// The pool holds a single connection: every pooled connection to
/// `sqlite::memory:` would otherwise open its own empty database.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let settings = DatabaseSettings {
        url: "sqlite::memory:".to_string(),
        max_connections: 1,
        acquire_timeout_secs: 30,
    };
    let db = crate::config::database::create_connection(&settings).await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

/// Creates a file-backed `SQLite` database under a fresh temp dir, served by
/// a pool of `max_connections` connections.
///
/// Keep the returned [`TempDir`] alive for as long as the database is used;
/// dropping it removes the file.
///
/// # Panics
/// When no temp dir can be created.
#[allow(clippy::expect_used)]
pub async fn setup_shared_db(max_connections: u32) -> Result<(TempDir, DatabaseConnection)> {
    let dir = tempfile::tempdir().expect("temp dir for test database");
    let settings = DatabaseSettings {
        url: format!("sqlite://{}?mode=rwc", dir.path().join("ledger.sqlite").display()),
        max_connections,
        acquire_timeout_secs: 30,
    };
    let db = crate::config::database::create_connection(&settings).await?;
    crate::config::database::create_tables(&db).await?;
    Ok((dir, db))
}

/// A ledger over [`setup_shared_db`], for tests that need real contention
/// between connections.
pub async fn setup_shared_ledger(max_connections: u32) -> Result<(TempDir, Ledger)> {
    let (dir, db) = setup_shared_db(max_connections).await?;
    Ok((dir, Ledger::new(db, LedgerSettings::default())))
}

/// A ledger over a fresh in-memory database with default settings.
pub async fn setup_ledger() -> Result<Ledger> {
    Ok(Ledger::new(setup_test_db().await?, LedgerSettings::default()))
}

/// Parses a decimal amount such as `"12.50"`.
///
/// # Panics
/// On malformed input; only meant for literals in tests.
#[allow(clippy::expect_used)]
pub fn money(amount: &str) -> Money {
    amount.parse().expect("valid money literal")
}

/// Creates an active tag holding `balance`, loaded by [`STAFF_ID`].
pub async fn create_test_tag(
    ledger: &Ledger,
    uid: &str,
    balance: Money,
) -> Result<entities::tag::Model> {
    ledger
        .create_tag(NewTag {
            initial_balance: balance,
            ..NewTag::new(uid, STAFF_ID)
        })
        .await
}

/// Sets up a complete test environment with one active tag.
/// Returns (ledger, tag) for common test scenarios.
pub async fn setup_with_tag(balance: Money) -> Result<(Ledger, entities::tag::Model)> {
    let ledger = setup_ledger().await?;
    let tag = create_test_tag(&ledger, "04:00:00:01", balance).await?;
    Ok((ledger, tag))
}

/// Creates an available test product sold by [`VENDOR_ID`].
///
/// # Defaults
/// * price: 5.00
pub async fn create_test_product(
    db: &DatabaseConnection,
    name: &str,
    stock_quantity: Option<i32>,
) -> Result<entities::product::Model> {
    product::create_product(
        db,
        NewProduct {
            vendor_id: Some(VENDOR_ID),
            name: name.to_string(),
            price: Money::from_cents(500),
            stock_quantity,
            is_available: true,
        },
    )
    .await
}

/// Re-reads the stored balance of a tag.
pub async fn tag_balance(ledger: &Ledger, tag_id: i64) -> Result<Money> {
    get_tag_by_id(ledger.database(), tag_id)
        .await?
        .map(|tag| Money::from_cents(tag.balance))
        .ok_or_else(|| Error::TagNotFound {
            identifier: tag_id.to_string(),
        })
}
