//! Core business logic - framework-agnostic ledger operations.
//!
//! Every balance change goes through [`Ledger`]: each operation runs as one
//! atomic database unit (balance mutation plus the paired transaction
//! record), retried a bounded number of times on transient conflicts.

/// Cash-up reconciliation derived from ledger history
pub mod cash_up;
/// Ledger writer: load, spend, staff refund and the balance primitives
pub mod ledger;
/// Product creation, lookup and restocking
pub mod product;
/// `PREFIX-<timestamp>[-<entityId>]` reference strings
pub mod reference;
/// Attendee-initiated refund requests and their review
pub mod refund;
/// Read-side aggregations
pub mod report;
/// Bounded retry of atomic units
pub(crate) mod retry;
/// Atomic stock check-and-decrement
pub mod stock;
/// Tag store: creation, resolution and lifecycle
pub mod tag;

use crate::config::settings::LedgerSettings;
use sea_orm::DatabaseConnection;
use std::sync::Arc;

/// Handle the request layer calls into.
///
/// Cheap to clone; clones share the same connection pool.
#[derive(Debug, Clone)]
pub struct Ledger {
    database: Arc<DatabaseConnection>,
    settings: LedgerSettings,
}

impl Ledger {
    /// Creates a ledger over an already connected database.
    #[must_use]
    pub fn new(database: DatabaseConnection, settings: LedgerSettings) -> Self {
        Self {
            database: Arc::new(database),
            settings,
        }
    }

    #[must_use]
    pub fn database(&self) -> &DatabaseConnection {
        &self.database
    }

    #[must_use]
    pub const fn settings(&self) -> &LedgerSettings {
        &self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ledger::LoadOptions;
    use crate::errors::Result;
    use crate::test_utils::*;

    #[tokio::test]
    async fn test_clones_share_the_database() -> Result<()> {
        let (ledger, tag) = setup_with_tag(money("5.00")).await?;
        let clone = ledger.clone();

        clone
            .load(tag.id, money("1.00"), STAFF_ID, LoadOptions::default())
            .await?;

        assert_eq!(tag_balance(&ledger, tag.id).await?, money("6.00"));
        Ok(())
    }
}
