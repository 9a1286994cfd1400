//! Reference strings for system-generated entries.
//!
//! Format: `PREFIX-<yyyymmddHHMMSS>[-<entityId>]`. References are for humans
//! reading the ledger; nothing in the crate parses them back.

use chrono::{DateTime, Utc};

pub const PURCHASE: &str = "PURCHASE";
pub const CASH_UP: &str = "CASHUP";
pub const REFUND_REQUEST: &str = "REFREQ";
pub const INITIAL_BALANCE: &str = "INIT";

/// Builds a reference for an entry created at `at`.
#[must_use]
pub fn generate(prefix: &str, at: DateTime<Utc>, entity_id: Option<i64>) -> String {
    let stamp = at.format("%Y%m%d%H%M%S");
    match entity_id {
        Some(id) => format!("{prefix}-{stamp}-{id}"),
        None => format!("{prefix}-{stamp}"),
    }
}

#[must_use]
pub fn purchase(at: DateTime<Utc>, tag_id: i64) -> String {
    generate(PURCHASE, at, Some(tag_id))
}

#[must_use]
pub fn cash_up(at: DateTime<Utc>, staff_id: i64) -> String {
    generate(CASH_UP, at, Some(staff_id))
}

#[must_use]
pub fn refund_request(at: DateTime<Utc>, tag_id: i64) -> String {
    generate(REFUND_REQUEST, at, Some(tag_id))
}

#[must_use]
pub fn initial_balance(at: DateTime<Utc>, tag_id: i64) -> String {
    generate(INITIAL_BALANCE, at, Some(tag_id))
}
