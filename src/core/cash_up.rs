//! Cash-up reconciliation - What a staff member should hand over, derived
//! from ledger history alone.
//!
//! A handover is an `adjustment`/`Cash` row with no tag (a "marker"). The
//! current period runs from the staff member's latest marker today, or from
//! the start of the UTC day, until now. The expected amount is the sum of
//! their `Cash` loads inside that period. There is no running counter to
//! drift; every figure can be recomputed from the ledger at any time.
//!
//! Concurrent handovers by the same staff member over the same period share
//! a `handover_key` under a UNIQUE constraint. The loser retries, finds the
//! winner's marker and sees nothing left to hand over.

use crate::{
    core::{
        Ledger,
        ledger::{self, LedgerEntry},
        reference,
        retry::atomic,
    },
    entities::{PaymentMethod, Transaction, TransactionKind, transaction},
    errors::{Error, Result},
    money::Money,
};
use chrono::{DateTime, NaiveTime, Utc};
use sea_orm::{QueryOrder, Select, TransactionTrait, prelude::*};
use serde_json::json;
use std::{fmt, str::FromStr};
use tracing::{debug, info, instrument};

/// Review label of a handover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CashUpStatus {
    Acceptable,
    RequiresReview,
}

impl CashUpStatus {
    /// `Acceptable` while `|variance| <= threshold`.
    #[must_use]
    pub fn classify(variance: Money, threshold: Money) -> Self {
        if variance.abs() <= threshold {
            Self::Acceptable
        } else {
            Self::RequiresReview
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Acceptable => "acceptable",
            Self::RequiresReview => "requires_review",
        }
    }
}

impl fmt::Display for CashUpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CashUpStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "acceptable" => Ok(Self::Acceptable),
            "requires_review" => Ok(Self::RequiresReview),
            other => Err(Error::Validation {
                message: format!("unknown cash-up status: {other}"),
            }),
        }
    }
}

/// Cash a staff member currently holds according to the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct CashUp {
    pub staff_id: i64,
    pub expected_amount: Money,
    /// Cash loads counted into `expected_amount`
    pub transaction_count: usize,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    /// Today's latest handover marker, if any
    pub last_handover: Option<transaction::Model>,
}

/// Result of recording a handover.
#[derive(Debug, Clone, PartialEq)]
pub struct HandoverSummary {
    /// The handover marker
    pub transaction: transaction::Model,
    pub expected_amount: Money,
    pub physical_amount: Money,
    /// `physical - expected`
    pub variance: Money,
    pub variance_percentage: f64,
    pub status: CashUpStatus,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

/// A stored handover marker with its recorded reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct HandoverRecord {
    pub transaction: transaction::Model,
    pub expected_amount: Money,
    pub physical_amount: Money,
    pub variance: Money,
    pub status: CashUpStatus,
    pub manager_name: Option<String>,
}

impl HandoverRecord {
    fn from_marker(marker: transaction::Model) -> Result<Self> {
        let metadata = marker.metadata.as_ref();
        let status = metadata
            .and_then(|m| m.get("status"))
            .and_then(|s| s.as_str())
            .ok_or_else(|| Error::CorruptRecord {
                message: format!("handover {} has no status", marker.id),
            })?
            .parse::<CashUpStatus>()
            .map_err(|_| Error::CorruptRecord {
                message: format!("handover {} has an unknown status", marker.id),
            })?;
        let manager_name = metadata
            .and_then(|m| m.get("manager_name"))
            .and_then(|s| s.as_str())
            .map(str::to_string);

        Ok(Self {
            expected_amount: marker.balance_before(),
            physical_amount: marker.balance_after(),
            variance: marker.balance_after() - marker.balance_before(),
            status,
            manager_name,
            transaction: marker,
        })
    }
}

fn start_of_day(at: DateTime<Utc>) -> DateTime<Utc> {
    at.date_naive().and_time(NaiveTime::MIN).and_utc()
}

fn markers_today(staff_id: i64, now: DateTime<Utc>) -> Select<Transaction> {
    Transaction::find()
        .filter(transaction::Column::Kind.eq(TransactionKind::Adjustment.as_str()))
        .filter(transaction::Column::PaymentMethod.eq(PaymentMethod::Cash.as_str()))
        .filter(transaction::Column::UserId.eq(staff_id))
        .filter(transaction::Column::TagId.is_null())
        .filter(transaction::Column::CreatedAt.gte(start_of_day(now)))
}

/// Computes the open cash-up period of `staff_id` as seen through `conn`.
async fn cash_up_in<C>(conn: &C, staff_id: i64, now: DateTime<Utc>) -> Result<CashUp>
where
    C: ConnectionTrait,
{
    let last_handover = markers_today(staff_id, now)
        .order_by_desc(transaction::Column::Id)
        .one(conn)
        .await?;

    let period_start = last_handover
        .as_ref()
        .map_or_else(|| start_of_day(now), |marker| marker.created_at);

    let mut loads = Transaction::find()
        .filter(transaction::Column::Kind.eq(TransactionKind::Load.as_str()))
        .filter(transaction::Column::PaymentMethod.eq(PaymentMethod::Cash.as_str()))
        .filter(transaction::Column::UserId.eq(staff_id))
        .filter(transaction::Column::CreatedAt.gte(start_of_day(now)));
    // Ids order rows exactly; timestamps can tie with the marker
    if let Some(marker) = &last_handover {
        loads = loads.filter(transaction::Column::Id.gt(marker.id));
    }

    let loads = loads.all(conn).await?;
    let expected_amount: Money = loads.iter().map(transaction::Model::amount).sum();

    Ok(CashUp {
        staff_id,
        expected_amount,
        transaction_count: loads.len(),
        period_start,
        period_end: now,
        last_handover,
    })
}

fn handover_key(staff_id: i64, cash_up: &CashUp) -> String {
    match &cash_up.last_handover {
        Some(marker) => format!("cashup:{staff_id}:{}", marker.id),
        None => format!(
            "cashup:{staff_id}:day:{}",
            cash_up.period_start.format("%Y-%m-%d")
        ),
    }
}

impl Ledger {
    /// How much cash `staff_id` should currently hand over.
    pub async fn current_cash_up(&self, staff_id: i64) -> Result<CashUp> {
        let txn = self.database().begin().await?;
        let cash_up = cash_up_in(&txn, staff_id, Utc::now()).await?;
        txn.commit().await?;
        Ok(cash_up)
    }

    /// Records a handover of `physical_amount` counted by `manager_name`.
    ///
    /// The expected amount is recomputed inside the same atomic unit that
    /// inserts the marker.
    ///
    /// # Errors
    /// `InvalidAmount` below 0.01, `Validation` for a blank manager name,
    /// `NothingToHandOver` when the expected amount is zero.
    #[instrument(skip(self, notes))]
    pub async fn record_cash_up(
        &self,
        staff_id: i64,
        physical_amount: Money,
        manager_name: &str,
        notes: Option<String>,
    ) -> Result<HandoverSummary> {
        physical_amount.ensure_positive()?;
        let manager_name = manager_name.trim();
        if manager_name.is_empty() {
            return Err(Error::Validation {
                message: "manager name cannot be empty".to_string(),
            });
        }
        let threshold = self.settings().acceptable_variance;

        let summary = atomic!(self, "record_cash_up", |txn| {
            async {
                let now = Utc::now();
                let cash_up = cash_up_in(&txn, staff_id, now).await?;
                if !cash_up.expected_amount.is_positive() {
                    debug!(staff_id, "No cash to hand over");
                    return Err(Error::NothingToHandOver { staff_id });
                }

                let expected = cash_up.expected_amount;
                let variance = physical_amount - expected;
                let variance_percentage = variance.percentage_of(expected);
                let status = CashUpStatus::classify(variance, threshold);

                let metadata = json!({
                    "expected_amount": expected.to_string(),
                    "physical_amount": physical_amount.to_string(),
                    "variance": variance.to_string(),
                    "variance_percentage": variance_percentage,
                    "transaction_count": cash_up.transaction_count,
                    "staff_id": staff_id,
                    "manager_name": manager_name,
                    "notes": notes,
                    "period_start": cash_up.period_start.to_rfc3339(),
                    "period_end": cash_up.period_end.to_rfc3339(),
                    "status": status.as_str(),
                });

                let entry = LedgerEntry::Adjustment {
                    amount: physical_amount,
                    expected,
                    actor_id: staff_id,
                    payment_method: PaymentMethod::Cash,
                    description: format!("Cash handover to {manager_name}"),
                    reference: reference::cash_up(now, staff_id),
                    metadata,
                    handover_key: handover_key(staff_id, &cash_up),
                };
                let receipt = ledger::append_entry(&txn, entry).await?;

                Ok::<_, Error>(HandoverSummary {
                    transaction: receipt.transaction,
                    expected_amount: expected,
                    physical_amount,
                    variance,
                    variance_percentage,
                    status,
                    period_start: cash_up.period_start,
                    period_end: cash_up.period_end,
                })
            }
            .await
        })?;

        info!(
            staff_id,
            expected = %summary.expected_amount,
            physical = %summary.physical_amount,
            variance = %summary.variance,
            status = %summary.status,
            "Cash handover recorded"
        );
        Ok(summary)
    }

    /// Today's handovers by `staff_id`, newest first.
    pub async fn todays_cash_ups(&self, staff_id: i64) -> Result<Vec<HandoverRecord>> {
        markers_today(staff_id, Utc::now())
            .order_by_desc(transaction::Column::Id)
            .all(self.database())
            .await?
            .into_iter()
            .map(HandoverRecord::from_marker)
            .collect()
    }
}
