//! Refund workflow - Attendee-initiated refunds reviewed by staff.
//!
//! A request is recorded as a `pending` refund row without moving money.
//! Approval re-checks the tag's balance at that moment, deducts it through
//! the ledger writer's balance primitive and flips the row to `approved`;
//! rejection only flips the row. Both decisions are terminal.

use crate::{
    core::{
        Ledger,
        ledger::{self, Receipt},
        reference,
        retry::atomic,
    },
    entities::{
        ApprovalStatus, PaymentMethod, Transaction, TransactionKind, tag, transaction,
    },
    errors::{Error, Result},
    money::Money,
};
use chrono::Utc;
use sea_orm::{QueryOrder, QuerySelect, Set, prelude::*, sea_query::Expr};
use serde_json::{Map, Value, json};
use tracing::{debug, info, instrument};

/// A staff decision on a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefundDecision {
    Approve,
    Reject,
}

/// Review state of a refund request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefundState(ApprovalStatus);

impl RefundState {
    #[must_use]
    pub const fn current(status: ApprovalStatus) -> Self {
        Self(status)
    }

    #[must_use]
    pub const fn status(self) -> ApprovalStatus {
        self.0
    }

    /// Applies a decision. Only `pending` requests can be decided.
    pub fn decide(self, transaction_id: i64, decision: RefundDecision) -> Result<Self> {
        match (self.0, decision) {
            (ApprovalStatus::Pending, RefundDecision::Approve) => {
                Ok(Self(ApprovalStatus::Approved))
            }
            (ApprovalStatus::Pending, RefundDecision::Reject) => {
                Ok(Self(ApprovalStatus::Rejected))
            }
            (status, _) => Err(Error::NotPending {
                transaction_id,
                status: status.to_string(),
            }),
        }
    }
}

impl Ledger {
    /// Records an attendee's request to have `amount` refunded from a tag.
    ///
    /// Nothing is deducted yet; `balance_before` and `balance_after` both
    /// hold the current balance.
    ///
    /// # Errors
    /// `InvalidAmount`, `TagNotFound`, `TagNotActive`, and
    /// `InsufficientBalance` when the request exceeds the current balance.
    #[instrument(skip(self))]
    pub async fn request_refund(
        &self,
        tag_id: i64,
        amount: Money,
        attendee_id: Option<i64>,
    ) -> Result<Receipt> {
        amount.ensure_positive()?;

        let receipt = atomic!(self, "request_refund", |txn| {
            async {
                let tag = ledger::lock_active_tag(&txn, tag_id).await?;
                let balance = Money::from_cents(tag.balance);
                if balance < amount {
                    debug!(tag_id, balance = %balance, "Refund request exceeds balance");
                    return Err(Error::InsufficientBalance {
                        current: balance.to_string(),
                        required: amount.to_string(),
                    });
                }

                let now = Utc::now();
                let metadata = json!({
                    "requested_by": attendee_id,
                    "requested_at": now.to_rfc3339(),
                });

                let transaction = transaction::ActiveModel {
                    tag_id: Set(Some(tag_id)),
                    kind: Set(TransactionKind::Refund.as_str().to_string()),
                    payment_method: Set(Some(PaymentMethod::Refund.as_str().to_string())),
                    approval_status: Set(ApprovalStatus::Pending.as_str().to_string()),
                    amount: Set(amount.cents()),
                    quantity: Set(1),
                    balance_before: Set(balance.cents()),
                    balance_after: Set(balance.cents()),
                    user_id: Set(attendee_id),
                    vendor_id: Set(None),
                    terminal_id: Set(None),
                    product_id: Set(None),
                    description: Set(Some("Refund request".to_string())),
                    reference: Set(Some(reference::refund_request(now, tag_id))),
                    metadata: Set(Some(metadata)),
                    handover_key: Set(None),
                    created_at: Set(now),
                    updated_at: Set(now),
                    ..Default::default()
                }
                .insert(&txn)
                .await?;

                Ok::<_, Error>(Receipt {
                    transaction,
                    balance,
                    remaining_stock: None,
                })
            }
            .await
        })?;

        info!(
            transaction_id = receipt.transaction.id,
            tag_id,
            amount = %amount,
            "Refund requested"
        );
        Ok(receipt)
    }

    /// Approves a pending request and deducts its amount from the tag.
    ///
    /// The row's balance snapshots are rewritten to the approval-time values;
    /// the balance seen at request time is kept in metadata as
    /// `balance_at_request`.
    ///
    /// # Errors
    /// `TransactionNotFound`, `NotARefundRequest`, `NotPending`,
    /// `TagNotActive`, `InsufficientBalance` when the balance dropped since
    /// the request.
    #[instrument(skip(self, notes))]
    pub async fn approve_refund(
        &self,
        transaction_id: i64,
        approver_id: i64,
        notes: Option<String>,
    ) -> Result<Receipt> {
        let receipt = atomic!(self, "approve_refund", |txn| {
            async {
                let request = lock_pending_request(&txn, transaction_id).await?;
                RefundState::current(request.approval_status()?)
                    .decide(transaction_id, RefundDecision::Approve)?;

                let tag_id = request.tag_id.ok_or_else(|| Error::CorruptRecord {
                    message: format!("refund request {transaction_id} has no tag"),
                })?;
                let now = Utc::now();
                let tag = ledger::lock_active_tag(&txn, tag_id).await?;
                let balance = ledger::apply_delta(&txn, &tag, -request.amount(), now).await?;

                let mut audit = Map::new();
                audit.insert("approved_by".to_string(), json!(approver_id));
                audit.insert("approved_at".to_string(), json!(now.to_rfc3339()));
                audit.insert(
                    "balance_at_request".to_string(),
                    json!(request.balance_before().to_string()),
                );
                if let Some(notes) = &notes {
                    audit.insert("notes".to_string(), json!(notes));
                }

                let before = balance + request.amount();
                let transaction = decide_in(
                    &txn,
                    &request,
                    ApprovalStatus::Approved,
                    Some((before, balance)),
                    audit,
                )
                .await?;

                Ok::<_, Error>(Receipt {
                    transaction,
                    balance,
                    remaining_stock: None,
                })
            }
            .await
        })?;

        info!(
            transaction_id,
            approver_id,
            balance = %receipt.balance,
            "Refund approved"
        );
        Ok(receipt)
    }

    /// Rejects a pending request. No money moves.
    ///
    /// # Errors
    /// `TransactionNotFound`, `NotARefundRequest`, `NotPending`.
    #[instrument(skip(self, reason))]
    pub async fn reject_refund(
        &self,
        transaction_id: i64,
        rejector_id: i64,
        reason: &str,
    ) -> Result<Receipt> {
        let receipt = atomic!(self, "reject_refund", |txn| {
            async {
                let request = lock_pending_request(&txn, transaction_id).await?;
                RefundState::current(request.approval_status()?)
                    .decide(transaction_id, RefundDecision::Reject)?;

                let mut audit = Map::new();
                audit.insert("rejected_by".to_string(), json!(rejector_id));
                audit.insert("rejected_at".to_string(), json!(Utc::now().to_rfc3339()));
                audit.insert("rejection_reason".to_string(), json!(reason));

                let transaction =
                    decide_in(&txn, &request, ApprovalStatus::Rejected, None, audit).await?;

                let balance = match request.tag_id {
                    Some(tag_id) => tag::Entity::find_by_id(tag_id)
                        .one(&txn)
                        .await?
                        .map_or(Money::ZERO, |tag| Money::from_cents(tag.balance)),
                    None => Money::ZERO,
                };

                Ok::<_, Error>(Receipt {
                    transaction,
                    balance,
                    remaining_stock: None,
                })
            }
            .await
        })?;

        info!(transaction_id, rejector_id, "Refund rejected");
        Ok(receipt)
    }

    /// Pending refund requests, oldest first.
    pub async fn pending_refunds(&self) -> Result<Vec<transaction::Model>> {
        Transaction::find()
            .filter(transaction::Column::Kind.eq(TransactionKind::Refund.as_str()))
            .filter(transaction::Column::PaymentMethod.eq(PaymentMethod::Refund.as_str()))
            .filter(transaction::Column::ApprovalStatus.eq(ApprovalStatus::Pending.as_str()))
            .order_by_asc(transaction::Column::CreatedAt)
            .order_by_asc(transaction::Column::Id)
            .all(self.database())
            .await
            .map_err(Into::into)
    }
}

/// Locks a transaction row and checks it is an attendee refund request.
async fn lock_pending_request<C>(conn: &C, transaction_id: i64) -> Result<transaction::Model>
where
    C: ConnectionTrait,
{
    let request = Transaction::find_by_id(transaction_id)
        .lock_exclusive()
        .one(conn)
        .await?
        .ok_or(Error::TransactionNotFound { transaction_id })?;

    if !request.is_refund_request() {
        return Err(Error::NotARefundRequest { transaction_id });
    }
    Ok(request)
}

/// Moves a request out of `pending`. The update is conditional on the row
/// still being pending, so a concurrent decision on the same request loses
/// with `NotPending`.
///
/// `balances` rewrites both snapshots: on approval `balance_before` and
/// `balance_after` describe the debit as applied at approval time, so
/// `balance_after - balance_before` keeps matching the row's delta. The
/// balance seen at request time stays in metadata as `balance_at_request`.
async fn decide_in<C>(
    conn: &C,
    request: &transaction::Model,
    status: ApprovalStatus,
    balances: Option<(Money, Money)>,
    audit: Map<String, Value>,
) -> Result<transaction::Model>
where
    C: ConnectionTrait,
{
    let metadata = ledger::merge_metadata(request.metadata.as_ref(), audit);

    let mut update = Transaction::update_many()
        .col_expr(
            transaction::Column::ApprovalStatus,
            Expr::value(status.as_str()),
        )
        .col_expr(transaction::Column::Metadata, Expr::value(metadata))
        .col_expr(transaction::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(transaction::Column::Id.eq(request.id))
        .filter(transaction::Column::ApprovalStatus.eq(ApprovalStatus::Pending.as_str()));
    if let Some((before, after)) = balances {
        update = update
            .col_expr(transaction::Column::BalanceBefore, Expr::value(before.cents()))
            .col_expr(transaction::Column::BalanceAfter, Expr::value(after.cents()));
    }

    let result = update.exec(conn).await?;
    let current = Transaction::find_by_id(request.id)
        .one(conn)
        .await?
        .ok_or(Error::TransactionNotFound {
            transaction_id: request.id,
        })?;

    if result.rows_affected == 0 {
        return Err(Error::NotPending {
            transaction_id: request.id,
            status: current.approval_status,
        });
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::core::ledger::{Credit, Sale};
    use crate::test_utils::*;

    #[test]
    fn test_state_machine_is_terminal() {
        let pending = RefundState::current(ApprovalStatus::Pending);
        assert_eq!(
            pending.decide(1, RefundDecision::Approve).unwrap().status(),
            ApprovalStatus::Approved
        );
        assert_eq!(
            pending.decide(1, RefundDecision::Reject).unwrap().status(),
            ApprovalStatus::Rejected
        );

        for terminal in [ApprovalStatus::Approved, ApprovalStatus::Rejected] {
            for decision in [RefundDecision::Approve, RefundDecision::Reject] {
                assert!(matches!(
                    RefundState::current(terminal).decide(1, decision),
                    Err(Error::NotPending { transaction_id: 1, .. })
                ));
            }
        }
    }

    #[tokio::test]
    async fn test_request_then_approve() -> Result<()> {
        let (ledger, tag) = setup_with_tag(money("40.00")).await?;

        let request = ledger.request_refund(tag.id, money("15.00"), Some(77)).await?;
        let pending = &request.transaction;
        assert_eq!(pending.approval_status()?, ApprovalStatus::Pending);
        assert_eq!(pending.payment_method()?, Some(PaymentMethod::Refund));
        assert_eq!(pending.balance_before(), money("40.00"));
        assert_eq!(pending.balance_after(), money("40.00"));
        assert!(pending.reference.as_deref().unwrap().starts_with("REFREQ-"));
        assert_eq!(tag_balance(&ledger, tag.id).await?, money("40.00"));

        let approved = ledger
            .approve_refund(pending.id, STAFF_ID, Some("Lost wristband".to_string()))
            .await?;
        assert_eq!(approved.balance, money("25.00"));
        assert_eq!(approved.transaction.approval_status()?, ApprovalStatus::Approved);
        assert_eq!(approved.transaction.balance_after(), money("25.00"));

        let metadata = approved.transaction.metadata.unwrap();
        assert_eq!(metadata["approved_by"], STAFF_ID);
        assert_eq!(metadata["requested_by"], 77);
        assert_eq!(metadata["notes"], "Lost wristband");
        assert_eq!(metadata["balance_at_request"], "40.00");

        assert_eq!(tag_balance(&ledger, tag.id).await?, money("25.00"));
        assert!(ledger.verify_tag_ledger(tag.id).await?.is_consistent());
        Ok(())
    }

    #[tokio::test]
    async fn test_approval_snapshots_balance_at_approval_time() -> Result<()> {
        let (ledger, tag) = setup_with_tag(money("40.00")).await?;

        let request = ledger.request_refund(tag.id, money("10.00"), None).await?;
        ledger
            .spend(Sale::new(tag.id, money("5.00"), STAFF_ID, VENDOR_ID))
            .await?;

        let approved = ledger
            .approve_refund(request.transaction.id, STAFF_ID, None)
            .await?;
        let row = &approved.transaction;
        assert_eq!(row.balance_before(), money("35.00"));
        assert_eq!(row.balance_after(), money("25.00"));
        assert_eq!(row.balance_after() - row.balance_before(), row.balance_delta()?);
        assert_eq!(row.metadata.as_ref().unwrap()["balance_at_request"], "40.00");
        Ok(())
    }

    #[tokio::test]
    async fn test_approval_rechecks_balance() -> Result<()> {
        let (ledger, tag) = setup_with_tag(money("40.00")).await?;

        let request = ledger.request_refund(tag.id, money("15.00"), None).await?;
        ledger
            .spend(Sale::new(tag.id, money("30.00"), STAFF_ID, VENDOR_ID))
            .await?;

        let result = ledger
            .approve_refund(request.transaction.id, STAFF_ID, None)
            .await;
        assert!(matches!(result, Err(Error::InsufficientBalance { .. })));

        // Still pending, balance unchanged
        let row = Transaction::find_by_id(request.transaction.id)
            .one(ledger.database())
            .await?
            .unwrap();
        assert_eq!(row.approval_status()?, ApprovalStatus::Pending);
        assert_eq!(tag_balance(&ledger, tag.id).await?, money("10.00"));
        Ok(())
    }

    #[tokio::test]
    async fn test_decisions_are_terminal() -> Result<()> {
        let (ledger, tag) = setup_with_tag(money("40.00")).await?;

        let first = ledger.request_refund(tag.id, money("5.00"), None).await?;
        ledger.approve_refund(first.transaction.id, STAFF_ID, None).await?;
        let again = ledger.approve_refund(first.transaction.id, STAFF_ID, None).await;
        assert!(matches!(again, Err(Error::NotPending { .. })));
        assert_eq!(tag_balance(&ledger, tag.id).await?, money("35.00"));

        let second = ledger.request_refund(tag.id, money("5.00"), None).await?;
        let rejected = ledger
            .reject_refund(second.transaction.id, STAFF_ID, "Duplicate request")
            .await?;
        assert_eq!(rejected.transaction.approval_status()?, ApprovalStatus::Rejected);
        assert_eq!(rejected.balance, money("35.00"));
        let metadata = rejected.transaction.metadata.unwrap();
        assert_eq!(metadata["rejection_reason"], "Duplicate request");

        let result = ledger.approve_refund(second.transaction.id, STAFF_ID, None).await;
        assert!(matches!(result, Err(Error::NotPending { .. })));
        let result = ledger.reject_refund(first.transaction.id, STAFF_ID, "late").await;
        assert!(matches!(result, Err(Error::NotPending { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_request_validation() -> Result<()> {
        let (ledger, tag) = setup_with_tag(money("10.00")).await?;

        let result = ledger.request_refund(tag.id, money("10.01"), None).await;
        assert!(matches!(result, Err(Error::InsufficientBalance { .. })));

        let result = ledger.request_refund(tag.id, Money::ZERO, None).await;
        assert!(matches!(result, Err(Error::InvalidAmount { .. })));

        let credit = ledger
            .refund(Credit::new(tag.id, money("1.00"), STAFF_ID))
            .await?;
        let result = ledger.approve_refund(credit.transaction.id, STAFF_ID, None).await;
        assert!(matches!(result, Err(Error::NotARefundRequest { .. })));

        let result = ledger.approve_refund(9999, STAFF_ID, None).await;
        assert!(matches!(
            result,
            Err(Error::TransactionNotFound { transaction_id: 9999 })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_pending_refunds_oldest_first() -> Result<()> {
        let (ledger, tag) = setup_with_tag(money("30.00")).await?;

        let a = ledger.request_refund(tag.id, money("1.00"), None).await?;
        let b = ledger.request_refund(tag.id, money("2.00"), None).await?;
        let c = ledger.request_refund(tag.id, money("3.00"), None).await?;
        ledger.reject_refund(b.transaction.id, STAFF_ID, "no").await?;

        let pending: Vec<_> = ledger
            .pending_refunds()
            .await?
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(pending, vec![a.transaction.id, c.transaction.id]);
        Ok(())
    }
}
