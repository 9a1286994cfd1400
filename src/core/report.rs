//! Report generation business logic.
//!
//! Read-only aggregations over the ledger: balance lookup, paginated history,
//! vendor and terminal sales, top products and a replay check of a tag's
//! history. Every report reads inside one database transaction so it sees a
//! single consistent snapshot, never a balance halfway through a mutation.

use crate::{
    core::{Ledger, tag::resolve_tag},
    entities::{
        ApprovalStatus, PaymentMethod, Product, Tag, TagStatus, Transaction, TransactionKind,
        product, tag, transaction,
    },
    errors::{Error, Result},
    money::Money,
};
use chrono::{DateTime, Utc};
use sea_orm::{PaginatorTrait, QueryOrder, Select, TransactionTrait, prelude::*};
use std::collections::HashMap;

/// A tag with what it can spend right now.
#[derive(Debug, Clone, PartialEq)]
pub struct TagBalance {
    pub tag: tag::Model,
    pub balance: Money,
    /// Sum of the tag's refund requests still awaiting review
    pub pending_refunds: Money,
}

/// Filters for [`Ledger::transaction_history`]. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub tag_id: Option<i64>,
    pub kind: Option<TransactionKind>,
    /// Inclusive lower bound on `created_at`
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `created_at`
    pub to: Option<DateTime<Utc>>,
}

/// One page of history, newest first.
#[derive(Debug, Clone)]
pub struct HistoryPage {
    pub transactions: Vec<transaction::Model>,
    /// Zero-based page index
    pub page: u64,
    pub per_page: u64,
    pub total_items: u64,
    pub total_pages: u64,
}

/// Sum and count of approved spends in a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SalesSummary {
    pub total: Money,
    pub count: usize,
}

/// Revenue of one product in a window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductRevenue {
    pub product_id: i64,
    pub name: String,
    pub quantity: i64,
    pub revenue: Money,
}

/// Event-wide totals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerOverview {
    pub tag_count: usize,
    pub active_tags: usize,
    /// Money currently held on tags
    pub outstanding_balance: Money,
    pub pending_refund_count: usize,
    pub pending_refund_total: Money,
}

/// Result of replaying a tag's history against its stored balance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerCheck {
    pub tag_id: i64,
    /// Balance stored on the tag
    pub balance: Money,
    /// Balance recomputed from the tag's ledger entries
    pub replayed: Money,
    pub entries: usize,
    /// Entries whose `balance_after - balance_before` differs from their delta
    pub mismatched_entries: Vec<i64>,
}

impl LedgerCheck {
    /// Whether history fully explains the stored balance.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.balance == self.replayed && self.mismatched_entries.is_empty()
    }
}

fn in_window(
    query: Select<Transaction>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
) -> Select<Transaction> {
    let query = match from {
        Some(from) => query.filter(transaction::Column::CreatedAt.gte(from)),
        None => query,
    };
    match to {
        Some(to) => query.filter(transaction::Column::CreatedAt.lt(to)),
        None => query,
    }
}

fn approved_spends(from: DateTime<Utc>, to: DateTime<Utc>) -> Select<Transaction> {
    in_window(
        Transaction::find()
            .filter(transaction::Column::Kind.eq(TransactionKind::Spend.as_str()))
            .filter(transaction::Column::ApprovalStatus.eq(ApprovalStatus::Approved.as_str())),
        Some(from),
        Some(to),
    )
}

fn pending_requests() -> Select<Transaction> {
    Transaction::find()
        .filter(transaction::Column::Kind.eq(TransactionKind::Refund.as_str()))
        .filter(transaction::Column::PaymentMethod.eq(PaymentMethod::Refund.as_str()))
        .filter(transaction::Column::ApprovalStatus.eq(ApprovalStatus::Pending.as_str()))
}

fn summarize(rows: &[transaction::Model]) -> SalesSummary {
    SalesSummary {
        total: rows.iter().map(transaction::Model::amount).sum(),
        count: rows.len(),
    }
}

impl Ledger {
    /// Balance of the tag `identifier` resolves to.
    ///
    /// # Arguments
    /// * `identifier` - UID, short code, number or unique number prefix
    pub async fn tag_balance(&self, identifier: &str) -> Result<TagBalance> {
        let txn = self.database().begin().await?;
        let tag = resolve_tag(&txn, identifier).await?;
        let pending = pending_requests()
            .filter(transaction::Column::TagId.eq(tag.id))
            .all(&txn)
            .await?;
        txn.commit().await?;

        Ok(TagBalance {
            balance: Money::from_cents(tag.balance),
            pending_refunds: pending.iter().map(transaction::Model::amount).sum(),
            tag,
        })
    }

    /// Paginated ledger history.
    ///
    /// # Arguments
    /// * `filter` - Tag, kind and date filters
    /// * `page` - Zero-based page index
    /// * `per_page` - Page size, at least 1
    pub async fn transaction_history(
        &self,
        filter: HistoryFilter,
        page: u64,
        per_page: u64,
    ) -> Result<HistoryPage> {
        if per_page == 0 {
            return Err(Error::Validation {
                message: "page size must be at least 1".to_string(),
            });
        }

        let mut query = in_window(Transaction::find(), filter.from, filter.to);
        if let Some(tag_id) = filter.tag_id {
            query = query.filter(transaction::Column::TagId.eq(tag_id));
        }
        if let Some(kind) = filter.kind {
            query = query.filter(transaction::Column::Kind.eq(kind.as_str()));
        }

        let txn = self.database().begin().await?;
        let paginator = query
            .order_by_desc(transaction::Column::CreatedAt)
            .order_by_desc(transaction::Column::Id)
            .paginate(&txn, per_page);
        let totals = paginator.num_items_and_pages().await?;
        let transactions = paginator.fetch_page(page).await?;
        txn.commit().await?;

        Ok(HistoryPage {
            transactions,
            page,
            per_page,
            total_items: totals.number_of_items,
            total_pages: totals.number_of_pages,
        })
    }

    /// Approved spends of a vendor in `[from, to)`.
    pub async fn vendor_sales(
        &self,
        vendor_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<SalesSummary> {
        let rows = approved_spends(from, to)
            .filter(transaction::Column::VendorId.eq(vendor_id))
            .all(self.database())
            .await?;
        Ok(summarize(&rows))
    }

    /// Approved spends at a terminal in `[from, to)`.
    pub async fn terminal_sales(
        &self,
        terminal_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<SalesSummary> {
        let rows = approved_spends(from, to)
            .filter(transaction::Column::TerminalId.eq(terminal_id))
            .all(self.database())
            .await?;
        Ok(summarize(&rows))
    }

    /// Products ranked by revenue in `[from, to)`, highest first.
    ///
    /// # Arguments
    /// * `vendor_id` - Restrict to one vendor, or `None` for the whole event
    /// * `limit` - Maximum number of products returned
    pub async fn top_products(
        &self,
        vendor_id: Option<i64>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ProductRevenue>> {
        let mut query =
            approved_spends(from, to).filter(transaction::Column::ProductId.is_not_null());
        if let Some(vendor_id) = vendor_id {
            query = query.filter(transaction::Column::VendorId.eq(vendor_id));
        }

        let txn = self.database().begin().await?;
        let rows = query.all(&txn).await?;

        let mut totals: HashMap<i64, (i64, Money)> = HashMap::new();
        for row in &rows {
            let Some(product_id) = row.product_id else {
                continue;
            };
            let entry = totals.entry(product_id).or_insert((0, Money::ZERO));
            entry.0 += i64::from(row.quantity);
            entry.1 += row.amount();
        }

        let names: HashMap<i64, String> = Product::find()
            .filter(product::Column::Id.is_in(totals.keys().copied()))
            .all(&txn)
            .await?
            .into_iter()
            .map(|product| (product.id, product.name))
            .collect();
        txn.commit().await?;

        let mut ranked: Vec<ProductRevenue> = totals
            .into_iter()
            .map(|(product_id, (quantity, revenue))| ProductRevenue {
                product_id,
                name: names.get(&product_id).cloned().unwrap_or_default(),
                quantity,
                revenue,
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.revenue
                .cmp(&a.revenue)
                .then_with(|| a.product_id.cmp(&b.product_id))
        });
        ranked.truncate(limit);
        Ok(ranked)
    }

    /// Event-wide totals: tags, money held on them and refunds awaiting review.
    pub async fn ledger_overview(&self) -> Result<LedgerOverview> {
        let txn = self.database().begin().await?;
        let tags = Tag::find().all(&txn).await?;
        let pending = pending_requests().all(&txn).await?;
        txn.commit().await?;

        Ok(LedgerOverview {
            tag_count: tags.len(),
            active_tags: tags
                .iter()
                .filter(|tag| tag.status == TagStatus::Active.as_str())
                .count(),
            outstanding_balance: tags.iter().map(|tag| Money::from_cents(tag.balance)).sum(),
            pending_refund_count: pending.len(),
            pending_refund_total: pending.iter().map(transaction::Model::amount).sum(),
        })
    }

    /// Replays a tag's history and compares it with the stored balance.
    ///
    /// Every balance is the sum of its entries' deltas: loads and staff
    /// refunds add, spends and approved refund requests subtract.
    pub async fn verify_tag_ledger(&self, tag_id: i64) -> Result<LedgerCheck> {
        let txn = self.database().begin().await?;
        let tag = Tag::find_by_id(tag_id)
            .one(&txn)
            .await?
            .ok_or_else(|| Error::TagNotFound {
                identifier: tag_id.to_string(),
            })?;
        let entries = Transaction::find()
            .filter(transaction::Column::TagId.eq(tag_id))
            .order_by_asc(transaction::Column::Id)
            .all(&txn)
            .await?;
        txn.commit().await?;

        let mut replayed = Money::ZERO;
        let mut mismatched_entries = Vec::new();
        for entry in &entries {
            let delta = entry.balance_delta()?;
            replayed += delta;
            if entry.balance_after() - entry.balance_before() != delta {
                mismatched_entries.push(entry.id);
            }
        }

        Ok(LedgerCheck {
            tag_id,
            balance: Money::from_cents(tag.balance),
            replayed,
            entries: entries.len(),
            mismatched_entries,
        })
    }
}

/// Formats a signed amount like "+50.00" or "-25.50".
#[must_use]
pub fn format_transaction_amount(amount: Money) -> String {
    if amount.is_negative() {
        format!("-{}", amount.abs())
    } else {
        format!("+{amount}")
    }
}

/// Generates a summary line for a transaction.
///
/// The amount carries the sign of the entry's effect on its tag; entries
/// that moved nothing show it unsigned.
#[must_use]
pub fn format_transaction_summary(transaction: &transaction::Model) -> String {
    let amount_str = match transaction.balance_delta() {
        Ok(delta) if !delta.is_zero() => format_transaction_amount(delta),
        _ => transaction.amount().to_string(),
    };
    let kind = &transaction.kind;
    let status = &transaction.approval_status;
    let desc = transaction.description.as_deref().unwrap_or("-");

    format!("{amount_str} | {kind} | {status} | {desc}")
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::core::ledger::{LoadOptions, Sale};
    use crate::test_utils::*;
    use chrono::Duration;

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        let now = Utc::now();
        (now - Duration::hours(1), now + Duration::hours(1))
    }

    #[test]
    fn test_format_transaction_amount() {
        assert_eq!(format_transaction_amount(money("50.00")), "+50.00");
        assert_eq!(format_transaction_amount(money("-25.50")), "-25.50");
        assert_eq!(format_transaction_amount(Money::ZERO), "+0.00");
    }

    #[tokio::test]
    async fn test_tag_balance_by_identifier() -> Result<()> {
        let (ledger, tag) = setup_with_tag(money("20.00")).await?;
        ledger.request_refund(tag.id, money("4.00"), None).await?;

        let balance = ledger.tag_balance(&tag.uid).await?;
        assert_eq!(balance.tag.id, tag.id);
        assert_eq!(balance.balance, money("20.00"));
        assert_eq!(balance.pending_refunds, money("4.00"));

        assert!(matches!(
            ledger.tag_balance("missing").await,
            Err(Error::TagNotFound { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_history_pagination_and_filters() -> Result<()> {
        let (ledger, tag) = setup_with_tag(money("50.00")).await?;
        for _ in 0..4 {
            ledger
                .spend(Sale::new(tag.id, money("1.00"), STAFF_ID, VENDOR_ID))
                .await?;
        }

        let all = ledger
            .transaction_history(
                HistoryFilter {
                    tag_id: Some(tag.id),
                    ..Default::default()
                },
                0,
                2,
            )
            .await?;
        assert_eq!(all.total_items, 5);
        assert_eq!(all.total_pages, 3);
        assert_eq!(all.transactions.len(), 2);
        assert!(all.transactions[0].id > all.transactions[1].id);

        let last_page = ledger
            .transaction_history(
                HistoryFilter {
                    tag_id: Some(tag.id),
                    ..Default::default()
                },
                2,
                2,
            )
            .await?;
        assert_eq!(last_page.transactions.len(), 1);
        assert_eq!(last_page.transactions[0].kind()?, TransactionKind::Load);

        let spends = ledger
            .transaction_history(
                HistoryFilter {
                    kind: Some(TransactionKind::Spend),
                    ..Default::default()
                },
                0,
                10,
            )
            .await?;
        assert_eq!(spends.total_items, 4);

        let (from, _) = window();
        let future = ledger
            .transaction_history(
                HistoryFilter {
                    from: Some(from + Duration::hours(2)),
                    ..Default::default()
                },
                0,
                10,
            )
            .await?;
        assert_eq!(future.total_items, 0);

        assert!(matches!(
            ledger.transaction_history(HistoryFilter::default(), 0, 0).await,
            Err(Error::Validation { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_sales_summaries() -> Result<()> {
        let (ledger, tag) = setup_with_tag(money("100.00")).await?;
        ledger
            .spend(Sale::new(tag.id, money("12.00"), STAFF_ID, VENDOR_ID).at_terminal(1))
            .await?;
        ledger
            .spend(Sale::new(tag.id, money("8.50"), STAFF_ID, VENDOR_ID).at_terminal(2))
            .await?;
        ledger
            .spend(Sale::new(tag.id, money("5.00"), STAFF_ID, VENDOR_ID + 1).at_terminal(2))
            .await?;

        let (from, to) = window();
        let vendor = ledger.vendor_sales(VENDOR_ID, from, to).await?;
        assert_eq!(vendor.total, money("20.50"));
        assert_eq!(vendor.count, 2);

        let terminal = ledger.terminal_sales(2, from, to).await?;
        assert_eq!(terminal.total, money("13.50"));
        assert_eq!(terminal.count, 2);

        let empty = ledger.vendor_sales(VENDOR_ID, to, to + Duration::hours(1)).await?;
        assert_eq!(empty, SalesSummary::default());
        Ok(())
    }

    #[tokio::test]
    async fn test_top_products_by_revenue() -> Result<()> {
        let (ledger, tag) = setup_with_tag(money("100.00")).await?;
        let beer = create_test_product(ledger.database(), "Beer", None).await?;
        let fries = create_test_product(ledger.database(), "Fries", None).await?;
        let water = create_test_product(ledger.database(), "Water", None).await?;

        for (product, amount, quantity) in [
            (&beer, "10.00", 2),
            (&fries, "4.00", 1),
            (&beer, "5.00", 1),
            (&water, "6.00", 3),
        ] {
            ledger
                .spend(
                    Sale::new(tag.id, money(amount), STAFF_ID, VENDOR_ID)
                        .of_product(product.id, quantity),
                )
                .await?;
        }

        let (from, to) = window();
        let top = ledger.top_products(Some(VENDOR_ID), from, to, 2).await?;
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].name, "Beer");
        assert_eq!(top[0].revenue, money("15.00"));
        assert_eq!(top[0].quantity, 3);
        assert_eq!(top[1].name, "Water");

        assert!(ledger.top_products(Some(404), from, to, 5).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_overview_and_replay() -> Result<()> {
        let (ledger, tag) = setup_with_tag(money("30.00")).await?;
        let other = create_test_tag(&ledger, "UID-OTHER", money("5.00")).await?;
        ledger.set_tag_status(other.id, TagStatus::Inactive).await?;

        ledger
            .load(tag.id, money("10.00"), STAFF_ID, LoadOptions::default())
            .await?;
        let approved = ledger.request_refund(tag.id, money("7.00"), None).await?;
        ledger
            .approve_refund(approved.transaction.id, STAFF_ID, None)
            .await?;
        ledger.request_refund(tag.id, money("2.00"), None).await?;

        let overview = ledger.ledger_overview().await?;
        assert_eq!(overview.tag_count, 2);
        assert_eq!(overview.active_tags, 1);
        assert_eq!(overview.outstanding_balance, money("38.00"));
        assert_eq!(overview.pending_refund_count, 1);
        assert_eq!(overview.pending_refund_total, money("2.00"));

        let check = ledger.verify_tag_ledger(tag.id).await?;
        assert!(check.is_consistent());
        assert_eq!(check.balance, money("33.00"));
        assert_eq!(check.entries, 4);
        Ok(())
    }

    #[tokio::test]
    async fn test_summary_line() -> Result<()> {
        let (ledger, tag) = setup_with_tag(money("10.00")).await?;
        let receipt = ledger
            .spend(Sale::new(tag.id, money("3.00"), STAFF_ID, VENDOR_ID).described("Lemonade"))
            .await?;
        assert_eq!(
            format_transaction_summary(&receipt.transaction),
            "-3.00 | spend | approved | Lemonade"
        );

        let request = ledger.request_refund(tag.id, money("1.00"), None).await?;
        assert_eq!(
            format_transaction_summary(&request.transaction),
            "1.00 | refund | pending | Refund request"
        );
        Ok(())
    }
}
