//! Ledger writer - The only code path that changes a tag balance.
//!
//! Every balance mutation is paired with exactly one appended transaction row
//! inside the same database transaction. Balance writes are conditional
//! updates (`... WHERE balance >= amount AND status = 'active'`) and their
//! affected-row count is checked, so two concurrent debits can never both
//! succeed against funds that only cover one of them.
//!
//! Lock order when several rows are touched: transaction row, then product
//! row, then tag row.

use crate::{
    core::{
        Ledger, reference, retry::atomic,
        stock::{self, StockOutcome},
    },
    entities::{
        ApprovalStatus, PaymentMethod, Product, Tag, TagStatus, TransactionKind, product, tag,
        transaction,
    },
    errors::{Error, Result},
    money::Money,
};
use chrono::{DateTime, Utc};
use sea_orm::{QuerySelect, Set, prelude::*, sea_query::Expr};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument};

/// Optional details recorded on a load.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub payment_method: Option<PaymentMethod>,
    pub description: Option<String>,
    pub reference: Option<String>,
}

/// A purchase at a vendor terminal.
#[derive(Debug, Clone)]
pub struct Sale {
    pub tag_id: i64,
    pub amount: Money,
    pub actor_id: i64,
    pub vendor_id: i64,
    pub terminal_id: Option<i64>,
    pub product_id: Option<i64>,
    pub quantity: i32,
    pub payment_method: Option<PaymentMethod>,
    pub description: Option<String>,
}

impl Sale {
    /// A sale of `amount` with quantity 1 and no product.
    #[must_use]
    pub const fn new(tag_id: i64, amount: Money, actor_id: i64, vendor_id: i64) -> Self {
        Self {
            tag_id,
            amount,
            actor_id,
            vendor_id,
            terminal_id: None,
            product_id: None,
            quantity: 1,
            payment_method: None,
            description: None,
        }
    }

    #[must_use]
    pub const fn at_terminal(mut self, terminal_id: i64) -> Self {
        self.terminal_id = Some(terminal_id);
        self
    }

    /// Sells `quantity` units of a stocked product.
    #[must_use]
    pub const fn of_product(mut self, product_id: i64, quantity: i32) -> Self {
        self.product_id = Some(product_id);
        self.quantity = quantity;
        self
    }

    #[must_use]
    pub const fn paid_with(mut self, payment_method: PaymentMethod) -> Self {
        self.payment_method = Some(payment_method);
        self
    }

    #[must_use]
    pub fn described(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A staff-issued credit back onto a tag.
#[derive(Debug, Clone)]
pub struct Credit {
    pub tag_id: i64,
    pub amount: Money,
    pub actor_id: i64,
    pub vendor_id: Option<i64>,
    pub terminal_id: Option<i64>,
    pub product_id: Option<i64>,
    pub payment_method: Option<PaymentMethod>,
    pub description: Option<String>,
}

impl Credit {
    #[must_use]
    pub const fn new(tag_id: i64, amount: Money, actor_id: i64) -> Self {
        Self {
            tag_id,
            amount,
            actor_id,
            vendor_id: None,
            terminal_id: None,
            product_id: None,
            payment_method: None,
            description: None,
        }
    }

    #[must_use]
    pub const fn from_vendor(mut self, vendor_id: i64, terminal_id: Option<i64>) -> Self {
        self.vendor_id = Some(vendor_id);
        self.terminal_id = terminal_id;
        self
    }

    #[must_use]
    pub const fn for_product(mut self, product_id: i64) -> Self {
        self.product_id = Some(product_id);
        self
    }

    #[must_use]
    pub const fn paid_with(mut self, payment_method: PaymentMethod) -> Self {
        self.payment_method = Some(payment_method);
        self
    }

    #[must_use]
    pub fn described(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// What a mutating operation hands back to the request layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Receipt {
    /// The appended ledger entry
    pub transaction: transaction::Model,
    /// Tag balance after the operation
    pub balance: Money,
    /// Units left of the product sold, `None` when unlimited or no product
    pub remaining_stock: Option<i32>,
}

/// A validated ledger entry; each kind carries exactly the fields it needs.
#[derive(Debug, Clone)]
pub(crate) enum LedgerEntry {
    Load {
        tag_id: i64,
        amount: Money,
        actor_id: i64,
        options: LoadOptions,
    },
    Spend {
        sale: Sale,
        reference: String,
    },
    Refund {
        credit: Credit,
    },
    Adjustment {
        amount: Money,
        expected: Money,
        actor_id: i64,
        payment_method: PaymentMethod,
        description: String,
        reference: String,
        metadata: Value,
        handover_key: String,
    },
}

impl LedgerEntry {
    pub(crate) const fn kind(&self) -> TransactionKind {
        match self {
            Self::Load { .. } => TransactionKind::Load,
            Self::Spend { .. } => TransactionKind::Spend,
            Self::Refund { .. } => TransactionKind::Refund,
            Self::Adjustment { .. } => TransactionKind::Adjustment,
        }
    }

    const fn amount(&self) -> Money {
        match self {
            Self::Load { amount, .. } | Self::Adjustment { amount, .. } => *amount,
            Self::Spend { sale, .. } => sale.amount,
            Self::Refund { credit } => credit.amount,
        }
    }

    const fn tag_id(&self) -> Option<i64> {
        match self {
            Self::Load { tag_id, .. } => Some(*tag_id),
            Self::Spend { sale, .. } => Some(sale.tag_id),
            Self::Refund { credit } => Some(credit.tag_id),
            Self::Adjustment { .. } => None,
        }
    }

    /// Signed change the entry applies to its tag.
    fn delta(&self) -> Money {
        match self {
            Self::Load { amount, .. } => *amount,
            Self::Spend { sale, .. } => -sale.amount,
            Self::Refund { credit } => credit.amount,
            Self::Adjustment { .. } => Money::ZERO,
        }
    }

    /// Kind-specific construction rules.
    fn validate(&self) -> Result<()> {
        self.amount().ensure_positive()?;
        match self {
            Self::Spend { sale, .. } if sale.quantity < 1 => Err(Error::Validation {
                message: format!("quantity must be at least 1, got {}", sale.quantity),
            }),
            Self::Refund { credit } if credit.payment_method == Some(PaymentMethod::Refund) => {
                Err(Error::Validation {
                    message: "staff credits cannot use the Refund payment method".to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    /// The row to insert, given the tag balances around this entry.
    fn into_active_model(
        self,
        balance_before: Money,
        balance_after: Money,
        now: DateTime<Utc>,
    ) -> transaction::ActiveModel {
        let kind = self.kind();
        let tag_id = self.tag_id();
        let amount = self.amount();

        let mut model = transaction::ActiveModel {
            tag_id: Set(tag_id),
            kind: Set(kind.as_str().to_string()),
            approval_status: Set(ApprovalStatus::Approved.as_str().to_string()),
            amount: Set(amount.cents()),
            quantity: Set(1),
            balance_before: Set(balance_before.cents()),
            balance_after: Set(balance_after.cents()),
            payment_method: Set(None),
            user_id: Set(None),
            vendor_id: Set(None),
            terminal_id: Set(None),
            product_id: Set(None),
            description: Set(None),
            reference: Set(None),
            metadata: Set(None),
            handover_key: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };

        match self {
            Self::Load {
                actor_id, options, ..
            } => {
                model.user_id = Set(Some(actor_id));
                model.payment_method = Set(options.payment_method.map(|m| m.as_str().to_string()));
                model.description = Set(options.description);
                model.reference = Set(options.reference);
            }
            Self::Spend { sale, reference } => {
                model.user_id = Set(Some(sale.actor_id));
                model.vendor_id = Set(Some(sale.vendor_id));
                model.terminal_id = Set(sale.terminal_id);
                model.product_id = Set(sale.product_id);
                model.quantity = Set(sale.quantity);
                model.payment_method = Set(sale.payment_method.map(|m| m.as_str().to_string()));
                model.description = Set(sale.description);
                model.reference = Set(Some(reference));
            }
            Self::Refund { credit } => {
                model.user_id = Set(Some(credit.actor_id));
                model.vendor_id = Set(credit.vendor_id);
                model.terminal_id = Set(credit.terminal_id);
                model.product_id = Set(credit.product_id);
                model.payment_method = Set(credit.payment_method.map(|m| m.as_str().to_string()));
                model.description = Set(credit.description);
            }
            Self::Adjustment {
                actor_id,
                payment_method,
                description,
                reference,
                metadata,
                handover_key,
                ..
            } => {
                model.user_id = Set(Some(actor_id));
                model.payment_method = Set(Some(payment_method.as_str().to_string()));
                model.description = Set(Some(description));
                model.reference = Set(Some(reference));
                model.metadata = Set(Some(metadata));
                model.handover_key = Set(Some(handover_key));
            }
        }

        model
    }
}

impl Ledger {
    /// Credits `amount` onto an active tag.
    ///
    /// # Errors
    /// `InvalidAmount` below 0.01, `TagNotFound`, `TagNotActive`.
    #[instrument(skip(self, options))]
    pub async fn load(
        &self,
        tag_id: i64,
        amount: Money,
        actor_id: i64,
        options: LoadOptions,
    ) -> Result<Receipt> {
        let entry = LedgerEntry::Load {
            tag_id,
            amount,
            actor_id,
            options,
        };
        entry.validate()?;

        let receipt = atomic!(self, "load", |txn| append_entry(&txn, entry.clone()).await)?;
        info!(tag_id, amount = %amount, balance = %receipt.balance, "Tag loaded");
        Ok(receipt)
    }

    /// Debits a sale from an active tag, decrementing product stock first
    /// when a product is given.
    ///
    /// # Errors
    /// `InvalidAmount`, `TagNotFound`, `TagNotActive`, `InsufficientBalance`,
    /// `ProductNotFound`, `ProductUnavailable`, `InsufficientStock`. On any of
    /// them neither stock, balance nor history change.
    #[instrument(skip(self, sale), fields(tag_id = sale.tag_id, amount = %sale.amount))]
    pub async fn spend(&self, sale: Sale) -> Result<Receipt> {
        let entry = LedgerEntry::Spend {
            reference: reference::purchase(Utc::now(), sale.tag_id),
            sale,
        };
        entry.validate()?;

        let receipt = atomic!(self, "spend", |txn| spend_in(&txn, entry.clone()).await)?;
        info!(
            transaction_id = receipt.transaction.id,
            balance = %receipt.balance,
            "Sale recorded"
        );
        Ok(receipt)
    }

    /// Staff-issued credit. Increases the balance unconditionally; there is
    /// no cap against what the tag previously spent.
    ///
    /// # Errors
    /// `InvalidAmount`, `Validation` for the `Refund` payment method,
    /// `TagNotFound`, `TagNotActive`.
    #[instrument(skip(self, credit), fields(tag_id = credit.tag_id, amount = %credit.amount))]
    pub async fn refund(&self, credit: Credit) -> Result<Receipt> {
        let entry = LedgerEntry::Refund { credit };
        entry.validate()?;

        let receipt = atomic!(self, "refund", |txn| append_entry(&txn, entry.clone()).await)?;
        info!(
            transaction_id = receipt.transaction.id,
            balance = %receipt.balance,
            "Staff refund credited"
        );
        Ok(receipt)
    }
}

async fn spend_in<C>(conn: &C, entry: LedgerEntry) -> Result<Receipt>
where
    C: ConnectionTrait,
{
    let (product_id, quantity) = match &entry {
        LedgerEntry::Spend { sale, .. } => (sale.product_id, sale.quantity),
        _ => (None, 1),
    };

    let remaining_stock = match product_id {
        Some(product_id) => {
            let product = lock_product(conn, product_id).await?;
            if !product.is_available_for_sale() {
                debug!(product_id, "Product not available for sale");
                return Err(Error::ProductUnavailable { product_id });
            }
            match stock::try_decrement(conn, &product, quantity).await? {
                StockOutcome::Unlimited => None,
                StockOutcome::Decremented { remaining } => Some(remaining),
                StockOutcome::Insufficient { available } => {
                    debug!(product_id, available, "Insufficient stock");
                    return Err(Error::InsufficientStock {
                        product_id,
                        available,
                        requested: quantity,
                    });
                }
            }
        }
        None => None,
    };

    let mut receipt = append_entry(conn, entry).await?;
    receipt.remaining_stock = remaining_stock;
    Ok(receipt)
}

/// Applies an entry's balance delta and appends its row.
///
/// Must run inside a database transaction; the caller commits.
pub(crate) async fn append_entry<C>(conn: &C, entry: LedgerEntry) -> Result<Receipt>
where
    C: ConnectionTrait,
{
    let now = Utc::now();

    let (balance_before, balance_after) = match entry.tag_id() {
        Some(tag_id) => {
            let tag = lock_active_tag(conn, tag_id).await?;
            let after = apply_delta(conn, &tag, entry.delta(), now).await?;
            (after - entry.delta(), after)
        }
        None => match &entry {
            LedgerEntry::Adjustment {
                amount, expected, ..
            } => (*expected, *amount),
            _ => (Money::ZERO, Money::ZERO),
        },
    };

    let transaction = entry
        .into_active_model(balance_before, balance_after, now)
        .insert(conn)
        .await?;

    Ok(Receipt {
        transaction,
        balance: balance_after,
        remaining_stock: None,
    })
}

/// Reads a tag for mutation (`FOR UPDATE` where supported) and checks that
/// it accepts mutations.
pub(crate) async fn lock_active_tag<C>(conn: &C, tag_id: i64) -> Result<tag::Model>
where
    C: ConnectionTrait,
{
    let tag = Tag::find_by_id(tag_id)
        .lock_exclusive()
        .one(conn)
        .await?
        .ok_or_else(|| Error::TagNotFound {
            identifier: tag_id.to_string(),
        })?;

    if !tag.is_active() {
        debug!(tag_id, status = %tag.status, "Tag not active");
        return Err(Error::TagNotActive {
            tag_id,
            status: tag.status,
        });
    }
    Ok(tag)
}

async fn lock_product<C>(conn: &C, product_id: i64) -> Result<product::Model>
where
    C: ConnectionTrait,
{
    Product::find_by_id(product_id)
        .lock_exclusive()
        .one(conn)
        .await?
        .ok_or(Error::ProductNotFound { product_id })
}

/// Conditionally adds `delta` to the tag balance and returns the new balance.
///
/// The update only matches while the tag is active and, for debits, while
/// the stored balance still covers the debit. A miss is re-read to report
/// the precise reason.
pub(crate) async fn apply_delta<C>(
    conn: &C,
    tag: &tag::Model,
    delta: Money,
    now: DateTime<Utc>,
) -> Result<Money>
where
    C: ConnectionTrait,
{
    if delta.is_negative() && tag.balance < -delta.cents() {
        debug!(tag_id = tag.id, balance = tag.balance, "Insufficient balance");
        return Err(Error::InsufficientBalance {
            current: Money::from_cents(tag.balance).to_string(),
            required: (-delta).to_string(),
        });
    }

    let mut update = Tag::update_many()
        .col_expr(
            tag::Column::Balance,
            Expr::col(tag::Column::Balance).add(delta.cents()),
        )
        .col_expr(tag::Column::UpdatedAt, Expr::value(now))
        .filter(tag::Column::Id.eq(tag.id))
        .filter(tag::Column::Status.eq(TagStatus::Active.as_str()));
    if delta.is_negative() {
        update = update.filter(tag::Column::Balance.gte(-delta.cents()));
    }

    let result = update.exec(conn).await?;
    let current = Tag::find_by_id(tag.id)
        .one(conn)
        .await?
        .ok_or_else(|| Error::TagNotFound {
            identifier: tag.id.to_string(),
        })?;

    if result.rows_affected == 0 {
        if !current.is_active() {
            return Err(Error::TagNotActive {
                tag_id: current.id,
                status: current.status,
            });
        }
        return Err(Error::InsufficientBalance {
            current: Money::from_cents(current.balance).to_string(),
            required: (-delta).to_string(),
        });
    }

    Ok(Money::from_cents(current.balance))
}

/// Merges audit keys into existing metadata, keeping every key already
/// present that `updates` does not overwrite.
pub(crate) fn merge_metadata(existing: Option<&Value>, updates: Map<String, Value>) -> Value {
    let mut merged = match existing {
        Some(Value::Object(map)) => map.clone(),
        Some(other) => {
            let mut map = Map::new();
            map.insert("previous".to_string(), other.clone());
            map
        }
        None => Map::new(),
    };
    merged.extend(updates);
    Value::Object(merged)
}
