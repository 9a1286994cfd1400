//! Transaction entity - The immutable ledger entry.
//!
//! Each row snapshots the owning tag's balance before and after it was
//! applied. Rows are append-only; the single permitted change is the
//! `approval_status` transition of a pending refund request (together with
//! its `balance_after` and audit metadata).
//!
//! `kind`, `payment_method` and `approval_status` are stored as string codes
//! and parsed through [`TransactionKind`], [`PaymentMethod`] and
//! [`ApprovalStatus`].

use crate::money::Money;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// The four kinds of ledger entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Load,
    Spend,
    Refund,
    Adjustment,
}

impl TransactionKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::Spend => "spend",
            Self::Refund => "refund",
            Self::Adjustment => "adjustment",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = crate::errors::Error;

    fn from_str(s: &str) -> crate::errors::Result<Self> {
        match s {
            "load" => Ok(Self::Load),
            "spend" => Ok(Self::Spend),
            "refund" => Ok(Self::Refund),
            "adjustment" => Ok(Self::Adjustment),
            other => Err(crate::errors::Error::Validation {
                message: format!("unknown transaction type: {other}"),
            }),
        }
    }
}

/// How money moved at the terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentMethod {
    Cash,
    Card,
    Tag,
    Refund,
}

impl PaymentMethod {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cash => "Cash",
            Self::Card => "Card",
            Self::Tag => "Tag",
            Self::Refund => "Refund",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = crate::errors::Error;

    fn from_str(s: &str) -> crate::errors::Result<Self> {
        match s {
            "Cash" => Ok(Self::Cash),
            "Card" => Ok(Self::Card),
            "Tag" => Ok(Self::Tag),
            "Refund" => Ok(Self::Refund),
            other => Err(crate::errors::Error::Validation {
                message: format!("unknown payment method: {other}"),
            }),
        }
    }
}

/// Review state of an entry. Everything except attendee refund requests is
/// born `Approved`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApprovalStatus {
    type Err = crate::errors::Error;

    fn from_str(s: &str) -> crate::errors::Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            other => Err(crate::errors::Error::Validation {
                message: format!("unknown approval status: {other}"),
            }),
        }
    }
}

/// Transaction database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "transactions")]
pub struct Model {
    /// Unique identifier for the transaction
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Owning tag; `None` for cash handovers
    pub tag_id: Option<i64>,
    /// `"load"`, `"spend"`, `"refund"` or `"adjustment"`
    pub kind: String,
    /// `"Cash"`, `"Card"`, `"Tag"` or `"Refund"`
    pub payment_method: Option<String>,
    /// `"pending"`, `"approved"` or `"rejected"`
    pub approval_status: String,
    /// Amount in cents, at least 1
    pub amount: i64,
    /// Units sold, at least 1
    pub quantity: i32,
    /// Tag balance in cents before this entry
    pub balance_before: i64,
    /// Tag balance in cents after this entry
    pub balance_after: i64,
    /// Acting staff member, or the attendee for refund requests
    pub user_id: Option<i64>,
    pub vendor_id: Option<i64>,
    pub terminal_id: Option<i64>,
    pub product_id: Option<i64>,
    pub description: Option<String>,
    /// Human-readable trace string, `PREFIX-<timestamp>[-<entityId>]`
    pub reference: Option<String>,
    /// Open key/value audit detail
    pub metadata: Option<Json>,
    /// Serialises cash handovers per staff member and period
    #[sea_orm(unique)]
    pub handover_key: Option<String>,
    /// When the transaction was created
    pub created_at: DateTimeUtc,
    /// When the approval status last changed
    pub updated_at: DateTimeUtc,
}

impl Model {
    pub fn kind(&self) -> crate::errors::Result<TransactionKind> {
        self.kind.parse().map_err(|_| self.corrupt("type"))
    }

    pub fn payment_method(&self) -> crate::errors::Result<Option<PaymentMethod>> {
        self.payment_method
            .as_deref()
            .map(str::parse)
            .transpose()
            .map_err(|_| self.corrupt("payment method"))
    }

    pub fn approval_status(&self) -> crate::errors::Result<ApprovalStatus> {
        self.approval_status
            .parse()
            .map_err(|_| self.corrupt("approval status"))
    }

    #[must_use]
    pub const fn amount(&self) -> Money {
        Money::from_cents(self.amount)
    }

    #[must_use]
    pub const fn balance_before(&self) -> Money {
        Money::from_cents(self.balance_before)
    }

    #[must_use]
    pub const fn balance_after(&self) -> Money {
        Money::from_cents(self.balance_after)
    }

    /// Whether this row is an attendee-initiated refund request (as opposed to
    /// a staff-issued credit).
    #[must_use]
    pub fn is_refund_request(&self) -> bool {
        self.kind == TransactionKind::Refund.as_str()
            && self.payment_method.as_deref() == Some(PaymentMethod::Refund.as_str())
    }

    /// Signed effect this row has on its tag balance in its current state.
    pub fn balance_delta(&self) -> crate::errors::Result<Money> {
        Ok(balance_delta(
            self.kind()?,
            self.payment_method()?,
            self.approval_status()?,
            self.amount(),
        ))
    }

    fn corrupt(&self, field: &str) -> crate::errors::Error {
        crate::errors::Error::CorruptRecord {
            message: format!("transaction {} has an unknown {field}", self.id),
        }
    }
}

/// The balance delta rule.
///
/// - `load` and staff-issued `refund` credit the tag;
/// - `spend` debits it;
/// - an attendee refund request (`refund` paid out as `Refund`) debits it
///   only once approved;
/// - `adjustment` never touches a tag.
#[must_use]
pub fn balance_delta(
    kind: TransactionKind,
    payment_method: Option<PaymentMethod>,
    status: ApprovalStatus,
    amount: Money,
) -> Money {
    match (kind, status) {
        (_, ApprovalStatus::Pending | ApprovalStatus::Rejected)
        | (TransactionKind::Adjustment, _) => Money::ZERO,
        (TransactionKind::Load, ApprovalStatus::Approved) => amount,
        (TransactionKind::Spend, ApprovalStatus::Approved) => -amount,
        (TransactionKind::Refund, ApprovalStatus::Approved) => {
            if payment_method == Some(PaymentMethod::Refund) {
                -amount
            } else {
                amount
            }
        }
    }
}

/// Defines relationships between Transaction and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each transaction belongs to at most one tag
    #[sea_orm(
        belongs_to = "super::tag::Entity",
        from = "Column::TagId",
        to = "super::tag::Column::Id"
    )]
    Tag,
    /// A spend may reference the product sold
    #[sea_orm(
        belongs_to = "super::product::Entity",
        from = "Column::ProductId",
        to = "super::product::Column::Id"
    )]
    Product,
}

impl Related<super::tag::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Tag.def()
    }
}

impl Related<super::product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Product.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
