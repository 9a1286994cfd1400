//! Tag entity - A physical token carrying a spendable balance.
//!
//! A tag is resolved from user input by any of its identifiers (`uid`,
//! `short_code`, `number`). Its balance is only ever changed by the ledger
//! writer, together with a transaction record.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Lifecycle status of a tag. Only active tags accept mutations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagStatus {
    Active,
    Inactive,
    Blocked,
}

impl TagStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Blocked => "blocked",
        }
    }
}

impl fmt::Display for TagStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TagStatus {
    type Err = crate::errors::Error;

    fn from_str(s: &str) -> crate::errors::Result<Self> {
        match s {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "blocked" => Ok(Self::Blocked),
            other => Err(crate::errors::Error::Validation {
                message: format!("unknown tag status: {other}"),
            }),
        }
    }
}

/// Tag database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "tags")]
pub struct Model {
    /// Unique identifier for the tag
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Chip UID read by terminals
    #[sea_orm(unique)]
    pub uid: String,
    /// Short code printed for manual entry
    #[sea_orm(unique)]
    pub short_code: Option<String>,
    /// Number embedded in the tag's printed serial
    #[sea_orm(unique)]
    pub number: Option<String>,
    /// Current balance in cents, never negative
    pub balance: i64,
    /// `"active"`, `"inactive"` or `"blocked"`
    pub status: String,
    /// Whether the tag has been handed to an attendee
    pub is_issued: bool,
    /// When the tag was handed out
    pub issued_at: Option<DateTimeUtc>,
    /// Attendee the tag is linked to
    pub attendee_id: Option<i64>,
    /// When the tag was created
    pub created_at: DateTimeUtc,
    /// When the tag row was last modified
    pub updated_at: DateTimeUtc,
}

/// Defines relationships between Tag and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One tag has many transactions
    #[sea_orm(has_many = "super::transaction::Entity")]
    Transactions,
}

impl Related<super::transaction::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Transactions.def()
    }
}

impl Model {
    /// Parsed status; an unknown stored code is a corrupt record.
    pub fn status(&self) -> crate::errors::Result<TagStatus> {
        self.status.parse().map_err(|_| crate::errors::Error::CorruptRecord {
            message: format!("tag {} has unknown status {:?}", self.id, self.status),
        })
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == TagStatus::Active.as_str()
    }
}

impl ActiveModelBehavior for ActiveModel {}
