//! Product entity - Items sold at vendor terminals.
//!
//! A `NULL` stock quantity means unlimited stock. Stock is only decremented
//! by the stock guard as part of a spend.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Product database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "products")]
pub struct Model {
    /// Unique identifier for the product
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Vendor selling the product
    pub vendor_id: Option<i64>,
    /// Name of the product (e.g., "Coffee", "Festival T-Shirt")
    pub name: String,
    /// Unit price in cents
    pub price: i64,
    /// Units left, `None` for unlimited
    pub stock_quantity: Option<i32>,
    /// Whether the vendor currently offers the product
    pub is_available: bool,
    /// When the product was created
    pub created_at: DateTimeUtc,
    /// When the product was last modified
    pub updated_at: DateTimeUtc,
}

impl Model {
    /// Available for sale iff offered and not sold out.
    #[must_use]
    pub fn is_available_for_sale(&self) -> bool {
        self.is_available && self.stock_quantity.is_none_or(|stock| stock > 0)
    }
}

/// Defines relationships between Product and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One product appears on many spends
    #[sea_orm(has_many = "super::transaction::Entity")]
    Transactions,
}

impl Related<super::transaction::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Transactions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
