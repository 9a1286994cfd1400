//! Stock guard - Atomic check-and-decrement of product inventory.
//!
//! The decrement is a single conditional `UPDATE ... WHERE stock_quantity >=
//! quantity`, so concurrent sales of the same product can never drive stock
//! below zero. During a spend it runs inside the spend's database
//! transaction, before the balance deduction.

use crate::{
    core::{Ledger, retry::atomic},
    entities::{Product, product},
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::{QuerySelect, prelude::*, sea_query::Expr};
use tracing::{debug, instrument};

/// Result of a decrement attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockOutcome {
    /// Stock is not tracked for the product; nothing was changed
    Unlimited,
    /// Stock was decremented
    Decremented { remaining: i32 },
    /// Not enough stock; nothing was changed
    Insufficient { available: i32 },
}

impl StockOutcome {
    /// Whether the sale may proceed.
    #[must_use]
    pub const fn succeeded(self) -> bool {
        !matches!(self, Self::Insufficient { .. })
    }
}

/// Decrements `quantity` units of `product` if enough are left.
///
/// `product` is the caller's view of the row; the decision is taken by the
/// conditional update, not by that snapshot.
pub async fn try_decrement<C>(
    conn: &C,
    product: &product::Model,
    quantity: i32,
) -> Result<StockOutcome>
where
    C: ConnectionTrait,
{
    if quantity < 1 {
        return Err(Error::Validation {
            message: format!("quantity must be at least 1, got {quantity}"),
        });
    }
    if product.stock_quantity.is_none() {
        return Ok(StockOutcome::Unlimited);
    }

    let result = Product::update_many()
        .col_expr(
            product::Column::StockQuantity,
            Expr::col(product::Column::StockQuantity).sub(quantity),
        )
        .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(product::Column::Id.eq(product.id))
        .filter(product::Column::StockQuantity.gte(quantity))
        .exec(conn)
        .await?;

    let current = Product::find_by_id(product.id)
        .one(conn)
        .await?
        .ok_or(Error::ProductNotFound {
            product_id: product.id,
        })?;

    match (result.rows_affected, current.stock_quantity) {
        (0, Some(available)) => Ok(StockOutcome::Insufficient { available }),
        (0, None) => Ok(StockOutcome::Unlimited),
        (_, remaining) => {
            let remaining = remaining.unwrap_or_default();
            debug!(product_id = product.id, quantity, remaining, "Stock decremented");
            Ok(StockOutcome::Decremented { remaining })
        }
    }
}

impl Ledger {
    /// Stand-alone stock decrement, committed on its own.
    ///
    /// # Errors
    /// `ProductNotFound`, `Validation` for a quantity below 1.
    #[instrument(skip(self))]
    pub async fn try_decrement_stock(
        &self,
        product_id: i64,
        quantity: i32,
    ) -> Result<StockOutcome> {
        atomic!(self, "stock_decrement", |txn| {
            async {
                let product = Product::find_by_id(product_id)
                    .lock_exclusive()
                    .one(&txn)
                    .await?
                    .ok_or(Error::ProductNotFound { product_id })?;
                try_decrement(&txn, &product, quantity).await
            }
            .await
        })
    }
}
