//! Product business logic - The inventory side consumed by the stock guard.
//!
//! Catalog management itself lives outside this crate; these functions cover
//! what the ledger needs: creating sellable products, looking them up,
//! toggling availability and restocking.

use crate::{
    entities::{Product, product},
    errors::{Error, Result},
    money::Money,
};
use chrono::Utc;
use sea_orm::{QueryOrder, Set, prelude::*, sea_query::Expr};

/// Fields for a new product.
#[derive(Debug, Clone)]
pub struct NewProduct {
    pub vendor_id: Option<i64>,
    pub name: String,
    pub price: Money,
    /// `None` for unlimited stock
    pub stock_quantity: Option<i32>,
    pub is_available: bool,
}

/// Creates a new product, performing input validation.
///
/// # Errors
/// Returns an error if:
/// - The product name is empty or whitespace-only
/// - The price is negative
/// - The initial stock is negative
/// - The database insert operation fails
pub async fn create_product<C>(db: &C, new: NewProduct) -> Result<product::Model>
where
    C: ConnectionTrait,
{
    if new.name.trim().is_empty() {
        return Err(Error::Validation {
            message: "Product name cannot be empty".to_string(),
        });
    }

    if new.price.is_negative() {
        return Err(Error::InvalidAmount {
            amount: new.price.to_string(),
        });
    }

    if new.stock_quantity.is_some_and(|stock| stock < 0) {
        return Err(Error::Validation {
            message: "Stock quantity cannot be negative".to_string(),
        });
    }

    let now = Utc::now();
    let product = product::ActiveModel {
        vendor_id: Set(new.vendor_id),
        name: Set(new.name.trim().to_string()),
        price: Set(new.price.cents()),
        stock_quantity: Set(new.stock_quantity),
        is_available: Set(new.is_available),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };
    product.insert(db).await.map_err(Into::into)
}

/// Retrieves a specific product by its unique ID.
pub async fn get_product_by_id<C>(db: &C, product_id: i64) -> Result<Option<product::Model>>
where
    C: ConnectionTrait,
{
    Product::find_by_id(product_id)
        .one(db)
        .await
        .map_err(Into::into)
}

/// Lists a vendor's products that can currently be sold, ordered by name.
pub async fn get_available_products<C>(db: &C, vendor_id: i64) -> Result<Vec<product::Model>>
where
    C: ConnectionTrait,
{
    let products = Product::find()
        .filter(product::Column::VendorId.eq(vendor_id))
        .filter(product::Column::IsAvailable.eq(true))
        .order_by_asc(product::Column::Name)
        .all(db)
        .await?;

    Ok(products
        .into_iter()
        .filter(product::Model::is_available_for_sale)
        .collect())
}

/// Switches a product on or off sale.
pub async fn set_product_availability<C>(
    db: &C,
    product_id: i64,
    is_available: bool,
) -> Result<product::Model>
where
    C: ConnectionTrait,
{
    let mut product: product::ActiveModel = Product::find_by_id(product_id)
        .one(db)
        .await?
        .ok_or(Error::ProductNotFound { product_id })?
        .into();

    product.is_available = Set(is_available);
    product.updated_at = Set(Utc::now());
    product.update(db).await.map_err(Into::into)
}

/// Adds `quantity` units to a product's tracked stock.
///
/// Products with unlimited stock are left unchanged. The increment is a
/// single `UPDATE ... SET stock_quantity = stock_quantity + ?` so it composes
/// with concurrent decrements.
pub async fn restock<C>(db: &C, product_id: i64, quantity: i32) -> Result<product::Model>
where
    C: ConnectionTrait,
{
    if quantity < 1 {
        return Err(Error::Validation {
            message: format!("restock quantity must be at least 1, got {quantity}"),
        });
    }

    Product::update_many()
        .col_expr(
            product::Column::StockQuantity,
            Expr::col(product::Column::StockQuantity).add(quantity),
        )
        .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(product::Column::Id.eq(product_id))
        .filter(product::Column::StockQuantity.is_not_null())
        .exec(db)
        .await?;

    get_product_by_id(db, product_id)
        .await?
        .ok_or(Error::ProductNotFound { product_id })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::test_utils::*;
    use sea_orm::{DatabaseBackend, MockDatabase};

    #[tokio::test]
    async fn test_create_product_validation() -> Result<()> {
        let db = MockDatabase::new(DatabaseBackend::Sqlite).into_connection();
        let valid = NewProduct {
            vendor_id: Some(VENDOR_ID),
            name: "Coffee".to_string(),
            price: money("3.50"),
            stock_quantity: Some(10),
            is_available: true,
        };

        let result = create_product(
            &db,
            NewProduct {
                name: "   ".to_string(),
                ..valid.clone()
            },
        )
        .await;
        assert!(matches!(result, Err(Error::Validation { .. })));

        let result = create_product(
            &db,
            NewProduct {
                price: money("-1.00"),
                ..valid.clone()
            },
        )
        .await;
        assert!(matches!(result, Err(Error::InvalidAmount { .. })));

        let result = create_product(
            &db,
            NewProduct {
                stock_quantity: Some(-1),
                ..valid
            },
        )
        .await;
        assert!(matches!(result, Err(Error::Validation { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_availability_predicate() -> Result<()> {
        let db = setup_test_db().await?;

        let unlimited = create_test_product(&db, "Water", None).await?;
        let stocked = create_test_product(&db, "Cap", Some(2)).await?;
        let sold_out = create_test_product(&db, "Poster", Some(0)).await?;
        let withdrawn = set_product_availability(&db, stocked.id, false).await?;

        assert!(unlimited.is_available_for_sale());
        assert!(!sold_out.is_available_for_sale());
        assert!(!withdrawn.is_available_for_sale());

        let available = get_available_products(&db, VENDOR_ID).await?;
        let names: Vec<_> = available.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Water"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_restock() -> Result<()> {
        let db = setup_test_db().await?;
        let sold_out = create_test_product(&db, "Poster", Some(0)).await?;
        let unlimited = create_test_product(&db, "Water", None).await?;

        let restocked = restock(&db, sold_out.id, 5).await?;
        assert_eq!(restocked.stock_quantity, Some(5));
        assert!(restocked.is_available_for_sale());

        let unchanged = restock(&db, unlimited.id, 5).await?;
        assert_eq!(unchanged.stock_quantity, None);

        assert!(matches!(
            restock(&db, 404, 1).await,
            Err(Error::ProductNotFound { product_id: 404 })
        ));
        Ok(())
    }
}
