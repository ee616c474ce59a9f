use chrono::Utc;
use metrics::counter;
use sea_orm::{sea_query::Expr, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::entities::product::{Column as ProductColumn, Entity as ProductEntity};
use crate::errors::ServiceError;

/// Guards `products.stock_quantity`.
///
/// Every change is a single conditional `UPDATE` whose predicate keeps stock
/// non-negative; success is judged by rows affected, never by a prior read.
/// All methods run on whatever connection they are given, so callers compose
/// them into their own transaction.
#[derive(Debug, Clone, Copy, Default)]
pub struct InventoryGuard;

impl InventoryGuard {
    /// Takes `quantity` units out of stock, or fails with `InsufficientStock`
    /// and leaves stock unchanged.
    #[instrument(skip(self, conn))]
    pub async fn reserve<C>(
        &self,
        conn: &C,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<(), ServiceError>
    where
        C: ConnectionTrait,
    {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(format!(
                "Reservation quantity must be positive, got {}",
                quantity
            )));
        }

        let result = ProductEntity::update_many()
            .col_expr(
                ProductColumn::StockQuantity,
                Expr::col(ProductColumn::StockQuantity).sub(quantity),
            )
            .col_expr(ProductColumn::UpdatedAt, Expr::value(Utc::now()))
            .filter(ProductColumn::Id.eq(product_id))
            .filter(ProductColumn::StockQuantity.gte(quantity))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            counter!("storefront_inventory.reserve_conflicts", 1);
            let available = match self.current_stock(conn, product_id).await {
                Ok(stock) => stock,
                Err(ServiceError::NotFound(_)) => {
                    return Err(ServiceError::ProductUnavailable(product_id))
                }
                Err(e) => return Err(e),
            };
            warn!(%product_id, quantity, available, "Stock reservation rejected");
            return Err(ServiceError::InsufficientStock {
                product_id,
                requested: quantity,
                available,
            });
        }

        debug!(%product_id, quantity, "Stock reserved");
        Ok(())
    }

    /// Returns `quantity` units to stock, e.g. when an order is cancelled.
    #[instrument(skip(self, conn))]
    pub async fn restock<C>(
        &self,
        conn: &C,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<(), ServiceError>
    where
        C: ConnectionTrait,
    {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(format!(
                "Restock quantity must be positive, got {}",
                quantity
            )));
        }

        let result = ProductEntity::update_many()
            .col_expr(
                ProductColumn::StockQuantity,
                Expr::col(ProductColumn::StockQuantity).add(quantity),
            )
            .col_expr(ProductColumn::UpdatedAt, Expr::value(Utc::now()))
            .filter(ProductColumn::Id.eq(product_id))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            // The order line outlived its product; nothing to put back.
            warn!(%product_id, quantity, "Restock skipped for missing product");
        }
        Ok(())
    }

    /// Administrative stock edit by `delta` (positive or negative).
    /// Returns the new stock level.
    #[instrument(skip(self, conn))]
    pub async fn adjust<C>(
        &self,
        conn: &C,
        product_id: Uuid,
        delta: i32,
    ) -> Result<i32, ServiceError>
    where
        C: ConnectionTrait,
    {
        if delta == 0 {
            return self.current_stock(conn, product_id).await;
        }
        if delta < 0 {
            match self.reserve(conn, product_id, delta.saturating_neg()).await {
                Err(ServiceError::ProductUnavailable(_)) => {
                    return Err(ServiceError::NotFound(format!(
                        "Product {} not found",
                        product_id
                    )))
                }
                other => other?,
            }
        } else {
            let result = ProductEntity::update_many()
                .col_expr(
                    ProductColumn::StockQuantity,
                    Expr::col(ProductColumn::StockQuantity).add(delta),
                )
                .col_expr(ProductColumn::UpdatedAt, Expr::value(Utc::now()))
                .filter(ProductColumn::Id.eq(product_id))
                .exec(conn)
                .await?;
            if result.rows_affected == 0 {
                return Err(ServiceError::NotFound(format!(
                    "Product {} not found",
                    product_id
                )));
            }
        }
        self.current_stock(conn, product_id).await
    }

    async fn current_stock<C>(&self, conn: &C, product_id: Uuid) -> Result<i32, ServiceError>
    where
        C: ConnectionTrait,
    {
        ProductEntity::find_by_id(product_id)
            .one(conn)
            .await?
            .map(|p| p.stock_quantity)
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))
    }
}
