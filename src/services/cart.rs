use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::{cart_item, product},
    errors::ServiceError,
    services::pricing::{add_amount, line_amount, PriceSnapshotResolver},
};

/// Maximum quantity of a single product held in one cart line
pub const MAX_LINE_QUANTITY: i32 = 1000;

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct AddToCartInput {
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 1000))]
    pub quantity: i32,
}

/// A cart line with the price it would get if checked out now
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CartLineView {
    pub product_id: Uuid,
    pub product_name: Option<String>,
    pub quantity: i32,
    #[schema(value_type = Option<String>)]
    pub current_unit_price: Option<Decimal>,
    pub available: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CartView {
    pub user_id: Uuid,
    pub lines: Vec<CartLineView>,
    /// Total over available lines at current prices. Not a quote.
    #[schema(value_type = String)]
    pub estimated_total: Decimal,
}

/// Per-user cart lines consumed by checkout.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    resolver: PriceSnapshotResolver,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>, resolver: PriceSnapshotResolver) -> Self {
        Self { db, resolver }
    }

    #[instrument(skip(self))]
    pub async fn get_cart(&self, user_id: Uuid) -> Result<CartView, ServiceError> {
        let db = &*self.db;
        let lines = cart_item::Entity::find()
            .filter(cart_item::Column::UserId.eq(user_id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .all(db)
            .await?;

        let product_ids: Vec<Uuid> = lines.iter().map(|line| line.product_id).collect();
        let products: HashMap<Uuid, product::Model> = if product_ids.is_empty() {
            HashMap::new()
        } else {
            product::Entity::find()
                .filter(product::Column::Id.is_in(product_ids))
                .all(db)
                .await?
                .into_iter()
                .map(|p| (p.id, p))
                .collect()
        };

        let now = Utc::now();
        let mut estimated_total = Decimal::ZERO;
        let mut views = Vec::with_capacity(lines.len());
        for line in lines {
            let view = match products.get(&line.product_id) {
                Some(p) if p.is_active => {
                    let unit_price = self.resolver.unit_price(p, now);
                    estimated_total =
                        add_amount(estimated_total, line_amount(unit_price, line.quantity)?)?;
                    CartLineView {
                        product_id: line.product_id,
                        product_name: Some(p.name.clone()),
                        quantity: line.quantity,
                        current_unit_price: Some(unit_price),
                        available: true,
                    }
                }
                other => CartLineView {
                    product_id: line.product_id,
                    product_name: other.map(|p| p.name.clone()),
                    quantity: line.quantity,
                    current_unit_price: None,
                    available: false,
                },
            };
            views.push(view);
        }

        Ok(CartView {
            user_id,
            lines: views,
            estimated_total,
        })
    }

    /// Adds `quantity` of a product to the user's cart, merging with an
    /// existing line for the same product.
    #[instrument(skip(self, input), fields(product_id = %input.product_id, quantity = input.quantity))]
    pub async fn add_item(
        &self,
        user_id: Uuid,
        input: AddToCartInput,
    ) -> Result<cart_item::Model, ServiceError> {
        input.validate()?;
        let txn = self.db.begin().await?;

        let product = product::Entity::find_by_id(input.product_id)
            .one(&txn)
            .await?
            .filter(|p| p.is_active)
            .ok_or(ServiceError::ProductUnavailable(input.product_id))?;

        let existing = cart_item::Entity::find()
            .filter(cart_item::Column::UserId.eq(user_id))
            .filter(cart_item::Column::ProductId.eq(product.id))
            .one(&txn)
            .await?;

        let item = match existing {
            Some(item) => {
                let quantity = item.quantity + input.quantity;
                if quantity > MAX_LINE_QUANTITY {
                    return Err(ServiceError::ValidationError(format!(
                        "Cart line quantity cannot exceed {}",
                        MAX_LINE_QUANTITY
                    )));
                }
                let mut item: cart_item::ActiveModel = item.into();
                item.quantity = Set(quantity);
                item.update(&txn).await?
            }
            None => {
                cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    user_id: Set(user_id),
                    product_id: Set(product.id),
                    quantity: Set(input.quantity),
                    created_at: Set(Utc::now()),
                }
                .insert(&txn)
                .await?
            }
        };

        txn.commit().await?;
        info!(%user_id, quantity = item.quantity, "Cart line updated");
        Ok(item)
    }

    #[instrument(skip(self))]
    pub async fn remove_item(&self, user_id: Uuid, product_id: Uuid) -> Result<(), ServiceError> {
        let result = cart_item::Entity::delete_many()
            .filter(cart_item::Column::UserId.eq(user_id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!(
                "Product {} is not in the cart",
                product_id
            )));
        }
        Ok(())
    }
}
