use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::{entities::product, errors::ServiceError, services::inventory::InventoryGuard};

/// Highest list price the catalog accepts.
pub const MAX_PRICE: Decimal = dec!(1000000000);

fn validate_price(price: &Decimal) -> Result<(), ValidationError> {
    if price.is_sign_negative() {
        return Err(ValidationError::new("price_must_not_be_negative"));
    }
    if *price > MAX_PRICE {
        return Err(ValidationError::new("price_above_maximum"));
    }
    Ok(())
}

fn check_window(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Result<(), ServiceError> {
    match (start, end) {
        (Some(start), Some(end)) if end < start => Err(ServiceError::ValidationError(
            "discount_end must not be before discount_start".to_string(),
        )),
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateProductInput {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(custom = "validate_price")]
    #[schema(value_type = String, example = "100")]
    pub price: Decimal,
    #[serde(default)]
    #[validate(range(min = 0, max = 100))]
    pub discount_percent: i32,
    pub discount_start: Option<DateTime<Utc>>,
    pub discount_end: Option<DateTime<Utc>>,
    #[serde(default)]
    #[validate(range(min = 0))]
    pub stock_quantity: i32,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

/// Replaces the pricing fields of a product. Stock is not part of pricing.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct UpdatePricingInput {
    #[validate(custom = "validate_price")]
    #[schema(value_type = String, example = "90")]
    pub price: Decimal,
    #[validate(range(min = 0, max = 100))]
    pub discount_percent: i32,
    pub discount_start: Option<DateTime<Utc>>,
    pub discount_end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StockAdjustmentInput {
    /// Signed change; negative values cannot take stock below zero
    pub delta: i32,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct StockLevel {
    pub product_id: Uuid,
    pub stock_quantity: i32,
}

/// Catalog collaborator: the products checkout prices and reserves against.
#[derive(Clone)]
pub struct CatalogService {
    db: Arc<DatabaseConnection>,
    inventory: InventoryGuard,
}

impl CatalogService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            db,
            inventory: InventoryGuard,
        }
    }

    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create_product(
        &self,
        input: CreateProductInput,
    ) -> Result<product::Model, ServiceError> {
        input.validate()?;
        check_window(input.discount_start, input.discount_end)?;

        let now = Utc::now();
        let created = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(input.name.trim().to_string()),
            price: Set(input.price),
            discount_percent: Set(input.discount_percent),
            discount_start: Set(input.discount_start),
            discount_end: Set(input.discount_end),
            stock_quantity: Set(input.stock_quantity),
            is_active: Set(input.is_active),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await?;

        info!(product_id = %created.id, "Product created");
        Ok(created)
    }

    pub async fn get_product(&self, product_id: Uuid) -> Result<product::Model, ServiceError> {
        product::Entity::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))
    }

    /// Changes price and discount. Orders already placed keep their frozen
    /// unit prices.
    #[instrument(skip(self, input))]
    pub async fn update_pricing(
        &self,
        product_id: Uuid,
        input: UpdatePricingInput,
    ) -> Result<product::Model, ServiceError> {
        input.validate()?;
        check_window(input.discount_start, input.discount_end)?;

        let existing = self.get_product(product_id).await?;
        let mut product: product::ActiveModel = existing.into();
        product.price = Set(input.price);
        product.discount_percent = Set(input.discount_percent);
        product.discount_start = Set(input.discount_start);
        product.discount_end = Set(input.discount_end);
        product.updated_at = Set(Utc::now());

        let updated = product.update(&*self.db).await?;
        info!(%product_id, price = %updated.price, discount = updated.discount_percent, "Product pricing updated");
        Ok(updated)
    }

    /// Administrative stock change, routed through the inventory guard.
    #[instrument(skip(self, input), fields(delta = input.delta))]
    pub async fn adjust_stock(
        &self,
        product_id: Uuid,
        input: StockAdjustmentInput,
    ) -> Result<StockLevel, ServiceError> {
        let stock_quantity = self
            .inventory
            .adjust(&*self.db, product_id, input.delta)
            .await?;
        info!(
            %product_id,
            delta = input.delta,
            stock_quantity,
            reason = input.reason.as_deref().unwrap_or("unspecified"),
            "Stock adjusted"
        );
        Ok(StockLevel {
            product_id,
            stock_quantity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn input() -> CreateProductInput {
        CreateProductInput {
            name: "Desk lamp".to_string(),
            price: dec!(100),
            discount_percent: 0,
            discount_start: None,
            discount_end: None,
            stock_quantity: 5,
            is_active: true,
        }
    }

    #[test]
    fn negative_price_and_out_of_range_discount_are_rejected() {
        let mut bad = input();
        bad.price = dec!(-1);
        bad.discount_percent = 101;
        let errors = bad.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("price"));
        assert!(fields.contains_key("discount_percent"));
    }

    #[test]
    fn price_above_maximum_is_rejected() {
        let mut bad = input();
        bad.price = dec!(100000000000000000000000000);
        assert!(bad.validate().unwrap_err().field_errors().contains_key("price"));

        let mut at_limit = input();
        at_limit.price = MAX_PRICE;
        assert!(at_limit.validate().is_ok());
    }

    #[test]
    fn inverted_discount_window_is_rejected() {
        let now = Utc::now();
        assert!(check_window(Some(now), Some(now - Duration::hours(1))).is_err());
        assert!(check_window(Some(now), None).is_ok());
        assert!(check_window(None, Some(now)).is_ok());
    }

    #[test]
    fn defaults_apply_when_optional_fields_are_omitted() {
        let parsed: CreateProductInput =
            serde_json::from_str(r#"{"name":"Mug","price":"12"}"#).unwrap();
        assert!(parsed.is_active);
        assert_eq!(parsed.stock_quantity, 0);
        assert_eq!(parsed.discount_percent, 0);
    }
}
