use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Catalog product. Stock is only ever changed through the inventory guard.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub price: Decimal,
    /// Whole percent, 0..=100
    pub discount_percent: i32,
    #[sea_orm(nullable)]
    pub discount_start: Option<DateTime<Utc>>,
    #[sea_orm(nullable)]
    pub discount_end: Option<DateTime<Utc>>,
    pub stock_quantity: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::cart_item::Entity")]
    CartItems,
}

impl Related<super::cart_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CartItems.def()
    }
}

#[async_trait::async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(self, _db: &C, _insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        if let sea_orm::ActiveValue::Set(ref price) = self.price {
            if price.is_sign_negative() {
                return Err(DbErr::Custom("Product price cannot be negative".to_string()));
            }
        }
        if let sea_orm::ActiveValue::Set(percent) = self.discount_percent {
            if !(0..=100).contains(&percent) {
                return Err(DbErr::Custom(
                    "Discount percent must be between 0 and 100".to_string(),
                ));
            }
        }
        Ok(self)
    }
}
