use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::{finish_transaction, within_deadline},
    entities::{
        cart_item,
        order::{self, FulfillmentStatus, PaymentStatus},
        order_line, product,
    },
    errors::ServiceError,
    events::{Event, EventSender, OrderSummary},
    services::{
        inventory::InventoryGuard,
        pricing::{PriceSnapshotResolver, PricedLine},
    },
};

/// Where and to whom an order ships
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct ShippingInfo {
    #[validate(length(min = 1, max = 200, message = "Recipient name is required"))]
    pub name: String,
    #[validate(length(min = 3, max = 40, message = "Phone number is required"))]
    pub phone: String,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(length(min = 1, max = 500, message = "Shipping address is required"))]
    pub address: String,
    #[validate(length(max = 1000))]
    pub note: Option<String>,
}

/// What `create_order` hands back to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct OrderReceipt {
    pub order_id: Uuid,
    #[schema(value_type = String, example = "250")]
    pub total_amount: Decimal,
}

/// Turns a cart into an order in a single all-or-nothing transaction.
#[derive(Clone)]
pub struct OrderTransactionManager {
    db: Arc<DatabaseConnection>,
    resolver: PriceSnapshotResolver,
    inventory: InventoryGuard,
    event_sender: EventSender,
    transaction_timeout: Duration,
}

impl OrderTransactionManager {
    pub fn new(
        db: Arc<DatabaseConnection>,
        resolver: PriceSnapshotResolver,
        event_sender: EventSender,
        transaction_timeout: Duration,
    ) -> Self {
        Self {
            db,
            resolver,
            inventory: InventoryGuard,
            event_sender,
            transaction_timeout,
        }
    }

    /// Creates an order from the user's cart.
    ///
    /// On success the order and its lines exist, stock has been decremented
    /// by exactly the ordered quantities and the cart lines read are gone.
    /// On any error none of that happened.
    #[instrument(skip(self, shipping), fields(user_id = %user_id))]
    pub async fn create_order(
        &self,
        user_id: Uuid,
        shipping: ShippingInfo,
    ) -> Result<OrderReceipt, ServiceError> {
        shipping.validate()?;

        let result = within_deadline(
            "create_order",
            self.transaction_timeout,
            || self.create_order_in_txn(user_id, &shipping),
        )
        .await;

        let (order, lines) = match result {
            Ok(created) => created,
            Err(e) => {
                counter!("storefront_orders.rejected", 1, "reason" => e.code());
                return Err(e);
            }
        };

        counter!("storefront_orders.created", 1);
        info!(
            order_id = %order.id,
            total = %order.total_amount,
            lines = lines.len(),
            "Order created"
        );

        self.event_sender
            .dispatch(Event::OrderPlaced(OrderSummary::from_models(&order, &lines)));

        Ok(OrderReceipt {
            order_id: order.id,
            total_amount: order.total_amount,
        })
    }

    async fn create_order_in_txn(
        &self,
        user_id: Uuid,
        shipping: &ShippingInfo,
    ) -> Result<(order::Model, Vec<order_line::Model>), ServiceError> {
        let txn = self.db.begin().await?;
        let result = self.place_order(&txn, user_id, shipping).await;
        finish_transaction(txn, result).await
    }

    async fn place_order(
        &self,
        txn: &DatabaseTransaction,
        user_id: Uuid,
        shipping: &ShippingInfo,
    ) -> Result<(order::Model, Vec<order_line::Model>), ServiceError> {
        let cart_lines = cart_item::Entity::find()
            .filter(cart_item::Column::UserId.eq(user_id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .lock_exclusive()
            .all(txn)
            .await?;

        if cart_lines.is_empty() {
            return Err(ServiceError::EmptyCart);
        }

        let product_ids: Vec<Uuid> = cart_lines.iter().map(|line| line.product_id).collect();
        let mut products: HashMap<Uuid, product::Model> = product::Entity::find()
            .filter(product::Column::Id.is_in(product_ids))
            .all(txn)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        let paired: Vec<(cart_item::Model, Option<product::Model>)> = cart_lines
            .iter()
            .map(|line| (line.clone(), products.remove(&line.product_id)))
            .collect();

        let now = Utc::now();
        let snapshot = self.resolver.resolve(&paired, now)?;

        let order_id = Uuid::new_v4();
        let order = order::ActiveModel {
            id: Set(order_id),
            user_id: Set(user_id),
            total_amount: Set(snapshot.total),
            fulfillment_status: Set(FulfillmentStatus::Pending),
            payment_status: Set(PaymentStatus::Pending),
            shipping_name: Set(shipping.name.trim().to_string()),
            shipping_phone: Set(shipping.phone.trim().to_string()),
            shipping_email: Set(shipping.email.clone()),
            shipping_address: Set(shipping.address.trim().to_string()),
            note: Set(shipping.note.clone()),
            created_at: Set(now),
            fulfillment_updated_at: Set(now),
            payment_updated_at: Set(now),
        }
        .insert(txn)
        .await?;

        let mut lines = Vec::with_capacity(snapshot.lines.len());
        for priced in &snapshot.lines {
            let line = order_line::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(priced.product_id),
                product_name: Set(priced.product_name.clone()),
                quantity: Set(priced.quantity),
                unit_price: Set(priced.unit_price),
            }
            .insert(txn)
            .await?;
            lines.push(line);
        }

        // One global lock order across concurrent checkouts.
        let mut reservations: Vec<&PricedLine> = snapshot.lines.iter().collect();
        reservations.sort_by_key(|priced| priced.product_id);
        for priced in reservations {
            self.inventory
                .reserve(txn, priced.product_id, priced.quantity)
                .await?;
        }

        let cart_line_ids: Vec<Uuid> = cart_lines.iter().map(|line| line.id).collect();
        cart_item::Entity::delete_many()
            .filter(cart_item::Column::Id.is_in(cart_line_ids))
            .exec(txn)
            .await?;

        Ok((order, lines))
    }

    /// An order and its frozen lines.
    #[instrument(skip(self))]
    pub async fn get_order(
        &self,
        order_id: Uuid,
    ) -> Result<(order::Model, Vec<order_line::Model>), ServiceError> {
        let db = &*self.db;
        let order = order::Entity::find_by_id(order_id)
            .one(db)
            .await?
            .ok_or(ServiceError::OrderNotFound(order_id))?;
        let lines = order_line::Entity::find()
            .filter(order_line::Column::OrderId.eq(order_id))
            .all(db)
            .await?;
        Ok((order, lines))
    }

    /// A user's orders, newest first.
    #[instrument(skip(self))]
    pub async fn list_orders_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<order::Model>, ServiceError> {
        let orders = order::Entity::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok(orders)
    }
}
