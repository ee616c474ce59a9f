use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::entities::{order, order::FulfillmentStatus, order_line};

pub mod dispatcher;

pub use dispatcher::{process_events, EffectsDispatcher};

/// Frozen view of an order handed to notification collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSummary {
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub total_amount: Decimal,
    pub shipping_name: String,
    pub shipping_phone: String,
    pub shipping_email: Option<String>,
    pub shipping_address: String,
    pub lines: Vec<OrderSummaryLine>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSummaryLine {
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
}

impl OrderSummary {
    pub fn from_models(order: &order::Model, lines: &[order_line::Model]) -> Self {
        Self {
            order_id: order.id,
            user_id: order.user_id,
            total_amount: order.total_amount,
            shipping_name: order.shipping_name.clone(),
            shipping_phone: order.shipping_phone.clone(),
            shipping_email: order.shipping_email.clone(),
            shipping_address: order.shipping_address.clone(),
            lines: lines
                .iter()
                .map(|line| OrderSummaryLine {
                    product_id: line.product_id,
                    product_name: line.product_name.clone(),
                    quantity: line.quantity,
                    unit_price: line.unit_price,
                })
                .collect(),
            created_at: order.created_at,
        }
    }
}

/// Work to perform after a transaction has committed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderPlaced(OrderSummary),
    PaymentCaptured {
        summary: OrderSummary,
        external_payment_id: String,
    },
    PaymentFailed {
        order_id: Uuid,
        external_payment_id: String,
    },
    FulfillmentStatusChanged {
        order_id: Uuid,
        from: FulfillmentStatus,
        to: FulfillmentStatus,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::OrderPlaced(_) => "order_placed",
            Event::PaymentCaptured { .. } => "payment_captured",
            Event::PaymentFailed { .. } => "payment_failed",
            Event::FulfillmentStatusChanged { .. } => "fulfillment_status_changed",
        }
    }

    pub fn order_id(&self) -> Uuid {
        match self {
            Event::OrderPlaced(summary) | Event::PaymentCaptured { summary, .. } => {
                summary.order_id
            }
            Event::PaymentFailed { order_id, .. }
            | Event::FulfillmentStatusChanged { order_id, .. } => *order_id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Creates a bounded channel and the sender half wrapped for services
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    /// Hands an event to the effects worker without waiting.
    ///
    /// Called after commit, so a full or closed channel is logged and
    /// dropped rather than reported to the caller.
    pub fn dispatch(&self, event: Event) {
        let name = event.name();
        let order_id = event.order_id();
        match self.sender.try_send(event) {
            Ok(()) => debug!(event = name, %order_id, "Post-commit event enqueued"),
            Err(mpsc::error::TrySendError::Full(_)) => {
                counter!("storefront_events.dropped", 1, "reason" => "full");
                warn!(event = name, %order_id, "Effects channel full; event dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                counter!("storefront_events.dropped", 1, "reason" => "closed");
                warn!(event = name, %order_id, "Effects channel closed; event dropped");
            }
        }
    }
}
