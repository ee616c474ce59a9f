use async_trait::async_trait;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::entities::order::FulfillmentStatus;
use crate::events::OrderSummary;

/// Notification delivery errors
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Delivery failed: {0}")]
    Delivery(String),
    #[error("Recipient missing for order {0}")]
    MissingRecipient(Uuid),
}

/// Outbound customer notifications triggered after commit.
///
/// Implementations own rendering and transport; the core only hands over
/// the frozen order summary.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn order_confirmation(&self, summary: &OrderSummary) -> Result<(), NotificationError>;

    async fn payment_receipt(
        &self,
        summary: &OrderSummary,
        external_payment_id: &str,
    ) -> Result<(), NotificationError>;

    async fn fulfillment_update(
        &self,
        order_id: Uuid,
        status: FulfillmentStatus,
    ) -> Result<(), NotificationError>;
}

/// Default notifier: records each hand-off in the log.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn order_confirmation(&self, summary: &OrderSummary) -> Result<(), NotificationError> {
        info!(
            order_id = %summary.order_id,
            total = %summary.total_amount,
            lines = summary.lines.len(),
            recipient = summary.shipping_email.as_deref().unwrap_or(&summary.shipping_phone),
            "Order confirmation handed off"
        );
        Ok(())
    }

    async fn payment_receipt(
        &self,
        summary: &OrderSummary,
        external_payment_id: &str,
    ) -> Result<(), NotificationError> {
        info!(
            order_id = %summary.order_id,
            external_payment_id,
            total = %summary.total_amount,
            "Payment receipt handed off"
        );
        Ok(())
    }

    async fn fulfillment_update(
        &self,
        order_id: Uuid,
        status: FulfillmentStatus,
    ) -> Result<(), NotificationError> {
        info!(%order_id, %status, "Fulfillment update handed off");
        Ok(())
    }
}
