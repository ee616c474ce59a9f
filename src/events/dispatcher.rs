use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::Event;
use crate::notifications::Notifier;
use crate::services::order_status::OrderStateMachine;

/// Runs side effects for committed events.
///
/// Nothing here can undo or fail a committed transaction; every failure is
/// logged and counted, then dropped.
pub struct EffectsDispatcher {
    notifier: Arc<dyn Notifier>,
    orders: Arc<OrderStateMachine>,
    auto_advance_delay: Duration,
}

impl EffectsDispatcher {
    pub fn new(
        notifier: Arc<dyn Notifier>,
        orders: Arc<OrderStateMachine>,
        auto_advance_delay: Duration,
    ) -> Self {
        Self {
            notifier,
            orders,
            auto_advance_delay,
        }
    }

    pub async fn handle(&self, event: Event) {
        let name = event.name();
        let order_id = event.order_id();

        let outcome = match event {
            Event::OrderPlaced(summary) => {
                self.schedule_auto_advance(summary.order_id);
                self.notifier.order_confirmation(&summary).await
            }
            Event::PaymentCaptured {
                summary,
                external_payment_id,
            } => {
                self.notifier
                    .payment_receipt(&summary, &external_payment_id)
                    .await
            }
            Event::PaymentFailed {
                order_id,
                external_payment_id,
            } => {
                info!(%order_id, %external_payment_id, "Payment failed; awaiting a new attempt");
                Ok(())
            }
            Event::FulfillmentStatusChanged { order_id, to, .. } => {
                self.notifier.fulfillment_update(order_id, to).await
            }
        };

        match outcome {
            Ok(()) => counter!("storefront_effects.completed", 1, "event" => name),
            Err(e) => {
                counter!("storefront_effects.failed", 1, "event" => name);
                error!(event = name, %order_id, "Post-commit effect failed: {}", e);
            }
        }
    }

    /// Moves the order to processing after the configured delay, unless
    /// something else already moved it.
    fn schedule_auto_advance(&self, order_id: Uuid) {
        let orders = Arc::clone(&self.orders);
        let delay = self.auto_advance_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match orders.advance_if_pending(order_id).await {
                Ok(true) => {}
                Ok(false) => info!(%order_id, "Auto-advance skipped; order already moved"),
                Err(e) => warn!(%order_id, "Auto-advance failed: {}", e),
            }
        });
    }
}

/// Drains the effects channel, one task per event so a slow notifier
/// never holds up the queue.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, dispatcher: Arc<EffectsDispatcher>) {
    info!("Starting post-commit effects loop");

    while let Some(event) = rx.recv().await {
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move {
            dispatcher.handle(event).await;
        });
    }

    info!("Effects channel closed; stopping effects loop");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::order::FulfillmentStatus;
    use crate::events::{EventSender, OrderSummary};
    use crate::notifications::{MockNotifier, NotificationError};
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use sea_orm::DatabaseConnection;

    fn summary() -> OrderSummary {
        OrderSummary {
            order_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            total_amount: dec!(250),
            shipping_name: "Grace Hopper".to_string(),
            shipping_phone: "555-0100".to_string(),
            shipping_email: None,
            shipping_address: "1 Navy Way".to_string(),
            lines: Vec::new(),
            created_at: Utc::now(),
        }
    }

    fn dispatcher(notifier: MockNotifier) -> EffectsDispatcher {
        let (sender, _rx) = EventSender::channel(8);
        let orders = OrderStateMachine::new(
            Arc::new(DatabaseConnection::default()),
            sender,
            Duration::from_secs(5),
        );
        EffectsDispatcher::new(
            Arc::new(notifier),
            Arc::new(orders),
            Duration::from_secs(3600),
        )
    }

    #[tokio::test]
    async fn order_placed_sends_confirmation() {
        let placed = summary();
        let expected_id = placed.order_id;

        let mut notifier = MockNotifier::new();
        notifier
            .expect_order_confirmation()
            .withf(move |s| s.order_id == expected_id)
            .times(1)
            .returning(|_| Ok(()));

        dispatcher(notifier).handle(Event::OrderPlaced(placed)).await;
    }

    #[tokio::test]
    async fn payment_captured_sends_receipt_with_external_id() {
        let mut notifier = MockNotifier::new();
        notifier
            .expect_payment_receipt()
            .withf(|_, external_id| external_id.to_string() == "pi_123")
            .times(1)
            .returning(|_, _| Ok(()));

        dispatcher(notifier)
            .handle(Event::PaymentCaptured {
                summary: summary(),
                external_payment_id: "pi_123".to_string(),
            })
            .await;
    }

    #[tokio::test]
    async fn notifier_failure_is_swallowed() {
        let mut notifier = MockNotifier::new();
        notifier
            .expect_fulfillment_update()
            .times(1)
            .returning(|_, _| Err(NotificationError::Delivery("smtp down".to_string())));

        dispatcher(notifier)
            .handle(Event::FulfillmentStatusChanged {
                order_id: Uuid::new_v4(),
                from: FulfillmentStatus::Processing,
                to: FulfillmentStatus::Shipped,
            })
            .await;
    }

    #[tokio::test]
    async fn payment_failed_notifies_nobody() {
        let notifier = MockNotifier::new();
        dispatcher(notifier)
            .handle(Event::PaymentFailed {
                order_id: Uuid::new_v4(),
                external_payment_id: "pi_9".to_string(),
            })
            .await;
    }
}
