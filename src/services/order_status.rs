use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sea_orm::{
    ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction,
    EntityTrait, QueryFilter, TransactionTrait,
};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    db::{finish_transaction, within_deadline},
    entities::{
        order::{
            self, ActiveModel as OrderActiveModel, Column as OrderColumn, Entity as OrderEntity,
            FulfillmentStatus, Model as OrderModel, PaymentStatus,
        },
        order_line,
    },
    errors::{ServiceError, StatusAxis},
    events::{Event, EventSender},
    services::inventory::InventoryGuard,
};

/// Legal fulfillment edges. Self-transitions are not legal.
pub fn is_valid_fulfillment_transition(from: FulfillmentStatus, to: FulfillmentStatus) -> bool {
    use FulfillmentStatus::*;
    matches!(
        (from, to),
        (Pending, Processing)
            | (Processing, Shipped)
            | (Shipped, Delivered)
            | (Pending, Cancelled)
            | (Processing, Cancelled)
    )
}

/// Legal payment edges. `paid` is terminal; `failed` may re-enter `pending`
/// for a new attempt.
pub fn is_valid_payment_transition(from: PaymentStatus, to: PaymentStatus) -> bool {
    use PaymentStatus::*;
    matches!(
        (from, to),
        (Pending, Paid) | (Pending, Failed) | (Failed, Pending)
    )
}

/// Moves `fulfillment_status` from `from` to `to` with one conditional update.
///
/// Zero rows affected means another writer moved the order first (or it does
/// not exist); that is reported, never overwritten.
pub async fn transition_fulfillment<C>(
    conn: &C,
    order_id: Uuid,
    from: FulfillmentStatus,
    to: FulfillmentStatus,
) -> Result<(), ServiceError>
where
    C: ConnectionTrait,
{
    if !is_valid_fulfillment_transition(from, to) {
        return Err(illegal(order_id, StatusAxis::Fulfillment, from, to));
    }

    let result = OrderEntity::update_many()
        .set(OrderActiveModel {
            fulfillment_status: Set(to),
            fulfillment_updated_at: Set(Utc::now()),
            ..Default::default()
        })
        .filter(OrderColumn::Id.eq(order_id))
        .filter(OrderColumn::FulfillmentStatus.eq(from))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        let current = load_order(conn, order_id).await?;
        warn!(
            %order_id,
            expected = %from,
            actual = %current.fulfillment_status,
            "Stale fulfillment transition"
        );
        return Err(illegal(
            order_id,
            StatusAxis::Fulfillment,
            current.fulfillment_status,
            to,
        ));
    }
    Ok(())
}

/// Moves `payment_status` from `from` to `to` with one conditional update.
pub async fn transition_payment<C>(
    conn: &C,
    order_id: Uuid,
    from: PaymentStatus,
    to: PaymentStatus,
) -> Result<(), ServiceError>
where
    C: ConnectionTrait,
{
    if !is_valid_payment_transition(from, to) {
        return Err(illegal(order_id, StatusAxis::Payment, from, to));
    }

    let result = OrderEntity::update_many()
        .set(OrderActiveModel {
            payment_status: Set(to),
            payment_updated_at: Set(Utc::now()),
            ..Default::default()
        })
        .filter(OrderColumn::Id.eq(order_id))
        .filter(OrderColumn::PaymentStatus.eq(from))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        let current = load_order(conn, order_id).await?;
        warn!(
            %order_id,
            expected = %from,
            actual = %current.payment_status,
            "Stale payment transition"
        );
        return Err(illegal(
            order_id,
            StatusAxis::Payment,
            current.payment_status,
            to,
        ));
    }
    Ok(())
}

pub(crate) async fn load_order<C>(conn: &C, order_id: Uuid) -> Result<OrderModel, ServiceError>
where
    C: ConnectionTrait,
{
    OrderEntity::find_by_id(order_id)
        .one(conn)
        .await?
        .ok_or(ServiceError::OrderNotFound(order_id))
}

fn illegal(
    order_id: Uuid,
    axis: StatusAxis,
    from: impl ToString,
    to: impl ToString,
) -> ServiceError {
    ServiceError::IllegalTransition {
        order_id,
        axis,
        from: from.to_string(),
        to: to.to_string(),
    }
}

/// Administrative and scheduled fulfillment changes.
#[derive(Clone)]
pub struct OrderStateMachine {
    db: Arc<DatabaseConnection>,
    inventory: InventoryGuard,
    event_sender: EventSender,
    transaction_timeout: Duration,
}

impl OrderStateMachine {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        transaction_timeout: Duration,
    ) -> Self {
        Self {
            db,
            inventory: InventoryGuard,
            event_sender,
            transaction_timeout,
        }
    }

    /// Sets the fulfillment status of an order if the edge from its current
    /// status is legal. Cancelling puts the ordered quantities back in stock
    /// in the same transaction.
    #[instrument(skip(self), fields(order_id = %order_id, new_status = %new_status))]
    pub async fn set_fulfillment_status(
        &self,
        order_id: Uuid,
        new_status: FulfillmentStatus,
    ) -> Result<OrderModel, ServiceError> {
        let (previous, updated) = within_deadline(
            "set_fulfillment_status",
            self.transaction_timeout,
            || self.set_fulfillment_status_in_txn(order_id, new_status),
        )
        .await?;

        info!(
            "Order {} fulfillment status updated from '{}' to '{}'",
            order_id, previous, new_status
        );
        self.event_sender.dispatch(Event::FulfillmentStatusChanged {
            order_id,
            from: previous,
            to: new_status,
        });
        Ok(updated)
    }

    async fn set_fulfillment_status_in_txn(
        &self,
        order_id: Uuid,
        new_status: FulfillmentStatus,
    ) -> Result<(FulfillmentStatus, OrderModel), ServiceError> {
        let txn = self.db.begin().await.map_err(|e| {
            error!("Failed to begin transaction: {}", e);
            ServiceError::from(e)
        })?;

        let result = self.change_fulfillment(&txn, order_id, new_status).await;
        finish_transaction(txn, result).await
    }

    async fn change_fulfillment(
        &self,
        txn: &DatabaseTransaction,
        order_id: Uuid,
        new_status: FulfillmentStatus,
    ) -> Result<(FulfillmentStatus, OrderModel), ServiceError> {
        let current = load_order(txn, order_id).await?;
        let previous = current.fulfillment_status;

        transition_fulfillment(txn, order_id, previous, new_status).await?;

        if new_status == FulfillmentStatus::Cancelled {
            let lines = order_line::Entity::find()
                .filter(order_line::Column::OrderId.eq(order_id))
                .all(txn)
                .await?;
            for line in &lines {
                self.inventory
                    .restock(txn, line.product_id, line.quantity)
                    .await?;
            }
            info!(%order_id, lines = lines.len(), "Cancelled order restocked");
        }

        let updated = load_order(txn, order_id).await?;
        Ok((previous, updated))
    }

    /// Moves a still-pending order to processing. Returns whether this call
    /// performed the move; an order already past pending is left alone.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn advance_if_pending(&self, order_id: Uuid) -> Result<bool, ServiceError> {
        match transition_fulfillment(
            &*self.db,
            order_id,
            FulfillmentStatus::Pending,
            FulfillmentStatus::Processing,
        )
        .await
        {
            Ok(()) => {
                info!(%order_id, "Order advanced from pending to processing");
                self.event_sender.dispatch(Event::FulfillmentStatusChanged {
                    order_id,
                    from: FulfillmentStatus::Pending,
                    to: FulfillmentStatus::Processing,
                });
                Ok(true)
            }
            Err(ServiceError::IllegalTransition { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Current fulfillment and payment state of an order.
    pub async fn get_status(
        &self,
        order_id: Uuid,
    ) -> Result<(FulfillmentStatus, PaymentStatus), ServiceError> {
        let order: order::Model = load_order(&*self.db, order_id).await?;
        Ok((order.fulfillment_status, order.payment_status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(FulfillmentStatus::Pending, FulfillmentStatus::Processing, true)]
    #[case(FulfillmentStatus::Processing, FulfillmentStatus::Shipped, true)]
    #[case(FulfillmentStatus::Shipped, FulfillmentStatus::Delivered, true)]
    #[case(FulfillmentStatus::Pending, FulfillmentStatus::Cancelled, true)]
    #[case(FulfillmentStatus::Processing, FulfillmentStatus::Cancelled, true)]
    #[case(FulfillmentStatus::Shipped, FulfillmentStatus::Pending, false)]
    #[case(FulfillmentStatus::Shipped, FulfillmentStatus::Cancelled, false)]
    #[case(FulfillmentStatus::Delivered, FulfillmentStatus::Cancelled, false)]
    #[case(FulfillmentStatus::Pending, FulfillmentStatus::Shipped, false)]
    #[case(FulfillmentStatus::Cancelled, FulfillmentStatus::Pending, false)]
    #[case(FulfillmentStatus::Processing, FulfillmentStatus::Processing, false)]
    fn fulfillment_edges(
        #[case] from: FulfillmentStatus,
        #[case] to: FulfillmentStatus,
        #[case] legal: bool,
    ) {
        assert_eq!(is_valid_fulfillment_transition(from, to), legal);
    }

    #[rstest]
    #[case(PaymentStatus::Pending, PaymentStatus::Paid, true)]
    #[case(PaymentStatus::Pending, PaymentStatus::Failed, true)]
    #[case(PaymentStatus::Failed, PaymentStatus::Pending, true)]
    #[case(PaymentStatus::Paid, PaymentStatus::Failed, false)]
    #[case(PaymentStatus::Paid, PaymentStatus::Pending, false)]
    #[case(PaymentStatus::Failed, PaymentStatus::Paid, false)]
    #[case(PaymentStatus::Paid, PaymentStatus::Paid, false)]
    fn payment_edges(
        #[case] from: PaymentStatus,
        #[case] to: PaymentStatus,
        #[case] legal: bool,
    ) {
        assert_eq!(is_valid_payment_transition(from, to), legal);
    }

    #[test]
    fn illegal_transition_error_names_both_states() {
        let order_id = Uuid::new_v4();
        let err = illegal(
            order_id,
            StatusAxis::Fulfillment,
            FulfillmentStatus::Shipped,
            FulfillmentStatus::Pending,
        );
        assert_eq!(
            err.to_string(),
            format!(
                "Illegal fulfillment status transition for order {}: shipped -> pending",
                order_id
            )
        );
    }
}
