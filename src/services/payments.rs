use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use sea_orm::{
    sea_query::OnConflict, ColumnTrait, DatabaseConnection, DatabaseTransaction, DbErr,
    EntityTrait, QueryFilter, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use strum::Display;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::{finish_transaction, within_deadline},
    entities::{
        order::{self, FulfillmentStatus, PaymentStatus},
        order_line,
        payment_event::{self, EventDisposition, PaymentOutcome},
    },
    errors::ServiceError,
    events::{Event, EventSender, OrderSummary},
    services::order_status::{load_order, transition_fulfillment, transition_payment},
};

/// A payment gateway callback, already authenticated
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct PaymentNotification {
    pub order_id: Uuid,
    #[validate(length(min = 1, max = 255, message = "external_payment_id is required"))]
    pub external_payment_id: String,
    pub outcome: PaymentOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, ToSchema)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AckDisposition {
    Applied,
    Duplicate,
    Ignored,
}

/// What the gateway is told after a notification is handled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PaymentAck {
    pub order_id: Uuid,
    pub external_payment_id: String,
    pub disposition: AckDisposition,
    pub payment_status: PaymentStatus,
}

/// What a notification does to an order in a given payment state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentAction {
    /// `pending -> paid`, preceded by `failed -> pending` for a new attempt
    Capture { reopen: bool },
    /// `pending -> failed`
    Fail,
    Ignore,
}

/// Decision table for a first-seen notification.
pub fn decide(outcome: PaymentOutcome, current: PaymentStatus) -> PaymentAction {
    match (outcome, current) {
        (PaymentOutcome::Succeeded, PaymentStatus::Pending) => {
            PaymentAction::Capture { reopen: false }
        }
        (PaymentOutcome::Succeeded, PaymentStatus::Failed) => {
            PaymentAction::Capture { reopen: true }
        }
        (PaymentOutcome::Failed, PaymentStatus::Pending) => PaymentAction::Fail,
        (_, PaymentStatus::Paid) | (PaymentOutcome::Failed, PaymentStatus::Failed) => {
            PaymentAction::Ignore
        }
    }
}

/// How a first-seen notification is recorded and what the gateway is told.
pub fn dispositions(
    action: PaymentAction,
    outcome: PaymentOutcome,
) -> (EventDisposition, AckDisposition) {
    match (action, outcome) {
        (PaymentAction::Capture { .. } | PaymentAction::Fail, _) => {
            (EventDisposition::Applied, AckDisposition::Applied)
        }
        // A second success under a new payment id is still a duplicate capture.
        (PaymentAction::Ignore, PaymentOutcome::Succeeded) => {
            (EventDisposition::Ignored, AckDisposition::Duplicate)
        }
        (PaymentAction::Ignore, PaymentOutcome::Failed) => {
            (EventDisposition::Ignored, AckDisposition::Ignored)
        }
    }
}

enum Followup {
    Captured {
        summary: OrderSummary,
        advanced: bool,
    },
    Failed,
}

/// Applies gateway notifications to orders exactly once per
/// `(order_id, external_payment_id)`.
#[derive(Clone)]
pub struct PaymentReconciler {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    transaction_timeout: Duration,
}

impl PaymentReconciler {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        transaction_timeout: Duration,
    ) -> Self {
        Self {
            db,
            event_sender,
            transaction_timeout,
        }
    }

    #[instrument(skip(self, notification), fields(
        order_id = %notification.order_id,
        external_payment_id = %notification.external_payment_id,
        outcome = %notification.outcome,
    ))]
    pub async fn apply_payment_event(
        &self,
        notification: PaymentNotification,
    ) -> Result<PaymentAck, ServiceError> {
        notification.validate()?;

        let result = within_deadline(
            "apply_payment_event",
            self.transaction_timeout,
            || self.apply_in_txn(&notification),
        )
        .await;

        let (ack, followup) = match result {
            Ok(applied) => applied,
            Err(e) => {
                counter!("storefront_payments.events", 1, "result" => e.code());
                return Err(e);
            }
        };

        counter!("storefront_payments.events", 1, "result" => ack.disposition.to_string());
        info!(
            disposition = %ack.disposition,
            payment_status = %ack.payment_status,
            "Payment notification handled"
        );

        match followup {
            Some(Followup::Captured { summary, advanced }) => {
                let order_id = summary.order_id;
                self.event_sender.dispatch(Event::PaymentCaptured {
                    summary,
                    external_payment_id: notification.external_payment_id,
                });
                if advanced {
                    self.event_sender.dispatch(Event::FulfillmentStatusChanged {
                        order_id,
                        from: FulfillmentStatus::Pending,
                        to: FulfillmentStatus::Processing,
                    });
                }
            }
            Some(Followup::Failed) => {
                self.event_sender.dispatch(Event::PaymentFailed {
                    order_id: notification.order_id,
                    external_payment_id: notification.external_payment_id,
                });
            }
            None => {}
        }

        Ok(ack)
    }

    async fn apply_in_txn(
        &self,
        notification: &PaymentNotification,
    ) -> Result<(PaymentAck, Option<Followup>), ServiceError> {
        let txn = self.db.begin().await?;
        let result = self.record_and_apply(&txn, notification).await;
        finish_transaction(txn, result).await
    }

    async fn record_and_apply(
        &self,
        txn: &DatabaseTransaction,
        notification: &PaymentNotification,
    ) -> Result<(PaymentAck, Option<Followup>), ServiceError> {
        let order_id = notification.order_id;
        let order = order::Entity::find_by_id(order_id)
            .lock_exclusive()
            .one(txn)
            .await?
            .ok_or(ServiceError::OrderNotFound(order_id))?;

        let action = decide(notification.outcome, order.payment_status);
        let (recorded_as, acknowledged_as) = dispositions(action, notification.outcome);

        let recorded = payment_event::Entity::insert(payment_event::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            external_payment_id: Set(notification.external_payment_id.clone()),
            outcome: Set(notification.outcome),
            disposition: Set(recorded_as),
            received_at: Set(Utc::now()),
        })
        .on_conflict(
            OnConflict::columns([
                payment_event::Column::OrderId,
                payment_event::Column::ExternalPaymentId,
            ])
            .do_nothing()
            .to_owned(),
        )
        .exec_without_returning(txn)
        .await;

        let inserted = match recorded {
            Ok(rows) => rows > 0,
            Err(DbErr::RecordNotInserted) => false,
            Err(e) => return Err(e.into()),
        };

        if !inserted {
            info!(%order_id, "Duplicate payment notification acknowledged");
            return Ok((
                self.ack(notification, AckDisposition::Duplicate, order.payment_status),
                None,
            ));
        }

        let followup = match action {
            PaymentAction::Capture { reopen } => {
                if reopen {
                    transition_payment(
                        txn,
                        order_id,
                        PaymentStatus::Failed,
                        PaymentStatus::Pending,
                    )
                    .await?;
                }
                transition_payment(txn, order_id, PaymentStatus::Pending, PaymentStatus::Paid)
                    .await?;

                let advanced = match transition_fulfillment(
                    txn,
                    order_id,
                    FulfillmentStatus::Pending,
                    FulfillmentStatus::Processing,
                )
                .await
                {
                    Ok(()) => true,
                    Err(ServiceError::IllegalTransition { .. }) => false,
                    Err(e) => return Err(e),
                };

                let updated = load_order(txn, order_id).await?;
                let lines = order_line::Entity::find()
                    .filter(order_line::Column::OrderId.eq(order_id))
                    .all(txn)
                    .await?;
                Some(Followup::Captured {
                    summary: OrderSummary::from_models(&updated, &lines),
                    advanced,
                })
            }
            PaymentAction::Fail => {
                transition_payment(txn, order_id, PaymentStatus::Pending, PaymentStatus::Failed)
                    .await?;
                Some(Followup::Failed)
            }
            PaymentAction::Ignore => {
                warn!(
                    %order_id,
                    outcome = %notification.outcome,
                    current = %order.payment_status,
                    "Payment notification recorded but not applied"
                );
                None
            }
        };

        let resulting = match action {
            PaymentAction::Capture { .. } => PaymentStatus::Paid,
            PaymentAction::Fail => PaymentStatus::Failed,
            PaymentAction::Ignore => order.payment_status,
        };

        Ok((self.ack(notification, acknowledged_as, resulting), followup))
    }

    fn ack(
        &self,
        notification: &PaymentNotification,
        disposition: AckDisposition,
        payment_status: PaymentStatus,
    ) -> PaymentAck {
        PaymentAck {
            order_id: notification.order_id,
            external_payment_id: notification.external_payment_id.clone(),
            disposition,
            payment_status,
        }
    }
}
