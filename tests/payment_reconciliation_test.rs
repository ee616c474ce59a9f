mod common;

use std::time::Duration;

use assert_matches::assert_matches;
use common::{shipping, TestApp};
use rust_decimal_macros::dec;
use storefront_api::{
    entities::{
        order::{FulfillmentStatus, PaymentStatus},
        payment_event::PaymentOutcome,
    },
    errors::ServiceError,
    services::payments::{AckDisposition, PaymentNotification},
};
use uuid::Uuid;

async fn place_order(app: &TestApp) -> Uuid {
    let user = Uuid::new_v4();
    let product = app.seed_product("Book", dec!(40), 10).await;
    app.add_to_cart(user, product.id, 1).await;
    app.state
        .services
        .orders
        .create_order(user, shipping())
        .await
        .expect("checkout succeeds")
        .order_id
}

fn notification(order_id: Uuid, external_id: &str, outcome: PaymentOutcome) -> PaymentNotification {
    PaymentNotification {
        order_id,
        external_payment_id: external_id.to_string(),
        outcome,
    }
}

#[tokio::test]
async fn duplicate_success_is_applied_once_with_one_receipt() {
    let app = TestApp::new().await;
    let order_id = place_order(&app).await;
    let payments = app.state.services.payments.clone();

    let first = payments
        .apply_payment_event(notification(order_id, "pi_1", PaymentOutcome::Succeeded))
        .await
        .unwrap();
    assert_eq!(first.disposition, AckDisposition::Applied);
    assert_eq!(first.payment_status, PaymentStatus::Paid);

    let second = payments
        .apply_payment_event(notification(order_id, "pi_1", PaymentOutcome::Succeeded))
        .await
        .unwrap();
    assert_eq!(second.disposition, AckDisposition::Duplicate);
    assert_eq!(second.payment_status, PaymentStatus::Paid);

    let (fulfillment, payment) = app
        .state
        .services
        .order_status
        .get_status(order_id)
        .await
        .unwrap();
    assert_eq!(payment, PaymentStatus::Paid);
    assert_eq!(fulfillment, FulfillmentStatus::Processing);

    let notifier = app.notifier.clone();
    assert!(
        common::eventually(Duration::from_secs(5), || notifier.receipts_for(order_id) == 1).await
    );
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(app.notifier.receipts_for(order_id), 1);
}

#[tokio::test]
async fn failure_for_another_payment_after_paid_is_ignored() {
    let app = TestApp::new().await;
    let order_id = place_order(&app).await;
    let payments = app.state.services.payments.clone();

    payments
        .apply_payment_event(notification(order_id, "p1", PaymentOutcome::Succeeded))
        .await
        .unwrap();

    let ack = payments
        .apply_payment_event(notification(order_id, "p2", PaymentOutcome::Failed))
        .await
        .unwrap();
    assert_eq!(ack.disposition, AckDisposition::Ignored);
    assert_eq!(ack.payment_status, PaymentStatus::Paid);

    let (_, payment) = app
        .state
        .services
        .order_status
        .get_status(order_id)
        .await
        .unwrap();
    assert_eq!(payment, PaymentStatus::Paid);
}

#[tokio::test]
async fn second_success_under_new_id_is_a_duplicate_capture() {
    let app = TestApp::new().await;
    let order_id = place_order(&app).await;
    let payments = app.state.services.payments.clone();

    payments
        .apply_payment_event(notification(order_id, "p1", PaymentOutcome::Succeeded))
        .await
        .unwrap();
    let ack = payments
        .apply_payment_event(notification(order_id, "p2", PaymentOutcome::Succeeded))
        .await
        .unwrap();
    assert_eq!(ack.disposition, AckDisposition::Duplicate);

    let notifier = app.notifier.clone();
    assert!(
        common::eventually(Duration::from_secs(5), || notifier.receipts_for(order_id) == 1).await
    );
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(app.notifier.receipts_for(order_id), 1);
}

#[tokio::test]
async fn unknown_order_is_terminal() {
    let app = TestApp::new().await;

    let err = app
        .state
        .services
        .payments
        .apply_payment_event(notification(Uuid::new_v4(), "p1", PaymentOutcome::Succeeded))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::OrderNotFound(_));
    assert!(!err.is_retriable());
}

#[tokio::test]
async fn failed_attempt_then_success_ends_paid() {
    let app = TestApp::new().await;
    let order_id = place_order(&app).await;
    let payments = app.state.services.payments.clone();

    let failed = payments
        .apply_payment_event(notification(order_id, "p1", PaymentOutcome::Failed))
        .await
        .unwrap();
    assert_eq!(failed.disposition, AckDisposition::Applied);
    assert_eq!(failed.payment_status, PaymentStatus::Failed);

    let (fulfillment, _) = app
        .state
        .services
        .order_status
        .get_status(order_id)
        .await
        .unwrap();
    assert_eq!(fulfillment, FulfillmentStatus::Pending, "failure leaves fulfillment alone");

    let repeat_failure = payments
        .apply_payment_event(notification(order_id, "p1b", PaymentOutcome::Failed))
        .await
        .unwrap();
    assert_eq!(repeat_failure.disposition, AckDisposition::Ignored);

    let succeeded = payments
        .apply_payment_event(notification(order_id, "p2", PaymentOutcome::Succeeded))
        .await
        .unwrap();
    assert_eq!(succeeded.disposition, AckDisposition::Applied);
    assert_eq!(succeeded.payment_status, PaymentStatus::Paid);
}

#[tokio::test]
async fn payment_does_not_revive_a_cancelled_order() {
    let app = TestApp::new().await;
    let order_id = place_order(&app).await;

    app.state
        .services
        .order_status
        .set_fulfillment_status(order_id, FulfillmentStatus::Cancelled)
        .await
        .unwrap();

    let ack = app
        .state
        .services
        .payments
        .apply_payment_event(notification(order_id, "p1", PaymentOutcome::Succeeded))
        .await
        .unwrap();
    assert_eq!(ack.payment_status, PaymentStatus::Paid);

    let (fulfillment, _) = app
        .state
        .services
        .order_status
        .get_status(order_id)
        .await
        .unwrap();
    assert_eq!(fulfillment, FulfillmentStatus::Cancelled);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_duplicates_apply_exactly_once() {
    let app = TestApp::with_config(|c| c.db_max_connections = 4).await;
    let order_id = place_order(&app).await;

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let payments = app.state.services.payments.clone();
            tokio::spawn(async move {
                payments
                    .apply_payment_event(notification(order_id, "pi_race", PaymentOutcome::Succeeded))
                    .await
            })
        })
        .collect();

    let mut applied = 0;
    for handle in handles {
        let ack = handle.await.unwrap().expect("duplicates are acknowledged");
        assert_eq!(ack.payment_status, PaymentStatus::Paid);
        if ack.disposition == AckDisposition::Applied {
            applied += 1;
        } else {
            assert_eq!(ack.disposition, AckDisposition::Duplicate);
        }
    }
    assert_eq!(applied, 1);

    let notifier = app.notifier.clone();
    assert!(
        common::eventually(Duration::from_secs(5), || notifier.receipts_for(order_id) == 1).await
    );
}
