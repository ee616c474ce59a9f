#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request},
    Router,
};
use rust_decimal::Decimal;
use serde_json::Value;
use storefront_api::{
    build_router,
    config::AppConfig,
    db,
    entities::{order::FulfillmentStatus, product},
    events::OrderSummary,
    notifications::{NotificationError, Notifier},
    services::{
        cart::AddToCartInput, catalog::CreateProductInput, orders::ShippingInfo,
    },
    AppState,
};
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

/// A notification the core handed off, as seen by the test notifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Confirmation(Uuid),
    Receipt(Uuid, String),
    FulfillmentUpdate(Uuid, FulfillmentStatus),
}

/// Notifier that records every hand-off instead of delivering it.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Sent>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn receipts_for(&self, order_id: Uuid) -> usize {
        self.sent()
            .iter()
            .filter(|s| matches!(s, Sent::Receipt(id, _) if *id == order_id))
            .count()
    }

    pub fn confirmations_for(&self, order_id: Uuid) -> usize {
        self.sent()
            .iter()
            .filter(|s| matches!(s, Sent::Confirmation(id) if *id == order_id))
            .count()
    }

    fn record(&self, sent: Sent) {
        self.sent.lock().unwrap().push(sent);
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn order_confirmation(&self, summary: &OrderSummary) -> Result<(), NotificationError> {
        self.record(Sent::Confirmation(summary.order_id));
        Ok(())
    }

    async fn payment_receipt(
        &self,
        summary: &OrderSummary,
        external_payment_id: &str,
    ) -> Result<(), NotificationError> {
        self.record(Sent::Receipt(
            summary.order_id,
            external_payment_id.to_string(),
        ));
        Ok(())
    }

    async fn fulfillment_update(
        &self,
        order_id: Uuid,
        status: FulfillmentStatus,
    ) -> Result<(), NotificationError> {
        self.record(Sent::FulfillmentUpdate(order_id, status));
        Ok(())
    }
}

/// Application state over a throwaway SQLite file, with the effects worker
/// running and a recording notifier attached.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub notifier: Arc<RecordingNotifier>,
    _dir: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Builds the app after letting the caller tweak configuration.
    pub async fn with_config(tweak: impl FnOnce(&mut AppConfig)) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let db_path = dir.path().join("storefront_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        // One connection keeps ordering deterministic; concurrency tests
        // raise the ceiling so transactions really overlap.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.db_acquire_timeout_secs = 30;
        cfg.transaction_timeout_secs = 30;
        // Keep the scheduled advance out of the way unless a test asks for it.
        cfg.auto_advance_delay_secs = 3600;
        tweak(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let notifier = Arc::new(RecordingNotifier::default());
        let state = AppState::bootstrap(Arc::new(pool), cfg, notifier.clone());
        let router = build_router(state.clone());

        Self {
            router,
            state,
            notifier,
            _dir: dir,
        }
    }

    pub async fn seed_product(&self, name: &str, price: Decimal, stock: i32) -> product::Model {
        self.state
            .services
            .catalog
            .create_product(CreateProductInput {
                name: name.to_string(),
                price,
                discount_percent: 0,
                discount_start: None,
                discount_end: None,
                stock_quantity: stock,
                is_active: true,
            })
            .await
            .expect("seed product for tests")
    }

    pub async fn add_to_cart(&self, user_id: Uuid, product_id: Uuid, quantity: i32) {
        self.state
            .services
            .cart
            .add_item(
                user_id,
                AddToCartInput {
                    product_id,
                    quantity,
                },
            )
            .await
            .expect("add cart item for tests");
    }

    pub async fn stock_of(&self, product_id: Uuid) -> i32 {
        self.state
            .services
            .catalog
            .get_product(product_id)
            .await
            .expect("product exists")
            .stock_quantity
    }

    /// Send a request against the router, optionally as `user`.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        user: Option<Uuid>,
    ) -> axum::response::Response {
        self.request_with_headers(method, uri, body, user, &[]).await
    }

    pub async fn request_with_headers(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        user: Option<Uuid>,
        headers: &[(&str, &str)],
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header("x-user-id", user.to_string());
        }
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }
}

pub fn shipping() -> ShippingInfo {
    ShippingInfo {
        name: "Ada Lovelace".to_string(),
        phone: "+44 20 7946 0000".to_string(),
        email: Some("ada@example.com".to_string()),
        address: "12 St James's Square, London".to_string(),
        note: None,
    }
}

pub async fn response_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&bytes).expect("response body is json")
}

/// Polls `check` until it holds or `timeout` elapses.
pub async fn eventually<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
