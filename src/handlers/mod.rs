pub mod carts;
pub mod common;
pub mod orders;
pub mod payment_webhooks;
pub mod products;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::{
    cart::CartService, catalog::CatalogService, order_status::OrderStateMachine,
    orders::OrderTransactionManager, payments::PaymentReconciler, pricing::PriceSnapshotResolver,
};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderTransactionManager>,
    pub order_status: Arc<OrderStateMachine>,
    pub payments: Arc<PaymentReconciler>,
    pub cart: Arc<CartService>,
    pub catalog: Arc<CatalogService>,
}

impl AppServices {
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender, config: &AppConfig) -> Self {
        let resolver = PriceSnapshotResolver::new(config.price_rounding_scale);
        let transaction_timeout = config.transaction_timeout();

        let orders = Arc::new(OrderTransactionManager::new(
            db_pool.clone(),
            resolver,
            event_sender.clone(),
            transaction_timeout,
        ));
        let order_status = Arc::new(OrderStateMachine::new(
            db_pool.clone(),
            event_sender.clone(),
            transaction_timeout,
        ));
        let payments = Arc::new(PaymentReconciler::new(
            db_pool.clone(),
            event_sender,
            transaction_timeout,
        ));
        let cart = Arc::new(CartService::new(db_pool.clone(), resolver));
        let catalog = Arc::new(CatalogService::new(db_pool));

        Self {
            orders,
            order_status,
            payments,
            cart,
            catalog,
        }
    }
}
