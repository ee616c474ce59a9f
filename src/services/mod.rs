// Checkout core
pub mod inventory;
pub mod orders;
pub mod pricing;

// Status helpers that work directly with entities
pub mod order_status;

// Gateway callbacks
pub mod payments;

// Catalog and cart collaborators
pub mod cart;
pub mod catalog;
