pub mod cart_item;
pub mod order;
pub mod order_line;
pub mod payment_event;
pub mod product;
