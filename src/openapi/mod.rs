use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        version = "0.1.0",
        description = r#"
# Storefront Order Fulfillment API

Checkout, inventory reservation, order lifecycle and payment reconciliation for a retail storefront.

## Caller identity

Cart and order endpoints act on behalf of the user named in the `x-user-id` header, which the
authentication layer in front of this service sets.

## Checkout guarantees

`POST /orders` either creates a complete order (prices frozen, stock decremented, cart cleared)
or changes nothing. Concurrent checkouts never oversell.

## Error Handling

Errors share one body shape. `retriable: true` marks failures that may succeed if repeated:

```json
{
  "error": "Unprocessable Entity",
  "code": "insufficient_stock",
  "message": "Insufficient stock for product ...: requested 2, available 1",
  "retriable": false,
  "timestamp": "2024-01-01T00:00:00Z"
}
```

## Payment webhooks

Notifications are deduplicated by `(order_id, external_payment_id)`. Unknown orders and
illegal transitions are acknowledged with `accepted: false` so the gateway stops retrying.
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "orders", description = "Checkout and order lifecycle"),
        (name = "payments", description = "Payment gateway callbacks"),
        (name = "cart", description = "Per-user cart lines"),
        (name = "products", description = "Catalog pricing and stock"),
    ),
    paths(
        // Orders
        crate::handlers::orders::create_order,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::update_fulfillment_status,

        // Webhooks
        crate::handlers::payment_webhooks::payment_webhook,

        // Cart
        crate::handlers::carts::get_cart,
        crate::handlers::carts::add_cart_item,
        crate::handlers::carts::remove_cart_item,

        // Products
        crate::handlers::products::create_product,
        crate::handlers::products::get_product,
        crate::handlers::products::update_pricing,
        crate::handlers::products::adjust_stock,
    ),
    components(
        schemas(
            crate::entities::order::FulfillmentStatus,
            crate::entities::order::PaymentStatus,
            crate::entities::payment_event::PaymentOutcome,
            crate::services::payments::AckDisposition,
            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDocV1;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDocV1::openapi())
}
