use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    entities::{
        order::{self, FulfillmentStatus, PaymentStatus},
        order_line,
    },
    errors::ServiceError,
    handlers::common::{created_response, success_response, CallerId},
    services::orders::{OrderReceipt, ShippingInfo},
    ApiResponse, AppState,
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateOrderRequest {
    pub shipping: ShippingInfo,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateFulfillmentStatusRequest {
    pub status: FulfillmentStatus,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderLineResponse {
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    #[schema(value_type = String)]
    pub unit_price: Decimal,
    #[schema(value_type = String)]
    pub line_total: Decimal,
}

impl From<order_line::Model> for OrderLineResponse {
    fn from(line: order_line::Model) -> Self {
        Self {
            line_total: line.line_total(),
            product_id: line.product_id,
            product_name: line.product_name,
            quantity: line.quantity,
            unit_price: line.unit_price,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    #[schema(value_type = String)]
    pub total_amount: Decimal,
    pub fulfillment_status: FulfillmentStatus,
    pub payment_status: PaymentStatus,
    pub shipping: ShippingInfo,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lines: Vec<OrderLineResponse>,
}

impl OrderResponse {
    fn from_models(order: order::Model, lines: Vec<order_line::Model>) -> Self {
        Self {
            id: order.id,
            user_id: order.user_id,
            total_amount: order.total_amount,
            fulfillment_status: order.fulfillment_status,
            payment_status: order.payment_status,
            shipping: ShippingInfo {
                name: order.shipping_name,
                phone: order.shipping_phone,
                email: order.shipping_email,
                address: order.shipping_address,
                note: order.note,
            },
            created_at: order.created_at,
            lines: lines.into_iter().map(OrderLineResponse::from).collect(),
        }
    }
}

/// Check out the caller's cart
#[utoipa::path(
    post,
    path = "/api/v1/orders",
    summary = "Create order",
    description = "Turn the caller's cart into an order. Prices are frozen, stock is reserved and the cart is cleared in one transaction.",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created", body = ApiResponse<OrderReceipt>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Empty cart or invalid shipping info", body = crate::errors::ErrorResponse),
        (status = 401, description = "Missing caller identity", body = crate::errors::ErrorResponse),
        (status = 422, description = "Insufficient stock or unavailable product", body = crate::errors::ErrorResponse),
        (status = 503, description = "Store temporarily unavailable; safe to retry", body = crate::errors::ErrorResponse),
    ),
    params(("x-user-id" = Uuid, Header, description = "Caller identity")),
    tag = "orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Json(request): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let receipt = state
        .services
        .orders
        .create_order(user_id, request.shipping)
        .await?;
    Ok(created_response(receipt))
}

/// List the caller's orders, newest first
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    summary = "List orders",
    responses(
        (status = 200, description = "Orders retrieved", body = ApiResponse<Vec<OrderResponse>>),
        (status = 401, description = "Missing caller identity", body = crate::errors::ErrorResponse),
    ),
    params(("x-user-id" = Uuid, Header, description = "Caller identity")),
    tag = "orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
) -> Result<impl IntoResponse, ServiceError> {
    let orders = state.services.orders.list_orders_for_user(user_id).await?;
    let orders: Vec<OrderResponse> = orders
        .into_iter()
        .map(|order| OrderResponse::from_models(order, Vec::new()))
        .collect();
    Ok(success_response(orders))
}

/// Get an order with its frozen lines
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    summary = "Get order",
    params(
        ("id" = Uuid, Path, description = "Order ID"),
        ("x-user-id" = Uuid, Header, description = "Caller identity"),
    ),
    responses(
        (status = 200, description = "Order retrieved", body = ApiResponse<OrderResponse>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    tag = "orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let (order, lines) = state.services.orders.get_order(order_id).await?;
    // Another user's order is indistinguishable from a missing one.
    if order.user_id != user_id {
        return Err(ServiceError::OrderNotFound(order_id));
    }
    Ok(success_response(OrderResponse::from_models(order, lines)))
}

/// Move an order along its fulfillment lifecycle
#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}/fulfillment-status",
    summary = "Set fulfillment status",
    description = "Administrative transition. Cancelling returns the ordered quantities to stock.",
    request_body = UpdateFulfillmentStatusRequest,
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Status updated", body = ApiResponse<OrderResponse>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Illegal or stale transition", body = crate::errors::ErrorResponse),
    ),
    tag = "orders"
)]
pub async fn update_fulfillment_status(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(request): Json<UpdateFulfillmentStatusRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let updated = state
        .services
        .order_status
        .set_fulfillment_status(order_id, request.status)
        .await?;
    Ok(success_response(OrderResponse::from_models(
        updated,
        Vec::new(),
    )))
}
