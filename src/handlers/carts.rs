use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use uuid::Uuid;

use crate::{
    errors::ServiceError,
    handlers::common::{no_content_response, success_response, validate_input, CallerId},
    services::cart::{AddToCartInput, CartView},
    ApiResponse, AppState,
};

/// Get the caller's cart at current prices
#[utoipa::path(
    get,
    path = "/api/v1/cart",
    params(("x-user-id" = Uuid, Header, description = "Caller identity")),
    responses(
        (status = 200, description = "Cart retrieved", body = ApiResponse<CartView>),
        (status = 401, description = "Missing caller identity", body = crate::errors::ErrorResponse),
    ),
    tag = "cart"
)]
pub async fn get_cart(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = state.services.cart.get_cart(user_id).await?;
    Ok(success_response(cart))
}

/// Add a product to the caller's cart
#[utoipa::path(
    post,
    path = "/api/v1/cart/items",
    request_body = AddToCartInput,
    params(("x-user-id" = Uuid, Header, description = "Caller identity")),
    responses(
        (status = 200, description = "Cart line added or increased", body = ApiResponse<CartView>),
        (status = 400, description = "Invalid quantity", body = crate::errors::ErrorResponse),
        (status = 422, description = "Product unavailable", body = crate::errors::ErrorResponse),
    ),
    tag = "cart"
)]
pub async fn add_cart_item(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Json(input): Json<AddToCartInput>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&input)?;
    state.services.cart.add_item(user_id, input).await?;
    let cart = state.services.cart.get_cart(user_id).await?;
    Ok(success_response(cart))
}

/// Remove a product from the caller's cart
#[utoipa::path(
    delete,
    path = "/api/v1/cart/items/{product_id}",
    params(
        ("product_id" = Uuid, Path, description = "Product ID"),
        ("x-user-id" = Uuid, Header, description = "Caller identity"),
    ),
    responses(
        (status = 204, description = "Cart line removed"),
        (status = 404, description = "Product not in cart", body = crate::errors::ErrorResponse),
    ),
    tag = "cart"
)]
pub async fn remove_cart_item(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Path(product_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    state.services.cart.remove_item(user_id, product_id).await?;
    Ok(no_content_response())
}
