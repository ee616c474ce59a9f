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
    entities::product,
    errors::ServiceError,
    handlers::common::{created_response, success_response},
    services::catalog::{CreateProductInput, StockAdjustmentInput, StockLevel, UpdatePricingInput},
    services::pricing::discount_active,
    ApiResponse, AppState,
};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProductResponse {
    pub id: Uuid,
    pub name: String,
    #[schema(value_type = String)]
    pub price: Decimal,
    pub discount_percent: i32,
    pub discount_start: Option<DateTime<Utc>>,
    pub discount_end: Option<DateTime<Utc>>,
    /// Whether the discount applies right now
    pub discount_active: bool,
    pub stock_quantity: i32,
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
}

impl From<product::Model> for ProductResponse {
    fn from(p: product::Model) -> Self {
        Self {
            discount_active: discount_active(&p, Utc::now()),
            id: p.id,
            name: p.name,
            price: p.price,
            discount_percent: p.discount_percent,
            discount_start: p.discount_start,
            discount_end: p.discount_end,
            stock_quantity: p.stock_quantity,
            is_active: p.is_active,
            updated_at: p.updated_at,
        }
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/products",
    request_body = CreateProductInput,
    responses(
        (status = 201, description = "Product created", body = ApiResponse<ProductResponse>),
        (status = 400, description = "Invalid product", body = crate::errors::ErrorResponse),
    ),
    tag = "products"
)]
pub async fn create_product(
    State(state): State<AppState>,
    Json(input): Json<CreateProductInput>,
) -> Result<impl IntoResponse, ServiceError> {
    let created = state.services.catalog.create_product(input).await?;
    Ok(created_response(ProductResponse::from(created)))
}

#[utoipa::path(
    get,
    path = "/api/v1/products/{id}",
    params(("id" = Uuid, Path, description = "Product ID")),
    responses(
        (status = 200, description = "Product retrieved", body = ApiResponse<ProductResponse>),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse),
    ),
    tag = "products"
)]
pub async fn get_product(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let product = state.services.catalog.get_product(product_id).await?;
    Ok(success_response(ProductResponse::from(product)))
}

/// Change price and discount; placed orders are unaffected
#[utoipa::path(
    put,
    path = "/api/v1/products/{id}/pricing",
    request_body = UpdatePricingInput,
    params(("id" = Uuid, Path, description = "Product ID")),
    responses(
        (status = 200, description = "Pricing updated", body = ApiResponse<ProductResponse>),
        (status = 400, description = "Invalid pricing", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse),
    ),
    tag = "products"
)]
pub async fn update_pricing(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
    Json(input): Json<UpdatePricingInput>,
) -> Result<impl IntoResponse, ServiceError> {
    let updated = state
        .services
        .catalog
        .update_pricing(product_id, input)
        .await?;
    Ok(success_response(ProductResponse::from(updated)))
}

#[utoipa::path(
    post,
    path = "/api/v1/products/{id}/stock-adjustments",
    request_body = StockAdjustmentInput,
    params(("id" = Uuid, Path, description = "Product ID")),
    responses(
        (status = 200, description = "Stock adjusted", body = ApiResponse<StockLevel>),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse),
        (status = 422, description = "Adjustment would take stock below zero", body = crate::errors::ErrorResponse),
    ),
    tag = "products"
)]
pub async fn adjust_stock(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
    Json(input): Json<StockAdjustmentInput>,
) -> Result<impl IntoResponse, ServiceError> {
    let level = state
        .services
        .catalog
        .adjust_stock(product_id, input)
        .await?;
    Ok(success_response(level))
}
