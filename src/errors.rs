use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use serde_json::json;
use strum::{Display, EnumString};
use utoipa::ToSchema;
use uuid::Uuid;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Error body returned by every failing endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Unprocessable Entity",
    "code": "insufficient_stock",
    "message": "Insufficient stock for product 550e8400-e29b-41d4-a716-446655440000: requested 2, available 1",
    "retriable": false,
    "details": null,
    "request_id": "req-abc123xyz",
    "timestamp": "2024-12-09T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Conflict")
    #[schema(example = "Not Found")]
    pub error: String,
    /// Machine-readable error code
    #[schema(example = "order_not_found")]
    pub code: String,
    /// Human-readable error description
    pub message: String,
    /// Whether repeating the same request may succeed
    pub retriable: bool,
    /// Additional structured context (e.g. stock shortfall)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// Unique request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(example = "req-abc123xyz")]
    pub request_id: Option<String>,
    /// ISO 8601 timestamp when error occurred
    pub timestamp: String,
}

/// Which of the two order lifecycles a transition belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum StatusAxis {
    Fulfillment,
    Payment,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Cart is empty")]
    EmptyCart,

    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: Uuid,
        requested: i32,
        available: i32,
    },

    #[error("Product {0} is not available for purchase")]
    ProductUnavailable(Uuid),

    #[error("Illegal {axis} status transition for order {order_id}: {from} -> {to}")]
    IllegalTransition {
        order_id: Uuid,
        axis: StatusAxis,
        from: String,
        to: String,
    },

    #[error("Order {0} not found")]
    OrderNotFound(Uuid),

    #[error("Transient store failure: {0}")]
    TransientStoreFailure(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Database error: {0}")]
    DatabaseError(DbErr),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<DbErr> for ServiceError {
    fn from(err: DbErr) -> Self {
        if is_transient_db_error(&err) {
            ServiceError::TransientStoreFailure(err.to_string())
        } else {
            ServiceError::DatabaseError(err)
        }
    }
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

/// Connection loss, pool exhaustion, lock contention and serialization
/// failures abort the operation but may succeed on retry.
fn is_transient_db_error(err: &DbErr) -> bool {
    if matches!(err, DbErr::ConnectionAcquire(_) | DbErr::Conn(_)) {
        return true;
    }
    let message = err.to_string().to_ascii_lowercase();
    const TRANSIENT_FRAGMENTS: [&str; 7] = [
        "deadlock",
        "database is locked",
        "table is locked",
        "could not serialize",
        "serialization failure",
        "lock timeout",
        "connection reset",
    ];
    TRANSIENT_FRAGMENTS
        .iter()
        .any(|fragment| message.contains(fragment))
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::EmptyCart | Self::ValidationError(_) | Self::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::OrderNotFound(_) | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::IllegalTransition { .. } => StatusCode::CONFLICT,
            Self::InsufficientStock { .. } | Self::ProductUnavailable(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::TransientStoreFailure(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::DatabaseError(_) | Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable code carried in the error body.
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyCart => "empty_cart",
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::ProductUnavailable(_) => "product_unavailable",
            Self::IllegalTransition { .. } => "illegal_transition",
            Self::OrderNotFound(_) => "order_not_found",
            Self::TransientStoreFailure(_) => "transient_store_failure",
            Self::NotFound(_) => "not_found",
            Self::ValidationError(_) => "validation_error",
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized(_) => "unauthorized",
            Self::DatabaseError(_) => "database_error",
            Self::InternalError(_) => "internal_error",
        }
    }

    /// Only transient store failures are worth retrying; everything else is
    /// either the caller's fault or a settled outcome.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::TransientStoreFailure(_))
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) => "Internal server error".to_string(),
            Self::TransientStoreFailure(_) => {
                "Service temporarily unavailable, retry the request".to_string()
            }
            _ => self.to_string(),
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::InsufficientStock {
                product_id,
                requested,
                available,
            } => Some(json!({
                "product_id": product_id,
                "requested": requested,
                "available": available,
                "shortfall": requested - available,
            })),
            Self::IllegalTransition {
                order_id,
                axis,
                from,
                to,
            } => Some(json!({
                "order_id": order_id,
                "axis": axis,
                "from": from,
                "to": to,
            })),
            _ => None,
        }
    }

    pub fn to_error_response(&self) -> ErrorResponse {
        let status = self.status_code();
        ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            code: self.code().to_string(),
            message: self.response_message(),
            retriable: self.is_retriable(),
            details: self.details(),
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        if matches!(self, Self::DatabaseError(_) | Self::InternalError(_)) {
            tracing::error!(error = %self, "request failed with internal error");
        }
        (self.status_code(), Json(self.to_error_response())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::to_bytes, http::StatusCode};
    use sea_orm::RuntimeErr;

    #[tokio::test]
    async fn service_error_response_includes_request_id() {
        let order_id = Uuid::new_v4();
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("req-123"), async {
                ServiceError::OrderNotFound(order_id).into_response()
            })
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.request_id.as_deref(), Some("req-123"));
        assert_eq!(payload.code, "order_not_found");
        assert!(!payload.retriable);
    }

    #[tokio::test]
    async fn insufficient_stock_body_carries_shortfall() {
        let product_id = Uuid::new_v4();
        let response = ServiceError::InsufficientStock {
            product_id,
            requested: 5,
            available: 2,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        let details = payload.details.unwrap();
        assert_eq!(details["shortfall"], 3);
        assert_eq!(details["available"], 2);
    }

    #[test]
    fn service_error_status_code_mapping() {
        let id = Uuid::new_v4();
        assert_eq!(ServiceError::EmptyCart.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ServiceError::OrderNotFound(id).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::IllegalTransition {
                order_id: id,
                axis: StatusAxis::Fulfillment,
                from: "shipped".into(),
                to: "pending".into(),
            }
            .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::ProductUnavailable(id).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ServiceError::TransientStoreFailure("pool".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ServiceError::Unauthorized("x".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ServiceError::InternalError("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn only_transient_failures_are_retriable() {
        assert!(ServiceError::TransientStoreFailure("timeout".into()).is_retriable());
        assert!(!ServiceError::EmptyCart.is_retriable());
        assert!(!ServiceError::OrderNotFound(Uuid::new_v4()).is_retriable());
        assert!(!ServiceError::DatabaseError(DbErr::Custom("boom".into())).is_retriable());
    }

    #[test]
    fn db_errors_are_classified() {
        let locked = DbErr::Exec(RuntimeErr::Internal("database is locked".into()));
        assert!(matches!(
            ServiceError::from(locked),
            ServiceError::TransientStoreFailure(_)
        ));

        let shared_cache = DbErr::Exec(RuntimeErr::Internal(
            "error returned from database: (code: 6) database table is locked".into(),
        ));
        assert!(ServiceError::from(shared_cache).is_retriable());

        let deadlock = DbErr::Query(RuntimeErr::Internal(
            "ERROR: deadlock detected".into(),
        ));
        assert!(ServiceError::from(deadlock).is_retriable());

        let constraint = DbErr::Exec(RuntimeErr::Internal(
            "UNIQUE constraint failed: products.id".into(),
        ));
        assert!(matches!(
            ServiceError::from(constraint),
            ServiceError::DatabaseError(_)
        ));
    }

    #[test]
    fn response_message_hides_internal_details() {
        assert_eq!(
            ServiceError::DatabaseError(DbErr::Custom("password=hunter2".into()))
                .response_message(),
            "Database error"
        );
        assert_eq!(
            ServiceError::InternalError("stack".into()).response_message(),
            "Internal server error"
        );
        assert_eq!(ServiceError::EmptyCart.response_message(), "Cart is empty");
    }
}
