use std::time::Duration;

use axum::{extract::State, http::HeaderMap, response::IntoResponse, Json};
use bytes::Bytes;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::{
    errors::ServiceError,
    services::payments::{PaymentAck, PaymentNotification},
    AppState,
};

type HmacSha256 = Hmac<Sha256>;

/// Body returned to the gateway. `accepted: false` with `retriable: false`
/// tells it to stop redelivering.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WebhookResponse {
    pub accepted: bool,
    pub retriable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ack: Option<PaymentAck>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// POST /api/v1/payments/webhook
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    request_body = PaymentNotification,
    responses(
        (status = 200, description = "Notification acknowledged (applied, duplicate, ignored or terminally rejected)", body = WebhookResponse),
        (status = 400, description = "Invalid payload", body = crate::errors::ErrorResponse),
        (status = 401, description = "Invalid signature", body = crate::errors::ErrorResponse),
        (status = 503, description = "Temporary failure; redeliver later", body = crate::errors::ErrorResponse)
    ),
    tag = "payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    if let Some(secret) = state.config.webhook_secret() {
        if !verify_signature(&headers, &body, secret, state.config.webhook_tolerance()) {
            warn!("Payment webhook signature verification failed");
            return Err(ServiceError::Unauthorized(
                "invalid webhook signature".to_string(),
            ));
        }
    }

    let notification: PaymentNotification = serde_json::from_slice(&body)
        .map_err(|e| ServiceError::BadRequest(format!("invalid payload: {}", e)))?;

    match state
        .services
        .payments
        .apply_payment_event(notification)
        .await
    {
        Ok(ack) => Ok(Json(WebhookResponse {
            accepted: true,
            retriable: false,
            ack: Some(ack),
            error: None,
        })),
        Err(e @ (ServiceError::OrderNotFound(_) | ServiceError::IllegalTransition { .. })) => {
            info!("Payment notification rejected terminally: {}", e);
            Ok(Json(WebhookResponse {
                accepted: false,
                retriable: false,
                ack: None,
                error: Some(e.to_string()),
            }))
        }
        Err(e) => Err(e),
    }
}

/// Checks an HMAC-SHA256 signature over `"{timestamp}.{body}"`, taken either
/// from `x-timestamp`/`x-signature` or from a Stripe-style
/// `Stripe-Signature: t=...,v1=...` header.
pub fn verify_signature(
    headers: &HeaderMap,
    payload: &[u8],
    secret: &str,
    tolerance: Duration,
) -> bool {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    let (timestamp, signature) = match (header("x-timestamp"), header("x-signature")) {
        (Some(ts), Some(sig)) => (ts.to_string(), sig.to_string()),
        _ => match header("stripe-signature").and_then(parse_stripe_header) {
            Some(parts) => parts,
            None => return false,
        },
    };

    let Ok(sent_at) = timestamp.trim().parse::<i64>() else {
        return false;
    };
    let age = (chrono::Utc::now().timestamp() - sent_at).unsigned_abs();
    if age > tolerance.as_secs() {
        return false;
    }

    let expected = sign(secret, &timestamp, payload);
    constant_time_eq(expected.as_bytes(), signature.trim().as_bytes())
}

fn parse_stripe_header(value: &str) -> Option<(String, String)> {
    let mut timestamp = None;
    let mut signature = None;
    for part in value.split(',') {
        match part.trim().split_once('=') {
            Some(("t", v)) => timestamp = Some(v.to_string()),
            Some(("v1", v)) if signature.is_none() => signature = Some(v.to_string()),
            _ => {}
        }
    }
    Some((timestamp?, signature?))
}

/// Hex HMAC-SHA256 of `"{timestamp}.{payload}"`.
pub fn sign(secret: &str, timestamp: &str, payload: &[u8]) -> String {
    // HMAC accepts keys of any length
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() || a.is_empty() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const SECRET: &str = "whsec_test";
    const BODY: &[u8] = br#"{"order_id":"00000000-0000-0000-0000-000000000000","external_payment_id":"pi_1","outcome":"succeeded"}"#;

    fn signed_headers(timestamp: i64, body: &[u8]) -> HeaderMap {
        let ts = timestamp.to_string();
        let mut headers = HeaderMap::new();
        headers.insert("x-timestamp", HeaderValue::from_str(&ts).unwrap());
        headers.insert(
            "x-signature",
            HeaderValue::from_str(&sign(SECRET, &ts, body)).unwrap(),
        );
        headers
    }

    #[test]
    fn accepts_valid_signature() {
        let headers = signed_headers(chrono::Utc::now().timestamp(), BODY);
        assert!(verify_signature(&headers, BODY, SECRET, Duration::from_secs(300)));
    }

    #[test]
    fn rejects_tampered_body() {
        let headers = signed_headers(chrono::Utc::now().timestamp(), BODY);
        let tampered = br#"{"order_id":"00000000-0000-0000-0000-000000000000","external_payment_id":"pi_2","outcome":"succeeded"}"#;
        assert!(!verify_signature(&headers, tampered, SECRET, Duration::from_secs(300)));
    }

    #[test]
    fn rejects_stale_timestamp() {
        let headers = signed_headers(chrono::Utc::now().timestamp() - 3600, BODY);
        assert!(!verify_signature(&headers, BODY, SECRET, Duration::from_secs(300)));
    }

    #[test]
    fn accepts_stripe_style_header() {
        let ts = chrono::Utc::now().timestamp().to_string();
        let value = format!("t={},v1={},v0=ignored", ts, sign(SECRET, &ts, BODY));
        let mut headers = HeaderMap::new();
        headers.insert("Stripe-Signature", HeaderValue::from_str(&value).unwrap());
        assert!(verify_signature(&headers, BODY, SECRET, Duration::from_secs(300)));
    }

    #[test]
    fn rejects_missing_headers() {
        assert!(!verify_signature(
            &HeaderMap::new(),
            BODY,
            SECRET,
            Duration::from_secs(300)
        ));
    }
}
