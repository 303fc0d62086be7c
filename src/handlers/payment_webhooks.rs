use crate::{errors::ServiceError, AppState};
use axum::{extract::State, http::HeaderMap, response::IntoResponse};
use bytes::Bytes;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use tracing::{info, warn};

type HmacSha256 = Hmac<Sha256>;

/// POST /api/v1/checkout/webhook
///
/// Gateway callbacks for payment intents. The body is read raw because
/// the signature covers the exact bytes on the wire. Duplicate events
/// are harmless: confirmation of an already-materialized intent is a
/// no-op, so this handler does not need its own replay store.
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    if let Some(secret) = state.config.payment_webhook_secret.clone() {
        let ok = verify_signature(
            &headers,
            &body,
            &secret,
            state.config.payment_webhook_tolerance_secs,
        );
        if !ok {
            warn!("Payment webhook signature verification failed");
            return Err(ServiceError::Unauthorized(
                "invalid webhook signature".to_string(),
            ));
        }
    }

    let json: Value = serde_json::from_slice(&body)
        .map_err(|e| ServiceError::ValidationError(format!("invalid json: {}", e)))?;

    let event_type = json.get("type").and_then(|v| v.as_str()).unwrap_or("");
    let intent_id = json
        .pointer("/data/object/id")
        .and_then(|v| v.as_str())
        .unwrap_or("");

    match event_type {
        "payment_intent.succeeded" if !intent_id.is_empty() => {
            state
                .services
                .checkout
                .confirm(intent_id, true, None, None)
                .await?;
        }
        "payment_intent.payment_failed" if !intent_id.is_empty() => {
            state
                .services
                .checkout
                .confirm(intent_id, false, None, None)
                .await?;
        }
        _ => {
            info!("Unhandled payment webhook type: {}", event_type);
        }
    }

    Ok((axum::http::StatusCode::OK, "ok"))
}

fn verify_signature(headers: &HeaderMap, payload: &Bytes, secret: &str, tolerance_secs: u64) -> bool {
    // Generic HMAC: x-timestamp and x-signature headers
    if let (Some(ts), Some(sig)) = (headers.get("x-timestamp"), headers.get("x-signature")) {
        if let (Ok(ts), Ok(sig)) = (ts.to_str(), sig.to_str()) {
            if let Ok(ts_i) = ts.parse::<i64>() {
                let now = chrono::Utc::now().timestamp();
                if (now - ts_i).unsigned_abs() > tolerance_secs {
                    return false;
                }
            }
            return check_hmac(ts, payload, secret, sig);
        }
    }
    // Stripe-like support: Stripe-Signature with t=, v1=
    if let Some(sig) = headers.get("Stripe-Signature").and_then(|h| h.to_str().ok()) {
        let mut ts = "";
        let mut v1 = "";
        for part in sig.split(',') {
            let mut it = part.split('=');
            match (it.next(), it.next()) {
                (Some("t"), Some(val)) => ts = val,
                (Some("v1"), Some(val)) => v1 = val,
                _ => {}
            }
        }
        if !ts.is_empty() && !v1.is_empty() {
            if let Ok(ts_i) = ts.parse::<i64>() {
                let now = chrono::Utc::now().timestamp();
                if (now - ts_i).unsigned_abs() > tolerance_secs {
                    return false;
                }
            }
            return check_hmac(ts, payload, secret, v1);
        }
    }
    false
}

fn check_hmac(ts: &str, payload: &Bytes, secret: &str, provided: &str) -> bool {
    let signed = format!("{}.{}", ts, std::str::from_utf8(payload).unwrap_or(""));
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(signed.as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());
    constant_time_eq(&expected, provided)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}
