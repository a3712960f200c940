// =============================================================================
// Webhook intake (C6)
// =============================================================================
//
// `POST /webhook/:source` is the only way an alert enters the router.
// Verifies an HMAC-SHA256 signature per source, applies a token-bucket rate
// limit per source, rejects malformed payloads, and deduplicates on
// `(source, clientNonce)` against the alert ledger before handing the alert
// to the coordinator.
//
// Signature verification is grounded on the teacher's `binance/client.rs`
// `sign()` (same `Hmac<Sha256>` construction, reversed here to verify an
// inbound signature rather than produce an outbound one) combined with
// `api/auth.rs`'s `constant_time_eq`. The rate limiter's token-bucket shape
// is grounded on `binance/rate_limit.rs`, generalized from Binance's
// fixed global weight budget to one bucket per webhook source.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use sha2::Sha256;
use tracing::{info, warn};

use crate::app_state::AppState;
use crate::error::CoreError;
use crate::models::{Alert, AlertPayload};

type HmacSha256 = Hmac<Sha256>;

/// Per-source webhook signing secrets, loaded from configuration.
#[derive(Debug, Clone, Default)]
pub struct WebhookSecrets {
    secrets: HashMap<String, String>,
}

impl WebhookSecrets {
    pub fn new(secrets: HashMap<String, String>) -> Self {
        Self { secrets }
    }

    pub fn secret_for(&self, source: &str) -> Option<&str> {
        self.secrets.get(source).map(String::as_str)
    }
}

/// Verify `signature_hex` is the HMAC-SHA256 of `body` under `secret`,
/// comparing digests in constant time.
pub fn verify_signature(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    let Ok(provided) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    let expected = mac.finalize().into_bytes();
    constant_time_eq(&expected, &provided)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

struct Bucket {
    tokens: f64,
    last_refill: std::time::Instant,
}

/// Per-source token-bucket rate limiter. Each source gets its own bucket,
/// refilled continuously at `refill_per_sec` up to `capacity` (spec.md §4.6).
pub struct WebhookRateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    buckets: RwLock<HashMap<String, Bucket>>,
}

impl WebhookRateLimiter {
    pub fn new(capacity: f64, refill_per_sec: f64) -> Self {
        Self {
            capacity,
            refill_per_sec,
            buckets: RwLock::new(HashMap::new()),
        }
    }

    /// Attempt to consume one token for `source`. Returns `false` if the
    /// bucket is empty.
    pub fn try_consume(&self, source: &str) -> bool {
        let mut buckets = self.buckets.write();
        let now = std::time::Instant::now();
        let bucket = buckets.entry(source.to_string()).or_insert_with(|| Bucket {
            tokens: self.capacity,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

impl Default for WebhookRateLimiter {
    fn default() -> Self {
        Self::new(60.0, 1.0)
    }
}

/// Handle an inbound `POST /webhook/:source` request. Returns a `202` with
/// the assigned alert id on acceptance, a `200 {"duplicate": true}` on a
/// deduplicated nonce, or an error status via [`CoreError`].
pub async fn handle_webhook(
    State(state): State<Arc<AppState>>,
    Path(source): Path<String>,
    headers: axum::http::HeaderMap,
    body: axum::body::Bytes,
) -> Result<(StatusCode, Json<serde_json::Value>), CoreError> {
    let secret = state
        .webhook_secrets
        .secret_for(&source)
        .ok_or_else(|| CoreError::Auth(format!("unknown webhook source: {source}")))?;

    let signature = headers
        .get("X-Signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| CoreError::Auth("missing X-Signature header".to_string()))?;

    if !verify_signature(secret, &body, signature) {
        warn!(source = %source, "webhook signature verification failed");
        return Err(CoreError::Auth("invalid signature".to_string()));
    }

    if !state.webhook_rate_limiter.try_consume(&source) {
        warn!(source = %source, "webhook rate limit exceeded");
        return Err(CoreError::RuleViolation("rate limit exceeded".to_string()));
    }

    let payload: AlertPayload = serde_json::from_slice(&body)
        .map_err(|e| CoreError::Validation(format!("malformed alert payload: {e}")))?;

    if payload.strategy_id.trim().is_empty() {
        return Err(CoreError::Validation("strategyId is required".to_string()));
    }

    let alert = Alert::from_payload(source.clone(), payload, Utc::now());

    if let Some((dedup_source, nonce)) = alert.dedup_key() {
        let seen = state
            .alert_ledger
            .seen_within(&dedup_source, &nonce, chrono::Duration::hours(24))
            .await
            .map_err(|e| CoreError::Internal(e.to_string()))?;
        if seen {
            info!(source = %source, nonce = %nonce, "duplicate alert ignored");
            return Ok((
                StatusCode::OK,
                Json(serde_json::json!({ "duplicate": true, "alertId": alert.id })),
            ));
        }
    }

    state
        .alert_ledger
        .record_received(
            &alert.id.to_string(),
            &alert.source,
            alert.client_nonce.as_deref(),
            alert.received_at,
        )
        .await
        .map_err(|e| CoreError::Internal(e.to_string()))?;

    info!(source = %source, alert_id = %alert.id, symbol = %alert.symbol, "alert accepted");

    state
        .alert_tx
        .send(alert.clone())
        .await
        .map_err(|_| CoreError::Internal("coordinator queue closed".to_string()))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "alertId": alert.id })),
    ))
}
