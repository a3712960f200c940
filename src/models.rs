// =============================================================================
// Shared domain models that cross module boundaries
// =============================================================================
//
// `Alert` is produced by `webhook.rs`, consumed by `router.rs` and
// `coordinator.rs`, and persisted by `ledger.rs`. It lives in its own module
// rather than inside any one of those so none of them owns it exclusively
// (spec.md §3).
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{AlertStatus, OrderType, Side, TimeInForce};

/// A single inbound trading signal, as decoded from a webhook payload
/// (spec.md §3 `Alert`, §6 wire schema).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub source: String,
    #[serde(default)]
    pub client_nonce: Option<String>,
    pub strategy_id: String,
    pub symbol: String,
    pub side: Side,
    #[serde(default)]
    pub order_type: Option<OrderType>,
    #[serde(default)]
    pub limit_price: Option<f64>,
    #[serde(default)]
    pub stop_price: Option<f64>,
    #[serde(default)]
    pub time_in_force: Option<TimeInForce>,
    pub quantity: f64,
    pub account_group: String,
    pub received_at: DateTime<Utc>,
    #[serde(default)]
    pub status: AlertStatus,
}

/// The raw body shape accepted at `POST /webhook/:source` before it is
/// promoted to an [`Alert`] (source and receipt time are filled in by the
/// handler, not the caller).
#[derive(Debug, Clone, Deserialize)]
pub struct AlertPayload {
    #[serde(default)]
    pub client_nonce: Option<String>,
    pub strategy_id: String,
    pub symbol: String,
    pub side: Side,
    #[serde(default)]
    pub order_type: Option<OrderType>,
    #[serde(default)]
    pub limit_price: Option<f64>,
    #[serde(default)]
    pub stop_price: Option<f64>,
    #[serde(default)]
    pub time_in_force: Option<TimeInForce>,
    pub quantity: f64,
    pub account_group: String,
}

impl Alert {
    pub fn from_payload(source: String, payload: AlertPayload, received_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            client_nonce: payload.client_nonce,
            strategy_id: payload.strategy_id,
            symbol: payload.symbol,
            side: payload.side,
            order_type: payload.order_type,
            limit_price: payload.limit_price,
            stop_price: payload.stop_price,
            time_in_force: payload.time_in_force,
            quantity: payload.quantity,
            account_group: payload.account_group,
            received_at,
            status: AlertStatus::Received,
        }
    }

    /// The key used for `(source, clientNonce)` dedup within the sliding
    /// window (spec.md §4.6). Alerts with no nonce are never deduplicated.
    pub fn dedup_key(&self) -> Option<(String, String)> {
        self.client_nonce
            .as_ref()
            .map(|nonce| (self.source.clone(), nonce.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> AlertPayload {
        AlertPayload {
            client_nonce: Some("abc123".to_string()),
            strategy_id: "strat-1".to_string(),
            symbol: "ES".to_string(),
            side: Side::Buy,
            order_type: Some(OrderType::Market),
            limit_price: None,
            stop_price: None,
            time_in_force: None,
            quantity: 1.0,
            account_group: "group-a".to_string(),
        }
    }

    #[test]
    fn from_payload_sets_received_status() {
        let alert = Alert::from_payload("tradingview".to_string(), payload(), Utc::now());
        assert_eq!(alert.status, AlertStatus::Received);
        assert_eq!(alert.source, "tradingview");
    }

    #[test]
    fn dedup_key_present_with_nonce() {
        let alert = Alert::from_payload("tradingview".to_string(), payload(), Utc::now());
        assert_eq!(
            alert.dedup_key(),
            Some(("tradingview".to_string(), "abc123".to_string()))
        );
    }

    #[test]
    fn dedup_key_absent_without_nonce() {
        let mut p = payload();
        p.client_nonce = None;
        let alert = Alert::from_payload("tradingview".to_string(), p, Utc::now());
        assert_eq!(alert.dedup_key(), None);
    }
}
