// =============================================================================
// Broker adapter contract (C2)
// =============================================================================
//
// The router never speaks to a broker directly — every destination
// (simulator, sandbox, live) is reached through this trait. Only
// `paper_engine::PaperEngine` implements it in this core (spec.md §1
// Non-goals: no concrete sandbox/live client ships here); the trait
// documents the contract a real implementor would fulfil, following the same
// signed-request method shapes the teacher's `binance/client.rs` used for
// its single concrete broker.
// =============================================================================

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{OrderStatus, OrderType, Side, TimeInForce};

/// A request to place a new order, already tick-rounded and validated
/// against the instrument registry by the caller.
#[derive(Debug, Clone)]
pub struct PlaceOrderRequest {
    pub client_order_tag: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: f64,
    /// Contract multiplier for `symbol`, resolved by the caller against the
    /// instrument registry (e.g. ES = 50.0). Applied to every fill's PnL,
    /// cash settlement, and buying-power consumption (spec.md §4.3).
    pub multiplier: f64,
    pub limit_price: Option<f64>,
    pub stop_price: Option<f64>,
    pub time_in_force: TimeInForce,
}

/// Successful acknowledgement of an order placement request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAck {
    pub broker_order_id: String,
    pub status: OrderStatus,
    pub accepted_at: DateTime<Utc>,
}

/// A structured rejection returned instead of an [`OrderAck`]. `reason_code`
/// is the stable machine-readable classifier the coordinator's retry/backoff
/// logic switches on (spec.md §4.9); `detail` is human-facing context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rejected {
    pub reason_code: String,
    pub detail: String,
    pub retryable: bool,
}

/// An asynchronous update the adapter pushes about a previously placed
/// order: a fill (partial or full), a cancellation, or a late rejection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BrokerUpdate {
    Fill {
        broker_order_id: String,
        fill_id: Uuid,
        price: f64,
        quantity: f64,
        filled_at: DateTime<Utc>,
        /// Realized PnL this specific fill contributed (zero unless it
        /// closed or reduced an existing position), already scaled by the
        /// instrument multiplier. Fed to the funded rule engine's per-fill
        /// metrics recompute (spec.md §4.4).
        realized_pnl_delta: f64,
    },
    Cancelled {
        broker_order_id: String,
        cancelled_at: DateTime<Utc>,
    },
    Rejected {
        broker_order_id: String,
        rejection: Rejected,
    },
}

/// The contract every execution destination must satisfy. Methods return
/// `Result<_, Rejected>` rather than a generic error because a rejection is
/// expected routine traffic here (insufficient buying power, market closed,
/// instrument halted), not an exceptional condition — the coordinator
/// branches on `reason_code`, it does not log-and-move-on.
#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    /// Human-readable identifier used in logs and the `/api/v1/state` snapshot.
    fn name(&self) -> &str;

    async fn place_order(&self, req: PlaceOrderRequest) -> Result<OrderAck, Rejected>;

    async fn cancel_order(&self, broker_order_id: &str) -> Result<(), Rejected>;

    /// Drain any updates (fills, cancels, late rejections) accumulated since
    /// the last call. Adapters that push updates synchronously from
    /// `place_order`/`cancel_order` may return an empty vec here always.
    async fn poll_updates(&self) -> Vec<BrokerUpdate>;
}
