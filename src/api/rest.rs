// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All admin endpoints live under `/api/v1/`. Only `/api/v1/health` and
// `POST /webhook/:source` require no authentication; every other route
// requires a valid Bearer token via the `AuthBearer` extractor, the same
// split the teacher's `api/rest.rs` draws between public and authenticated
// routes.
//
// CORS is configured permissively for development; tighten `allowed_origins`
// in production.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::api::auth::AuthBearer;
use crate::app_state::AppState;
use crate::error::CoreError;
use crate::types::{StrategyMode, TradingMode};

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Public ──────────────────────────────────────────────────
        .route("/api/v1/health", get(health))
        .route("/webhook/:source", post(crate::webhook::handle_webhook))
        .route("/stream", get(crate::api::stream::stream_handler))
        // ── Authenticated ───────────────────────────────────────────
        .route("/api/v1/state", get(full_state))
        .route("/api/v1/accounts/:id", get(account))
        .route("/api/v1/accounts/:id/reset", post(reset_account))
        .route("/api/v1/positions/:account_id", get(positions))
        .route("/api/v1/violations", get(violations))
        .route("/api/v1/strategies", get(strategies))
        .route("/api/v1/strategies/:id/override", post(override_strategy))
        .route("/api/v1/control/kill", post(control_kill))
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Health (public)
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    state_version: u64,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let resp = HealthResponse {
        status: "ok",
        state_version: state.current_state_version(),
        server_time: chrono::Utc::now().timestamp_millis(),
    };
    Json(resp)
}

// =============================================================================
// Full state snapshot (authenticated)
// =============================================================================

async fn full_state(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.build_snapshot())
}

// =============================================================================
// Accounts
// =============================================================================

async fn account(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, CoreError> {
    state
        .account_snapshot(&id)
        .map(Json)
        .ok_or_else(|| CoreError::NotFound(format!("no such account {id}")))
}

async fn reset_account(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    state.paper_engine.reset_account(&id);
    state.increment_version();
    info!(account_id = %id, "account reset via admin API");
    (StatusCode::OK, Json(serde_json::json!({ "reset": true })))
}

// =============================================================================
// Positions
// =============================================================================

async fn positions(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<String>,
) -> impl IntoResponse {
    Json(state.positions_snapshot(&account_id))
}

// =============================================================================
// Violations
// =============================================================================

async fn violations(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.violations_snapshot())
}

// =============================================================================
// Strategies
// =============================================================================

async fn strategies(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.strategy_tracker.all_records())
}

#[derive(Debug, Deserialize)]
struct OverrideRequest {
    mode: StrategyMode,
    reason: String,
}

async fn override_strategy(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<OverrideRequest>,
) -> impl IntoResponse {
    state.strategy_tracker.set_override(&id, req.mode, &req.reason);
    state.increment_version();
    (StatusCode::OK, Json(serde_json::json!({ "strategyId": id, "mode": req.mode })))
}

// =============================================================================
// Control
// =============================================================================

async fn control_kill(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.runtime_config.write().trading_mode = TradingMode::Killed;
    state.increment_version();
    warn!("kill switch engaged via admin API");
    (StatusCode::OK, Json(serde_json::json!({ "tradingMode": "Killed" })))
}
