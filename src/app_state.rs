// =============================================================================
// Central Application State — Aurora Signal Router
// =============================================================================
//
// The single source of truth tying every engine together. All subsystems
// hold their own interior mutability (`parking_lot::RwLock` or an owning
// actor like `PaperEngine`); `AppState` just wires them up and exposes a
// snapshot for the dashboard API.
//
// Grounded on the teacher's `app_state.rs` — same atomic version counter,
// `Arc<RwLock<RuntimeConfig>>`, and `build_snapshot()` shape — generalized
// from a single-bot engine set to the router's nine components.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::broadcast::BroadcastHub;
use crate::coordinator::ExecutionCoordinator;
use crate::funded_rules::{FundedMetrics, FundedRuleEngine, Violation};
use crate::instrument::InstrumentRegistry;
use crate::ledger::AlertLedger;
use crate::models::Alert;
use crate::paper_engine::{Account, PaperEngine, PerformanceMetrics, Position};
use crate::router::RoutingController;
use crate::runtime_config::RuntimeConfig;
use crate::strategy_tracker::{StrategyRecord, StrategyTracker};
use crate::webhook::{WebhookRateLimiter, WebhookSecrets};

/// Bound on the alert intake channel between `webhook.rs` and the
/// coordinator. A full channel applies backpressure to `handle_webhook`
/// rather than dropping an accepted alert silently.
const ALERT_CHANNEL_CAPACITY: usize = 1024;

/// Central application state shared across all async tasks via `Arc<AppState>`.
pub struct AppState {
    /// Monotonically increasing version counter, bumped on every meaningful
    /// mutation so the broadcast feed can detect staleness.
    pub state_version: AtomicU64,

    pub runtime_config: Arc<RwLock<RuntimeConfig>>,

    pub instruments: Arc<InstrumentRegistry>,
    pub paper_engine: Arc<PaperEngine>,
    pub funded_rules: Arc<FundedRuleEngine>,
    pub strategy_tracker: Arc<StrategyTracker>,
    pub broadcast: Arc<BroadcastHub>,
    pub alert_ledger: Arc<AlertLedger>,
    pub router: Arc<RoutingController>,
    pub coordinator: Arc<ExecutionCoordinator>,

    pub webhook_secrets: WebhookSecrets,
    pub webhook_rate_limiter: WebhookRateLimiter,

    /// The only way an accepted alert reaches the coordinator.
    pub alert_tx: mpsc::Sender<Alert>,

    pub start_time: std::time::Instant,
}

impl AppState {
    /// Construct a new `AppState` from the given runtime configuration,
    /// opening the alert ledger and wiring every engine together. Returns
    /// the state plus the receiving half of the alert channel, which the
    /// caller spawns `ExecutionCoordinator::run` against.
    pub async fn new(config: RuntimeConfig) -> Result<(Self, mpsc::Receiver<Alert>)> {
        let instruments = Arc::new(InstrumentRegistry::new());
        let paper_engine = Arc::new(PaperEngine::new(config.simulator.clone()));
        let funded_rules = Arc::new(FundedRuleEngine::new());
        for rules in &config.funded_accounts {
            funded_rules.register(rules.clone());
        }
        let strategy_tracker = Arc::new(StrategyTracker::new());
        let broadcast = Arc::new(BroadcastHub::new());
        let alert_ledger = Arc::new(AlertLedger::open(&config.ledger_path).await?);

        let router = Arc::new(RoutingController::new(
            instruments.clone(),
            funded_rules.clone(),
            strategy_tracker.clone(),
            paper_engine.clone(),
        ));

        let coordinator = Arc::new(ExecutionCoordinator::new(
            router.clone(),
            paper_engine.clone(),
            funded_rules.clone(),
            strategy_tracker.clone(),
            alert_ledger.clone(),
            broadcast.clone(),
        ));

        let webhook_secrets = WebhookSecrets::new(config.webhook_secrets.clone());
        let webhook_rate_limiter =
            WebhookRateLimiter::new(config.rate_limit_capacity, config.rate_limit_refill_per_sec);

        let (alert_tx, alert_rx) = mpsc::channel(ALERT_CHANNEL_CAPACITY);

        let state = Self {
            state_version: AtomicU64::new(1),
            runtime_config: Arc::new(RwLock::new(config)),
            instruments,
            paper_engine,
            funded_rules,
            strategy_tracker,
            broadcast,
            alert_ledger,
            router,
            coordinator,
            webhook_secrets,
            webhook_rate_limiter,
            alert_tx,
            start_time: std::time::Instant::now(),
        };

        Ok((state, alert_rx))
    }

    /// Atomically increment the state version. Call this after every
    /// meaningful mutation so broadcast clients can tell fresh data is
    /// available.
    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    /// Build a serialisable snapshot of engine-wide state for `GET
    /// /api/v1/state` (spec.md §6).
    pub fn build_snapshot(&self) -> StateSnapshot {
        let now = Utc::now();
        let config = self.runtime_config.read();

        StateSnapshot {
            state_version: self.current_state_version(),
            server_time: now.timestamp_millis(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            trading_mode: config.trading_mode.to_string(),
            run_mode: config.run_mode.to_string(),
            broadcast_client_count: self.broadcast.client_count(),
            strategies: self.strategy_tracker.all_records(),
        }
    }

    /// Account snapshot combining the simulator's bookkeeping with funded
    /// rule metrics when the account id has a registered rule set — mirrors
    /// the teacher's practice of merging engine-owned state only at the
    /// snapshot boundary, never inside an engine.
    pub fn account_snapshot(&self, account_id: &str) -> Option<AccountSnapshot> {
        let account = self.paper_engine.account_snapshot(account_id)?;
        Some(AccountSnapshot {
            account,
            funded_metrics: self.funded_rules.metrics(account_id),
            performance: self.paper_engine.performance_metrics(account_id),
        })
    }

    pub fn positions_snapshot(&self, account_id: &str) -> Vec<Position> {
        self.paper_engine.positions_snapshot(account_id)
    }

    /// Recent violations across every registered funded account, newest
    /// first (spec.md §6 `GET /api/v1/violations`).
    pub fn violations_snapshot(&self) -> Vec<Violation> {
        self.funded_rules.all_violations()
    }
}

/// Top-level engine state snapshot sent to the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub state_version: u64,
    pub server_time: i64,
    pub uptime_seconds: u64,
    pub trading_mode: String,
    pub run_mode: String,
    pub broadcast_client_count: usize,
    pub strategies: Vec<StrategyRecord>,
}

/// A single account's merged snapshot for `GET /api/v1/accounts/:id`.
#[derive(Debug, Clone, Serialize)]
pub struct AccountSnapshot {
    pub account: Account,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub funded_metrics: Option<FundedMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub performance: Option<PerformanceMetrics>,
}
