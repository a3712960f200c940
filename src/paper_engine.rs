// =============================================================================
// Paper-trading simulator engine (C3)
// =============================================================================
//
// The only concrete `BrokerAdapter` implementor in this core. Owns accounts,
// positions, orders and fills for every `simulator`-kind account, matches
// resting orders against a per-symbol synthetic quote on each tick, and
// tracks realised PnL with side-aware average-cost bookkeeping.
//
// Grounded on the teacher's `position_engine.rs` (RwLock<Vec<_>>, avg-cost
// direction math, open/close/query shape) and `risk.rs` (peak-equity and
// drawdown tracking for the performance snapshot).
// =============================================================================

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::broker::{BrokerAdapter, BrokerUpdate, OrderAck, PlaceOrderRequest, Rejected};
use crate::types::{OrderStatus, OrderType, Side, TimeInForce};

/// Configuration for a single simulator account (spec.md §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorConfig {
    #[serde(default = "default_initial_balance")]
    pub initial_balance: f64,
    #[serde(default = "default_buying_power_multiplier")]
    pub buying_power_multiplier: f64,
    #[serde(default)]
    pub commission_per_side: f64,
    #[serde(default)]
    pub slippage_bps: f64,
    #[serde(default)]
    pub partial_fill_probability: f64,
    #[serde(default)]
    pub reject_on_insufficient_buying_power: bool,
    #[serde(default)]
    pub market_hours_only: bool,
}

fn default_initial_balance() -> f64 {
    100_000.0
}

fn default_buying_power_multiplier() -> f64 {
    1.0
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            initial_balance: default_initial_balance(),
            buying_power_multiplier: default_buying_power_multiplier(),
            commission_per_side: 0.0,
            slippage_bps: 0.0,
            partial_fill_probability: 0.0,
            reject_on_insufficient_buying_power: true,
            market_hours_only: false,
        }
    }
}

/// A simulated trading account. Unlike the teacher's single-global-capital
/// `RiskEngine`, the paper engine owns an arbitrary number of these, keyed by
/// account id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub cash_balance: f64,
    pub buying_power: f64,
    pub equity: f64,
    pub peak_equity: f64,
    pub realized_pnl_today: f64,
    pub opened_at: DateTime<Utc>,
}

/// A side-aware position in a single symbol within one account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub account_id: String,
    pub symbol: String,
    /// Positive for long, negative for short, zero when flat.
    pub quantity: f64,
    pub avg_cost: f64,
    pub realized_pnl: f64,
    #[serde(default)]
    pub unrealized_pnl: f64,
    #[serde(default)]
    pub last_price: f64,
    /// Contract multiplier for this symbol, set from the order that opened
    /// (or most recently touched) the position. ES = 50.0, NQ = 20.0, etc.
    /// (spec.md §3 `Instrument.multiplier`).
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_multiplier() -> f64 {
    1.0
}

impl Position {
    fn flat(account_id: &str, symbol: &str) -> Self {
        Self {
            account_id: account_id.to_string(),
            symbol: symbol.to_string(),
            quantity: 0.0,
            avg_cost: 0.0,
            realized_pnl: 0.0,
            unrealized_pnl: 0.0,
            last_price: 0.0,
            multiplier: default_multiplier(),
        }
    }

    fn is_flat(&self) -> bool {
        self.quantity.abs() < f64::EPSILON
    }
}

/// A simulator-resident order (spec.md §3 `Order`). `side` is always a
/// concrete `Buy`/`Sell` by the time an order reaches the engine — the
/// router resolves an inbound `close` alert against the existing position
/// before materializing the order (spec.md §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub account_id: String,
    pub client_order_tag: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: f64,
    pub multiplier: f64,
    pub filled_quantity: f64,
    pub limit_price: Option<f64>,
    pub stop_price: Option<f64>,
    pub time_in_force: TimeInForce,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

/// A single fill against an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub id: Uuid,
    pub order_id: String,
    pub price: f64,
    pub quantity: f64,
    pub filled_at: DateTime<Utc>,
}

/// Performance metrics derived from closed trades, refreshed on demand
/// (spec.md §4.3), following the teacher's `RiskState` snapshot shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub trade_count: u32,
    pub win_count: u32,
    pub loss_count: u32,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub max_drawdown: f64,
}

struct AccountState {
    account: Account,
    positions: HashMap<String, Position>,
    orders: HashMap<String, Order>,
    fills: Vec<Fill>,
    closed_trade_pnls: Vec<f64>,
    quotes: HashMap<String, f64>,
}

impl AccountState {
    fn new(id: &str, cfg: &SimulatorConfig) -> Self {
        Self {
            account: Account {
                id: id.to_string(),
                cash_balance: cfg.initial_balance,
                buying_power: cfg.initial_balance * cfg.buying_power_multiplier,
                equity: cfg.initial_balance,
                peak_equity: cfg.initial_balance,
                realized_pnl_today: 0.0,
                opened_at: Utc::now(),
            },
            positions: HashMap::new(),
            orders: HashMap::new(),
            fills: Vec::new(),
            closed_trade_pnls: Vec::new(),
            quotes: HashMap::new(),
        }
    }
}

/// The paper-trading broker adapter. One instance serves every simulator
/// account; accounts are created lazily on first order.
pub struct PaperEngine {
    config: SimulatorConfig,
    accounts: RwLock<HashMap<String, AccountState>>,
    updates: RwLock<Vec<BrokerUpdate>>,
}

impl PaperEngine {
    pub fn new(config: SimulatorConfig) -> Self {
        Self {
            config,
            accounts: RwLock::new(HashMap::new()),
            updates: RwLock::new(Vec::new()),
        }
    }

    fn ensure_account<'a>(
        accounts: &'a mut HashMap<String, AccountState>,
        account_id: &str,
        cfg: &SimulatorConfig,
    ) -> &'a mut AccountState {
        accounts
            .entry(account_id.to_string())
            .or_insert_with(|| AccountState::new(account_id, cfg))
    }

    /// Place an order for a specific account. The trait-level `place_order`
    /// has no account parameter since `BrokerAdapter` is account-agnostic by
    /// contract; the router calls this directly when the destination is a
    /// simulator account (spec.md §4.2).
    pub fn place_order_for_account(
        &self,
        account_id: &str,
        req: PlaceOrderRequest,
    ) -> Result<OrderAck, Rejected> {
        let mut accounts = self.accounts.write();
        let state = Self::ensure_account(&mut accounts, account_id, &self.config);

        if self.config.reject_on_insufficient_buying_power {
            let quote = *state.quotes.get(&req.symbol).unwrap_or(&0.0);
            let notional = quote.max(req.limit_price.unwrap_or(quote)) * req.quantity * req.multiplier;
            if notional > state.account.buying_power && notional > 0.0 {
                warn!(account_id, symbol = %req.symbol, notional, buying_power = state.account.buying_power, "order rejected: insufficient buying power");
                return Err(Rejected {
                    reason_code: "INSUFFICIENT_BUYING_POWER".to_string(),
                    detail: format!(
                        "notional {notional:.2} exceeds buying power {:.2}",
                        state.account.buying_power
                    ),
                    retryable: false,
                });
            }
        }

        let order_id = Uuid::new_v4().to_string();
        let order = Order {
            id: order_id.clone(),
            account_id: account_id.to_string(),
            client_order_tag: req.client_order_tag.clone(),
            symbol: req.symbol.clone(),
            side: req.side,
            order_type: req.order_type,
            quantity: req.quantity,
            multiplier: req.multiplier,
            filled_quantity: 0.0,
            limit_price: req.limit_price,
            stop_price: req.stop_price,
            time_in_force: req.time_in_force,
            status: OrderStatus::Pending,
            created_at: Utc::now(),
        };

        info!(account_id, order_id = %order_id, symbol = %order.symbol, side = %order.side, qty = order.quantity, "order accepted by simulator");

        let ack = OrderAck {
            broker_order_id: order_id.clone(),
            status: OrderStatus::Working,
            accepted_at: order.created_at,
        };

        let mut order = order;
        order.status = OrderStatus::Working;
        state.orders.insert(order_id, order);

        self.try_match(state, &req.symbol);

        Ok(ack)
    }

    pub fn cancel_order_for_account(
        &self,
        account_id: &str,
        broker_order_id: &str,
    ) -> Result<(), Rejected> {
        let mut accounts = self.accounts.write();
        let Some(state) = accounts.get_mut(account_id) else {
            return Err(Rejected {
                reason_code: "UNKNOWN_ACCOUNT".to_string(),
                detail: format!("no such account {account_id}"),
                retryable: false,
            });
        };
        let Some(order) = state.orders.get_mut(broker_order_id) else {
            return Err(Rejected {
                reason_code: "UNKNOWN_ORDER".to_string(),
                detail: format!("no such order {broker_order_id}"),
                retryable: false,
            });
        };
        if order.status.is_terminal() {
            return Err(Rejected {
                reason_code: "ALREADY_TERMINAL".to_string(),
                detail: format!("order already {}", order.status),
                retryable: false,
            });
        }
        order.status = OrderStatus::Cancelled;
        info!(account_id, broker_order_id, "order cancelled");
        Ok(())
    }

    /// Emergency flatten: cancel every working order and close every open
    /// position at market (spec.md §4.4, §4.9 "the coordinator may issue
    /// synthetic close orders for all open positions of the affected account
    /// via the owning adapter"). Returns the acks for the close orders placed.
    pub fn flatten_account(&self, account_id: &str) -> Vec<OrderAck> {
        let close_requests: Vec<PlaceOrderRequest> = {
            let mut accounts = self.accounts.write();
            let Some(state) = accounts.get_mut(account_id) else {
                return Vec::new();
            };
            for order in state.orders.values_mut() {
                if !order.status.is_terminal() {
                    order.status = OrderStatus::Cancelled;
                }
            }
            state
                .positions
                .values()
                .filter(|p| p.quantity.abs() > f64::EPSILON)
                .map(|p| PlaceOrderRequest {
                    client_order_tag: format!("flatten-{}", p.symbol),
                    symbol: p.symbol.clone(),
                    side: if p.quantity > 0.0 { Side::Sell } else { Side::Buy },
                    order_type: OrderType::Market,
                    quantity: p.quantity.abs(),
                    multiplier: p.multiplier,
                    limit_price: None,
                    stop_price: None,
                    time_in_force: TimeInForce::Day,
                })
                .collect()
        };

        warn!(account_id, count = close_requests.len(), "emergency flatten: closing all open positions");
        close_requests
            .into_iter()
            .filter_map(|req| self.place_order_for_account(account_id, req).ok())
            .collect()
    }

    /// Feed a fresh quote for `symbol` into every account, then attempt to
    /// match any resting orders against it. Called by the simulator tick
    /// loop in `main.rs`.
    pub fn tick_quote(&self, symbol: &str, price: f64) {
        let mut accounts = self.accounts.write();
        for state in accounts.values_mut() {
            state.quotes.insert(symbol.to_string(), price);
            if let Some(pos) = state.positions.get_mut(symbol) {
                pos.last_price = price;
                pos.unrealized_pnl = (price - pos.avg_cost) * pos.quantity * pos.multiplier;
            }
            Self::recompute_buying_power(state, &self.config);
            self.try_match(state, symbol);
        }
    }

    /// Recompute buying power from scratch: `cash * buyingPowerMultiplier -
    /// Σ(|netQty| · markPrice · multiplier)` over every open position
    /// (spec.md §4.3). Called after every fill and quote tick so the figure
    /// never drifts from the positions it is meant to gate against.
    fn recompute_buying_power(state: &mut AccountState, cfg: &SimulatorConfig) {
        let used: f64 = state
            .positions
            .values()
            .map(|p| {
                let mark = if p.last_price > 0.0 { p.last_price } else { p.avg_cost };
                p.quantity.abs() * mark * p.multiplier
            })
            .sum();
        state.account.buying_power = state.account.cash_balance * cfg.buying_power_multiplier - used;
    }

    /// Generate the next synthetic quote for `symbol` given the last price,
    /// as a simple random walk. Used by the simulator tick loop when no
    /// external quote feed is wired up (spec.md §4.3).
    pub fn random_walk_quote(last_price: f64, volatility_bps: f64) -> f64 {
        let mut rng = rand::thread_rng();
        let drift: f64 = rng.gen_range(-1.0..=1.0);
        let change = last_price * (volatility_bps / 10_000.0) * drift;
        (last_price + change).max(0.01)
    }

    fn try_match(&self, state: &mut AccountState, symbol: &str) {
        let Some(&quote) = state.quotes.get(symbol) else {
            return;
        };
        let cfg = &self.config;

        let order_ids: Vec<String> = state
            .orders
            .iter()
            .filter(|(_, o)| o.symbol == symbol && !o.status.is_terminal())
            .map(|(id, _)| id.clone())
            .collect();

        for id in order_ids {
            let should_fill = {
                let order = &state.orders[&id];
                Self::evaluates_fillable(order, quote)
            };
            if !should_fill {
                continue;
            }

            let (remaining, side, order_symbol, account_id, client_order_tag, tif, order_type) = {
                let order = &state.orders[&id];
                (
                    order.quantity - order.filled_quantity,
                    order.side,
                    order.symbol.clone(),
                    order.account_id.clone(),
                    order.client_order_tag.clone(),
                    order.time_in_force,
                    order.order_type,
                )
            };

            let partial = cfg.partial_fill_probability > 0.0
                && rand::thread_rng().gen_bool(cfg.partial_fill_probability.clamp(0.0, 1.0))
                && tif != TimeInForce::Fok
                && tif != TimeInForce::Ioc;

            let fill_qty = if partial {
                (remaining * 0.5).max(f64::EPSILON)
            } else {
                remaining
            };

            let slippage = quote * (cfg.slippage_bps / 10_000.0) * side.sign();
            let fill_price = quote + slippage;

            let fill = Fill {
                id: Uuid::new_v4(),
                order_id: id.clone(),
                price: fill_price,
                quantity: fill_qty,
                filled_at: Utc::now(),
            };

            let realized_pnl_delta = Self::apply_fill(state, &id, &fill, cfg);

            debug!(account_id = %account_id, order_id = %id, symbol = %order_symbol, fill_qty, fill_price, "order filled by simulator");

            self.updates.write().push(BrokerUpdate::Fill {
                broker_order_id: id.clone(),
                fill_id: fill.id,
                price: fill.price,
                quantity: fill.quantity,
                filled_at: fill.filled_at,
                realized_pnl_delta,
            });

            state.fills.push(fill);
            let _ = (order_type, client_order_tag);

            if tif == TimeInForce::Ioc || tif == TimeInForce::Fok {
                if let Some(order) = state.orders.get_mut(&id) {
                    if order.status != OrderStatus::Filled {
                        order.status = OrderStatus::Cancelled;
                    }
                }
            }
        }
    }

    fn evaluates_fillable(order: &Order, quote: f64) -> bool {
        match order.order_type {
            OrderType::Market => true,
            OrderType::Limit => match order.limit_price {
                Some(limit) => match order.side {
                    Side::Buy => quote <= limit,
                    Side::Sell | Side::Close => quote >= limit,
                },
                None => false,
            },
            OrderType::Stop => match order.stop_price {
                Some(stop) => match order.side {
                    Side::Buy => quote >= stop,
                    Side::Sell | Side::Close => quote <= stop,
                },
                None => false,
            },
            OrderType::StopLimit => match (order.stop_price, order.limit_price) {
                (Some(stop), Some(limit)) => {
                    let stop_triggered = match order.side {
                        Side::Buy => quote >= stop,
                        Side::Sell | Side::Close => quote <= stop,
                    };
                    stop_triggered
                        && match order.side {
                            Side::Buy => quote <= limit,
                            Side::Sell | Side::Close => quote >= limit,
                        }
                }
                _ => false,
            },
        }
    }

    /// Apply a fill's order-status update, position bookkeeping, and cash
    /// settlement. Cash is debited/credited by the fill's full signed
    /// notional (`price · quantity · multiplier`, negative for a buy,
    /// positive for a sell/close) plus commission on every fill, not only on
    /// a closing fill — this is what makes `cash_balance` satisfy the
    /// cash-conservation invariant (spec.md §8) across a full round trip:
    /// the notional paid to open and the notional received on close net out
    /// to exactly the realized PnL, leaving commission as the only residual.
    /// Returns the realized PnL this fill contributed (zero unless it closed
    /// or reduced an existing position), for the caller to feed into the
    /// funded rule engine's per-fill metrics recompute.
    fn apply_fill(state: &mut AccountState, order_id: &str, fill: &Fill, cfg: &SimulatorConfig) -> f64 {
        let order = state.orders.get_mut(order_id).expect("order exists");
        order.filled_quantity += fill.quantity;
        let new_status = if order.filled_quantity + f64::EPSILON >= order.quantity {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        if order.status.can_transition_to(new_status) {
            order.status = new_status;
        }

        let side = order.side;
        let symbol = order.symbol.clone();
        let account_id = order.account_id.clone();
        let multiplier = order.multiplier;

        let pos = state
            .positions
            .entry(symbol.clone())
            .or_insert_with(|| Position::flat(&account_id, &symbol));
        pos.multiplier = multiplier;

        let effective_sign = if side == Side::Close {
            -pos.quantity.signum()
        } else {
            side.sign()
        };
        let signed_qty = fill.quantity * effective_sign;
        let realized_before = pos.realized_pnl;
        Self::apply_to_position(pos, signed_qty, fill.price, multiplier);
        let realized_pnl_delta = pos.realized_pnl - realized_before;

        let notional = fill.price * fill.quantity * multiplier;
        state.account.cash_balance -= effective_sign * notional;
        state.account.cash_balance -= cfg.commission_per_side;

        state.account.realized_pnl_today = state
            .positions
            .values()
            .map(|p| p.realized_pnl)
            .sum::<f64>()
            + state.closed_trade_pnls.iter().sum::<f64>();

        let unrealized: f64 = state.positions.values().map(|p| p.unrealized_pnl).sum();
        state.account.equity = state.account.cash_balance + unrealized;
        if state.account.equity > state.account.peak_equity {
            state.account.peak_equity = state.account.equity;
        }

        if pos.is_flat() {
            state.closed_trade_pnls.push(pos.realized_pnl);
            pos.avg_cost = 0.0;
        }

        Self::recompute_buying_power(state, cfg);
        realized_pnl_delta
    }

    /// Apply a signed fill quantity to a position using average-cost
    /// bookkeeping: same-direction fills extend the average cost, opposite
    /// fills realize PnL against the existing average cost first. Realized
    /// PnL is scaled by the instrument multiplier (spec.md §4.3).
    fn apply_to_position(pos: &mut Position, signed_qty: f64, price: f64, multiplier: f64) {
        if pos.quantity == 0.0 || pos.quantity.signum() == signed_qty.signum() {
            let total_cost = pos.avg_cost * pos.quantity + price * signed_qty;
            pos.quantity += signed_qty;
            pos.avg_cost = if pos.quantity.abs() > f64::EPSILON {
                total_cost / pos.quantity
            } else {
                0.0
            };
        } else {
            let closing_qty = signed_qty.abs().min(pos.quantity.abs());
            let direction = pos.quantity.signum();
            pos.realized_pnl += direction * (price - pos.avg_cost) * closing_qty * multiplier;
            pos.quantity += signed_qty;
            if pos.quantity.signum() != direction && pos.quantity.abs() > f64::EPSILON {
                // Position flipped sides; the remainder opens at the fill price.
                pos.avg_cost = price;
            } else if pos.quantity.abs() <= f64::EPSILON {
                pos.quantity = 0.0;
                pos.avg_cost = 0.0;
            }
        }
        pos.last_price = price;
    }

    pub fn account_snapshot(&self, account_id: &str) -> Option<Account> {
        self.accounts.read().get(account_id).map(|s| s.account.clone())
    }

    pub fn positions_snapshot(&self, account_id: &str) -> Vec<Position> {
        self.accounts
            .read()
            .get(account_id)
            .map(|s| s.positions.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn position_for(&self, account_id: &str, symbol: &str) -> Option<Position> {
        self.accounts
            .read()
            .get(account_id)
            .and_then(|s| s.positions.get(symbol).cloned())
    }

    /// Last quote seen for `symbol` within `account_id`'s view, used by the
    /// router to supply a `referencePrice` to the funded-account rule engine
    /// (spec.md §4.4 worst-case-loss checks).
    pub fn quote_for(&self, account_id: &str, symbol: &str) -> Option<f64> {
        self.accounts
            .read()
            .get(account_id)
            .and_then(|s| s.quotes.get(symbol).copied())
    }

    /// Compute performance metrics from the account's closed-trade PnL
    /// history, following the teacher's `RiskState` percentage-metrics idiom.
    pub fn performance_metrics(&self, account_id: &str) -> Option<PerformanceMetrics> {
        let accounts = self.accounts.read();
        let state = accounts.get(account_id)?;
        let pnls = &state.closed_trade_pnls;

        let wins: Vec<f64> = pnls.iter().copied().filter(|p| *p > 0.0).collect();
        let losses: Vec<f64> = pnls.iter().copied().filter(|p| *p < 0.0).collect();

        let gross_profit: f64 = wins.iter().sum();
        let gross_loss: f64 = losses.iter().sum::<f64>().abs();

        let drawdown = if state.account.peak_equity > 0.0 {
            (state.account.peak_equity - state.account.equity) / state.account.peak_equity
        } else {
            0.0
        };

        Some(PerformanceMetrics {
            trade_count: pnls.len() as u32,
            win_count: wins.len() as u32,
            loss_count: losses.len() as u32,
            win_rate: if pnls.is_empty() {
                0.0
            } else {
                wins.len() as f64 / pnls.len() as f64
            },
            profit_factor: if gross_loss > 0.0 {
                gross_profit / gross_loss
            } else if gross_profit > 0.0 {
                f64::INFINITY
            } else {
                0.0
            },
            avg_win: if wins.is_empty() { 0.0 } else { gross_profit / wins.len() as f64 },
            avg_loss: if losses.is_empty() { 0.0 } else { gross_loss / losses.len() as f64 },
            max_drawdown: drawdown.max(0.0),
        })
    }

    /// Reset an account back to its starting balance, flat positions and
    /// empty history (spec.md §6 `POST /accounts/:id/reset`).
    pub fn reset_account(&self, account_id: &str) {
        let mut accounts = self.accounts.write();
        accounts.insert(account_id.to_string(), AccountState::new(account_id, &self.config));
        info!(account_id, "simulator account reset");
    }
}

#[async_trait]
impl BrokerAdapter for PaperEngine {
    fn name(&self) -> &str {
        "simulator"
    }

    async fn place_order(&self, req: PlaceOrderRequest) -> Result<OrderAck, Rejected> {
        // The trait contract is account-agnostic; simulator accounts are
        // addressed via `place_order_for_account` by the router, which knows
        // the destination account id. This inherent method exists so
        // `PaperEngine` satisfies `BrokerAdapter` for registries that only
        // need a single default account (used by tests and `/control/kill`
        // style broad operations).
        self.place_order_for_account("default", req)
    }

    async fn cancel_order(&self, broker_order_id: &str) -> Result<(), Rejected> {
        self.cancel_order_for_account("default", broker_order_id)
    }

    async fn poll_updates(&self) -> Vec<BrokerUpdate> {
        std::mem::take(&mut *self.updates.write())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn place(symbol: &str, side: Side, qty: f64) -> PlaceOrderRequest {
        PlaceOrderRequest {
            client_order_tag: Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            quantity: qty,
            multiplier: 1.0,
            limit_price: None,
            stop_price: None,
            time_in_force: TimeInForce::Day,
        }
    }

    #[test]
    fn market_order_fills_against_quote() {
        let engine = PaperEngine::new(SimulatorConfig::default());
        engine.tick_quote("ES", 5000.0);
        let ack = engine
            .place_order_for_account("acct-1", place("ES", Side::Buy, 2.0))
            .unwrap();
        assert_eq!(ack.status, OrderStatus::Working);

        let pos = engine.position_for("acct-1", "ES").unwrap();
        assert_eq!(pos.quantity, 2.0);
        assert_eq!(pos.avg_cost, 5000.0);
    }

    #[test]
    fn opposite_fill_realizes_pnl_at_avg_cost() {
        let engine = PaperEngine::new(SimulatorConfig::default());
        engine.tick_quote("ES", 5000.0);
        engine
            .place_order_for_account("acct-1", place("ES", Side::Buy, 2.0))
            .unwrap();

        engine.tick_quote("ES", 5010.0);
        engine
            .place_order_for_account("acct-1", place("ES", Side::Sell, 2.0))
            .unwrap();

        let pos = engine.position_for("acct-1", "ES").unwrap();
        assert!(pos.is_flat());
        assert!((pos.realized_pnl - 20.0).abs() < 1e-6);
    }

    #[test]
    fn insufficient_buying_power_is_rejected() {
        let mut cfg = SimulatorConfig::default();
        cfg.initial_balance = 100.0;
        cfg.buying_power_multiplier = 1.0;
        cfg.reject_on_insufficient_buying_power = true;
        let engine = PaperEngine::new(cfg);
        engine.tick_quote("ES", 5000.0);

        let result = engine.place_order_for_account("acct-1", place("ES", Side::Buy, 10.0));
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().reason_code, "INSUFFICIENT_BUYING_POWER");
    }

    #[test]
    fn reset_account_clears_history() {
        let engine = PaperEngine::new(SimulatorConfig::default());
        engine.tick_quote("ES", 5000.0);
        engine
            .place_order_for_account("acct-1", place("ES", Side::Buy, 1.0))
            .unwrap();
        assert!(engine.position_for("acct-1", "ES").is_some());

        engine.reset_account("acct-1");
        let pos = engine.position_for("acct-1", "ES");
        assert!(pos.is_none());
        let account = engine.account_snapshot("acct-1").unwrap();
        assert_eq!(account.cash_balance, SimulatorConfig::default().initial_balance);
    }

    #[test]
    fn random_walk_quote_stays_positive() {
        let next = PaperEngine::random_walk_quote(0.02, 500.0);
        assert!(next > 0.0);
    }

    #[test]
    fn performance_metrics_tracks_win_rate() {
        let engine = PaperEngine::new(SimulatorConfig::default());
        engine.tick_quote("ES", 100.0);
        engine.place_order_for_account("acct-1", place("ES", Side::Buy, 1.0)).unwrap();
        engine.tick_quote("ES", 110.0);
        engine.place_order_for_account("acct-1", place("ES", Side::Sell, 1.0)).unwrap();

        let metrics = engine.performance_metrics("acct-1").unwrap();
        assert_eq!(metrics.trade_count, 1);
        assert_eq!(metrics.win_count, 1);
        assert_eq!(metrics.win_rate, 1.0);
    }

    #[test]
    fn cash_conservation_holds_after_round_trip() {
        let engine = PaperEngine::new(SimulatorConfig::default());
        let mut req_buy = place("ES", Side::Buy, 1.0);
        req_buy.multiplier = 50.0;
        engine.tick_quote("ES", 5000.0);
        engine.place_order_for_account("acct-1", req_buy).unwrap();

        let mut req_sell = place("ES", Side::Sell, 1.0);
        req_sell.multiplier = 50.0;
        engine.tick_quote("ES", 5010.0);
        engine.place_order_for_account("acct-1", req_sell).unwrap();

        let account = engine.account_snapshot("acct-1").unwrap();
        let closed_pnl: f64 = {
            let accounts = engine.accounts.read();
            accounts["acct-1"].closed_trade_pnls.iter().sum()
        };
        let initial = SimulatorConfig::default().initial_balance;
        assert!((account.cash_balance - initial - closed_pnl).abs() < 1e-6);
        assert!((closed_pnl - 500.0).abs() < 1e-6);
    }

    #[test]
    fn multiplier_scales_realized_pnl() {
        let engine = PaperEngine::new(SimulatorConfig::default());
        let mut req_buy = place("ES", Side::Buy, 2.0);
        req_buy.multiplier = 50.0;
        engine.tick_quote("ES", 5000.0);
        engine.place_order_for_account("acct-1", req_buy).unwrap();

        let mut req_sell = place("ES", Side::Sell, 2.0);
        req_sell.multiplier = 50.0;
        engine.tick_quote("ES", 5010.0);
        engine.place_order_for_account("acct-1", req_sell).unwrap();

        let pos = engine.position_for("acct-1", "ES").unwrap();
        assert!(pos.is_flat());
        assert!((pos.realized_pnl - 1000.0).abs() < 1e-6);
    }
}
