// =============================================================================
// Funded-account rule engine (C4)
// =============================================================================
//
// Circuit-breaker style pre-trade gate for prop-firm funded accounts.
// Grounded almost directly on the teacher's `risk.rs` — same `Inner` +
// `RwLock` + `maybe_reset_daily` shape — generalized from one global account
// to an arbitrary number of funded accounts, each with its own rule set and
// running metrics (spec.md §4.4).
//
// Unlike the teacher's `can_trade`, which short-circuits on the first
// tripped breaker, `validate` runs every check and returns every violation,
// because a funded-account audit needs the full picture, not just the first
// hit (spec.md §4.4 "validate ... evaluates all six checks; it does not
// short-circuit").
// =============================================================================

use chrono::{NaiveDate, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Configuration limits for one funded account (spec.md §3 `FundedAccountRules`,
/// §4.4). Immutable per funded period — a new evaluation period is a new
/// record, not a mutation of this one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundedAccountRules {
    pub account_id: String,
    pub starting_balance: f64,
    pub max_daily_loss: f64,
    pub trailing_drawdown: f64,
    pub max_contracts: u32,
    #[serde(default)]
    pub restricted_symbols: Vec<String>,
    #[serde(default)]
    pub allow_overnight: bool,
    /// Session window admitting new trades, as `(open_hour_utc,
    /// close_hour_utc)` — same midnight-wrap convention as
    /// `instrument::Instrument::session`. `None` means no window
    /// restriction beyond the instrument's own session.
    #[serde(default)]
    pub trading_window: Option<(u32, u32)>,
    /// Fraction of `quantity · multiplier · referencePrice` treated as the
    /// worst-case loss of a proposed trade for the `DAILY_LOSS`/`DRAWDOWN`
    /// probes (spec.md §4.4 step 5).
    #[serde(default = "default_risk_pct")]
    pub worst_case_risk_pct: f64,
}

fn default_risk_pct() -> f64 {
    0.01
}

/// Rolling metrics tracked against a [`FundedAccountRules`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundedMetrics {
    pub account_id: String,
    pub current_date: NaiveDate,
    pub daily_pnl: f64,
    pub peak_equity: f64,
    pub current_equity: f64,
    pub daily_trades_count: u32,
    pub flattened: bool,
}

/// A single rule violation (spec.md §3 `Violation`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub account_id: String,
    pub rule: String,
    pub detail: String,
    pub detected_at: chrono::DateTime<Utc>,
}

/// Cap on how many violations a single account retains for the audit
/// surface (spec.md §6 `GET /api/v1/violations`).
const MAX_RETAINED_VIOLATIONS: usize = 200;

struct Inner {
    rules: FundedAccountRules,
    metrics: FundedMetrics,
    violations: Vec<Violation>,
}

/// Owns the rule set and rolling metrics for every funded account. Each
/// account's state is independent; there is no cross-account sharing, the
/// same way the teacher's single `RiskEngine` owns one account's state.
pub struct FundedRuleEngine {
    accounts: RwLock<std::collections::HashMap<String, Inner>>,
}

impl FundedRuleEngine {
    pub fn new() -> Self {
        Self {
            accounts: RwLock::new(std::collections::HashMap::new()),
        }
    }

    /// Register (or replace) the rule set for a funded account.
    pub fn register(&self, rules: FundedAccountRules) {
        let today = Utc::now().date_naive();
        let metrics = FundedMetrics {
            account_id: rules.account_id.clone(),
            current_date: today,
            daily_pnl: 0.0,
            peak_equity: rules.starting_balance,
            current_equity: rules.starting_balance,
            daily_trades_count: 0,
            flattened: false,
        };
        info!(account_id = %rules.account_id, "funded account rule set registered");
        self.accounts
            .write()
            .insert(rules.account_id.clone(), Inner { rules, metrics, violations: Vec::new() });
    }

    /// Run all six pre-trade checks against a proposed trade and return
    /// every violation found — never short-circuits, so the caller sees the
    /// full picture in one pass (spec.md §4.4). An empty vec means the trade
    /// is allowed. Unknown accounts are always allowed — funded rules are
    /// opt-in per account.
    ///
    /// `open_contracts` is the account's current open contract count in
    /// `symbol` before this trade; `multiplier`/`reference_price` come from
    /// the instrument registry and the latest quote respectively, and feed
    /// the worst-case-loss probe (`quantity · multiplier · referencePrice ·
    /// worst_case_risk_pct`) used by both the `DAILY_LOSS` and `DRAWDOWN`
    /// checks.
    #[allow(clippy::too_many_arguments)]
    pub fn validate(
        &self,
        account_id: &str,
        symbol: &str,
        open_contracts: f64,
        proposed_quantity: f64,
        multiplier: f64,
        reference_price: f64,
        ts_utc: chrono::DateTime<Utc>,
    ) -> Vec<Violation> {
        let mut accounts = self.accounts.write();
        let Some(inner) = accounts.get_mut(account_id) else {
            return Vec::new();
        };
        Self::maybe_reset_daily(inner, ts_utc);

        let mut violations = Vec::new();
        let r = &inner.rules;
        let m = &inner.metrics;
        let push = |violations: &mut Vec<Violation>, rule: &str, detail: String| {
            violations.push(Violation {
                account_id: account_id.to_string(),
                rule: rule.to_string(),
                detail,
                detected_at: ts_utc,
            });
        };

        if m.flattened {
            push(&mut violations, "EMERGENCY_FLATTENED", "account was emergency-flattened and is locked for the day".to_string());
        }

        // 1. CONTRACT_LIMIT
        let resulting_contracts = open_contracts.abs() + proposed_quantity.abs();
        if resulting_contracts > r.max_contracts as f64 {
            push(
                &mut violations,
                "CONTRACT_LIMIT",
                format!("resulting contracts {resulting_contracts} exceeds limit {}", r.max_contracts),
            );
        }

        // 2. SYMBOL
        if r.restricted_symbols.iter().any(|s| s.eq_ignore_ascii_case(symbol)) {
            push(&mut violations, "SYMBOL", format!("{symbol} is a restricted symbol for this account"));
        }

        // 3. WINDOW
        if let Some(window) = r.trading_window {
            if !Self::within_window(window, ts_utc) {
                push(&mut violations, "WINDOW", format!("{ts_utc} falls outside the account's trading window"));
            }
        }

        // 4. OVERNIGHT — a new position held past the window's close would
        // be carried overnight, which is only allowed when `allow_overnight`.
        if !r.allow_overnight {
            if let Some(window) = r.trading_window {
                if Self::within_last_hour_of_window(window, ts_utc) {
                    push(&mut violations, "OVERNIGHT", "trade would leave a position open past session end".to_string());
                }
            }
        }

        let worst_case_loss = proposed_quantity.abs() * multiplier * reference_price * r.worst_case_risk_pct;

        // 5. DAILY_LOSS — worst-case probe, not a realized-only comparison.
        if m.daily_pnl - worst_case_loss < -r.max_daily_loss {
            push(
                &mut violations,
                "DAILY_LOSS",
                format!(
                    "projected daily PnL {:.2} (worst case) breaches limit -{:.2}",
                    m.daily_pnl - worst_case_loss,
                    r.max_daily_loss
                ),
            );
        }

        // 6. DRAWDOWN
        let current_drawdown = (m.peak_equity - m.current_equity).max(0.0);
        if current_drawdown + worst_case_loss > r.trailing_drawdown {
            push(
                &mut violations,
                "DRAWDOWN",
                format!(
                    "current drawdown {:.2} + worst case {:.2} exceeds trailing limit {:.2}",
                    current_drawdown, worst_case_loss, r.trailing_drawdown
                ),
            );
        }

        if !violations.is_empty() {
            warn!(account_id, count = violations.len(), "funded rule violations detected on pre-trade check");
            inner.violations.extend(violations.iter().cloned());
            while inner.violations.len() > MAX_RETAINED_VIOLATIONS {
                inner.violations.remove(0);
            }
        }

        violations
    }

    /// Whether `ts_utc`'s hour falls inside `window = (open, close)`, using
    /// the same midnight-wrap convention as `instrument::session_open`.
    fn within_window(window: (u32, u32), ts_utc: chrono::DateTime<Utc>) -> bool {
        use chrono::Timelike;
        let hour = ts_utc.hour();
        let (open, close) = window;
        if open <= close {
            hour >= open && hour < close
        } else {
            hour >= open || hour < close
        }
    }

    /// Whether `ts_utc` falls within the hour immediately preceding
    /// `window`'s close — the point past which a fill would carry a
    /// position overnight.
    fn within_last_hour_of_window(window: (u32, u32), ts_utc: chrono::DateTime<Utc>) -> bool {
        use chrono::Timelike;
        let hour = ts_utc.hour();
        let (_, close) = window;
        let last_hour = (close + 23) % 24;
        hour == last_hour
    }

    /// Record the result of a fill against a funded account: updates daily
    /// PnL, equity, peak equity and trade count, then re-checks drawdown and
    /// daily-loss for an emergency flatten trigger (spec.md §4.4).
    ///
    /// Returns `true` if this fill tripped an emergency flatten.
    pub fn on_fill(&self, account_id: &str, realized_pnl_delta: f64, ts_utc: chrono::DateTime<Utc>) -> bool {
        let mut accounts = self.accounts.write();
        let Some(inner) = accounts.get_mut(account_id) else {
            return false;
        };
        Self::maybe_reset_daily(inner, ts_utc);

        inner.metrics.daily_pnl += realized_pnl_delta;
        inner.metrics.daily_trades_count += 1;
        inner.metrics.current_equity += realized_pnl_delta;
        if inner.metrics.current_equity > inner.metrics.peak_equity {
            inner.metrics.peak_equity = inner.metrics.current_equity;
        }

        let r = &inner.rules;
        let m = &inner.metrics;
        let drawdown = (m.peak_equity - m.current_equity).max(0.0);

        if !m.flattened && (m.daily_pnl <= -r.max_daily_loss || drawdown >= r.trailing_drawdown) {
            inner.metrics.flattened = true;
            warn!(account_id, daily_pnl = m.daily_pnl, drawdown, "emergency flatten triggered");
            let rule = if m.daily_pnl <= -r.max_daily_loss { "DAILY_LOSS" } else { "DRAWDOWN" };
            inner.violations.push(Violation {
                account_id: account_id.to_string(),
                rule: rule.to_string(),
                detail: format!(
                    "emergency flatten: daily_pnl={:.2} drawdown={:.2}",
                    m.daily_pnl, drawdown
                ),
                detected_at: ts_utc,
            });
            while inner.violations.len() > MAX_RETAINED_VIOLATIONS {
                inner.violations.remove(0);
            }
            return true;
        }

        false
    }

    /// Every retained violation across all funded accounts, newest first
    /// (spec.md §6 `GET /api/v1/violations`).
    pub fn all_violations(&self) -> Vec<Violation> {
        let accounts = self.accounts.read();
        let mut all: Vec<Violation> = accounts.values().flat_map(|i| i.violations.iter().cloned()).collect();
        all.sort_by(|a, b| b.detected_at.cmp(&a.detected_at));
        all
    }

    pub fn metrics(&self, account_id: &str) -> Option<FundedMetrics> {
        self.accounts.read().get(account_id).map(|i| i.metrics.clone())
    }

    pub fn rules(&self, account_id: &str) -> Option<FundedAccountRules> {
        self.accounts.read().get(account_id).map(|i| i.rules.clone())
    }

    fn maybe_reset_daily(inner: &mut Inner, ts_utc: chrono::DateTime<Utc>) {
        let today = ts_utc.date_naive();
        if inner.metrics.current_date == today {
            return;
        }
        info!(account_id = %inner.rules.account_id, old_date = %inner.metrics.current_date, new_date = %today, "date rolled — resetting funded account daily counters");
        inner.metrics.current_date = today;
        inner.metrics.daily_pnl = 0.0;
        inner.metrics.daily_trades_count = 0;
        inner.metrics.flattened = false;
    }
}

impl Default for FundedRuleEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn rules() -> FundedAccountRules {
        FundedAccountRules {
            account_id: "funded-1".to_string(),
            starting_balance: 50_000.0,
            max_daily_loss: 1_000.0,
            trailing_drawdown: 2_500.0,
            max_contracts: 5,
            restricted_symbols: vec!["CL".to_string()],
            allow_overnight: true,
            trading_window: None,
            worst_case_risk_pct: 0.01,
        }
    }

    #[test]
    fn validate_allows_trade_within_limits() {
        let engine = FundedRuleEngine::new();
        engine.register(rules());
        let violations = engine.validate("funded-1", "ES", 0.0, 1.0, 50.0, 5000.0, Utc::now());
        assert!(violations.is_empty());
    }

    #[test]
    fn validate_does_not_short_circuit() {
        let engine = FundedRuleEngine::new();
        engine.register(rules());
        let violations = engine.validate("funded-1", "CL", 20.0, 20.0, 50.0, 5000.0, Utc::now());
        assert!(violations.iter().any(|v| v.rule == "CONTRACT_LIMIT"));
        assert!(violations.iter().any(|v| v.rule == "SYMBOL"));
    }

    #[test]
    fn validate_rejects_restricted_symbol() {
        let engine = FundedRuleEngine::new();
        engine.register(rules());
        let violations = engine.validate("funded-1", "CL", 0.0, 1.0, 1000.0, 70.0, Utc::now());
        assert!(violations.iter().any(|v| v.rule == "SYMBOL"));
    }

    #[test]
    fn validate_rejects_outside_trading_window() {
        let engine = FundedRuleEngine::new();
        let mut r = rules();
        r.trading_window = Some((13, 20));
        engine.register(r);
        let outside = Utc.with_ymd_and_hms(2026, 7, 28, 23, 0, 0).unwrap();
        let violations = engine.validate("funded-1", "ES", 0.0, 1.0, 50.0, 5000.0, outside);
        assert!(violations.iter().any(|v| v.rule == "WINDOW"));
    }

    #[test]
    fn validate_rejects_overnight_when_disallowed() {
        let engine = FundedRuleEngine::new();
        let mut r = rules();
        r.allow_overnight = false;
        r.trading_window = Some((13, 20));
        engine.register(r);
        let near_close = Utc.with_ymd_and_hms(2026, 7, 28, 19, 30, 0).unwrap();
        let violations = engine.validate("funded-1", "ES", 0.0, 1.0, 50.0, 5000.0, near_close);
        assert!(violations.iter().any(|v| v.rule == "OVERNIGHT"));
    }

    #[test]
    fn validate_daily_loss_uses_worst_case_probe() {
        let engine = FundedRuleEngine::new();
        engine.register(rules());
        engine.on_fill("funded-1", -950.0, Utc::now());
        // Realized loss alone (950) is within the 1000 limit, but the
        // worst-case probe for this proposed trade pushes it over.
        let violations = engine.validate("funded-1", "ES", 0.0, 2.0, 50.0, 100.0, Utc::now());
        assert!(violations.iter().any(|v| v.rule == "DAILY_LOSS"));
    }

    #[test]
    fn validate_drawdown_uses_worst_case_probe() {
        let engine = FundedRuleEngine::new();
        engine.register(rules());
        engine.on_fill("funded-1", 100.0, Utc::now());
        engine.on_fill("funded-1", -2450.0, Utc::now());
        let violations = engine.validate("funded-1", "ES", 0.0, 1.0, 50.0, 200.0, Utc::now());
        assert!(violations.iter().any(|v| v.rule == "DRAWDOWN"));
    }

    #[test]
    fn on_fill_triggers_emergency_flatten_on_daily_loss() {
        let engine = FundedRuleEngine::new();
        engine.register(rules());
        let tripped = engine.on_fill("funded-1", -1100.0, Utc::now());
        assert!(tripped);
        assert!(engine.metrics("funded-1").unwrap().flattened);
    }

    #[test]
    fn validate_and_on_fill_append_to_violation_log() {
        let engine = FundedRuleEngine::new();
        engine.register(rules());
        engine.validate("funded-1", "CL", 20.0, 20.0, 50.0, 5000.0, Utc::now());
        engine.on_fill("funded-1", -1100.0, Utc::now());

        let violations = engine.all_violations();
        assert!(violations.iter().any(|v| v.rule == "CONTRACT_LIMIT"));
        assert!(violations.iter().any(|v| v.rule == "DAILY_LOSS"));
    }

    #[test]
    fn unknown_account_always_allowed() {
        let engine = FundedRuleEngine::new();
        let violations = engine.validate("no-such-account", "ES", 100.0, 100.0, 50.0, 5000.0, Utc::now());
        assert!(violations.is_empty());
    }
}
