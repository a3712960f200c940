// =============================================================================
// Strategy performance tracker & auto-demotion (C5)
// =============================================================================
//
// Tracks each strategy's recent trade outcomes in fixed-size evaluation
// sets and transitions it between live/paper/suspended based on win rate.
// Grounded on the teacher's `risk.rs` rolling-counter-with-reset idiom
// (consecutive-loss tracking generalizes to consecutive-failing-set
// tracking) and the audit style of `decision_envelope.rs` for logging each
// transition with its reason.
// =============================================================================

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::StrategyMode;

/// Size of each evaluation set (spec.md §4.5 default: 20 trades).
const DEFAULT_SET_SIZE: usize = 20;
/// Win rate a completed set must clear to count as passing (spec.md §4.5
/// `minWinRate`, default 55%). A single threshold governs all three
/// transitions — there is no separate "good"/"bad" band.
const MIN_WIN_RATE: f64 = 0.55;
/// Consecutive passing sets required to promote paper -> live.
const PROMOTE_AFTER_GOOD_SETS: u32 = 2;
/// Consecutive failing sets required to demote paper -> suspended.
const SUSPEND_AFTER_BAD_SETS: u32 = 2;

/// A single closed-trade outcome fed into the tracker.
#[derive(Debug, Clone, Copy)]
pub struct TradeOutcome {
    pub won: bool,
    pub pnl: f64,
}

/// The result of completing one evaluation set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetResult {
    pub strategy_id: String,
    pub win_rate: f64,
    pub trade_count: usize,
    pub total_pnl: f64,
    pub completed_at: DateTime<Utc>,
}

/// A recorded mode transition, kept for the strategy's audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeTransition {
    pub strategy_id: String,
    pub from: StrategyMode,
    pub to: StrategyMode,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// Current state and history for one strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyRecord {
    pub strategy_id: String,
    pub mode: StrategyMode,
    pub consecutive_good_sets: u32,
    pub consecutive_bad_sets: u32,
    pub manual_override: bool,
    #[serde(default)]
    pub history: Vec<ModeTransition>,
}

struct Inner {
    record: StrategyRecord,
    current_set: Vec<TradeOutcome>,
    set_size: usize,
}

/// Owns every strategy's evaluation state. One tracker serves the whole
/// router; strategies register themselves (or are registered lazily on
/// first trade outcome) the same way the teacher's engines are all
/// singletons under `AppState`.
pub struct StrategyTracker {
    strategies: RwLock<std::collections::HashMap<String, Inner>>,
}

impl StrategyTracker {
    pub fn new() -> Self {
        Self {
            strategies: RwLock::new(std::collections::HashMap::new()),
        }
    }

    fn ensure<'a>(
        strategies: &'a mut std::collections::HashMap<String, Inner>,
        strategy_id: &str,
    ) -> &'a mut Inner {
        strategies.entry(strategy_id.to_string()).or_insert_with(|| Inner {
            record: StrategyRecord {
                strategy_id: strategy_id.to_string(),
                mode: StrategyMode::Live,
                consecutive_good_sets: 0,
                consecutive_bad_sets: 0,
                manual_override: false,
                history: Vec::new(),
            },
            current_set: Vec::new(),
            set_size: DEFAULT_SET_SIZE,
        })
    }

    /// Record one completed trade's outcome. Once a full set accumulates,
    /// evaluates it and possibly transitions the strategy's mode. Returns
    /// the completed [`SetResult`] if this outcome filled the set, `None`
    /// otherwise. No-op (trades are still recorded) if the strategy is
    /// under manual override — manual override freezes the *mode*, not the
    /// underlying evaluation bookkeeping (spec.md §4.5).
    pub fn record_outcome(&self, strategy_id: &str, outcome: TradeOutcome) -> Option<SetResult> {
        let mut strategies = self.strategies.write();
        let inner = Self::ensure(&mut strategies, strategy_id);
        inner.current_set.push(outcome);

        if inner.current_set.len() < inner.set_size {
            return None;
        }

        let trades = std::mem::take(&mut inner.current_set);
        let wins = trades.iter().filter(|t| t.won).count();
        let win_rate = wins as f64 / trades.len() as f64;
        let total_pnl: f64 = trades.iter().map(|t| t.pnl).sum();
        let now = Utc::now();

        let result = SetResult {
            strategy_id: strategy_id.to_string(),
            win_rate,
            trade_count: trades.len(),
            total_pnl,
            completed_at: now,
        };

        if !inner.record.manual_override {
            Self::apply_set_result(inner, &result, now);
        }

        Some(result)
    }

    fn apply_set_result(inner: &mut Inner, result: &SetResult, now: DateTime<Utc>) {
        let passed = result.win_rate >= MIN_WIN_RATE;
        if passed {
            inner.record.consecutive_good_sets += 1;
            inner.record.consecutive_bad_sets = 0;
        } else {
            inner.record.consecutive_bad_sets += 1;
            inner.record.consecutive_good_sets = 0;
        }

        let from = inner.record.mode;
        let to = match from {
            StrategyMode::Live if !passed => Some(StrategyMode::Paper),
            StrategyMode::Paper if inner.record.consecutive_good_sets >= PROMOTE_AFTER_GOOD_SETS => {
                Some(StrategyMode::Live)
            }
            StrategyMode::Paper if inner.record.consecutive_bad_sets >= SUSPEND_AFTER_BAD_SETS => {
                Some(StrategyMode::Suspended)
            }
            _ => None,
        };

        if let Some(to) = to {
            let reason = format!(
                "win rate {:.1}% over {} trades",
                result.win_rate * 100.0,
                result.trade_count
            );
            info!(strategy_id = %inner.record.strategy_id, from = %from, to = %to, reason = %reason, "strategy mode transition");
            inner.record.mode = to;
            inner.record.history.push(ModeTransition {
                strategy_id: inner.record.strategy_id.clone(),
                from,
                to,
                reason,
                at: now,
            });
        }
    }

    /// Manually set a strategy's mode, freezing automatic transitions until
    /// overridden again or cleared (spec.md §6 `POST /strategies/:id/override`).
    pub fn set_override(&self, strategy_id: &str, mode: StrategyMode, reason: &str) {
        let mut strategies = self.strategies.write();
        let inner = Self::ensure(&mut strategies, strategy_id);
        let from = inner.record.mode;
        inner.record.mode = mode;
        inner.record.manual_override = true;
        info!(strategy_id, from = %from, to = %mode, reason, "strategy mode manually overridden");
        inner.record.history.push(ModeTransition {
            strategy_id: strategy_id.to_string(),
            from,
            to: mode,
            reason: format!("manual override: {reason}"),
            at: Utc::now(),
        });
    }

    /// Clear a manual override, returning the strategy to automatic
    /// win-rate-driven transitions.
    pub fn clear_override(&self, strategy_id: &str) {
        let mut strategies = self.strategies.write();
        if let Some(inner) = strategies.get_mut(strategy_id) {
            inner.record.manual_override = false;
            info!(strategy_id, "strategy manual override cleared");
        }
    }

    pub fn record(&self, strategy_id: &str) -> Option<StrategyRecord> {
        self.strategies.read().get(strategy_id).map(|i| i.record.clone())
    }

    pub fn all_records(&self) -> Vec<StrategyRecord> {
        self.strategies.read().values().map(|i| i.record.clone()).collect()
    }

    pub fn mode(&self, strategy_id: &str) -> StrategyMode {
        self.strategies
            .read()
            .get(strategy_id)
            .map(|i| i.record.mode)
            .unwrap_or(StrategyMode::Live)
    }
}

impl Default for StrategyTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill_set(tracker: &StrategyTracker, strategy_id: &str, wins: usize, losses: usize) -> SetResult {
        let mut last = None;
        for _ in 0..wins {
            last = tracker.record_outcome(strategy_id, TradeOutcome { won: true, pnl: 10.0 });
        }
        for _ in 0..losses {
            last = tracker.record_outcome(strategy_id, TradeOutcome { won: false, pnl: -10.0 });
        }
        last.expect("set should complete when wins+losses == DEFAULT_SET_SIZE")
    }

    #[test]
    fn demotes_live_to_paper_on_bad_set() {
        let tracker = StrategyTracker::new();
        assert_eq!(tracker.mode("s1"), StrategyMode::Live);
        fill_set(&tracker, "s1", 4, 16);
        assert_eq!(tracker.mode("s1"), StrategyMode::Paper);
    }

    #[test]
    fn promotes_paper_to_live_after_two_good_sets() {
        let tracker = StrategyTracker::new();
        fill_set(&tracker, "s1", 4, 16);
        assert_eq!(tracker.mode("s1"), StrategyMode::Paper);

        fill_set(&tracker, "s1", 12, 8);
        assert_eq!(tracker.mode("s1"), StrategyMode::Paper);
        fill_set(&tracker, "s1", 12, 8);
        assert_eq!(tracker.mode("s1"), StrategyMode::Live);
    }

    #[test]
    fn suspends_paper_after_two_bad_sets() {
        let tracker = StrategyTracker::new();
        fill_set(&tracker, "s1", 4, 16);
        assert_eq!(tracker.mode("s1"), StrategyMode::Paper);
        fill_set(&tracker, "s1", 4, 16);
        fill_set(&tracker, "s1", 4, 16);
        assert_eq!(tracker.mode("s1"), StrategyMode::Suspended);
    }

    #[test]
    fn manual_override_freezes_automatic_transitions() {
        let tracker = StrategyTracker::new();
        tracker.set_override("s1", StrategyMode::Paper, "manual review");
        fill_set(&tracker, "s1", 4, 16);
        assert_eq!(tracker.mode("s1"), StrategyMode::Paper);

        tracker.clear_override("s1");
        fill_set(&tracker, "s1", 4, 16);
        fill_set(&tracker, "s1", 4, 16);
        assert_eq!(tracker.mode("s1"), StrategyMode::Suspended);
    }
}
