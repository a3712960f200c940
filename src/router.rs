// =============================================================================
// Alert routing & order materialization (C7)
// =============================================================================
//
// Decides where an accepted alert goes and turns it into a concrete order
// request. Grounded on the teacher's `execution.rs` demo/live branch
// structure (`execute_proposal` dispatching to `execute_demo`/`execute_live`
// after a risk pre-check) — generalized from a binary demo/live switch to a
// destination keyed by `accountGroup` plus the owning strategy's current
// mode.
//
// `accountGroup`s beginning with the `paper_` prefix always route to the
// simulator, with the account id being whatever follows the prefix. Any
// other `accountGroup` is itself the account id, and routes to the
// simulator too in this core since no live adapter ships here (spec.md §1
// Non-goals) — it is rejected with a stable `ADAPTER_NOT_CONFIGURED` reason
// code only when the owning strategy's tracked mode has not already forced
// it onto paper. Strategy mode is looked up and enforced by `strategyId`,
// not `accountGroup`: a strategy tracked as `paper` is force-routed to the
// simulator regardless of its nominal account group, and one tracked as
// `suspended` is rejected outright (spec.md §4.5, §4.7).
// =============================================================================

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::broker::PlaceOrderRequest;
use crate::funded_rules::FundedRuleEngine;
use crate::instrument::InstrumentRegistry;
use crate::models::Alert;
use crate::paper_engine::PaperEngine;
use crate::strategy_tracker::StrategyTracker;
use crate::types::{OrderType, Side, StrategyMode, TimeInForce};

/// Where a routed alert ends up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Simulator { account_id: String },
}

/// The result of routing a single alert.
#[derive(Debug, Clone)]
pub enum AlertOutcome {
    /// The alert resolves to a concrete order at `destination`.
    Route {
        destination: Destination,
        request: PlaceOrderRequest,
    },
    /// A `close` alert against a flat position is a no-op, not an error
    /// (spec.md §9 Open Question resolution).
    Ignored { reason: String },
    /// The alert is well-formed but not allowed to trade right now.
    Rejected { reason_code: String, detail: String },
}

pub struct RoutingController {
    instruments: Arc<InstrumentRegistry>,
    funded_rules: Arc<FundedRuleEngine>,
    strategy_tracker: Arc<StrategyTracker>,
    paper_engine: Arc<PaperEngine>,
}

impl RoutingController {
    pub fn new(
        instruments: Arc<InstrumentRegistry>,
        funded_rules: Arc<FundedRuleEngine>,
        strategy_tracker: Arc<StrategyTracker>,
        paper_engine: Arc<PaperEngine>,
    ) -> Self {
        Self {
            instruments,
            funded_rules,
            strategy_tracker,
            paper_engine,
        }
    }

    pub fn route(&self, alert: &Alert) -> AlertOutcome {
        let strategy_mode = self.strategy_tracker.mode(&alert.strategy_id);
        if strategy_mode == StrategyMode::Suspended {
            warn!(strategy_id = %alert.strategy_id, "alert rejected: strategy suspended");
            return AlertOutcome::Rejected {
                reason_code: "SUSPENDED".to_string(),
                detail: format!("strategy {} is suspended", alert.strategy_id),
            };
        }

        let forced_paper = strategy_mode == StrategyMode::Paper;
        let account_id = match alert.account_group.strip_prefix("paper_") {
            Some(rest) => rest.to_string(),
            None => alert.account_group.clone(),
        };

        let instrument = match self.instruments.resolve(&alert.symbol) {
            Ok(inst) => inst,
            Err(e) => {
                return AlertOutcome::Rejected {
                    reason_code: "UNKNOWN_INSTRUMENT".to_string(),
                    detail: e.to_string(),
                }
            }
        };

        let (side, quantity) = match self.resolve_side_and_quantity(&account_id, alert) {
            Some(v) => v,
            None => {
                info!(account_group = %alert.account_group, symbol = %alert.symbol, "close alert ignored: no open position");
                return AlertOutcome::Ignored {
                    reason: "close requested with no open position".to_string(),
                };
            }
        };

        // Every `accountGroup` not already a `paper_`-prefixed simulator
        // group would, in a full deployment, resolve against a live/sandbox
        // adapter keyed by account group. No such adapter ships in this
        // core (spec.md §1 Non-goals), so unless the owning strategy's
        // tracked mode has forced it onto paper, it is rejected with a
        // stable reason code instead of silently executing against the
        // simulator.
        let is_paper_group = alert.account_group.starts_with("paper_");
        if !is_paper_group && !forced_paper {
            return AlertOutcome::Rejected {
                reason_code: "ADAPTER_NOT_CONFIGURED".to_string(),
                detail: format!(
                    "no live/sandbox adapter is configured for account group {}",
                    alert.account_group
                ),
            };
        }
        let destination = Destination::Simulator { account_id: account_id.clone() };

        let reference_price = self
            .paper_engine
            .quote_for(&account_id, &instrument.symbol)
            .unwrap_or(alert.limit_price.unwrap_or(0.0));
        let existing = self
            .paper_engine
            .position_for(&account_id, &instrument.symbol)
            .map(|p| p.quantity.abs())
            .unwrap_or(0.0);
        let violations = self.funded_rules.validate(
            &account_id,
            &instrument.symbol,
            existing,
            quantity,
            instrument.multiplier,
            reference_price,
            alert.received_at,
        );
        if !violations.is_empty() {
            let detail = violations
                .iter()
                .map(|v| v.rule.as_str())
                .collect::<Vec<_>>()
                .join(",");
            warn!(account_id, violations = %detail, "alert rejected by funded rule engine");
            return AlertOutcome::Rejected {
                reason_code: "FUNDED_RULE_VIOLATION".to_string(),
                detail,
            };
        }

        let limit_price = alert.limit_price.map(|p| InstrumentRegistry::tick_round(&instrument, p));
        let stop_price = alert.stop_price.map(|p| InstrumentRegistry::tick_round(&instrument, p));

        let request = PlaceOrderRequest {
            client_order_tag: alert.id.to_string(),
            symbol: instrument.symbol,
            side,
            order_type: alert.order_type.unwrap_or(OrderType::Market),
            quantity,
            multiplier: instrument.multiplier,
            limit_price,
            stop_price,
            time_in_force: alert.time_in_force.unwrap_or(TimeInForce::Day),
        };

        AlertOutcome::Route { destination, request }
    }

    /// Resolve an alert's nominal side/quantity into a concrete order side
    /// and quantity. A `close` alert looks up the existing position and
    /// flips to the opposing side at the position's full size; `None` means
    /// there is nothing to close.
    fn resolve_side_and_quantity(&self, account_id: &str, alert: &Alert) -> Option<(Side, f64)> {
        match alert.side {
            Side::Buy | Side::Sell => Some((alert.side, alert.quantity)),
            Side::Close => {
                let position = self.paper_engine.position_for(account_id, &alert.symbol)?;
                if position.quantity.abs() < f64::EPSILON {
                    return None;
                }
                let side = if position.quantity > 0.0 { Side::Sell } else { Side::Buy };
                Some((side, position.quantity.abs()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::funded_rules::FundedAccountRules;
    use crate::paper_engine::SimulatorConfig;
    use crate::types::Side;
    use chrono::Utc;

    fn alert(account_group: &str, side: Side, quantity: f64) -> Alert {
        alert_for_strategy("s1", account_group, side, quantity)
    }

    fn alert_for_strategy(strategy_id: &str, account_group: &str, side: Side, quantity: f64) -> Alert {
        Alert {
            id: Uuid::new_v4(),
            source: "tradingview".to_string(),
            client_nonce: None,
            strategy_id: strategy_id.to_string(),
            symbol: "ES".to_string(),
            side,
            order_type: Some(OrderType::Market),
            limit_price: None,
            stop_price: None,
            time_in_force: None,
            quantity,
            account_group: account_group.to_string(),
            received_at: Utc::now(),
            status: crate::types::AlertStatus::Received,
        }
    }

    fn controller() -> (RoutingController, Arc<PaperEngine>) {
        let instruments = Arc::new(InstrumentRegistry::new());
        let funded_rules = Arc::new(FundedRuleEngine::new());
        let strategy_tracker = Arc::new(StrategyTracker::new());
        let paper_engine = Arc::new(PaperEngine::new(SimulatorConfig::default()));
        let controller = RoutingController::new(
            instruments,
            funded_rules,
            strategy_tracker,
            paper_engine.clone(),
        );
        (controller, paper_engine)
    }

    #[test]
    fn routes_buy_to_simulator() {
        let (controller, _engine) = controller();
        let outcome = controller.route(&alert("paper_acct-1", Side::Buy, 2.0));
        match outcome {
            AlertOutcome::Route { destination, request } => {
                assert_eq!(destination, Destination::Simulator { account_id: "acct-1".to_string() });
                assert_eq!(request.quantity, 2.0);
                assert_eq!(request.multiplier, 50.0);
            }
            other => panic!("expected Route, got {other:?}"),
        }
    }

    #[test]
    fn close_with_no_position_is_ignored() {
        let (controller, _engine) = controller();
        let outcome = controller.route(&alert("paper_acct-1", Side::Close, 1.0));
        assert!(matches!(outcome, AlertOutcome::Ignored { .. }));
    }

    #[test]
    fn close_with_open_position_flips_side() {
        let (controller, engine) = controller();
        engine.tick_quote("ES", 100.0);
        engine
            .place_order_for_account(
                "acct-1",
                PlaceOrderRequest {
                    client_order_tag: "seed".to_string(),
                    symbol: "ES".to_string(),
                    side: Side::Buy,
                    order_type: OrderType::Market,
                    quantity: 3.0,
                    multiplier: 50.0,
                    limit_price: None,
                    stop_price: None,
                    time_in_force: TimeInForce::Day,
                },
            )
            .unwrap();

        let outcome = controller.route(&alert("paper_acct-1", Side::Close, 0.0));
        match outcome {
            AlertOutcome::Route { request, .. } => {
                assert_eq!(request.side, Side::Sell);
                assert_eq!(request.quantity, 3.0);
            }
            other => panic!("expected Route, got {other:?}"),
        }
    }

    #[test]
    fn non_paper_group_is_rejected_unconfigured() {
        let (controller, _engine) = controller();
        let outcome = controller.route(&alert("main", Side::Buy, 1.0));
        match outcome {
            AlertOutcome::Rejected { reason_code, .. } => assert_eq!(reason_code, "ADAPTER_NOT_CONFIGURED"),
            other => panic!("expected Rejected, got {other:?}"),
        }
    }

    #[test]
    fn strategy_forced_to_paper_overrides_non_paper_group() {
        let (controller, _engine) = controller();
        controller
            .strategy_tracker
            .set_override("s1", StrategyMode::Paper, "demoted after bad set");

        let outcome = controller.route(&alert("main", Side::Buy, 1.0));
        match outcome {
            AlertOutcome::Route { destination, .. } => {
                assert_eq!(destination, Destination::Simulator { account_id: "main".to_string() });
            }
            other => panic!("expected Route, got {other:?}"),
        }
    }

    #[test]
    fn funded_account_violations_reject_the_alert() {
        let (controller, _engine) = controller();
        controller.funded_rules.register(FundedAccountRules {
            account_id: "acct-9".to_string(),
            starting_balance: 50_000.0,
            max_daily_loss: 1_000.0,
            trailing_drawdown: 2_500.0,
            max_contracts: 1,
            restricted_symbols: Vec::new(),
            allow_overnight: true,
            trading_window: None,
            worst_case_risk_pct: 0.01,
        });

        let outcome = controller.route(&alert("paper_acct-9", Side::Buy, 5.0));
        match outcome {
            AlertOutcome::Rejected { reason_code, .. } => assert_eq!(reason_code, "FUNDED_RULE_VIOLATION"),
            other => panic!("expected Rejected, got {other:?}"),
        }
    }

    #[test]
    fn suspended_strategy_rejects_before_routing() {
        let (controller, _engine) = controller();
        controller
            .strategy_tracker
            .set_override("s1", StrategyMode::Suspended, "manual test");

        let outcome = controller.route(&alert("paper_acct-1", Side::Buy, 1.0));
        match outcome {
            AlertOutcome::Rejected { reason_code, .. } => assert_eq!(reason_code, "SUSPENDED"),
            other => panic!("expected Rejected, got {other:?}"),
        }
    }
}
