// =============================================================================
// Execution coordinator (C9)
// =============================================================================
//
// Owns an alert's full lifecycle once `webhook.rs` hands it off: routing,
// placement with retry/backoff, ledger bookkeeping, and broadcasting every
// status transition. Grounded on the teacher's `execution.rs`
// `ExecutionEngine` (owns adapter + position manager + risk engine
// references, single `execute_proposal` call shape) and `main.rs`'s
// sequential per-tick strategy loop with `push_decision` audit logging,
// generalized from a single in-process decision to an async alert queue.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::broadcast::BroadcastHub;
use crate::broker::{BrokerAdapter, BrokerUpdate};
use crate::funded_rules::FundedRuleEngine;
use crate::ledger::AlertLedger;
use crate::models::Alert;
use crate::paper_engine::PaperEngine;
use crate::router::{AlertOutcome, Destination, RoutingController};
use crate::strategy_tracker::{StrategyTracker, TradeOutcome};
use crate::types::AlertStatus;

/// Maximum placement attempts before giving up on a retryable rejection.
const MAX_PLACEMENT_ATTEMPTS: u32 = 3;

pub struct ExecutionCoordinator {
    router: Arc<RoutingController>,
    paper_engine: Arc<PaperEngine>,
    funded_rules: Arc<FundedRuleEngine>,
    strategy_tracker: Arc<StrategyTracker>,
    ledger: Arc<AlertLedger>,
    broadcast: Arc<BroadcastHub>,
}

impl ExecutionCoordinator {
    pub fn new(
        router: Arc<RoutingController>,
        paper_engine: Arc<PaperEngine>,
        funded_rules: Arc<FundedRuleEngine>,
        strategy_tracker: Arc<StrategyTracker>,
        ledger: Arc<AlertLedger>,
        broadcast: Arc<BroadcastHub>,
    ) -> Self {
        Self {
            router,
            paper_engine,
            funded_rules,
            strategy_tracker,
            ledger,
            broadcast,
        }
    }

    /// Drain `alert_rx` until the sender is dropped, processing alerts
    /// strictly sequentially — the same single-worker shape as the
    /// teacher's strategy loop, which keeps fill bookkeeping race-free
    /// without needing a per-alert lock.
    pub async fn run(self: Arc<Self>, mut alert_rx: mpsc::Receiver<Alert>) {
        info!("execution coordinator started");
        while let Some(alert) = alert_rx.recv().await {
            self.process_alert(alert).await;
        }
        info!("execution coordinator stopped: alert channel closed");
    }

    async fn process_alert(&self, alert: Alert) {
        self.set_status(&alert, AlertStatus::Validating, None).await;

        match self.router.route(&alert) {
            AlertOutcome::Ignored { reason } => {
                info!(alert_id = %alert.id, reason = %reason, "alert ignored");
                self.set_status(&alert, AlertStatus::Ignored, None).await;
            }
            AlertOutcome::Rejected { reason_code, detail } => {
                warn!(alert_id = %alert.id, reason_code, detail, "alert rejected before placement");
                self.set_status(&alert, AlertStatus::Rejected, None).await;
            }
            AlertOutcome::Route { destination, request } => {
                self.set_status(&alert, AlertStatus::Routing, None).await;
                let Destination::Simulator { account_id } = destination;
                self.place_with_retry(&alert, &account_id, request).await;
            }
        }
    }

    async fn place_with_retry(
        &self,
        alert: &Alert,
        account_id: &str,
        request: crate::broker::PlaceOrderRequest,
    ) {
        self.set_status(alert, AlertStatus::Placing, Some(&format!("simulator:{account_id}")))
            .await;

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.paper_engine.place_order_for_account(account_id, request.clone()) {
                Ok(ack) => {
                    info!(alert_id = %alert.id, broker_order_id = %ack.broker_order_id, "order placed");
                    self.set_status(alert, AlertStatus::Working, None).await;
                    self.broadcast.publish(
                        "order",
                        &ack.broker_order_id,
                        serde_json::json!({ "alertId": alert.id, "status": ack.status.to_string() }),
                    );
                    self.drain_updates(account_id, alert).await;
                    return;
                }
                Err(rejected) => {
                    if rejected.retryable && attempt < MAX_PLACEMENT_ATTEMPTS {
                        let backoff = Duration::from_millis(100 * 2u64.pow(attempt));
                        warn!(alert_id = %alert.id, attempt, reason_code = %rejected.reason_code, backoff_ms = backoff.as_millis() as u64, "retrying order placement");
                        tokio::time::sleep(backoff).await;
                        continue;
                    }

                    warn!(alert_id = %alert.id, reason_code = %rejected.reason_code, detail = %rejected.detail, "order placement failed");
                    self.set_status(alert, AlertStatus::Failed, None).await;
                    self.broadcast.publish(
                        "alert",
                        &alert.id.to_string(),
                        serde_json::json!({ "alertId": alert.id, "status": "failed", "reasonCode": rejected.reason_code }),
                    );
                    return;
                }
            }
        }
    }

    /// Collect any fills/cancels/rejections the simulator produced since the
    /// last drain, broadcasting each and feeding realized PnL into the
    /// funded rule engine and strategy tracker when a position returns
    /// flat (spec.md §4.4, §4.5).
    async fn drain_updates(&self, account_id: &str, alert: &Alert) {
        for update in self.paper_engine.poll_updates().await {
            match update {
                BrokerUpdate::Fill { broker_order_id, price, quantity, realized_pnl_delta, .. } => {
                    self.broadcast.publish(
                        "fill",
                        &broker_order_id,
                        serde_json::json!({ "orderId": broker_order_id, "price": price, "quantity": quantity }),
                    );

                    let flattened = self.funded_rules.on_fill(account_id, realized_pnl_delta, alert.received_at);

                    if let Some(position) = self.paper_engine.position_for(account_id, &alert.symbol) {
                        self.broadcast.publish(
                            "position",
                            account_id,
                            serde_json::json!({
                                "accountId": account_id,
                                "symbol": alert.symbol,
                                "quantity": position.quantity,
                                "realizedPnl": position.realized_pnl,
                            }),
                        );

                        if position.quantity.abs() < f64::EPSILON {
                            self.strategy_tracker.record_outcome(
                                &alert.strategy_id,
                                TradeOutcome { won: position.realized_pnl > 0.0, pnl: position.realized_pnl },
                            );
                        }
                    }

                    if flattened {
                        self.broadcast.publish(
                            "violation",
                            account_id,
                            serde_json::json!({ "accountId": account_id, "rule": "EMERGENCY_FLATTEN" }),
                        );
                        self.flatten_account(account_id).await;
                    }

                    self.set_status(alert, AlertStatus::Filled, None).await;
                }
                BrokerUpdate::Cancelled { broker_order_id, .. } => {
                    self.broadcast.publish(
                        "order",
                        &broker_order_id,
                        serde_json::json!({ "orderId": broker_order_id, "status": "cancelled" }),
                    );
                    self.set_status(alert, AlertStatus::Cancelled, None).await;
                }
                BrokerUpdate::Rejected { broker_order_id, rejection } => {
                    self.broadcast.publish(
                        "order",
                        &broker_order_id,
                        serde_json::json!({ "orderId": broker_order_id, "status": "rejected", "reasonCode": rejection.reason_code }),
                    );
                    self.set_status(alert, AlertStatus::Rejected, None).await;
                }
            }
        }
    }

    /// Issue synthetic market-close orders for every open position of
    /// `account_id` via the owning simulator adapter, then drain and
    /// broadcast the resulting fills (spec.md §4.4, §4.9).
    async fn flatten_account(&self, account_id: &str) {
        let acks = self.paper_engine.flatten_account(account_id);
        for ack in &acks {
            self.broadcast.publish(
                "order",
                &ack.broker_order_id,
                serde_json::json!({ "accountId": account_id, "status": ack.status.to_string(), "reason": "EMERGENCY_FLATTEN" }),
            );
        }
        for update in self.paper_engine.poll_updates().await {
            if let BrokerUpdate::Fill { broker_order_id, price, quantity, .. } = &update {
                self.broadcast.publish(
                    "fill",
                    broker_order_id,
                    serde_json::json!({ "orderId": broker_order_id, "price": price, "quantity": quantity, "reason": "EMERGENCY_FLATTEN" }),
                );
            }
        }
    }

    /// Periodic sweep for fills produced by quote ticks against resting
    /// limit/stop orders rather than synchronously at placement time. Called
    /// from a timer loop in `main.rs`.
    pub async fn sweep_updates(&self) {
        for update in self.paper_engine.poll_updates().await {
            if let BrokerUpdate::Fill { broker_order_id, price, quantity, .. } = &update {
                self.broadcast.publish(
                    "fill",
                    broker_order_id,
                    serde_json::json!({ "orderId": broker_order_id, "price": price, "quantity": quantity }),
                );
            }
        }
    }

    async fn set_status(&self, alert: &Alert, status: AlertStatus, destination: Option<&str>) {
        if let Err(e) = self
            .ledger
            .update_status(&alert.id.to_string(), destination, status)
            .await
        {
            warn!(alert_id = %alert.id, error = %e, "failed to update alert ledger");
        }
        self.broadcast.publish(
            "alert",
            &alert.id.to_string(),
            serde_json::json!({ "alertId": alert.id, "status": status.to_string() }),
        );
    }
}
