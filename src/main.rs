// =============================================================================
// Aurora Signal Router — Main Entry Point
// =============================================================================
//
// Starts every long-lived task the router needs: the HTTP/WebSocket server,
// the execution coordinator draining the alert channel, a simulator tick
// loop driving synthetic quotes, and a periodic sweep for resting-order
// fills. Shape follows the teacher's `main.rs`: dotenv + tracing init, load
// config with a defaulting fallback, build shared state, spawn one task per
// long-lived responsibility, then block on Ctrl+C and save config on exit.
// =============================================================================

mod api;
mod app_state;
mod broadcast;
mod broker;
mod coordinator;
mod error;
mod funded_rules;
mod instrument;
mod ledger;
mod models;
mod paper_engine;
mod router;
mod runtime_config;
#[cfg(test)]
mod scenario_tests;
mod strategy_tracker;
mod types;
mod webhook;

use std::sync::Arc;

use clap::Parser;
use tokio::time::{interval, Duration};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::runtime_config::{Cli, RuntimeConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Aurora Signal Router — Starting Up                ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let cli = Cli::parse();
    let config = RuntimeConfig::load_with_cli_overrides(&cli);

    info!(
        bind_addr = %config.bind_addr,
        trading_mode = %config.trading_mode,
        run_mode = %config.run_mode,
        symbols = ?config.simulated_symbols,
        "runtime config ready"
    );

    // ── 2. Build shared state ────────────────────────────────────────────
    let (state, alert_rx) = AppState::new(config).await?;
    let state = Arc::new(state);

    // ── 3. Execution coordinator: drains the alert channel ───────────────
    let coordinator = state.coordinator.clone();
    tokio::spawn(coordinator.run(alert_rx));

    // ── 4. Simulator tick loop: synthetic quotes for configured symbols ──
    {
        let state = state.clone();
        tokio::spawn(async move {
            let (tick_ms, volatility_bps, symbols) = {
                let cfg = state.runtime_config.read();
                (cfg.quote_tick_interval_ms, cfg.quote_volatility_bps, cfg.simulated_symbols.clone())
            };

            let mut last_prices: std::collections::HashMap<String, f64> =
                symbols.iter().map(|s| (s.clone(), 100.0)).collect();

            let mut ticker = interval(Duration::from_millis(tick_ms.max(1)));
            loop {
                ticker.tick().await;
                for symbol in &symbols {
                    let last = *last_prices.get(symbol).unwrap_or(&100.0);
                    let next = crate::paper_engine::PaperEngine::random_walk_quote(last, volatility_bps);
                    last_prices.insert(symbol.clone(), next);

                    state.paper_engine.tick_quote(symbol, next);
                    state.broadcast.publish(
                        "quote",
                        symbol,
                        serde_json::json!({ "symbol": symbol, "price": next }),
                    );
                }
                state.increment_version();
            }
        });
    }

    // ── 5. Sweep loop: fills generated against resting orders by quote ticks
    {
        let state = state.clone();
        tokio::spawn(async move {
            let sweep_ms = state.runtime_config.read().sweep_interval_ms;
            let mut ticker = interval(Duration::from_millis(sweep_ms.max(1)));
            loop {
                ticker.tick().await;
                state.coordinator.sweep_updates().await;
            }
        });
    }

    // ── 6. HTTP/WebSocket server ──────────────────────────────────────────
    let bind_addr = state.runtime_config.read().bind_addr.clone();
    {
        let state = state.clone();
        let bind_addr = bind_addr.clone();
        tokio::spawn(async move {
            let app = api::rest::router(state);
            let listener = tokio::net::TcpListener::bind(&bind_addr)
                .await
                .expect("failed to bind HTTP server");
            info!(addr = %bind_addr, "HTTP/WebSocket server listening");
            axum::serve(listener, app).await.expect("HTTP server failed");
        });
    }

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 7. Graceful shutdown ──────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received — stopping gracefully");

    let config_path = cli.config.clone();
    if let Err(e) = state.runtime_config.read().save(&config_path) {
        error!(error = %e, "failed to save runtime config on shutdown");
    }

    info!("Aurora Signal Router shut down complete.");
    Ok(())
}
