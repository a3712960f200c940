// =============================================================================
// Runtime Configuration — Hot-reloadable router settings with atomic save
// =============================================================================
//
// Central configuration for the Aurora signal router. Every tunable lives
// here so the engine can be reconfigured without a restart.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash, the same as the teacher's `runtime_config.rs`. All fields carry
// `#[serde(default)]` so that adding new fields never breaks loading an
// older config file.
//
// CLI flags are parsed with `clap` (`derive`, `env`), grounded on
// `cooprefr-bettersys` — the nearest sibling in the retrieval pack with an
// actual flag parser — since the teacher itself only reads environment
// variables via `dotenv`.
// =============================================================================

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::funded_rules::FundedAccountRules;
use crate::paper_engine::SimulatorConfig;
use crate::types::{RunMode, TradingMode};

fn default_bind_addr() -> String {
    "0.0.0.0:3001".to_string()
}

fn default_ledger_path() -> String {
    "alert_ledger.sqlite3".to_string()
}

fn default_dedup_window_hours() -> i64 {
    24
}

fn default_rate_limit_capacity() -> f64 {
    60.0
}

fn default_rate_limit_refill_per_sec() -> f64 {
    1.0
}

fn default_quote_tick_interval_ms() -> u64 {
    1000
}

fn default_quote_volatility_bps() -> f64 {
    25.0
}

fn default_sweep_interval_ms() -> u64 {
    500
}

/// Command-line flags, parsed once at startup (spec.md §6).
#[derive(Debug, Parser)]
#[command(name = "aurora-signal-router", version, about = "Webhook signal intake and routing core")]
pub struct Cli {
    /// Address to bind the HTTP/WebSocket server to.
    #[arg(long, env = "AURORA_BIND_ADDR")]
    pub bind: Option<String>,

    /// Path to the JSON runtime config file.
    #[arg(long, env = "AURORA_CONFIG_PATH", default_value = "runtime_config.json")]
    pub config: PathBuf,

    /// Dev panics on internal errors; prod returns a generic 500 (spec.md §7).
    #[arg(long, value_enum, env = "AURORA_MODE")]
    pub mode: Option<CliRunMode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CliRunMode {
    Dev,
    Prod,
}

impl From<CliRunMode> for RunMode {
    fn from(m: CliRunMode) -> Self {
        match m {
            CliRunMode::Dev => RunMode::Dev,
            CliRunMode::Prod => RunMode::Prod,
        }
    }
}

/// Top-level runtime configuration for the router.
///
/// Every field has a serde default so older JSON files missing new fields
/// still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Whether the router is actively routing, paused, or killed.
    #[serde(default)]
    pub trading_mode: TradingMode,

    /// Dev vs. prod error-handling semantics (spec.md §7).
    #[serde(default)]
    pub run_mode: RunMode,

    /// Address the HTTP/WebSocket server binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Path to the SQLite alert ledger.
    #[serde(default = "default_ledger_path")]
    pub ledger_path: String,

    /// Per-source HMAC signing secrets for `POST /webhook/:source`.
    #[serde(default)]
    pub webhook_secrets: HashMap<String, String>,

    /// Token-bucket capacity for the webhook rate limiter (per source).
    #[serde(default = "default_rate_limit_capacity")]
    pub rate_limit_capacity: f64,

    /// Token-bucket refill rate in tokens/sec (per source).
    #[serde(default = "default_rate_limit_refill_per_sec")]
    pub rate_limit_refill_per_sec: f64,

    /// Dedup window for `(source, clientNonce)` (spec.md §4.6).
    #[serde(default = "default_dedup_window_hours")]
    pub dedup_window_hours: i64,

    /// Default simulator configuration applied to new accounts.
    #[serde(default)]
    pub simulator: SimulatorConfig,

    /// Funded-account rule sets, keyed by account id, registered with the
    /// funded rule engine at startup.
    #[serde(default)]
    pub funded_accounts: Vec<FundedAccountRules>,

    /// How often the simulator tick loop advances the random-walk quote.
    #[serde(default = "default_quote_tick_interval_ms")]
    pub quote_tick_interval_ms: u64,

    /// Volatility (bps) used by the quote random walk per tick.
    #[serde(default = "default_quote_volatility_bps")]
    pub quote_volatility_bps: f64,

    /// How often the coordinator sweeps for late broker updates.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    /// Symbols the simulator tick loop drives a synthetic quote for.
    #[serde(default)]
    pub simulated_symbols: Vec<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            trading_mode: TradingMode::Paused,
            run_mode: RunMode::Dev,
            bind_addr: default_bind_addr(),
            ledger_path: default_ledger_path(),
            webhook_secrets: HashMap::new(),
            rate_limit_capacity: default_rate_limit_capacity(),
            rate_limit_refill_per_sec: default_rate_limit_refill_per_sec(),
            dedup_window_hours: default_dedup_window_hours(),
            simulator: SimulatorConfig::default(),
            funded_accounts: Vec::new(),
            quote_tick_interval_ms: default_quote_tick_interval_ms(),
            quote_volatility_bps: default_quote_volatility_bps(),
            sweep_interval_ms: default_sweep_interval_ms(),
            simulated_symbols: vec!["ES".to_string(), "NQ".to_string()],
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            bind_addr = %config.bind_addr,
            trading_mode = %config.trading_mode,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    ///
    /// This prevents corruption if the process crashes mid-write.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }

    /// Load from `cli.config`, falling back to defaults with a warning if
    /// the file is absent or malformed, then apply CLI overrides — the same
    /// load-then-override shape as the teacher's `AURORA_SYMBOLS` env var.
    pub fn load_with_cli_overrides(cli: &Cli) -> Self {
        let mut config = Self::load(&cli.config).unwrap_or_else(|e| {
            warn!(error = %e, "failed to load runtime config, using defaults");
            Self::default()
        });

        if let Some(bind) = &cli.bind {
            config.bind_addr = bind.clone();
        }
        if let Some(mode) = cli.mode {
            config.run_mode = mode.into();
        }

        config
    }
}
