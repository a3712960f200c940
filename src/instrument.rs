// =============================================================================
// Symbol & Contract Registry (C1)
// =============================================================================
//
// Normalises user-facing symbol strings into canonical Instrument records.
// Built at startup from a static table; immutable thereafter (spec.md §3,
// §4.1).
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use crate::types::AssetClass;

/// Default tick size / multiplier applied to an unrecognised equity symbol
/// that is passed through verbatim (spec.md §4.1 policy).
const DEFAULT_TICK_SIZE: f64 = 0.01;
const DEFAULT_MULTIPLIER: f64 = 1.0;

/// A canonical, immutable instrument descriptor (spec.md §3 `Instrument`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub asset_class: AssetClass,
    pub tick_size: f64,
    pub multiplier: f64,
    /// Trading session as `(open_hour_utc, close_hour_utc)`, both in
    /// `[0, 24)`. A session that wraps midnight is expressed with
    /// `open > close` and treated as spanning the day boundary.
    pub session: (u32, u32),
}

/// Error returned by [`InstrumentRegistry::resolve`] for a symbol with no
/// known mapping and no safe verbatim default (never actually returned given
/// the current pass-through policy, but kept so callers match exhaustively
/// against future stricter policies).
#[derive(Debug, Clone, thiserror::Error)]
#[error("instrument not found: {0}")]
pub struct NotFound(pub String);

/// Static continuous-futures front-month mapping. A production registry
/// would recompute this against a roll calendar; this core ships a fixed
/// table sufficient for the paper engine and funded-rule checks, matching
/// the teacher's preference for small static tables (`runtime_config.rs`'s
/// `default_symbols()`) over a generated one.
fn continuous_futures_table() -> HashMap<&'static str, Instrument> {
    let mut m = HashMap::new();
    m.insert(
        "ES",
        Instrument {
            symbol: "ES".to_string(),
            asset_class: AssetClass::Future,
            tick_size: 0.25,
            multiplier: 50.0,
            session: (22, 21),
        },
    );
    m.insert(
        "NQ",
        Instrument {
            symbol: "NQ".to_string(),
            asset_class: AssetClass::Future,
            tick_size: 0.25,
            multiplier: 20.0,
            session: (22, 21),
        },
    );
    m.insert(
        "CL",
        Instrument {
            symbol: "CL".to_string(),
            asset_class: AssetClass::Future,
            tick_size: 0.01,
            multiplier: 1000.0,
            session: (22, 21),
        },
    );
    m.insert(
        "GC",
        Instrument {
            symbol: "GC".to_string(),
            asset_class: AssetClass::Future,
            tick_size: 0.10,
            multiplier: 100.0,
            session: (22, 21),
        },
    );
    m
}

/// Thread-safe-by-construction (immutable after `new`) instrument registry.
pub struct InstrumentRegistry {
    table: HashMap<String, Instrument>,
}

impl InstrumentRegistry {
    /// Build the registry from the static continuous-futures table. Called
    /// once at startup; the result is wrapped in `Arc` by `AppState`.
    pub fn new() -> Self {
        Self {
            table: continuous_futures_table(),
        }
    }

    /// Resolve a user-facing symbol string, case-insensitively. Known
    /// continuous-futures prefixes map to their front-month descriptor;
    /// anything else passes through verbatim with the default tick/
    /// multiplier `(0.01, 1)` (spec.md §4.1 policy) rather than failing, so
    /// `resolve` never actually returns [`NotFound`] today — the `Result`
    /// shape is kept so a future stricter allow-list policy is a
    /// non-breaking change at call sites.
    pub fn resolve(&self, user_symbol: &str) -> Result<Instrument, NotFound> {
        let normalized = user_symbol.trim().to_uppercase();

        if let Some(inst) = self.table.get(normalized.as_str()) {
            return Ok(inst.clone());
        }

        // Continuous-futures prefix match, e.g. "ES1!" or "ESZ25" -> "ES".
        for (prefix, inst) in &self.table {
            if normalized.starts_with(prefix.as_str()) {
                return Ok(inst.clone());
            }
        }

        Ok(Instrument {
            symbol: normalized,
            asset_class: AssetClass::Equity,
            tick_size: DEFAULT_TICK_SIZE,
            multiplier: DEFAULT_MULTIPLIER,
            session: (13, 20),
        })
    }

    /// Round `price` to the instrument's tick size using half-away-from-zero
    /// rounding (spec.md §4.1).
    pub fn tick_round(instrument: &Instrument, price: f64) -> f64 {
        if instrument.tick_size <= 0.0 {
            return price;
        }
        let ticks = price / instrument.tick_size;
        let rounded_ticks = half_away_from_zero(ticks);
        rounded_ticks * instrument.tick_size
    }

    /// Whether `instrument`'s session is open at `ts_utc`.
    pub fn session_open(instrument: &Instrument, ts_utc: DateTime<Utc>) -> bool {
        // Weekend closure, applied regardless of the intraday session window.
        let weekday = ts_utc.weekday();
        if matches!(
            weekday,
            chrono::Weekday::Sat | chrono::Weekday::Sun
        ) {
            return false;
        }

        let hour = ts_utc.hour_as_u32();
        let (open, close) = instrument.session;
        if open <= close {
            hour >= open && hour < close
        } else {
            // Session wraps midnight, e.g. (22, 21) is open from 22:00 today
            // through 21:00 the next day.
            hour >= open || hour < close
        }
    }
}

impl Default for InstrumentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Small helper trait to avoid importing `chrono::Timelike` at call sites
/// beyond this module.
trait HourExt {
    fn hour_as_u32(&self) -> u32;
}

impl HourExt for DateTime<Utc> {
    fn hour_as_u32(&self) -> u32 {
        use chrono::Timelike;
        self.hour()
    }
}

fn half_away_from_zero(x: f64) -> f64 {
    if x >= 0.0 {
        (x + 0.5).floor()
    } else {
        (x - 0.5).ceil()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn resolve_is_case_insensitive() {
        let reg = InstrumentRegistry::new();
        let a = reg.resolve("es").unwrap();
        let b = reg.resolve("ES").unwrap();
        assert_eq!(a.symbol, b.symbol);
        assert_eq!(a.tick_size, 0.25);
    }

    #[test]
    fn unknown_symbol_passes_through_with_defaults() {
        let reg = InstrumentRegistry::new();
        let inst = reg.resolve("AAPL").unwrap();
        assert_eq!(inst.symbol, "AAPL");
        assert_eq!(inst.tick_size, DEFAULT_TICK_SIZE);
        assert_eq!(inst.multiplier, DEFAULT_MULTIPLIER);
    }

    #[test]
    fn continuous_future_prefix_maps_to_front_month() {
        let reg = InstrumentRegistry::new();
        let inst = reg.resolve("ES1!").unwrap();
        assert_eq!(inst.symbol, "ES");
        assert_eq!(inst.multiplier, 50.0);
    }

    #[test]
    fn tick_round_half_away_from_zero() {
        let inst = Instrument {
            symbol: "ES".into(),
            asset_class: AssetClass::Future,
            tick_size: 0.25,
            multiplier: 50.0,
            session: (22, 21),
        };
        assert_eq!(InstrumentRegistry::tick_round(&inst, 5000.10), 5000.00);
        assert_eq!(InstrumentRegistry::tick_round(&inst, 5000.13), 5000.25);
        assert_eq!(InstrumentRegistry::tick_round(&inst, 5000.00), 5000.00);
    }

    #[test]
    fn tick_round_negative_half_away_from_zero() {
        let inst = Instrument {
            symbol: "ES".into(),
            asset_class: AssetClass::Future,
            tick_size: 0.5,
            multiplier: 50.0,
            session: (22, 21),
        };
        assert_eq!(InstrumentRegistry::tick_round(&inst, -1.26), -1.5);
    }

    #[test]
    fn session_closed_on_weekend() {
        let inst = Instrument {
            symbol: "ES".into(),
            asset_class: AssetClass::Future,
            tick_size: 0.25,
            multiplier: 50.0,
            session: (0, 24),
        };
        let saturday = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();
        assert!(!InstrumentRegistry::session_open(&inst, saturday));
    }

    #[test]
    fn session_wraps_midnight() {
        let inst = Instrument {
            symbol: "ES".into(),
            asset_class: AssetClass::Future,
            tick_size: 0.25,
            multiplier: 50.0,
            session: (22, 21),
        };
        let late_night = Utc.with_ymd_and_hms(2026, 7, 29, 23, 0, 0).unwrap();
        let mid_afternoon = Utc.with_ymd_and_hms(2026, 7, 29, 21, 30, 0).unwrap();
        assert!(InstrumentRegistry::session_open(&inst, late_night));
        assert!(!InstrumentRegistry::session_open(&inst, mid_afternoon));
    }
}
