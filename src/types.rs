// =============================================================================
// Shared types used across the Aurora signal router
// =============================================================================

use serde::{Deserialize, Serialize};

/// Asset class of an [`crate::instrument::Instrument`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetClass {
    Equity,
    Option,
    Future,
    Crypto,
    Fx,
}

impl std::fmt::Display for AssetClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Equity => "equity",
            Self::Option => "option",
            Self::Future => "future",
            Self::Crypto => "crypto",
            Self::Fx => "fx",
        };
        write!(f, "{s}")
    }
}

/// Side of an alert or order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
    /// Only valid on an inbound [`crate::models::Alert`]; expands to the
    /// opposing side of the current position at routing time.
    Close,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
            Self::Close => "close",
        };
        write!(f, "{s}")
    }
}

impl Side {
    /// The side that closes a position opened with `self`.
    pub fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
            Self::Close => Self::Close,
        }
    }

    /// +1.0 for buy, -1.0 for sell. `Close` has no inherent sign.
    pub fn sign(self) -> f64 {
        match self {
            Self::Buy => 1.0,
            Self::Sell => -1.0,
            Self::Close => 0.0,
        }
    }
}

/// Order type, as named in the inbound alert schema (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Market => "market",
            Self::Limit => "limit",
            Self::Stop => "stop",
            Self::StopLimit => "stop_limit",
        };
        write!(f, "{s}")
    }
}

/// Time-in-force instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeInForce {
    Day,
    Gtc,
    Ioc,
    Fok,
}

impl Default for TimeInForce {
    fn default() -> Self {
        Self::Day
    }
}

impl std::fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Day => "day",
            Self::Gtc => "gtc",
            Self::Ioc => "ioc",
            Self::Fok => "fok",
        };
        write!(f, "{s}")
    }
}

/// Order lifecycle status (spec.md §3 `Order`). Transitions are monotonic:
/// `pending -> working -> (partiallyFilled)* -> {filled | cancelled}`;
/// `rejected` is terminal from `pending`; `cancelled` is reachable only from
/// `pending | working | partiallyFilled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OrderStatus {
    Pending,
    Working,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Filled | Self::Cancelled | Self::Rejected)
    }

    /// Whether transitioning from `self` to `next` is a legal, monotonic step.
    pub fn can_transition_to(self, next: Self) -> bool {
        use OrderStatus::*;
        match (self, next) {
            (Pending, Working) => true,
            (Pending, Rejected) => true,
            (Pending, Cancelled) => true,
            (Working, PartiallyFilled) => true,
            (Working, Filled) => true,
            (Working, Cancelled) => true,
            (PartiallyFilled, PartiallyFilled) => true,
            (PartiallyFilled, Filled) => true,
            (PartiallyFilled, Cancelled) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Working => "working",
            Self::PartiallyFilled => "partiallyFilled",
            Self::Filled => "filled",
            Self::Cancelled => "cancelled",
            Self::Rejected => "rejected",
        };
        write!(f, "{s}")
    }
}

/// Account kind (spec.md §3 `Account`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    Live,
    Sandbox,
    Simulator,
    Funded,
}

impl std::fmt::Display for AccountKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Live => "live",
            Self::Sandbox => "sandbox",
            Self::Simulator => "simulator",
            Self::Funded => "funded",
        };
        write!(f, "{s}")
    }
}

/// Whether the engine is actively routing live alerts, paused, or killed.
/// Kept from the teacher's `TradingMode`, generalized from a single-bot
/// toggle to a router-wide switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradingMode {
    Live,
    Paused,
    Killed,
}

impl Default for TradingMode {
    fn default() -> Self {
        Self::Paused
    }
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Live => write!(f, "Live"),
            Self::Paused => write!(f, "Paused"),
            Self::Killed => write!(f, "Killed"),
        }
    }
}

/// Strategy operating mode (spec.md §3 `StrategyRecord`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyMode {
    Live,
    Paper,
    Suspended,
}

impl std::fmt::Display for StrategyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Live => "live",
            Self::Paper => "paper",
            Self::Suspended => "suspended",
        };
        write!(f, "{s}")
    }
}

/// Terminal (or in-flight) status of an Alert as it moves through the
/// coordinator's lifecycle (spec.md §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Received,
    Validating,
    Routing,
    Placing,
    Working,
    Filled,
    Cancelled,
    Rejected,
    Failed,
    Duplicate,
    Ignored,
}

impl Default for AlertStatus {
    fn default() -> Self {
        Self::Received
    }
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Received => "received",
            Self::Validating => "validating",
            Self::Routing => "routing",
            Self::Placing => "placing",
            Self::Working => "working",
            Self::Filled => "filled",
            Self::Cancelled => "cancelled",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
            Self::Duplicate => "duplicate",
            Self::Ignored => "ignored",
        };
        write!(f, "{s}")
    }
}

/// A typed selector a broadcast client subscribes to (spec.md §3
/// `Subscription`, §4.8).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum Topic {
    Quote { selector: String },
    Account { selector: String },
    Position { selector: String },
    Order { selector: String },
    Fill { selector: String },
    Alert { selector: String },
    Violation { selector: String },
    Strategy { selector: String },
}

impl Topic {
    /// The wildcard selector matches any concrete selector for its kind.
    pub const WILDCARD: &'static str = "*";

    pub fn matches_kind_selector(&self, kind: &str, selector: &str) -> bool {
        let (self_kind, self_selector) = self.kind_and_selector();
        self_kind == kind && (self_selector == Self::WILDCARD || self_selector == selector)
    }

    fn kind_and_selector(&self) -> (&'static str, &str) {
        match self {
            Self::Quote { selector } => ("quote", selector),
            Self::Account { selector } => ("account", selector),
            Self::Position { selector } => ("position", selector),
            Self::Order { selector } => ("order", selector),
            Self::Fill { selector } => ("fill", selector),
            Self::Alert { selector } => ("alert", selector),
            Self::Violation { selector } => ("violation", selector),
            Self::Strategy { selector } => ("strategy", selector),
        }
    }
}

/// Whether the server process is running under development or production
/// semantics (spec.md §6 `--mode`). Controls InternalError propagation
/// (spec.md §7): dev panics, prod returns a generic 500.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Dev,
    Prod,
}

impl Default for RunMode {
    fn default() -> Self {
        Self::Dev
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dev => write!(f, "dev"),
            Self::Prod => write!(f, "prod"),
        }
    }
}
