//! Shared types for the COPYTRADE engine.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that surface, session, staking,
//! and engine modules can depend on them without circular references.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Direction & outcome
// ---------------------------------------------------------------------------

/// Trade direction on the venue (binary option side).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Call,
    Put,
}

impl Direction {
    /// The opposite direction.
    pub fn opposite(&self) -> Self {
        match self {
            Direction::Call => Direction::Put,
            Direction::Put => Direction::Call,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Call => write!(f, "CALL"),
            Direction::Put => write!(f, "PUT"),
        }
    }
}

/// Accepts the external feed aliases as well: buy → call, sell → put.
impl std::str::FromStr for Direction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "call" | "buy" | "higher" => Ok(Direction::Call),
            "put" | "sell" | "lower" => Ok(Direction::Put),
            _ => Err(anyhow::anyhow!("Unknown direction: {s}")),
        }
    }
}

/// Resolved outcome of a signal's trade window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Win,
    Loss,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Win => write!(f, "WIN"),
            Outcome::Loss => write!(f, "LOSS"),
        }
    }
}

impl std::str::FromStr for Outcome {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "win" | "won" => Ok(Outcome::Win),
            "loss" | "lost" | "lose" => Ok(Outcome::Loss),
            _ => Err(anyhow::anyhow!("Unknown outcome: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Signal & result
// ---------------------------------------------------------------------------

/// A directional trade instruction broadcast to all eligible users.
/// Immutable; identifies one broadcast event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub signal_id: String,
    pub asset: String,
    pub direction: Direction,
    pub duration_secs: u32,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} {}s",
            self.signal_id, self.direction, self.asset, self.duration_secs,
        )
    }
}

/// Outcome report for a previously broadcast signal.
///
/// Drives one staking transition per eligible live user. Does not update
/// trade record outcomes — result reconciliation happens upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalResult {
    pub signal_id: String,
    pub outcome: Outcome,
}

// ---------------------------------------------------------------------------
// Staking state
// ---------------------------------------------------------------------------

/// Per-user loss-doubling staking state.
///
/// Invariant: `current_level <= max_steps`. Mutated only by the staking
/// engine — everything else treats it as read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StakingState {
    pub current_level: u32,
    pub loss_streak: u32,
    /// Stake multiplier applied per level. Must be > 1.
    pub multiplier: Decimal,
    pub max_steps: u32,
    pub last_outcome: Option<Outcome>,
}

impl Default for StakingState {
    fn default() -> Self {
        Self {
            current_level: 0,
            loss_streak: 0,
            multiplier: Decimal::TWO,
            max_steps: 6,
            last_outcome: None,
        }
    }
}

impl fmt::Display for StakingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "level {}/{} (streak {}, x{})",
            self.current_level, self.max_steps, self.loss_streak, self.multiplier,
        )
    }
}

/// Point-in-time staking snapshot attached to each trade record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StakingSnapshot {
    pub level: u32,
    pub loss_streak: u32,
    pub base_amount: Decimal,
}

impl StakingSnapshot {
    pub fn of(settings: &TradingSettings, state: &StakingState) -> Self {
        Self {
            level: state.current_level,
            loss_streak: state.loss_streak,
            base_amount: settings.base_amount,
        }
    }
}

// ---------------------------------------------------------------------------
// User record
// ---------------------------------------------------------------------------

/// Per-user trading configuration, read from the user store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingSettings {
    pub base_amount: Decimal,
    pub max_amount: Decimal,
    pub is_auto_trading: bool,
    pub martingale_enabled: bool,
    pub default_duration_secs: u32,
}

impl Default for TradingSettings {
    fn default() -> Self {
        Self {
            base_amount: Decimal::ONE,
            max_amount: Decimal::ONE_THOUSAND,
            is_auto_trading: false,
            martingale_enabled: true,
            default_duration_secs: 300,
        }
    }
}

/// The slice of a user record the trading core reads and writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub owner_id: String,
    pub is_active: bool,
    pub trading_settings: TradingSettings,
    pub staking: StakingState,
}

impl UserRecord {
    /// A fresh user record with default settings.
    pub fn new(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            is_active: true,
            trading_settings: TradingSettings::default(),
            staking: StakingState::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Trade record
// ---------------------------------------------------------------------------

/// Lifecycle state of a placement attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Pending,
    Placed,
    Failed,
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeStatus::Pending => write!(f, "pending"),
            TradeStatus::Placed => write!(f, "placed"),
            TradeStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for TradeStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TradeStatus::Pending),
            "placed" => Ok(TradeStatus::Placed),
            "failed" => Ok(TradeStatus::Failed),
            _ => Err(anyhow::anyhow!("Unknown trade status: {s}")),
        }
    }
}

/// How the placement was initiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSource {
    Manual,
    Auto,
}

impl fmt::Display for TradeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeSource::Manual => write!(f, "manual"),
            TradeSource::Auto => write!(f, "auto"),
        }
    }
}

impl std::str::FromStr for TradeSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(TradeSource::Manual),
            "auto" => Ok(TradeSource::Auto),
            _ => Err(anyhow::anyhow!("Unknown trade source: {s}")),
        }
    }
}

/// Append-only record of one placement attempt.
///
/// Created at placement time, placed or failed; never mutated by the
/// staking engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub trade_id: String,
    pub owner_id: String,
    pub direction: Direction,
    pub amount: Decimal,
    pub asset: String,
    pub duration_secs: u32,
    pub staking: StakingSnapshot,
    pub status: TradeStatus,
    pub source: TradeSource,
    /// Short diagnostic for failed attempts.
    pub error: Option<String>,
    pub placed_at: DateTime<Utc>,
}

impl TradeRecord {
    /// A successfully placed auto trade.
    pub fn auto_placed(
        owner_id: &str,
        signal: &Signal,
        amount: Decimal,
        staking: StakingSnapshot,
    ) -> Self {
        Self {
            trade_id: format!("auto-{}", uuid::Uuid::new_v4()),
            owner_id: owner_id.to_string(),
            direction: signal.direction,
            amount,
            asset: signal.asset.clone(),
            duration_secs: signal.duration_secs,
            staking,
            status: TradeStatus::Placed,
            source: TradeSource::Auto,
            error: None,
            placed_at: Utc::now(),
        }
    }

    /// A failed auto placement attempt with its diagnostic.
    pub fn auto_failed(
        owner_id: &str,
        signal: &Signal,
        amount: Decimal,
        staking: StakingSnapshot,
        error: impl Into<String>,
    ) -> Self {
        Self {
            trade_id: format!("auto-{}", uuid::Uuid::new_v4()),
            owner_id: owner_id.to_string(),
            direction: signal.direction,
            amount,
            asset: signal.asset.clone(),
            duration_secs: signal.duration_secs,
            staking,
            status: TradeStatus::Failed,
            source: TradeSource::Auto,
            error: Some(error.into()),
            placed_at: Utc::now(),
        }
    }
}

impl fmt::Display for TradeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} {} ${} {}s ({})",
            self.trade_id,
            self.owner_id,
            self.direction,
            self.asset,
            self.amount,
            self.duration_secs,
            self.status,
        )
    }
}

// ---------------------------------------------------------------------------
// Session location
// ---------------------------------------------------------------------------

/// Where a session's page currently is, derived from the latest observed
/// navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LocationState {
    OffTarget,
    OnTargetDemo,
    OnTargetReal,
}

impl LocationState {
    /// Whether trades can be placed from this location.
    pub fn is_tradable(&self) -> bool {
        !matches!(self, LocationState::OffTarget)
    }
}

impl fmt::Display for LocationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocationState::OffTarget => write!(f, "off-target"),
            LocationState::OnTargetDemo => write!(f, "on-target-demo"),
            LocationState::OnTargetReal => write!(f, "on-target-real"),
        }
    }
}

// ---------------------------------------------------------------------------
// Broadcast report
// ---------------------------------------------------------------------------

/// Aggregate result of one signal fan-out.
///
/// Skipped users (inactive, auto-trading off, no user record) count as
/// neither placed nor errors — detail lives in the persisted trade records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastReport {
    pub placed: usize,
    pub errors: usize,
}

impl fmt::Display for BroadcastReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "placed={} errors={}", self.placed, self.errors)
    }
}

// ---------------------------------------------------------------------------
// Placement protocol steps
// ---------------------------------------------------------------------------

/// The three ordered steps of the placement protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementStep {
    Stake,
    Expiry,
    Direction,
}

impl fmt::Display for PlacementStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlacementStep::Stake => write!(f, "stake"),
            PlacementStep::Expiry => write!(f, "expiry"),
            PlacementStep::Direction => write!(f, "direction"),
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for COPYTRADE.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Session capacity exceeded (cap {cap})")]
    CapacityExceeded { cap: usize },

    #[error("No session for user {0}")]
    SessionNotFound(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("The {step} step exhausted all {strategies} locator strategies")]
    LocatorNotFound {
        step: PlacementStep,
        strategies: usize,
    },

    #[error("Placement aborted at the {step} step: {reason}")]
    PlacementAborted { step: PlacementStep, reason: String },

    #[error("Stake computation failed: {0}")]
    StakeComputation(String),

    #[error("Placement already in flight for {0}")]
    PlacementInFlight(String),

    #[error("Surface error: {0}")]
    Surface(#[from] crate::surface::SurfaceError),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
