//! Persistence seams.
//!
//! The trading core reads and writes exactly two things: the slice of a
//! user record it cares about (settings + staking state) and an
//! append-only trade history. Both are behind traits so the embedding
//! service owns the actual schema. Implementations provided:
//! - `memory` — in-process store for tests and paper runs
//! - `sqlite` — sqlx-backed store for standalone deployments

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{StakingState, TradeRecord, UserRecord};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Read/write access to user trading records.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Load the trading slice of a user record. `None` if unknown.
    async fn load_user(&self, owner_id: &str) -> Result<Option<UserRecord>>;

    /// Persist a user's staking state after a transition.
    async fn save_staking_state(&self, owner_id: &str, state: &StakingState) -> Result<()>;
}

/// Append-only trade history.
#[async_trait]
pub trait TradeSink: Send + Sync {
    async fn append(&self, record: &TradeRecord) -> Result<()>;
}
