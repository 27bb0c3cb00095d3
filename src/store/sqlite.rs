//! SQLite store.
//!
//! Standalone deployments persist users and trade history in a single
//! SQLite file. Amounts are stored as TEXT to keep decimal values exact;
//! timestamps are RFC 3339 strings.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::info;

use super::{TradeSink, UserStore};
use crate::types::{
    StakingSnapshot, StakingState, TradeRecord, TradingSettings, UserRecord,
};

const CREATE_USERS: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    owner_id              TEXT PRIMARY KEY,
    is_active             INTEGER NOT NULL,
    base_amount           TEXT NOT NULL,
    max_amount            TEXT NOT NULL,
    is_auto_trading       INTEGER NOT NULL,
    martingale_enabled    INTEGER NOT NULL,
    default_duration_secs INTEGER NOT NULL,
    staking_level         INTEGER NOT NULL,
    loss_streak           INTEGER NOT NULL,
    multiplier            TEXT NOT NULL,
    max_steps             INTEGER NOT NULL,
    last_outcome          TEXT
)
"#;

const CREATE_TRADES: &str = r#"
CREATE TABLE IF NOT EXISTS trades (
    trade_id            TEXT PRIMARY KEY,
    owner_id            TEXT NOT NULL,
    direction           TEXT NOT NULL,
    amount              TEXT NOT NULL,
    asset               TEXT NOT NULL,
    duration_secs       INTEGER NOT NULL,
    staking_level       INTEGER NOT NULL,
    staking_loss_streak INTEGER NOT NULL,
    staking_base_amount TEXT NOT NULL,
    status              TEXT NOT NULL,
    source              TEXT NOT NULL,
    error               TEXT,
    placed_at           TEXT NOT NULL
)
"#;

const CREATE_TRADES_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_trades_owner ON trades(owner_id, placed_at)";

/// sqlx-backed implementation of both persistence seams.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect and create the schema if needed.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .with_context(|| format!("Failed to open database: {database_url}"))?;

        sqlx::query(CREATE_USERS).execute(&pool).await?;
        sqlx::query(CREATE_TRADES).execute(&pool).await?;
        sqlx::query(CREATE_TRADES_INDEX).execute(&pool).await?;

        info!(database_url, "SQLite store ready");
        Ok(Self { pool })
    }

    /// Insert or replace a user's trading slice.
    pub async fn upsert_user(&self, user: &UserRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (
                owner_id, is_active, base_amount, max_amount, is_auto_trading,
                martingale_enabled, default_duration_secs, staking_level,
                loss_streak, multiplier, max_steps, last_outcome
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(owner_id) DO UPDATE SET
                is_active = excluded.is_active,
                base_amount = excluded.base_amount,
                max_amount = excluded.max_amount,
                is_auto_trading = excluded.is_auto_trading,
                martingale_enabled = excluded.martingale_enabled,
                default_duration_secs = excluded.default_duration_secs,
                staking_level = excluded.staking_level,
                loss_streak = excluded.loss_streak,
                multiplier = excluded.multiplier,
                max_steps = excluded.max_steps,
                last_outcome = excluded.last_outcome
            "#,
        )
        .bind(&user.owner_id)
        .bind(user.is_active)
        .bind(user.trading_settings.base_amount.to_string())
        .bind(user.trading_settings.max_amount.to_string())
        .bind(user.trading_settings.is_auto_trading)
        .bind(user.trading_settings.martingale_enabled)
        .bind(user.trading_settings.default_duration_secs as i64)
        .bind(user.staking.current_level as i64)
        .bind(user.staking.loss_streak as i64)
        .bind(user.staking.multiplier.to_string())
        .bind(user.staking.max_steps as i64)
        .bind(user.staking.last_outcome.map(|o| o.to_string()))
        .execute(&self.pool)
        .await
        .context("Failed to upsert user")?;
        Ok(())
    }

    /// Trade history for a user, oldest first.
    pub async fn trades_for(&self, owner_id: &str) -> Result<Vec<TradeRecord>> {
        let rows = sqlx::query("SELECT * FROM trades WHERE owner_id = ? ORDER BY placed_at")
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await
            .context("Failed to load trades")?;
        rows.iter().map(trade_from_row).collect()
    }
}

#[async_trait]
impl UserStore for SqliteStore {
    async fn load_user(&self, owner_id: &str) -> Result<Option<UserRecord>> {
        let row = sqlx::query("SELECT * FROM users WHERE owner_id = ?")
            .bind(owner_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load user")?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn save_staking_state(&self, owner_id: &str, state: &StakingState) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE users SET
                staking_level = ?, loss_streak = ?, multiplier = ?,
                max_steps = ?, last_outcome = ?
            WHERE owner_id = ?
            "#,
        )
        .bind(state.current_level as i64)
        .bind(state.loss_streak as i64)
        .bind(state.multiplier.to_string())
        .bind(state.max_steps as i64)
        .bind(state.last_outcome.map(|o| o.to_string()))
        .bind(owner_id)
        .execute(&self.pool)
        .await
        .context("Failed to save staking state")?;

        if result.rows_affected() == 0 {
            return Err(anyhow!("Unknown user: {owner_id}"));
        }
        Ok(())
    }
}

#[async_trait]
impl TradeSink for SqliteStore {
    async fn append(&self, record: &TradeRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trades (
                trade_id, owner_id, direction, amount, asset, duration_secs,
                staking_level, staking_loss_streak, staking_base_amount,
                status, source, error, placed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.trade_id)
        .bind(&record.owner_id)
        .bind(record.direction.to_string())
        .bind(record.amount.to_string())
        .bind(&record.asset)
        .bind(record.duration_secs as i64)
        .bind(record.staking.level as i64)
        .bind(record.staking.loss_streak as i64)
        .bind(record.staking.base_amount.to_string())
        .bind(record.status.to_string())
        .bind(record.source.to_string())
        .bind(record.error.as_deref())
        .bind(record.placed_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to append trade record")?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn decimal(row: &SqliteRow, column: &str) -> Result<Decimal> {
    row.try_get::<String, _>(column)?
        .parse::<Decimal>()
        .with_context(|| format!("Bad decimal in column {column}"))
}

fn user_from_row(row: &SqliteRow) -> Result<UserRecord> {
    let last_outcome = row
        .try_get::<Option<String>, _>("last_outcome")?
        .map(|s| s.parse())
        .transpose()?;

    Ok(UserRecord {
        owner_id: row.try_get("owner_id")?,
        is_active: row.try_get("is_active")?,
        trading_settings: TradingSettings {
            base_amount: decimal(row, "base_amount")?,
            max_amount: decimal(row, "max_amount")?,
            is_auto_trading: row.try_get("is_auto_trading")?,
            martingale_enabled: row.try_get("martingale_enabled")?,
            default_duration_secs: row.try_get::<i64, _>("default_duration_secs")? as u32,
        },
        staking: StakingState {
            current_level: row.try_get::<i64, _>("staking_level")? as u32,
            loss_streak: row.try_get::<i64, _>("loss_streak")? as u32,
            multiplier: decimal(row, "multiplier")?,
            max_steps: row.try_get::<i64, _>("max_steps")? as u32,
            last_outcome,
        },
    })
}

fn trade_from_row(row: &SqliteRow) -> Result<TradeRecord> {
    let placed_at: String = row.try_get("placed_at")?;
    let placed_at = DateTime::parse_from_rfc3339(&placed_at)
        .context("Bad placed_at timestamp")?
        .with_timezone(&Utc);

    Ok(TradeRecord {
        trade_id: row.try_get("trade_id")?,
        owner_id: row.try_get("owner_id")?,
        direction: row.try_get::<String, _>("direction")?.parse()?,
        amount: decimal(row, "amount")?,
        asset: row.try_get("asset")?,
        duration_secs: row.try_get::<i64, _>("duration_secs")? as u32,
        staking: StakingSnapshot {
            level: row.try_get::<i64, _>("staking_level")? as u32,
            loss_streak: row.try_get::<i64, _>("staking_loss_streak")? as u32,
            base_amount: decimal(row, "staking_base_amount")?,
        },
        status: row.try_get::<String, _>("status")?.parse()?,
        source: row.try_get::<String, _>("source")?.parse()?,
        error: row.try_get("error")?,
        placed_at,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
