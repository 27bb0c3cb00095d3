//! In-memory store.
//!
//! Backs tests and paper runs. All state is process-local; helpers expose
//! the trade log and user table for inspection.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use super::{TradeSink, UserStore};
use crate::types::{StakingState, TradeRecord, UserRecord};

/// Process-local implementation of both persistence seams.
#[derive(Default)]
pub struct MemoryStore {
    users: Mutex<HashMap<String, UserRecord>>,
    trades: Mutex<Vec<TradeRecord>>,
    /// If set, every operation fails with this message.
    force_error: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a user record.
    pub fn put_user(&self, user: UserRecord) {
        self.users
            .lock()
            .unwrap()
            .insert(user.owner_id.clone(), user);
    }

    /// Current copy of a user record.
    pub fn user(&self, owner_id: &str) -> Option<UserRecord> {
        self.users.lock().unwrap().get(owner_id).cloned()
    }

    /// All trade records appended so far, in order.
    pub fn trades(&self) -> Vec<TradeRecord> {
        self.trades.lock().unwrap().clone()
    }

    /// Force all subsequent operations to fail.
    pub fn set_error(&self, message: &str) {
        *self.force_error.lock().unwrap() = Some(message.to_string());
    }

    /// Clear any forced error.
    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }

    fn check_error(&self) -> Result<()> {
        match self.force_error.lock().unwrap().as_ref() {
            Some(message) => Err(anyhow!("{message}")),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn load_user(&self, owner_id: &str) -> Result<Option<UserRecord>> {
        self.check_error()?;
        Ok(self.users.lock().unwrap().get(owner_id).cloned())
    }

    async fn save_staking_state(&self, owner_id: &str, state: &StakingState) -> Result<()> {
        self.check_error()?;
        let mut users = self.users.lock().unwrap();
        let user = users
            .get_mut(owner_id)
            .ok_or_else(|| anyhow!("Unknown user: {owner_id}"))?;
        user.staking = state.clone();
        Ok(())
    }
}

#[async_trait]
impl TradeSink for MemoryStore {
    async fn append(&self, record: &TradeRecord) -> Result<()> {
        self.check_error()?;
        self.trades.lock().unwrap().push(record.clone());
        Ok(())
    }
}
