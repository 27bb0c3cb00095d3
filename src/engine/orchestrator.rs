//! Trading orchestrator.
//!
//! Fans inbound signals out to every eligible live session, drives the
//! placement protocol per surface, and persists one trade record per
//! attempt. Inbound results fan out as staking-state transitions. Every
//! per-user step is isolated: one user's failure is counted and recorded,
//! never propagated to the rest of the broadcast.

use futures::future::join_all;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

use crate::notify::{EventSink, Notification};
use crate::session::SessionPool;
use crate::staking;
use crate::store::{TradeSink, UserStore};
use crate::types::{
    BroadcastReport, EngineError, Signal, SignalResult, StakingSnapshot, TradeRecord, UserRecord,
};

use super::placement::PlacementProtocol;

// ---------------------------------------------------------------------------
// Per-user outcome
// ---------------------------------------------------------------------------

/// What happened to one user during a fan-out.
enum PlacementOutcome {
    Placed,
    /// Not eligible — counted as neither placed nor error.
    Skipped,
    Failed,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Consumes the session pool and staking engine; owns nothing but the
/// in-flight guard set.
pub struct TradingEngine {
    pool: Arc<SessionPool>,
    users: Arc<dyn UserStore>,
    trades: Arc<dyn TradeSink>,
    events: Arc<dyn EventSink>,
    protocol: PlacementProtocol,
    /// Owners with a placement currently executing. A signal that lands
    /// while the previous placement is still driving the surface fails
    /// fast for that owner instead of racing it.
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl TradingEngine {
    pub fn new(
        pool: Arc<SessionPool>,
        users: Arc<dyn UserStore>,
        trades: Arc<dyn TradeSink>,
        events: Arc<dyn EventSink>,
        protocol: PlacementProtocol,
    ) -> Self {
        Self {
            pool,
            users,
            trades,
            events,
            protocol,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Broadcast a signal to every eligible live session concurrently.
    ///
    /// Returns only once every branch has resolved or failed. Skipped
    /// users (no record, inactive, auto-trading off) appear in neither
    /// count; failures are counted and leave a failed trade record with
    /// the diagnostic.
    pub async fn broadcast_signal(&self, signal: &Signal) -> BroadcastReport {
        let owners = self.pool.live_owners();
        info!(signal = %signal, sessions = owners.len(), "Broadcasting signal");

        if owners.is_empty() {
            warn!("No live sessions — nothing to place");
            return BroadcastReport::default();
        }

        let attempts = owners
            .into_iter()
            .map(|owner_id| self.place_for_owner(owner_id, signal));
        let outcomes = join_all(attempts).await;

        let mut report = BroadcastReport::default();
        for outcome in outcomes {
            match outcome {
                PlacementOutcome::Placed => report.placed += 1,
                PlacementOutcome::Failed => report.errors += 1,
                PlacementOutcome::Skipped => {}
            }
        }

        info!(%report, "Broadcast complete");
        report
    }

    /// One user's branch of the fan-out. Catches everything.
    async fn place_for_owner(&self, owner_id: String, signal: &Signal) -> PlacementOutcome {
        let user = match self.users.load_user(&owner_id).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                warn!(%owner_id, "Live session with no user record — skipping");
                return PlacementOutcome::Skipped;
            }
            Err(e) => {
                error!(%owner_id, error = %e, "User load failed");
                return PlacementOutcome::Failed;
            }
        };

        if !user.is_active {
            debug!(%owner_id, "User inactive — skipping");
            return PlacementOutcome::Skipped;
        }
        if !user.trading_settings.is_auto_trading {
            debug!(%owner_id, "Auto-trading off — skipping");
            return PlacementOutcome::Skipped;
        }

        let snapshot = StakingSnapshot::of(&user.trading_settings, &user.staking);

        let stake = match staking::next_stake(&user.trading_settings, &user.staking) {
            Ok(stake) => stake,
            Err(e) => {
                error!(%owner_id, error = %e, "Stake computation failed");
                self.record_failure(&owner_id, signal, Decimal::ZERO, snapshot, &e)
                    .await;
                return PlacementOutcome::Failed;
            }
        };

        let _guard = match InFlightGuard::acquire(&self.in_flight, &owner_id) {
            Some(guard) => guard,
            None => {
                warn!(%owner_id, "Overlapping signal — placement refused");
                let e = EngineError::PlacementInFlight(owner_id.clone());
                self.record_failure(&owner_id, signal, stake, snapshot, &e).await;
                return PlacementOutcome::Failed;
            }
        };

        match self.place(&owner_id, signal, stake, snapshot.clone()).await {
            Ok(record) => {
                info!(
                    %owner_id,
                    trade_id = %record.trade_id,
                    amount = %record.amount,
                    "Trade placed"
                );
                self.events.emit(
                    &owner_id,
                    Notification::TradePlaced {
                        trade_id: record.trade_id.clone(),
                        signal_id: signal.signal_id.clone(),
                        asset: signal.asset.clone(),
                        direction: signal.direction,
                        amount: record.amount,
                        duration_secs: signal.duration_secs,
                    },
                );
                PlacementOutcome::Placed
            }
            Err(e) => {
                warn!(%owner_id, error = %e, "Placement failed");
                self.record_failure(&owner_id, signal, stake, snapshot, &e).await;
                PlacementOutcome::Failed
            }
        }
    }

    async fn place(
        &self,
        owner_id: &str,
        signal: &Signal,
        stake: Decimal,
        snapshot: StakingSnapshot,
    ) -> Result<TradeRecord, EngineError> {
        let surface = self
            .pool
            .get_handle(owner_id)
            .ok_or_else(|| EngineError::SessionNotFound(owner_id.to_string()))?;

        self.protocol.execute(surface.as_ref(), signal, stake).await?;

        let record = TradeRecord::auto_placed(owner_id, signal, stake, snapshot);
        if let Err(e) = self.trades.append(&record).await {
            // The venue already holds the trade; a history write failure
            // must not masquerade as a failed placement.
            error!(%owner_id, error = %e, "Trade record persistence failed");
        }
        Ok(record)
    }

    async fn record_failure(
        &self,
        owner_id: &str,
        signal: &Signal,
        amount: Decimal,
        snapshot: StakingSnapshot,
        error: &EngineError,
    ) {
        let record =
            TradeRecord::auto_failed(owner_id, signal, amount, snapshot, error.to_string());
        if let Err(e) = self.trades.append(&record).await {
            error!(%owner_id, error = %e, "Failed-trade record persistence failed");
        }
    }

    /// Best-effort push of the user's base stake into a live session's
    /// amount field. No session is a no-op; failures are logged only.
    pub async fn sync_settings(&self, user: &UserRecord) {
        let Some(surface) = self.pool.get_handle(&user.owner_id) else {
            debug!(owner_id = %user.owner_id, "No live session to sync");
            return;
        };

        match self
            .protocol
            .set_stake(surface.as_ref(), user.trading_settings.base_amount)
            .await
        {
            Ok(()) => info!(
                owner_id = %user.owner_id,
                amount = %user.trading_settings.base_amount,
                "Settings synced to session"
            ),
            Err(e) => warn!(owner_id = %user.owner_id, error = %e, "Settings sync failed"),
        }
    }

    /// Apply a signal outcome to every eligible live user's staking state.
    ///
    /// Only owners with a currently-live session are touched: a user who
    /// disconnected between signal and result never receives this
    /// transition. Per-user failures are logged and do not stop the rest.
    pub async fn process_result(&self, result: &SignalResult) {
        let owners = self.pool.live_owners();
        info!(
            signal_id = %result.signal_id,
            outcome = %result.outcome,
            users = owners.len(),
            "Processing result"
        );

        for owner_id in owners {
            let user = match self.users.load_user(&owner_id).await {
                Ok(Some(user)) => user,
                Ok(None) => continue,
                Err(e) => {
                    error!(%owner_id, error = %e, "User load failed during result processing");
                    continue;
                }
            };

            if !user.trading_settings.martingale_enabled {
                continue;
            }

            let next = staking::apply_outcome(&user.staking, result.outcome);
            if let Err(e) = self.users.save_staking_state(&owner_id, &next).await {
                error!(%owner_id, error = %e, "Staking state persistence failed");
                continue;
            }
            debug!(
                %owner_id,
                level = next.current_level,
                streak = next.loss_streak,
                "Staking state updated"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// In-flight guard
// ---------------------------------------------------------------------------

/// Marks an owner as busy for the duration of one placement.
struct InFlightGuard {
    set: Arc<Mutex<HashSet<String>>>,
    owner_id: String,
}

impl InFlightGuard {
    fn acquire(set: &Arc<Mutex<HashSet<String>>>, owner_id: &str) -> Option<Self> {
        if set.lock().unwrap().insert(owner_id.to_string()) {
            Some(Self {
                set: Arc::clone(set),
                owner_id: owner_id.to_string(),
            })
        } else {
            None
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.lock().unwrap().remove(&self.owner_id);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
