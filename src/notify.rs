//! User notification seam.
//!
//! The engine announces session and trade lifecycle events through an
//! explicit sink rather than an ambient emitter, so ordering and
//! backpressure stay visible. The bounded `ChannelSink` never blocks the
//! trading path: when the consumer falls behind, events are dropped with
//! a warning instead of stalling a placement.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::types::Direction;

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// Events surfaced to a user's notification channel.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    SessionCreated,
    SessionClosed,
    TradePlaced {
        trade_id: String,
        signal_id: String,
        asset: String,
        direction: Direction,
        amount: Decimal,
        duration_secs: u32,
    },
}

impl Notification {
    /// The wire name of this event.
    pub fn name(&self) -> &'static str {
        match self {
            Notification::SessionCreated => "session_created",
            Notification::SessionClosed => "session_closed",
            Notification::TradePlaced { .. } => "trade_placed",
        }
    }
}

/// A notification addressed to one user.
#[derive(Debug, Clone, Serialize)]
pub struct UserEvent {
    pub owner_id: String,
    #[serde(flatten)]
    pub notification: Notification,
    pub at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

/// Receives engine events keyed by user. Implementations must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, owner_id: &str, notification: Notification);
}

/// Bounded, non-blocking sink over a tokio channel.
pub struct ChannelSink {
    tx: mpsc::Sender<UserEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiver its consumer drains.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<UserEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, owner_id: &str, notification: Notification) {
        let event = UserEvent {
            owner_id: owner_id.to_string(),
            notification,
            at: Utc::now(),
        };
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(
                    owner_id = %event.owner_id,
                    event = event.notification.name(),
                    "Notification channel full — dropping event"
                );
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                debug!(
                    owner_id = %event.owner_id,
                    event = event.notification.name(),
                    "Notification channel closed"
                );
            }
        }
    }
}

/// Discards every event. Useful when no consumer is wired up.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _owner_id: &str, _notification: Notification) {}
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
