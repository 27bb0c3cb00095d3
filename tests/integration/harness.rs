//! Shared test harness.
//!
//! Wires the full engine — scripted surfaces, session pool, in-memory
//! store, bounded notification channel — with no external dependencies.

use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use copytrade::config::VenueConfig;
use copytrade::engine::{PlacementProtocol, TradingEngine};
use copytrade::notify::{ChannelSink, EventSink, UserEvent};
use copytrade::session::SessionPool;
use copytrade::store::{MemoryStore, TradeSink, UserStore};
use copytrade::surface::{ScriptedFactory, SurfaceFactory};
use copytrade::types::{Direction, Signal, UserRecord};

pub struct Harness {
    pub factory: Arc<ScriptedFactory>,
    pub pool: Arc<SessionPool>,
    pub store: Arc<MemoryStore>,
    pub engine: TradingEngine,
    pub notifications: mpsc::Receiver<UserEvent>,
}

pub fn harness() -> Harness {
    harness_with_cap(20)
}

pub fn harness_with_cap(cap: usize) -> Harness {
    let factory = Arc::new(ScriptedFactory::new());
    let venue = VenueConfig::default();
    let (sink, notifications) = ChannelSink::new(256);
    let events: Arc<dyn EventSink> = Arc::new(sink);

    let pool = Arc::new(SessionPool::new(
        Arc::clone(&factory) as Arc<dyn SurfaceFactory>,
        venue.clone(),
        cap,
        Arc::clone(&events),
    ));

    let store = Arc::new(MemoryStore::new());
    let engine = TradingEngine::new(
        Arc::clone(&pool),
        Arc::clone(&store) as Arc<dyn UserStore>,
        Arc::clone(&store) as Arc<dyn TradeSink>,
        events,
        PlacementProtocol::new(&venue),
    );

    Harness {
        factory,
        pool,
        store,
        engine,
        notifications,
    }
}

/// A connected user with auto-trading enabled and the given base stake.
pub async fn connect_auto_trader(h: &Harness, owner_id: &str, base: Decimal) {
    let mut user = UserRecord::new(owner_id);
    user.trading_settings.is_auto_trading = true;
    user.trading_settings.base_amount = base;
    h.store.put_user(user);
    h.pool.create_session(owner_id).await.unwrap();
}

pub fn call_signal(id: &str) -> Signal {
    Signal {
        signal_id: id.to_string(),
        asset: "EURUSD".to_string(),
        direction: Direction::Call,
        duration_secs: 300,
    }
}

/// Names of all notifications currently queued.
pub fn drain_notifications(h: &mut Harness) -> Vec<(String, &'static str)> {
    let mut drained = Vec::new();
    while let Ok(event) = h.notifications.try_recv() {
        drained.push((event.owner_id.clone(), event.notification.name()));
    }
    drained
}

/// Wait for an event-driven condition to settle.
pub async fn settle(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}
