//! Session lifecycle: connect, observe navigation, disconnect, shutdown.

use rust_decimal_macros::dec;

use copytrade::types::{EngineError, LocationState};

use crate::harness::{connect_auto_trader, drain_notifications, harness, harness_with_cap, settle};

#[tokio::test]
async fn test_connect_login_and_reach_trading_page() {
    let mut h = harness();
    connect_auto_trader(&h, "user-1", dec!(10)).await;

    h.pool.navigate_to_entry("user-1").await.unwrap();
    assert!(!h.pool.is_on_tradable_page("user-1"));
    assert_eq!(
        h.pool.location_state("user-1"),
        Some(LocationState::OffTarget),
    );

    // The user logs in and the venue routes them to the demo trading page.
    let surface = h.factory.surface_for("user-1").unwrap();
    surface.navigate_externally("https://pocketoption.com/en/cabinet/demo-quick-high-low/");

    assert!(settle(|| h.pool.is_on_tradable_page("user-1")).await);
    assert_eq!(
        h.pool.location_state("user-1"),
        Some(LocationState::OnTargetDemo),
    );

    let stats = h.pool.stats();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.on_tradable_page, 1);

    assert_eq!(
        drain_notifications(&mut h),
        vec![("user-1".to_string(), "session_created")],
    );
}

#[tokio::test]
async fn test_capacity_frees_up_on_close() {
    let h = harness_with_cap(2);
    connect_auto_trader(&h, "user-1", dec!(10)).await;
    connect_auto_trader(&h, "user-2", dec!(10)).await;

    let err = h.pool.create_session("user-3").await.unwrap_err();
    assert!(matches!(err, EngineError::CapacityExceeded { cap: 2 }));
    assert_eq!(h.pool.stats().total, 2);

    h.pool.close_session("user-1").await;
    h.pool.create_session("user-3").await.unwrap();
    assert_eq!(h.pool.stats().total, 2);
}

#[tokio::test]
async fn test_venue_side_logout_cleans_up() {
    let mut h = harness();
    connect_auto_trader(&h, "user-1", dec!(10)).await;
    assert_eq!(h.pool.live_owners(), vec!["user-1".to_string()]);

    h.factory.surface_for("user-1").unwrap().simulate_disconnect();
    assert!(settle(|| h.pool.stats().total == 0).await);
    assert!(h.pool.get_handle("user-1").is_none());

    let events = drain_notifications(&mut h);
    assert_eq!(
        events,
        vec![
            ("user-1".to_string(), "session_created"),
            ("user-1".to_string(), "session_closed"),
        ],
    );
}

#[tokio::test]
async fn test_close_all_then_fresh_start() {
    let h = harness();
    connect_auto_trader(&h, "user-1", dec!(10)).await;
    connect_auto_trader(&h, "user-2", dec!(10)).await;

    h.pool.close_all().await;
    assert_eq!(h.pool.stats().total, 0);

    // The pool stays usable after a mass shutdown.
    h.pool.create_session("user-1").await.unwrap();
    assert_eq!(h.pool.stats().total, 1);
}
