//! Signal broadcast, placement isolation, and result processing flows.

use rust_decimal_macros::dec;
use std::time::Duration;

use copytrade::surface::scripted::ScriptedAction;
use copytrade::types::{BroadcastReport, Outcome, SignalResult, TradeStatus, UserRecord};

use crate::harness::{call_signal, connect_auto_trader, drain_notifications, harness};

#[tokio::test]
async fn test_broadcast_with_no_sessions_has_no_side_effects() {
    let mut h = harness();
    h.store.put_user(UserRecord::new("user-1")); // user exists, no session

    let report = h.engine.broadcast_signal(&call_signal("sig-1")).await;

    assert_eq!(report, BroadcastReport::default());
    assert!(h.store.trades().is_empty());
    assert!(drain_notifications(&mut h).is_empty());
}

#[tokio::test]
async fn test_broadcast_reaches_every_eligible_session() {
    let mut h = harness();
    connect_auto_trader(&h, "alice", dec!(10)).await;
    connect_auto_trader(&h, "bob", dec!(5)).await;

    // carol is connected but has auto-trading off.
    h.store.put_user(UserRecord::new("carol"));
    h.pool.create_session("carol").await.unwrap();

    let report = h.engine.broadcast_signal(&call_signal("sig-1")).await;
    assert_eq!(report, BroadcastReport { placed: 2, errors: 0 });

    let trades = h.store.trades();
    assert_eq!(trades.len(), 2);
    assert!(trades.iter().all(|t| t.status == TradeStatus::Placed));
    assert!(trades.iter().any(|t| t.owner_id == "alice" && t.amount == dec!(10)));
    assert!(trades.iter().any(|t| t.owner_id == "bob" && t.amount == dec!(5)));

    let placed: Vec<_> = drain_notifications(&mut h)
        .into_iter()
        .filter(|(_, name)| *name == "trade_placed")
        .collect();
    assert_eq!(placed.len(), 2);
}

#[tokio::test]
async fn test_one_failure_never_aborts_the_fanout() {
    let h = harness();
    for owner in ["alice", "bob", "carol"] {
        connect_auto_trader(&h, owner, dec!(10)).await;
    }
    h.factory.surface_for("bob").unwrap().set_fail_interactions(true);

    let report = h.engine.broadcast_signal(&call_signal("sig-1")).await;
    assert_eq!(report, BroadcastReport { placed: 2, errors: 1 });

    // One record per attempt: two placed, one failed with the diagnostic.
    let trades = h.store.trades();
    assert_eq!(trades.len(), 3);
    let failed = trades.iter().find(|t| t.owner_id == "bob").unwrap();
    assert_eq!(failed.status, TradeStatus::Failed);
    assert!(failed.error.is_some());

    // The broken user does not poison later broadcasts either.
    h.factory.surface_for("bob").unwrap().set_fail_interactions(false);
    let report = h.engine.broadcast_signal(&call_signal("sig-2")).await;
    assert_eq!(report, BroadcastReport { placed: 3, errors: 0 });
}

#[tokio::test]
async fn test_martingale_cycle_through_the_full_stack() {
    let h = harness();
    connect_auto_trader(&h, "alice", dec!(10)).await;

    let outcomes = [Outcome::Loss, Outcome::Loss, Outcome::Loss, Outcome::Win];
    for (round, outcome) in outcomes.iter().enumerate() {
        let signal = call_signal(&format!("sig-{round}"));
        let report = h.engine.broadcast_signal(&signal).await;
        assert_eq!(report.placed, 1);
        h.engine
            .process_result(&SignalResult {
                signal_id: signal.signal_id,
                outcome: *outcome,
            })
            .await;
    }
    // After the win the sequence restarts from the base amount.
    let report = h.engine.broadcast_signal(&call_signal("sig-final")).await;
    assert_eq!(report.placed, 1);

    let stakes: Vec<String> = h
        .factory
        .surface_for("alice")
        .unwrap()
        .actions()
        .into_iter()
        .filter_map(|action| match action {
            ScriptedAction::Fill { text, .. } => Some(text),
            _ => None,
        })
        .collect();
    assert_eq!(stakes, vec!["10", "20", "40", "80", "10"]);
}

#[tokio::test]
async fn test_result_applies_only_to_live_sessions() {
    let h = harness();
    connect_auto_trader(&h, "alice", dec!(10)).await;
    connect_auto_trader(&h, "bob", dec!(10)).await;

    // bob disconnects between the signal and its result.
    h.pool.close_session("bob").await;
    h.engine
        .process_result(&SignalResult {
            signal_id: "sig-1".to_string(),
            outcome: Outcome::Loss,
        })
        .await;

    assert_eq!(h.store.user("alice").unwrap().staking.current_level, 1);
    assert_eq!(h.store.user("bob").unwrap().staking.current_level, 0);
}

#[tokio::test]
async fn test_result_skips_martingale_disabled_users() {
    let h = harness();
    connect_auto_trader(&h, "alice", dec!(10)).await;

    let mut flat = UserRecord::new("bob");
    flat.trading_settings.is_auto_trading = true;
    flat.trading_settings.martingale_enabled = false;
    h.store.put_user(flat);
    h.pool.create_session("bob").await.unwrap();

    h.engine
        .process_result(&SignalResult {
            signal_id: "sig-1".to_string(),
            outcome: Outcome::Loss,
        })
        .await;

    assert_eq!(h.store.user("alice").unwrap().staking.current_level, 1);
    assert_eq!(h.store.user("bob").unwrap().staking.current_level, 0);
}

#[tokio::test]
async fn test_overlapping_signals_are_guarded_per_user() {
    let h = harness();
    connect_auto_trader(&h, "alice", dec!(10)).await;
    h.factory
        .surface_for("alice")
        .unwrap()
        .set_latency(Duration::from_millis(100));

    let sig_1 = call_signal("sig-1");
    let sig_2 = call_signal("sig-2");
    let (first, second) = tokio::join!(
        h.engine.broadcast_signal(&sig_1),
        h.engine.broadcast_signal(&sig_2),
    );

    // Exactly one placement goes through; the overlapping one is refused.
    assert_eq!(first.placed + second.placed, 1);
    assert_eq!(first.errors + second.errors, 1);

    let trades = h.store.trades();
    assert_eq!(trades.len(), 2);
    let refused = trades.iter().find(|t| t.status == TradeStatus::Failed).unwrap();
    assert!(refused.error.as_deref().unwrap().contains("in flight"));
}

#[tokio::test]
async fn test_session_closed_mid_placement_surfaces_as_failure() {
    let h = harness();
    connect_auto_trader(&h, "alice", dec!(10)).await;
    h.factory
        .surface_for("alice")
        .unwrap()
        .set_latency(Duration::from_millis(200));

    let sig_1 = call_signal("sig-1");
    let (report, ()) = tokio::join!(h.engine.broadcast_signal(&sig_1), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        h.pool.close_session("alice").await;
    });

    // A clear per-user failure, not a crash.
    assert_eq!(report, BroadcastReport { placed: 0, errors: 1 });
    let trades = h.store.trades();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].status, TradeStatus::Failed);
}

#[tokio::test]
async fn test_store_outage_is_counted_not_propagated() {
    let h = harness();
    connect_auto_trader(&h, "alice", dec!(10)).await;
    h.store.set_error("store offline");

    let report = h.engine.broadcast_signal(&call_signal("sig-1")).await;
    assert_eq!(report, BroadcastReport { placed: 0, errors: 1 });

    h.store.clear_error();
    let report = h.engine.broadcast_signal(&call_signal("sig-2")).await;
    assert_eq!(report, BroadcastReport { placed: 1, errors: 0 });
}
