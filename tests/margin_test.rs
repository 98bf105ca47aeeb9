//! Margin risk monitor tests
//!
//! The monitor always recomputes the level from equity/margin, treats
//! margin <= 0 as undefined risk, and fires each tier only on the cycle
//! where the boundary is crossed.

use spyglass::services::{LedgerStore, MarginMonitor, ReconcileEngine, MAX_MARGIN_LEVEL};
use spyglass::types::{AccountReport, MarginSeverity, SnapshotPayload};
use spyglass::websocket::ConnectionRegistry;
use std::sync::Arc;
use tokio::sync::mpsc;

const ACCOUNT: i64 = 1001;

fn report(equity: f64, margin: f64) -> AccountReport {
    AccountReport {
        balance: equity,
        equity,
        margin,
        free_margin: equity - margin,
        margin_level: 0.0,
        currency: "USD".to_string(),
        leverage: 100,
    }
}

/// A report whose raw margin_level field disagrees wildly with the
/// recomputable value.
fn lying_report(equity: f64, margin: f64, reported_level: f64) -> AccountReport {
    AccountReport {
        margin_level: reported_level,
        ..report(equity, margin)
    }
}

// =============================================================================
// Monitor unit behavior
// =============================================================================

#[test]
fn test_zero_margin_never_fires_regardless_of_equity() {
    let monitor = MarginMonitor::default();

    for equity in [0.0, 1.0, -500.0, 1_000_000.0] {
        let assessment = monitor.assess(ACCOUNT, &report(equity, 0.0));
        assert_eq!(assessment.margin_level, None);
        assert!(assessment.alert.is_none());
    }

    let assessment = monitor.assess(ACCOUNT, &report(100.0, -5.0));
    assert!(assessment.alert.is_none());
}

#[test]
fn test_recomputed_level_supersedes_reported_value() {
    let monitor = MarginMonitor::default();

    // Feed claims a healthy 9999%, but equity/margin says 120%.
    let assessment = monitor.assess(ACCOUNT, &lying_report(120.0, 100.0, 9_999.0));

    let level = assessment.margin_level.unwrap();
    assert!((level - 120.0).abs() < 1e-9);

    let alert = assessment.alert.unwrap();
    assert_eq!(alert.severity, MarginSeverity::Warning);
    assert!((alert.margin_level - 120.0).abs() < 1e-9);
}

#[test]
fn test_warning_fires_once_on_crossing_then_stays_quiet() {
    let monitor = MarginMonitor::default();

    // 160% -> above every tier, nothing fires.
    assert!(monitor.assess(ACCOUNT, &report(160.0, 100.0)).alert.is_none());

    // Crossing to 140% fires exactly one warning.
    let alert = monitor
        .assess(ACCOUNT, &report(140.0, 100.0))
        .alert
        .unwrap();
    assert_eq!(alert.severity, MarginSeverity::Warning);

    // Holding at 140% for three more cycles fires nothing.
    for _ in 0..3 {
        assert!(monitor.assess(ACCOUNT, &report(140.0, 100.0)).alert.is_none());
    }
}

#[test]
fn test_tiers_escalate_and_rearm_on_recovery() {
    let monitor = MarginMonitor::default();

    let warning = monitor.assess(ACCOUNT, &report(140.0, 100.0)).alert.unwrap();
    assert_eq!(warning.severity, MarginSeverity::Warning);

    let high = monitor.assess(ACCOUNT, &report(90.0, 100.0)).alert.unwrap();
    assert_eq!(high.severity, MarginSeverity::High);

    let critical = monitor.assess(ACCOUNT, &report(45.0, 100.0)).alert.unwrap();
    assert_eq!(critical.severity, MarginSeverity::Critical);

    // Recovery is silent.
    assert!(monitor.assess(ACCOUNT, &report(140.0, 100.0)).alert.is_none());

    // Dropping below the high boundary again fires again.
    let again = monitor.assess(ACCOUNT, &report(90.0, 100.0)).alert.unwrap();
    assert_eq!(again.severity, MarginSeverity::High);
}

#[test]
fn test_flat_margin_resets_edge_trigger() {
    let monitor = MarginMonitor::default();

    monitor.assess(ACCOUNT, &report(140.0, 100.0)).alert.unwrap();

    // All positions closed: margin 0, undefined risk.
    assert!(monitor.assess(ACCOUNT, &report(140.0, 0.0)).alert.is_none());

    // Positions reopen straight into warning territory: fires again.
    let alert = monitor.assess(ACCOUNT, &report(140.0, 100.0)).alert.unwrap();
    assert_eq!(alert.severity, MarginSeverity::Warning);
}

#[test]
fn test_extreme_level_is_clamped() {
    let monitor = MarginMonitor::default();

    let assessment = monitor.assess(ACCOUNT, &report(1_000_000.0, 0.0001));
    assert_eq!(assessment.margin_level, Some(MAX_MARGIN_LEVEL));
    assert!(assessment.alert.is_none());
}

#[test]
fn test_boundary_is_inclusive() {
    let monitor = MarginMonitor::default();

    // Exactly 150% is at the boundary: warning fires.
    let alert = monitor.assess(ACCOUNT, &report(150.0, 100.0)).alert.unwrap();
    assert_eq!(alert.severity, MarginSeverity::Warning);
}

#[test]
fn test_accounts_are_tracked_independently() {
    let monitor = MarginMonitor::default();

    monitor.assess(1001, &report(140.0, 100.0)).alert.unwrap();

    // A different account crossing the same tier still fires.
    let alert = monitor.assess(2002, &report(140.0, 100.0)).alert.unwrap();
    assert_eq!(alert.severity, MarginSeverity::Warning);
}

// =============================================================================
// Through the reconciliation engine
// =============================================================================

#[tokio::test]
async fn test_margin_warning_broadcast_before_cycle_summary() {
    let ledger = Arc::new(LedgerStore::new_in_memory().unwrap());
    let registry = ConnectionRegistry::new();
    let engine = ReconcileEngine::new(
        ledger,
        registry.clone(),
        MarginMonitor::default(),
        0.01,
    );

    let (tx, mut rx) = mpsc::unbounded_channel();
    let conn_id = registry.register(ACCOUNT, tx);
    registry.mark_open(conn_id);

    let cycle = |account: AccountReport| SnapshotPayload {
        account,
        positions: vec![],
        orders: None,
        history: None,
        force: false,
        timestamp: 1_700_000_000,
    };

    engine.run_cycle(ACCOUNT, &cycle(report(160.0, 100.0))).await.unwrap();
    engine.run_cycle(ACCOUNT, &cycle(report(140.0, 100.0))).await.unwrap();
    engine.run_cycle(ACCOUNT, &cycle(report(140.1, 100.0))).await.unwrap();

    let mut warnings = 0;
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        frames.push(value);
    }
    for (i, value) in frames.iter().enumerate() {
        if value["type"] == "margin_warning" {
            warnings += 1;
            assert_eq!(value["data"]["severity"], "warning");
            assert!((value["data"]["marginLevel"].as_f64().unwrap() - 140.0).abs() < 1e-9);
            // The summary for the same cycle comes after the alert.
            assert_eq!(frames[i + 1]["type"], "trades_synced");
        }
    }
    assert_eq!(warnings, 1);
}
