//! Viewer state store tests
//!
//! The two-cache merge rules: live wins for open positions once any live
//! event arrived, the ledger alone answers closed-trade questions, batch
//! merges key on ticket then id, and a dropped connection voids live
//! trust until a full resync completes.

use spyglass::types::{
    AccountSnapshot, AccountStats, Event, Trade, TradeSide, TradeStatus,
};
use spyglass::viewer::ViewerState;

const ACCOUNT: i64 = 1001;

fn trade(id: i64, ticket: i64, status: TradeStatus, profit: f64) -> Trade {
    let (unrealized, realized) = match status {
        TradeStatus::Open => (profit, 0.0),
        TradeStatus::Closed => (0.0, profit),
    };
    Trade {
        id,
        account_id: ACCOUNT,
        ticket,
        symbol: "EURUSD".to_string(),
        side: TradeSide::Buy,
        volume: 0.1,
        open_price: 1.1,
        current_price: 1.1,
        close_price: (status == TradeStatus::Closed).then_some(1.1),
        stop_loss: None,
        take_profit: None,
        swap: 0.0,
        unrealized_profit: unrealized,
        realized_profit: realized,
        status,
        open_time: 1_700_000_000,
        close_time: (status == TradeStatus::Closed).then_some(1_700_000_100),
        comment: String::new(),
    }
}

fn stats(open: i64, closed: i64, floating: f64, historical: f64) -> AccountStats {
    AccountStats {
        total_trades: open + closed,
        open_trades: open,
        closed_trades: closed,
        floating_profit: floating,
        historical_profit: historical,
        total_profit: floating + historical,
        win_rate: 50.0,
    }
}

fn snapshot(equity: f64) -> AccountSnapshot {
    AccountSnapshot {
        account_id: ACCOUNT,
        balance: equity,
        equity,
        margin: 0.0,
        free_margin: equity,
        margin_level: 0.0,
        currency: "USD".to_string(),
        leverage: 100,
        captured_at: 1,
    }
}

// =============================================================================
// Live vs ledger precedence
// =============================================================================

mod precedence_tests {
    use super::*;

    #[test]
    fn test_ledger_fallback_before_any_live_event() {
        let mut state = ViewerState::new(ACCOUNT);
        state.merge_history_batch(vec![
            trade(1, 100, TradeStatus::Open, 3.0),
            trade(2, 101, TradeStatus::Closed, 7.0),
        ]);

        assert_eq!(state.open_position_count(), 1);
        assert_eq!(state.floating_profit(), 3.0);
    }

    #[test]
    fn test_stats_fallback_preferred_over_row_derivation() {
        let mut state = ViewerState::new(ACCOUNT);
        state.set_stats(stats(4, 2, 12.5, -1.0));

        assert_eq!(state.open_position_count(), 4);
        assert_eq!(state.floating_profit(), 12.5);
        assert_eq!(state.closed_trade_count(), 2);
        assert_eq!(state.historical_profit(), -1.0);
        assert_eq!(state.win_rate(), 50.0);
    }

    #[test]
    fn test_live_wins_after_first_event() {
        let mut state = ViewerState::new(ACCOUNT);
        state.set_stats(stats(4, 2, 12.5, 0.0));

        state.apply_event(&Event::TradeNew(trade(10, 500, TradeStatus::Open, 1.5)));

        // Open-side reads flip to live.
        assert_eq!(state.open_position_count(), 1);
        assert_eq!(state.floating_profit(), 1.5);
        // Closed-side reads stay on the ledger.
        assert_eq!(state.closed_trade_count(), 2);
    }

    #[test]
    fn test_live_never_backfills_from_ledger_once_established() {
        let mut state = ViewerState::new(ACCOUNT);
        state.apply_event(&Event::TradeNew(trade(10, 500, TradeStatus::Open, 1.5)));

        // A later ledger fetch with three open rows must not leak into the
        // live open-position view.
        state.merge_history_batch(vec![
            trade(1, 100, TradeStatus::Open, 3.0),
            trade(2, 101, TradeStatus::Open, 4.0),
            trade(3, 102, TradeStatus::Open, 5.0),
        ]);

        assert_eq!(state.open_position_count(), 1);
        assert_eq!(state.floating_profit(), 1.5);
    }

    #[test]
    fn test_live_cache_never_reports_closed_trades() {
        let mut state = ViewerState::new(ACCOUNT);

        state.apply_event(&Event::TradeNew(trade(10, 500, TradeStatus::Open, 2.0)));
        state.apply_event(&Event::TradeClosed(trade(10, 500, TradeStatus::Closed, 2.0)));

        // The close removed the live position, but the closed count comes
        // from the (still empty) ledger cache.
        assert_eq!(state.open_position_count(), 0);
        assert_eq!(state.closed_trade_count(), 0);
        assert_eq!(state.historical_profit(), 0.0);

        // After a ledger fetch the closed trade shows up.
        state.merge_history_batch(vec![trade(10, 500, TradeStatus::Closed, 2.0)]);
        assert_eq!(state.closed_trade_count(), 1);
        assert_eq!(state.historical_profit(), 2.0);
    }

    #[test]
    fn test_positions_update_replaces_wholesale() {
        let mut state = ViewerState::new(ACCOUNT);
        state.apply_event(&Event::TradeNew(trade(10, 500, TradeStatus::Open, 2.0)));

        state.apply_event(&Event::PositionsUpdate(vec![
            trade(11, 600, TradeStatus::Open, 1.0),
            trade(12, 601, TradeStatus::Open, 2.0),
        ]));

        assert_eq!(state.open_position_count(), 2);
        assert_eq!(state.floating_profit(), 3.0);
    }

    #[test]
    fn test_account_update_carries_live_numbers() {
        let mut state = ViewerState::new(ACCOUNT);
        assert!(state.account().is_none());

        state.apply_event(&Event::AccountUpdate(snapshot(10_000.0)));
        assert_eq!(state.account().unwrap().equity, 10_000.0);
    }
}

// =============================================================================
// Ledger batch merging
// =============================================================================

mod merge_tests {
    use super::*;

    #[test]
    fn test_merge_matches_ticket_first() {
        let mut state = ViewerState::new(ACCOUNT);
        state.merge_history_batch(vec![trade(1, 100, TradeStatus::Open, 1.0)]);

        // Same ticket, different id: replaces in place.
        state.merge_history_batch(vec![trade(5, 100, TradeStatus::Closed, 2.0)]);

        assert_eq!(state.history().len(), 1);
        assert_eq!(state.history()[0].id, 5);
        assert_eq!(state.history()[0].status, TradeStatus::Closed);
    }

    #[test]
    fn test_merge_falls_back_to_surrogate_id() {
        let mut state = ViewerState::new(ACCOUNT);
        state.merge_history_batch(vec![trade(7, 100, TradeStatus::Open, 1.0)]);

        // A correction changed the ticket on row 7.
        state.merge_history_batch(vec![trade(7, 999, TradeStatus::Open, 1.0)]);

        assert_eq!(state.history().len(), 1);
        assert_eq!(state.history()[0].ticket, 999);
    }

    #[test]
    fn test_merge_appends_unknown_trades() {
        let mut state = ViewerState::new(ACCOUNT);
        state.merge_history_batch(vec![trade(1, 100, TradeStatus::Closed, 1.0)]);
        state.merge_history_batch(vec![trade(2, 200, TradeStatus::Closed, 2.0)]);

        assert_eq!(state.history().len(), 2);
        assert_eq!(state.closed_trade_count(), 2);
        assert_eq!(state.historical_profit(), 3.0);
    }

    #[test]
    fn test_merge_collapses_duplicate_tickets_keeping_larger_id() {
        let mut state = ViewerState::new(ACCOUNT);

        // One batch that itself contains a duplicated ticket.
        state.merge_history_batch(vec![
            trade(3, 100, TradeStatus::Closed, 1.0),
            trade(8, 100, TradeStatus::Closed, 9.0),
        ]);

        assert_eq!(state.history().len(), 1);
        assert_eq!(state.history()[0].id, 8);
        assert_eq!(state.historical_profit(), 9.0);
    }

    #[test]
    fn test_win_rate_from_ledger_rows() {
        let mut state = ViewerState::new(ACCOUNT);
        state.merge_history_batch(vec![
            trade(1, 100, TradeStatus::Closed, 5.0),
            trade(2, 101, TradeStatus::Closed, -3.0),
            trade(3, 102, TradeStatus::Closed, 1.0),
            trade(4, 103, TradeStatus::Open, 2.0),
        ]);

        // Open trades stay out of the denominator.
        assert!((state.win_rate() - 66.666).abs() < 0.01);
    }
}

// =============================================================================
// Resync after a dropped connection
// =============================================================================

mod resync_tests {
    use super::*;

    #[test]
    fn test_disconnect_discards_live_trust() {
        let mut state = ViewerState::new(ACCOUNT);
        state.apply_event(&Event::TradeNew(trade(10, 500, TradeStatus::Open, 2.0)));
        state.set_stats(stats(1, 0, 2.0, 0.0));

        state.mark_disconnected();

        assert!(state.needs_resync());
        // Reads fall back to the (stale but honest) ledger values.
        assert_eq!(state.open_position_count(), 1);
        assert_eq!(state.floating_profit(), 2.0);
        assert!(state.account().is_none());
    }

    #[test]
    fn test_incremental_events_ignored_until_full_snapshot() {
        let mut state = ViewerState::new(ACCOUNT);
        state.mark_disconnected();

        // Buffered/straggler events after the drop must not rebuild trust.
        state.apply_event(&Event::TradeNew(trade(10, 500, TradeStatus::Open, 2.0)));
        state.apply_event(&Event::AccountUpdate(snapshot(9_000.0)));
        assert_eq!(state.open_position_count(), 0);
        assert!(state.account().is_none());
        assert!(state.needs_resync());

        // The fresh full snapshot restores the position set...
        state.apply_event(&Event::PositionsUpdate(vec![trade(
            11,
            600,
            TradeStatus::Open,
            4.0,
        )]));
        assert_eq!(state.open_position_count(), 1);
        assert_eq!(state.floating_profit(), 4.0);

        // ...but the resync finishes only once aggregates are re-fetched.
        assert!(state.needs_resync());
        state.set_stats(stats(1, 3, 4.0, 10.0));
        assert!(!state.needs_resync());

        // Incremental merges resume afterwards.
        state.apply_event(&Event::TradeNew(trade(12, 601, TradeStatus::Open, 1.0)));
        assert_eq!(state.open_position_count(), 2);
    }
}
