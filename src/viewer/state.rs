//! Viewer State Store
//!
//! Consumer-side cache for one watched account, combining live-pushed
//! events with on-demand ledger fetches without double counting. Two
//! caches with strict ownership:
//!
//! - **live**: fed only by broadcast events; authoritative for currently
//!   open positions and instantaneous account numbers.
//! - **ledger**: fed only by fetched history/stats; authoritative for
//!   closed trades and aggregate statistics.
//!
//! The live feed only ever describes open positions, so closed-trade
//! numbers are never read from it.

use crate::types::{AccountSnapshot, AccountStats, Event, Trade, TradeStatus};
use std::collections::HashMap;

/// Live cache, populated exclusively by broadcast events.
#[derive(Debug, Default)]
pub struct LiveCache {
    /// Open positions keyed by ticket.
    positions: HashMap<i64, Trade>,
    account: Option<AccountSnapshot>,
    /// True once at least one live event has been applied this session.
    /// Once set, live values win over ledger fallbacks and are never
    /// backfilled from the ledger.
    established: bool,
}

/// Ledger cache, populated exclusively by on-demand fetches.
#[derive(Debug, Default)]
pub struct LedgerCache {
    trades: Vec<Trade>,
    stats: Option<AccountStats>,
}

/// Merged per-account view state for a viewer client.
#[derive(Debug)]
pub struct ViewerState {
    account_id: i64,
    live: LiveCache,
    ledger: LedgerCache,
    /// Set after a dropped connection: incremental events are distrusted
    /// until a fresh full position snapshot arrives.
    awaiting_snapshot: bool,
    /// Set after a dropped connection: ledger aggregates must be
    /// re-fetched before merged reads are trusted again.
    awaiting_stats: bool,
}

impl ViewerState {
    pub fn new(account_id: i64) -> Self {
        Self {
            account_id,
            live: LiveCache::default(),
            ledger: LedgerCache::default(),
            awaiting_snapshot: false,
            awaiting_stats: false,
        }
    }

    pub fn account_id(&self) -> i64 {
        self.account_id
    }

    /// Whether a full resync (fresh snapshot + stats re-fetch) is still
    /// outstanding.
    pub fn needs_resync(&self) -> bool {
        self.awaiting_snapshot || self.awaiting_stats
    }

    // ========== Live side ==========

    /// Apply one broadcast event to the live cache.
    ///
    /// While a resync is outstanding, incremental per-trade events are
    /// dropped; only a bulk `positions_update` restores trust in the live
    /// position set.
    pub fn apply_event(&mut self, event: &Event) {
        match event {
            Event::TradeNew(trade) | Event::TradeUpdated(trade) => {
                if self.awaiting_snapshot {
                    return;
                }
                self.live.positions.insert(trade.ticket, trade.clone());
                self.live.established = true;
            }
            Event::TradeClosed(trade) => {
                if self.awaiting_snapshot {
                    return;
                }
                // The live cache only tracks open positions; the closed
                // row becomes visible through the next ledger fetch.
                self.live.positions.remove(&trade.ticket);
                self.live.established = true;
            }
            Event::PositionsUpdate(trades) => {
                self.live.positions = trades
                    .iter()
                    .filter(|t| t.is_open())
                    .map(|t| (t.ticket, t.clone()))
                    .collect();
                self.live.established = true;
                self.awaiting_snapshot = false;
            }
            Event::AccountUpdate(snapshot) => {
                if self.awaiting_snapshot {
                    return;
                }
                self.live.account = Some(snapshot.clone());
                self.live.established = true;
            }
            Event::MarginWarning(_)
            | Event::TradesSynced(_)
            | Event::ConnectionStatus(_)
            | Event::Ping
            | Event::Pong => {}
        }
    }

    /// Handle a dropped connection: live state is no longer trusted and a
    /// full resync is required before incremental merges resume.
    pub fn mark_disconnected(&mut self) {
        self.live.positions.clear();
        self.live.account = None;
        self.live.established = false;
        self.awaiting_snapshot = true;
        self.awaiting_stats = true;
    }

    // ========== Ledger side ==========

    /// Merge a fetched ledger batch into the in-memory list: match by
    /// ticket first, then by surrogate id, else append. Residual duplicate
    /// tickets collapse to the instance with the larger surrogate id.
    pub fn merge_history_batch(&mut self, batch: Vec<Trade>) {
        for incoming in batch {
            let slot = self
                .ledger
                .trades
                .iter()
                .position(|t| t.ticket == incoming.ticket)
                .or_else(|| self.ledger.trades.iter().position(|t| t.id == incoming.id));

            match slot {
                Some(i) => self.ledger.trades[i] = incoming,
                None => self.ledger.trades.push(incoming),
            }
        }

        self.collapse_duplicate_tickets();
    }

    /// Store freshly fetched aggregates, completing the stats half of a
    /// pending resync.
    pub fn set_stats(&mut self, stats: AccountStats) {
        self.ledger.stats = Some(stats);
        self.awaiting_stats = false;
    }

    fn collapse_duplicate_tickets(&mut self) {
        let mut best: HashMap<i64, i64> = HashMap::new();
        for trade in &self.ledger.trades {
            let entry = best.entry(trade.ticket).or_insert(trade.id);
            if trade.id > *entry {
                *entry = trade.id;
            }
        }
        self.ledger
            .trades
            .retain(|t| best.get(&t.ticket) == Some(&t.id));
    }

    // ========== Merged reads ==========

    /// Open-position count: live once established, otherwise
    /// ledger-derived.
    pub fn open_position_count(&self) -> usize {
        if self.live.established {
            self.live.positions.len()
        } else if let Some(stats) = &self.ledger.stats {
            stats.open_trades as usize
        } else {
            self.ledger.trades.iter().filter(|t| t.is_open()).count()
        }
    }

    /// Floating profit over open positions: live once established,
    /// otherwise ledger-derived.
    pub fn floating_profit(&self) -> f64 {
        if self.live.established {
            self.live
                .positions
                .values()
                .map(|t| t.unrealized_profit)
                .sum()
        } else if let Some(stats) = &self.ledger.stats {
            stats.floating_profit
        } else {
            self.ledger
                .trades
                .iter()
                .filter(|t| t.is_open())
                .map(|t| t.unrealized_profit)
                .sum()
        }
    }

    /// Closed-trade count, ledger only.
    pub fn closed_trade_count(&self) -> usize {
        if let Some(stats) = &self.ledger.stats {
            stats.closed_trades as usize
        } else {
            self.closed_trades().count()
        }
    }

    /// Realized profit over closed trades, ledger only.
    pub fn historical_profit(&self) -> f64 {
        if let Some(stats) = &self.ledger.stats {
            stats.historical_profit
        } else {
            self.closed_trades().map(|t| t.realized_profit).sum()
        }
    }

    /// Win rate over closed trades (percent), ledger only.
    pub fn win_rate(&self) -> f64 {
        if let Some(stats) = &self.ledger.stats {
            return stats.win_rate;
        }
        let closed: Vec<&Trade> = self.closed_trades().collect();
        if closed.is_empty() {
            return 0.0;
        }
        let wins = closed.iter().filter(|t| t.realized_profit > 0.0).count();
        wins as f64 / closed.len() as f64 * 100.0
    }

    /// Latest live account numbers, if any event carried them.
    pub fn account(&self) -> Option<&AccountSnapshot> {
        self.live.account.as_ref()
    }

    /// Open positions currently held in the live cache.
    pub fn live_positions(&self) -> Vec<&Trade> {
        self.live.positions.values().collect()
    }

    /// Fetched ledger history.
    pub fn history(&self) -> &[Trade] {
        &self.ledger.trades
    }

    fn closed_trades(&self) -> impl Iterator<Item = &Trade> {
        self.ledger
            .trades
            .iter()
            .filter(|t| t.status == TradeStatus::Closed)
    }
}
