//! Ledger Types
//!
//! Core types for the trade ledger: mirrored trades, account snapshots,
//! and the aggregate statistics derived from them.

use serde::{Deserialize, Serialize};

// =============================================================================
// Enums
// =============================================================================

/// Direction of a mirrored trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl std::fmt::Display for TradeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeSide::Buy => write!(f, "buy"),
            TradeSide::Sell => write!(f, "sell"),
        }
    }
}

/// Trade lifecycle status. Transitions are one-way: open -> closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    Open,
    Closed,
}

impl std::fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeStatus::Open => write!(f, "open"),
            TradeStatus::Closed => write!(f, "closed"),
        }
    }
}

// =============================================================================
// Trade
// =============================================================================

/// One trade observed on the external terminal, keyed by (account, ticket).
///
/// `realized_profit` is written exactly once, at the open -> closed
/// transition, and never changes afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    /// Surrogate row id (0 until persisted).
    pub id: i64,
    pub account_id: i64,
    /// Stable external identifier, unique per account.
    pub ticket: i64,
    pub symbol: String,
    pub side: TradeSide,
    pub volume: f64,
    pub open_price: f64,
    pub current_price: f64,
    pub close_price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub swap: f64,
    pub unrealized_profit: f64,
    pub realized_profit: f64,
    pub status: TradeStatus,
    /// Unix seconds, as reported by the terminal.
    pub open_time: i64,
    pub close_time: Option<i64>,
    pub comment: String,
}

impl Trade {
    pub fn is_open(&self) -> bool {
        self.status == TradeStatus::Open
    }

    /// Transition this trade to closed, capturing the last observed price
    /// and profit as the final values.
    pub fn close(&mut self, close_time: i64) {
        self.status = TradeStatus::Closed;
        self.close_time = Some(close_time);
        self.close_price = Some(self.current_price);
        self.realized_profit = self.unrealized_profit;
        self.unrealized_profit = 0.0;
    }
}

// =============================================================================
// Account snapshot
// =============================================================================

/// Latest account numbers for one account. Replaced wholesale on every
/// ingestion cycle; no per-field history is kept here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub account_id: i64,
    pub balance: f64,
    pub equity: f64,
    pub margin: f64,
    pub free_margin: f64,
    pub margin_level: f64,
    pub currency: String,
    pub leverage: i64,
    /// Unix milliseconds at ingestion time.
    pub captured_at: i64,
}

// =============================================================================
// Aggregates
// =============================================================================

/// Trade statistics for one account, derived from the ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountStats {
    pub total_trades: i64,
    pub open_trades: i64,
    pub closed_trades: i64,
    /// Sum of unrealized profit over open trades.
    pub floating_profit: f64,
    /// Sum of realized profit over closed trades.
    pub historical_profit: f64,
    pub total_profit: f64,
    /// Percentage of closed trades with positive realized profit.
    pub win_rate: f64,
}

/// Performance breakdown over closed trades, for reporting consumers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub total_trades: i64,
    pub profitable_trades: i64,
    pub losing_trades: i64,
    pub win_rate: f64,
    pub total_profit: f64,
    pub average_profit: f64,
    pub average_win: f64,
    pub average_loss: f64,
    pub profit_factor: f64,
}

impl PerformanceReport {
    /// Build a report from closed trades' realized profits.
    pub fn from_closed_profits(profits: &[f64]) -> Self {
        if profits.is_empty() {
            return Self::default();
        }

        let total = profits.len() as i64;
        let wins: Vec<f64> = profits.iter().copied().filter(|p| *p > 0.0).collect();
        let losses: Vec<f64> = profits.iter().copied().filter(|p| *p < 0.0).collect();
        let total_profit: f64 = profits.iter().sum();

        let average_win = if wins.is_empty() {
            0.0
        } else {
            wins.iter().sum::<f64>() / wins.len() as f64
        };
        let average_loss = if losses.is_empty() {
            0.0
        } else {
            losses.iter().sum::<f64>() / losses.len() as f64
        };
        let profit_factor = if average_loss != 0.0 {
            (average_win / average_loss).abs()
        } else {
            0.0
        };

        Self {
            total_trades: total,
            profitable_trades: wins.len() as i64,
            losing_trades: losses.len() as i64,
            win_rate: wins.len() as f64 / total as f64 * 100.0,
            total_profit,
            average_profit: total_profit / total as f64,
            average_win,
            average_loss,
            profit_factor,
        }
    }
}
