//! Bridge Wire Types
//!
//! The ingestion payload pushed by the terminal bridge each cycle, plus
//! validation and content hashing. The wire format mirrors the terminal's
//! own field names, so everything here is snake_case.

use crate::types::{Trade, TradeSide, TradeStatus};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Payload shape problems caught at the ingestion boundary, before any
/// ledger mutation happens.
#[derive(Debug, Error, PartialEq)]
pub enum SnapshotError {
    #[error("non-finite value in field {0}")]
    NonFinite(&'static str),

    #[error("invalid ticket {0}")]
    InvalidTicket(i64),

    #[error("invalid volume {volume} on ticket {ticket}")]
    InvalidVolume { ticket: i64, volume: f64 },

    #[error("empty symbol on ticket {0}")]
    EmptySymbol(i64),
}

/// Account numbers as reported by the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountReport {
    pub balance: f64,
    pub equity: f64,
    pub margin: f64,
    pub free_margin: f64,
    /// Raw margin level from the feed. Risk checks recompute their own
    /// value from equity/margin and ignore this one.
    pub margin_level: f64,
    pub currency: String,
    pub leverage: i64,
}

impl AccountReport {
    fn validate(&self) -> Result<(), SnapshotError> {
        let fields: [(&'static str, f64); 5] = [
            ("account.balance", self.balance),
            ("account.equity", self.equity),
            ("account.margin", self.margin),
            ("account.free_margin", self.free_margin),
            ("account.margin_level", self.margin_level),
        ];
        for (name, value) in fields {
            if !value.is_finite() {
                return Err(SnapshotError::NonFinite(name));
            }
        }
        Ok(())
    }
}

/// One currently-open position as reported by the bridge.
///
/// `stop_loss`/`take_profit` use the terminal convention of 0.0 for
/// "not set"; conversion to `Option` happens when a `Trade` is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionReport {
    pub ticket: i64,
    pub symbol: String,
    pub side: TradeSide,
    pub volume: f64,
    pub open_price: f64,
    pub current_price: f64,
    #[serde(default)]
    pub stop_loss: f64,
    #[serde(default)]
    pub take_profit: f64,
    pub profit: f64,
    #[serde(default)]
    pub swap: f64,
    /// Unix seconds.
    pub open_time: i64,
    #[serde(default)]
    pub comment: String,
}

impl PositionReport {
    fn validate(&self) -> Result<(), SnapshotError> {
        if self.ticket <= 0 {
            return Err(SnapshotError::InvalidTicket(self.ticket));
        }
        if self.symbol.trim().is_empty() {
            return Err(SnapshotError::EmptySymbol(self.ticket));
        }
        if !self.volume.is_finite() || self.volume <= 0.0 {
            return Err(SnapshotError::InvalidVolume {
                ticket: self.ticket,
                volume: self.volume,
            });
        }
        let fields: [(&'static str, f64); 5] = [
            ("position.open_price", self.open_price),
            ("position.current_price", self.current_price),
            ("position.stop_loss", self.stop_loss),
            ("position.take_profit", self.take_profit),
            ("position.profit", self.profit),
        ];
        for (name, value) in fields {
            if !value.is_finite() {
                return Err(SnapshotError::NonFinite(name));
            }
        }
        if !self.swap.is_finite() {
            return Err(SnapshotError::NonFinite("position.swap"));
        }
        Ok(())
    }

    /// Build a fresh open trade from this report.
    pub fn to_trade(&self, account_id: i64) -> Trade {
        Trade {
            id: 0,
            account_id,
            ticket: self.ticket,
            symbol: self.symbol.clone(),
            side: self.side,
            volume: self.volume,
            open_price: self.open_price,
            current_price: self.current_price,
            close_price: None,
            stop_loss: (self.stop_loss > 0.0).then_some(self.stop_loss),
            take_profit: (self.take_profit > 0.0).then_some(self.take_profit),
            swap: self.swap,
            unrealized_profit: self.profit,
            realized_profit: 0.0,
            status: TradeStatus::Open,
            open_time: self.open_time,
            close_time: None,
            comment: self.comment.clone(),
        }
    }
}

/// A pending order, accepted for forward compatibility. Orders are not
/// ledger state; they are validated and passed through to viewers only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOrderReport {
    pub ticket: i64,
    pub symbol: String,
    pub order_type: String,
    pub volume: f64,
    pub price: f64,
    #[serde(default)]
    pub stop_loss: f64,
    #[serde(default)]
    pub take_profit: f64,
    #[serde(default)]
    pub comment: String,
}

/// A historical deal the bridge may attach. Closed-trade truth comes from
/// reconciliation, so history entries are not applied to the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryDealReport {
    pub ticket: i64,
    pub symbol: String,
    pub side: TradeSide,
    pub volume: f64,
    pub price: f64,
    pub profit: f64,
    /// Unix seconds.
    pub time: i64,
}

/// One full snapshot pushed by the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotPayload {
    pub account: AccountReport,
    pub positions: Vec<PositionReport>,
    #[serde(default)]
    pub orders: Option<Vec<PendingOrderReport>>,
    #[serde(default)]
    pub history: Option<Vec<HistoryDealReport>>,
    /// Bypass the unchanged-content skip. Set by the bridge right after a
    /// terminal trade event and on first connect.
    #[serde(default)]
    pub force: bool,
    /// Unix seconds at capture time on the bridge side.
    pub timestamp: i64,
}

impl SnapshotPayload {
    /// Validate payload shape. Nothing touches the ledger until this
    /// passes.
    pub fn validate(&self) -> Result<(), SnapshotError> {
        self.account.validate()?;
        for position in &self.positions {
            position.validate()?;
        }
        Ok(())
    }

    /// Content hash over the data sections, used to skip reconciliation
    /// when a cycle carries nothing new. `force` and `timestamp` are
    /// deliberately excluded so an identical snapshot hashes identically
    /// across cycles.
    pub fn content_hash(&self) -> String {
        let content = (&self.account, &self.positions, &self.orders, &self.history);
        let bytes = serde_json::to_vec(&content).unwrap_or_default();
        let digest = Sha256::digest(&bytes);
        hex::encode(digest)
    }
}

/// Per-cycle reconciliation summary, returned to the bridge and broadcast
/// to viewers as the cycle's final event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub opened: usize,
    pub updated: usize,
    pub closed: usize,
    /// True when the cycle was skipped on an unchanged content hash.
    pub skipped: bool,
}

impl SyncSummary {
    pub fn is_empty(&self) -> bool {
        self.opened == 0 && self.updated == 0 && self.closed == 0
    }
}
