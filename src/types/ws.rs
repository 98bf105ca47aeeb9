//! Event Protocol
//!
//! Typed messages exchanged with viewer WebSocket connections. Every
//! outgoing message serializes to `{type, data, timestamp}`.

use crate::types::{AccountSnapshot, SyncSummary, Trade};
use serde::{Deserialize, Serialize};

/// Incoming WebSocket message from a viewer.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping,
    Pong,
}

/// Outgoing event to viewer connections.
///
/// Events are ephemeral: a viewer that misses one relies on the next full
/// resync, never on replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Event {
    /// A ticket appeared for the first time.
    TradeNew(Trade),
    /// Material change to an open trade.
    TradeUpdated(Trade),
    /// A previously open ticket disappeared from the feed.
    TradeClosed(Trade),
    /// Bulk replace of the live open-position list.
    PositionsUpdate(Vec<Trade>),
    /// Bulk replace of the live account numbers.
    AccountUpdate(AccountSnapshot),
    /// Edge-triggered margin risk alert.
    MarginWarning(MarginWarningData),
    /// Per-cycle summary, always the last event of a cycle.
    TradesSynced(SyncSummary),
    /// Connectivity transition notice.
    ConnectionStatus(ConnectionStatusData),
    Ping,
    Pong,
}

impl Event {
    /// Serialize to the wire envelope `{type, data, timestamp}`.
    pub fn to_wire(&self, emitted_at: i64) -> String {
        let envelope = EventEnvelope {
            event: self,
            timestamp: emitted_at,
        };
        serde_json::to_string(&envelope).unwrap_or_default()
    }
}

/// Wire envelope wrapping an event with its emission timestamp (unix
/// milliseconds).
#[derive(Debug, Serialize)]
pub struct EventEnvelope<'a> {
    #[serde(flatten)]
    pub event: &'a Event,
    pub timestamp: i64,
}

/// Margin alert severities, ordered least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarginSeverity {
    Warning,
    High,
    Critical,
}

impl std::fmt::Display for MarginSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MarginSeverity::Warning => write!(f, "warning"),
            MarginSeverity::High => write!(f, "high"),
            MarginSeverity::Critical => write!(f, "critical"),
        }
    }
}

/// Margin warning payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarginWarningData {
    pub account_id: i64,
    pub severity: MarginSeverity,
    /// The recomputed margin level used for the threshold comparison.
    pub margin_level: f64,
    pub equity: f64,
    pub margin: f64,
}

/// Feed/viewer connectivity states surfaced to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedStatus {
    /// This viewer connection is established.
    Connected,
    /// The terminal bridge is pushing snapshots.
    BridgeOnline,
    /// The terminal bridge reported a disconnect.
    BridgeOffline,
}

/// Connection status payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatusData {
    pub account_id: i64,
    pub status: FeedStatus,
}
