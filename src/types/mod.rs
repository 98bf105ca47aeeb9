pub mod bridge;
pub mod trade;
pub mod ws;

pub use bridge::{
    AccountReport, HistoryDealReport, PendingOrderReport, PositionReport, SnapshotError,
    SnapshotPayload, SyncSummary,
};
pub use trade::{AccountSnapshot, AccountStats, PerformanceReport, Trade, TradeSide, TradeStatus};
pub use ws::{
    ClientMessage, ConnectionStatusData, Event, EventEnvelope, FeedStatus, MarginSeverity,
    MarginWarningData,
};
