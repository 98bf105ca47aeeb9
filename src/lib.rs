//! Spyglass - Real-time trade mirroring and account sync server
//!
//! Ingests periodic account/position snapshots pushed by a trading
//! terminal bridge, reconciles them against a persisted trade ledger, and
//! fans typed change events out to every viewer watching the account.

pub mod api;
pub mod config;
pub mod error;
pub mod services;
pub mod types;
pub mod viewer;
pub mod websocket;

use config::Config;
use services::{LedgerStore, ReconcileEngine};
use std::sync::Arc;
use websocket::ConnectionRegistry;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub ledger: Arc<LedgerStore>,
    pub engine: Arc<ReconcileEngine>,
    pub registry: Arc<ConnectionRegistry>,
}

// Re-export commonly used types
pub use services::{MarginMonitor, MAX_MARGIN_LEVEL};
pub use types::*;
pub use viewer::ViewerState;
