pub mod ledger;
pub mod margin;
pub mod reconcile;

pub use ledger::LedgerStore;
pub use margin::{MarginAssessment, MarginMonitor, MAX_MARGIN_LEVEL};
pub use reconcile::{plan_cycle, CyclePlan, ReconcileEngine, ReconcileError, TradeUpdate};
