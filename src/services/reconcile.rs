//! Reconciliation Engine
//!
//! Diffs each incoming snapshot against the ledger's open rows, applies
//! the whole diff atomically, and fans out typed events to viewers. One
//! account never runs two cycles concurrently; different accounts proceed
//! in parallel.

use crate::services::{LedgerStore, MarginMonitor};
use crate::types::{
    AccountSnapshot, Event, PositionReport, SnapshotPayload, SyncSummary, Trade,
};
use crate::websocket::ConnectionRegistry;
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<rusqlite::Error> for ReconcileError {
    fn from(e: rusqlite::Error) -> Self {
        ReconcileError::DatabaseError(e.to_string())
    }
}

/// One planned update to a still-open trade. `material` marks whether the
/// change is large enough to broadcast; the write happens either way.
#[derive(Debug, Clone)]
pub struct TradeUpdate {
    pub trade: Trade,
    pub material: bool,
}

/// The full diff for one cycle, computed before anything is written.
#[derive(Debug, Clone)]
pub struct CyclePlan {
    pub account_id: i64,
    /// Tickets seen for the first time (ids unassigned until insert).
    pub opened: Vec<Trade>,
    /// Still-open tickets with refreshed price/profit/swap.
    pub updated: Vec<TradeUpdate>,
    /// Open rows whose ticket vanished from the feed, with close fields
    /// already applied.
    pub closed: Vec<Trade>,
}

impl CyclePlan {
    pub fn empty(account_id: i64) -> Self {
        Self {
            account_id,
            opened: Vec::new(),
            updated: Vec::new(),
            closed: Vec::new(),
        }
    }
}

/// Compute the diff between the ledger's open rows and the incoming
/// position list. Pure function; no IO.
///
/// Materiality is an absolute unrealized-profit delta: an update is
/// broadcast-worthy when `|incoming profit - ledger profit| >= threshold`.
pub fn plan_cycle(
    account_id: i64,
    open_rows: &[Trade],
    positions: &[PositionReport],
    threshold: f64,
    now_secs: i64,
) -> CyclePlan {
    let mut plan = CyclePlan::empty(account_id);

    // Last occurrence wins if the feed ever repeats a ticket in one payload.
    let mut incoming: HashMap<i64, &PositionReport> = HashMap::with_capacity(positions.len());
    for position in positions {
        incoming.insert(position.ticket, position);
    }

    let by_ticket: HashMap<i64, &Trade> = open_rows.iter().map(|t| (t.ticket, t)).collect();

    for position in positions {
        // Skip earlier duplicates of a repeated ticket.
        if !std::ptr::eq(incoming[&position.ticket], position) {
            continue;
        }
        match by_ticket.get(&position.ticket) {
            None => plan.opened.push(position.to_trade(account_id)),
            Some(existing) => {
                let delta = (position.profit - existing.unrealized_profit).abs();
                let mut trade = (*existing).clone();
                trade.current_price = position.current_price;
                trade.unrealized_profit = position.profit;
                trade.swap = position.swap;
                plan.updated.push(TradeUpdate {
                    trade,
                    material: delta >= threshold,
                });
            }
        }
    }

    for row in open_rows {
        if !incoming.contains_key(&row.ticket) {
            let mut closed = row.clone();
            closed.close(now_secs);
            plan.closed.push(closed);
        }
    }

    plan
}

/// Per-account reconciliation against the ledger, with content-hash
/// short-circuiting and fire-and-forget event broadcast.
pub struct ReconcileEngine {
    ledger: Arc<LedgerStore>,
    registry: Arc<ConnectionRegistry>,
    margin: MarginMonitor,
    /// Per-account cycle locks: no two concurrent cycles for one account.
    locks: DashMap<i64, Arc<Mutex<()>>>,
    /// Last applied snapshot hash per account.
    last_hash: DashMap<i64, String>,
    update_threshold: f64,
}

impl ReconcileEngine {
    pub fn new(
        ledger: Arc<LedgerStore>,
        registry: Arc<ConnectionRegistry>,
        margin: MarginMonitor,
        update_threshold: f64,
    ) -> Self {
        Self {
            ledger,
            registry,
            margin,
            locks: DashMap::new(),
            last_hash: DashMap::new(),
            update_threshold,
        }
    }

    /// Run one reconciliation cycle for an account.
    ///
    /// The diff is committed in a single transaction; on any ledger error
    /// nothing is applied and the next periodic push self-heals. Events go
    /// out only after the commit, in a fixed order: per-trade opens and
    /// material updates, then closes, then the bulk position/account
    /// replaces and any margin alert, then the cycle summary last.
    pub async fn run_cycle(
        &self,
        account_id: i64,
        payload: &SnapshotPayload,
    ) -> Result<SyncSummary, ReconcileError> {
        let lock = self
            .locks
            .entry(account_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let hash = payload.content_hash();
        let unchanged = self
            .last_hash
            .get(&account_id)
            .map(|h| *h == hash)
            .unwrap_or(false);
        if unchanged && !payload.force {
            debug!("Snapshot unchanged for account {}, skipping cycle", account_id);
            return Ok(SyncSummary {
                skipped: true,
                ..Default::default()
            });
        }

        let open_rows = self.ledger.open_trades(account_id)?;
        let now = Utc::now();
        let plan = plan_cycle(
            account_id,
            &open_rows,
            &payload.positions,
            self.update_threshold,
            now.timestamp(),
        );

        let snapshot = AccountSnapshot {
            account_id,
            balance: payload.account.balance,
            equity: payload.account.equity,
            margin: payload.account.margin,
            free_margin: payload.account.free_margin,
            margin_level: MarginMonitor::recompute_level(&payload.account).unwrap_or(0.0),
            currency: payload.account.currency.clone(),
            leverage: payload.account.leverage,
            captured_at: now.timestamp_millis(),
        };

        let opened = self.ledger.apply_cycle(&plan, &snapshot)?;
        self.last_hash.insert(account_id, hash);

        // Edge-trigger state advances only after the cycle has committed,
        // so a failed cycle keeps a pending crossing alive for the retry.
        let assessment = self.margin.assess(account_id, &payload.account);

        let summary = SyncSummary {
            opened: opened.len(),
            updated: plan.updated.iter().filter(|u| u.material).count(),
            closed: plan.closed.len(),
            skipped: false,
        };

        let mut events: Vec<Event> = Vec::new();
        for trade in &opened {
            events.push(Event::TradeNew(trade.clone()));
        }
        for update in &plan.updated {
            if update.material {
                events.push(Event::TradeUpdated(update.trade.clone()));
            }
        }
        for trade in &plan.closed {
            events.push(Event::TradeClosed(trade.clone()));
        }

        let mut live: Vec<Trade> = opened;
        live.extend(plan.updated.iter().map(|u| u.trade.clone()));
        events.push(Event::PositionsUpdate(live));
        events.push(Event::AccountUpdate(snapshot));
        if let Some(alert) = assessment.alert {
            events.push(Event::MarginWarning(alert));
        }
        events.push(Event::TradesSynced(summary));

        self.registry.broadcast_account(account_id, &events);

        info!(
            "Cycle for account {}: {} opened, {} updated, {} closed",
            account_id, summary.opened, summary.updated, summary.closed
        );
        Ok(summary)
    }

    /// Forget the cached snapshot hash so the next push reconciles even if
    /// its content is unchanged. Used when the bridge disconnects.
    pub fn invalidate_hash(&self, account_id: i64) {
        self.last_hash.remove(&account_id);
    }

    /// Administrative duplicate-ticket cleanup for one account.
    pub fn cleanup_account(&self, account_id: i64) -> Result<usize, ReconcileError> {
        Ok(self.ledger.merge_duplicate_tickets(account_id)?)
    }
}
