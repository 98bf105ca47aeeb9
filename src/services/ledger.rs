//! SQLite persistence for the trade ledger.
//!
//! The ledger is the authoritative record of every trade observed on an
//! account, plus the latest account snapshot. All reconciliation mutations
//! for a cycle go through [`LedgerStore::apply_cycle`], which commits the
//! whole diff in one transaction or nothing at all.

use crate::services::reconcile::CyclePlan;
use crate::types::{AccountSnapshot, AccountStats, PerformanceReport, Trade, TradeSide, TradeStatus};
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// SQLite store for trades and account snapshots.
pub struct LedgerStore {
    conn: Mutex<Connection>,
}

impl LedgerStore {
    /// Create a new ledger store at the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        info!("Ledger store initialized");
        Ok(store)
    }

    /// Create an in-memory ledger store (for testing).
    pub fn new_in_memory() -> Result<Self, rusqlite::Error> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        debug!("In-memory ledger store initialized");
        Ok(store)
    }

    /// Initialize database schema.
    fn init_schema(&self) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER NOT NULL,
                ticket INTEGER NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                volume REAL NOT NULL,
                open_price REAL NOT NULL,
                current_price REAL NOT NULL,
                close_price REAL,
                stop_loss REAL,
                take_profit REAL,
                swap REAL NOT NULL DEFAULT 0,
                unrealized_profit REAL NOT NULL DEFAULT 0,
                realized_profit REAL NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                open_time INTEGER NOT NULL,
                close_time INTEGER,
                comment TEXT NOT NULL DEFAULT ''
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_trades_account_ticket
             ON trades(account_id, ticket)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_trades_account_status
             ON trades(account_id, status)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS account_snapshots (
                account_id INTEGER PRIMARY KEY,
                balance REAL NOT NULL,
                equity REAL NOT NULL,
                margin REAL NOT NULL,
                free_margin REAL NOT NULL,
                margin_level REAL NOT NULL,
                currency TEXT NOT NULL,
                leverage INTEGER NOT NULL,
                captured_at INTEGER NOT NULL
            )",
            [],
        )?;

        info!("Ledger schema initialized");
        Ok(())
    }

    // ========== Trade queries ==========

    /// Get all open trades for an account, keyed uniquely by ticket.
    ///
    /// If two rows are ever found for one ticket the pair is merged on the
    /// spot: the row with the larger surrogate id wins, the other is
    /// deleted. The callable maintenance pass is
    /// [`merge_duplicate_tickets`](Self::merge_duplicate_tickets).
    pub fn open_trades(&self, account_id: i64) -> Result<Vec<Trade>, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(
            "SELECT id, account_id, ticket, symbol, side, volume, open_price,
                    current_price, close_price, stop_loss, take_profit, swap,
                    unrealized_profit, realized_profit, status, open_time,
                    close_time, comment
             FROM trades
             WHERE account_id = ?1 AND status = 'open'
             ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![account_id], row_to_trade)?;

        let mut trades: Vec<Trade> = Vec::new();
        let mut dropped: Vec<i64> = Vec::new();
        for row in rows {
            let trade = row?;
            // Rows arrive ordered by id, so a repeat ticket always replaces
            // the earlier (smaller-id) row.
            if let Some(existing) = trades.iter().position(|t| t.ticket == trade.ticket) {
                warn!(
                    "Duplicate open ticket {} on account {}, keeping row {}",
                    trade.ticket, account_id, trade.id
                );
                dropped.push(trades[existing].id);
                trades[existing] = trade;
            } else {
                trades.push(trade);
            }
        }
        drop(stmt);

        for id in dropped {
            conn.execute("DELETE FROM trades WHERE id = ?1", params![id])?;
        }

        Ok(trades)
    }

    /// Get trade history for an account, newest first.
    pub fn trades(&self, account_id: i64, limit: Option<usize>) -> Result<Vec<Trade>, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let limit = limit.unwrap_or(500);

        let mut stmt = conn.prepare(
            "SELECT id, account_id, ticket, symbol, side, volume, open_price,
                    current_price, close_price, stop_loss, take_profit, swap,
                    unrealized_profit, realized_profit, status, open_time,
                    close_time, comment
             FROM trades
             WHERE account_id = ?1
             ORDER BY open_time DESC, id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![account_id, limit as i64], row_to_trade)?;

        rows.collect()
    }

    /// Insert a single trade row, returning it with its assigned id.
    pub fn insert_trade(&self, trade: &Trade) -> Result<Trade, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();
        let id = insert_trade_tx(&conn, trade)?;
        let mut inserted = trade.clone();
        inserted.id = id;
        Ok(inserted)
    }

    // ========== Reconciliation ==========

    /// Apply one reconciliation cycle atomically: insert newly opened
    /// trades, update still-open trades, close vanished trades, and replace
    /// the account snapshot. Returns the opened trades with their assigned
    /// row ids.
    pub fn apply_cycle(
        &self,
        plan: &CyclePlan,
        snapshot: &AccountSnapshot,
    ) -> Result<Vec<Trade>, rusqlite::Error> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let mut opened = Vec::with_capacity(plan.opened.len());
        for trade in &plan.opened {
            let id = insert_trade_tx(&tx, trade)?;
            let mut inserted = trade.clone();
            inserted.id = id;
            opened.push(inserted);
        }

        for update in &plan.updated {
            let trade = &update.trade;
            tx.execute(
                "UPDATE trades
                 SET current_price = ?1, unrealized_profit = ?2, swap = ?3
                 WHERE id = ?4",
                params![
                    trade.current_price,
                    trade.unrealized_profit,
                    trade.swap,
                    trade.id
                ],
            )?;
        }

        for trade in &plan.closed {
            tx.execute(
                "UPDATE trades
                 SET status = 'closed', close_time = ?1, close_price = ?2,
                     realized_profit = ?3, unrealized_profit = 0
                 WHERE id = ?4 AND status = 'open'",
                params![trade.close_time, trade.close_price, trade.realized_profit, trade.id],
            )?;
        }

        tx.execute(
            "INSERT OR REPLACE INTO account_snapshots
                (account_id, balance, equity, margin, free_margin, margin_level,
                 currency, leverage, captured_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                snapshot.account_id,
                snapshot.balance,
                snapshot.equity,
                snapshot.margin,
                snapshot.free_margin,
                snapshot.margin_level,
                snapshot.currency,
                snapshot.leverage,
                snapshot.captured_at,
            ],
        )?;

        tx.commit()?;
        Ok(opened)
    }

    // ========== Account snapshot ==========

    /// Get the latest account snapshot, if one has been ingested.
    pub fn account_snapshot(&self, account_id: i64) -> Result<Option<AccountSnapshot>, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();

        let result = conn.query_row(
            "SELECT account_id, balance, equity, margin, free_margin,
                    margin_level, currency, leverage, captured_at
             FROM account_snapshots WHERE account_id = ?1",
            params![account_id],
            |row| {
                Ok(AccountSnapshot {
                    account_id: row.get(0)?,
                    balance: row.get(1)?,
                    equity: row.get(2)?,
                    margin: row.get(3)?,
                    free_margin: row.get(4)?,
                    margin_level: row.get(5)?,
                    currency: row.get(6)?,
                    leverage: row.get(7)?,
                    captured_at: row.get(8)?,
                })
            },
        );

        match result {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }

    // ========== Aggregates ==========

    /// Aggregate trade statistics for an account.
    pub fn account_stats(&self, account_id: i64) -> Result<AccountStats, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();

        let (open_trades, floating_profit): (i64, f64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(unrealized_profit), 0)
             FROM trades WHERE account_id = ?1 AND status = 'open'",
            params![account_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let (closed_trades, historical_profit, wins): (i64, f64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(realized_profit), 0),
                    COALESCE(SUM(CASE WHEN realized_profit > 0 THEN 1 ELSE 0 END), 0)
             FROM trades WHERE account_id = ?1 AND status = 'closed'",
            params![account_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        let win_rate = if closed_trades > 0 {
            wins as f64 / closed_trades as f64 * 100.0
        } else {
            0.0
        };

        Ok(AccountStats {
            total_trades: open_trades + closed_trades,
            open_trades,
            closed_trades,
            floating_profit,
            historical_profit,
            total_profit: floating_profit + historical_profit,
            win_rate,
        })
    }

    /// Performance breakdown over closed trades.
    pub fn performance(&self, account_id: i64) -> Result<PerformanceReport, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(
            "SELECT realized_profit FROM trades
             WHERE account_id = ?1 AND status = 'closed'",
        )?;
        let profits: Result<Vec<f64>, _> = stmt.query_map(params![account_id], |row| row.get(0))?.collect();

        Ok(PerformanceReport::from_closed_profits(&profits?))
    }

    // ========== Maintenance ==========

    /// Collapse duplicate ticket rows for an account, keeping the row with
    /// the larger surrogate id. Returns the number of rows removed.
    pub fn merge_duplicate_tickets(&self, account_id: i64) -> Result<usize, rusqlite::Error> {
        let conn = self.conn.lock().unwrap();

        let removed = conn.execute(
            "DELETE FROM trades
             WHERE account_id = ?1
               AND id NOT IN (
                   SELECT MAX(id) FROM trades
                   WHERE account_id = ?1
                   GROUP BY ticket
               )",
            params![account_id],
        )?;

        if removed > 0 {
            warn!(
                "Merged {} duplicate ticket rows for account {}",
                removed, account_id
            );
        }
        Ok(removed)
    }
}

fn insert_trade_tx(conn: &Connection, trade: &Trade) -> Result<i64, rusqlite::Error> {
    conn.execute(
        "INSERT INTO trades
            (account_id, ticket, symbol, side, volume, open_price,
             current_price, close_price, stop_loss, take_profit, swap,
             unrealized_profit, realized_profit, status, open_time,
             close_time, comment)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        params![
            trade.account_id,
            trade.ticket,
            trade.symbol,
            trade.side.to_string(),
            trade.volume,
            trade.open_price,
            trade.current_price,
            trade.close_price,
            trade.stop_loss,
            trade.take_profit,
            trade.swap,
            trade.unrealized_profit,
            trade.realized_profit,
            trade.status.to_string(),
            trade.open_time,
            trade.close_time,
            trade.comment,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn row_to_trade(row: &Row<'_>) -> Result<Trade, rusqlite::Error> {
    let side: String = row.get(4)?;
    let status: String = row.get(14)?;

    Ok(Trade {
        id: row.get(0)?,
        account_id: row.get(1)?,
        ticket: row.get(2)?,
        symbol: row.get(3)?,
        side: if side == "sell" {
            TradeSide::Sell
        } else {
            TradeSide::Buy
        },
        volume: row.get(5)?,
        open_price: row.get(6)?,
        current_price: row.get(7)?,
        close_price: row.get(8)?,
        stop_loss: row.get(9)?,
        take_profit: row.get(10)?,
        swap: row.get(11)?,
        unrealized_profit: row.get(12)?,
        realized_profit: row.get(13)?,
        status: if status == "closed" {
            TradeStatus::Closed
        } else {
            TradeStatus::Open
        },
        open_time: row.get(15)?,
        close_time: row.get(16)?,
        comment: row.get(17)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_trade(account_id: i64, ticket: i64, profit: f64) -> Trade {
        Trade {
            id: 0,
            account_id,
            ticket,
            symbol: "EURUSD".to_string(),
            side: TradeSide::Buy,
            volume: 0.1,
            open_price: 1.1,
            current_price: 1.1,
            close_price: None,
            stop_loss: None,
            take_profit: None,
            swap: 0.0,
            unrealized_profit: profit,
            realized_profit: 0.0,
            status: TradeStatus::Open,
            open_time: 1_700_000_000,
            close_time: None,
            comment: String::new(),
        }
    }

    #[test]
    fn test_insert_and_load_open_trades() {
        let store = LedgerStore::new_in_memory().unwrap();

        let inserted = store.insert_trade(&open_trade(1, 100, 5.0)).unwrap();
        assert!(inserted.id > 0);

        let open = store.open_trades(1).unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].ticket, 100);
        assert_eq!(open[0].unrealized_profit, 5.0);

        // Other accounts see nothing.
        assert!(store.open_trades(2).unwrap().is_empty());
    }

    #[test]
    fn test_open_trades_merges_duplicates_keeping_larger_id() {
        let store = LedgerStore::new_in_memory().unwrap();

        let first = store.insert_trade(&open_trade(1, 100, 1.0)).unwrap();
        let second = store.insert_trade(&open_trade(1, 100, 2.0)).unwrap();
        assert!(second.id > first.id);

        let open = store.open_trades(1).unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, second.id);

        // The losing row is gone from the ledger, not just the result.
        assert_eq!(store.trades(1, None).unwrap().len(), 1);
    }

    #[test]
    fn test_merge_duplicate_tickets_maintenance_pass() {
        let store = LedgerStore::new_in_memory().unwrap();

        store.insert_trade(&open_trade(1, 100, 1.0)).unwrap();
        store.insert_trade(&open_trade(1, 100, 2.0)).unwrap();
        store.insert_trade(&open_trade(1, 200, 3.0)).unwrap();

        let removed = store.merge_duplicate_tickets(1).unwrap();
        assert_eq!(removed, 1);

        let trades = store.trades(1, None).unwrap();
        let mut tickets: Vec<i64> = trades.iter().map(|t| t.ticket).collect();
        tickets.sort_unstable();
        tickets.dedup();
        assert_eq!(tickets.len(), trades.len());

        // Second pass is a no-op.
        assert_eq!(store.merge_duplicate_tickets(1).unwrap(), 0);
    }

    #[test]
    fn test_account_stats() {
        let store = LedgerStore::new_in_memory().unwrap();

        store.insert_trade(&open_trade(1, 100, 5.0)).unwrap();
        let mut closed = open_trade(1, 101, 3.0);
        closed.close(1_700_000_100);
        store.insert_trade(&closed).unwrap();
        let mut loser = open_trade(1, 102, -2.0);
        loser.close(1_700_000_200);
        store.insert_trade(&loser).unwrap();

        let stats = store.account_stats(1).unwrap();
        assert_eq!(stats.total_trades, 3);
        assert_eq!(stats.open_trades, 1);
        assert_eq!(stats.closed_trades, 2);
        assert_eq!(stats.floating_profit, 5.0);
        assert_eq!(stats.historical_profit, 1.0);
        assert_eq!(stats.win_rate, 50.0);
    }

    #[test]
    fn test_snapshot_replaced_wholesale() {
        let store = LedgerStore::new_in_memory().unwrap();
        assert!(store.account_snapshot(1).unwrap().is_none());

        let plan = CyclePlan::empty(1);
        let mut snapshot = AccountSnapshot {
            account_id: 1,
            balance: 1000.0,
            equity: 1005.0,
            margin: 50.0,
            free_margin: 955.0,
            margin_level: 2010.0,
            currency: "USD".to_string(),
            leverage: 100,
            captured_at: 1,
        };
        store.apply_cycle(&plan, &snapshot).unwrap();

        snapshot.balance = 1200.0;
        snapshot.captured_at = 2;
        store.apply_cycle(&plan, &snapshot).unwrap();

        let stored = store.account_snapshot(1).unwrap().unwrap();
        assert_eq!(stored.balance, 1200.0);
        assert_eq!(stored.captured_at, 2);
    }
}
