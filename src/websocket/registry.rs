//! Connection registry for viewer WebSockets.
//!
//! Maps each account to the set of live viewer connections watching it.
//! Delivery is best-effort and at-most-once: a send failure closes only
//! the failing connection, and nothing here ever blocks the caller.

use crate::types::Event;
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Viewer connection lifecycle. Transitions only move forward; a closed
/// connection is never reopened, a fresh one is registered instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ConnState {
    /// Whether a transition to `next` is allowed.
    pub fn can_advance_to(self, next: ConnState) -> bool {
        use ConnState::*;
        matches!(
            (self, next),
            (Connecting, Open)
                | (Connecting, Closing)
                | (Connecting, Closed)
                | (Open, Closing)
                | (Open, Closed)
                | (Closing, Closed)
        )
    }
}

/// One viewer connection.
pub struct ConnectionHandle {
    pub account_id: i64,
    /// Channel to the socket's send task.
    pub tx: mpsc::UnboundedSender<String>,
    pub state: ConnState,
    /// Unix milliseconds of the last message seen from this client.
    pub last_activity: i64,
    /// Consecutive keepalive pings without a response.
    pub missed_pings: u32,
}

/// Registry of viewer connections, grouped by account.
pub struct ConnectionRegistry {
    connections: DashMap<Uuid, ConnectionHandle>,
    /// Account rooms: account id -> set of connection ids.
    rooms: DashMap<i64, HashSet<Uuid>>,
}

impl ConnectionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connections: DashMap::new(),
            rooms: DashMap::new(),
        })
    }

    /// Register a new connection in the `Connecting` state.
    pub fn register(&self, account_id: i64, tx: mpsc::UnboundedSender<String>) -> Uuid {
        let conn_id = Uuid::new_v4();
        self.connections.insert(
            conn_id,
            ConnectionHandle {
                account_id,
                tx,
                state: ConnState::Connecting,
                last_activity: Utc::now().timestamp_millis(),
                missed_pings: 0,
            },
        );
        self.rooms
            .entry(account_id)
            .or_insert_with(HashSet::new)
            .insert(conn_id);
        info!("Viewer {} connecting for account {}", conn_id, account_id);
        conn_id
    }

    /// Advance a connection's state, refusing backward transitions.
    pub fn set_state(&self, conn_id: Uuid, next: ConnState) -> bool {
        if let Some(mut conn) = self.connections.get_mut(&conn_id) {
            if conn.state.can_advance_to(next) {
                conn.state = next;
                return true;
            }
            warn!(
                "Refused connection state transition {:?} -> {:?} for {}",
                conn.state, next, conn_id
            );
        }
        false
    }

    /// Mark a connection open (handshake complete).
    pub fn mark_open(&self, conn_id: Uuid) -> bool {
        self.set_state(conn_id, ConnState::Open)
    }

    /// Record client activity: refresh the activity timestamp and reset
    /// the missed-ping counter.
    pub fn touch(&self, conn_id: Uuid) {
        if let Some(mut conn) = self.connections.get_mut(&conn_id) {
            conn.last_activity = Utc::now().timestamp_millis();
            conn.missed_pings = 0;
        }
    }

    /// Close and remove a connection.
    pub fn deregister(&self, conn_id: Uuid) {
        if let Some((_, mut conn)) = self.connections.remove(&conn_id) {
            conn.state = ConnState::Closed;
            if let Some(mut room) = self.rooms.get_mut(&conn.account_id) {
                room.remove(&conn_id);
            }
            debug!("Viewer {} closed for account {}", conn_id, conn.account_id);
        }
    }

    /// Send one event to one connection. Returns false (and drops the
    /// connection) on failure.
    pub fn send_to(&self, conn_id: Uuid, event: &Event) -> bool {
        let wire = event.to_wire(Utc::now().timestamp_millis());
        let failed = match self.connections.get(&conn_id) {
            Some(conn) => conn.tx.send(wire).is_err(),
            None => return false,
        };
        if failed {
            self.deregister(conn_id);
            return false;
        }
        true
    }

    /// Broadcast events, in order, to every connection watching an
    /// account. A failure on one connection drops only that connection.
    pub fn broadcast_account(&self, account_id: i64, events: &[Event]) {
        let conn_ids: Vec<Uuid> = self
            .rooms
            .get(&account_id)
            .map(|room| room.iter().copied().collect())
            .unwrap_or_default();

        if conn_ids.is_empty() {
            return;
        }

        let emitted_at = Utc::now().timestamp_millis();
        let frames: Vec<String> = events.iter().map(|e| e.to_wire(emitted_at)).collect();

        for conn_id in conn_ids {
            let failed = match self.connections.get(&conn_id) {
                Some(conn) => frames.iter().any(|frame| conn.tx.send(frame.clone()).is_err()),
                None => continue,
            };
            if failed {
                warn!("Dropping viewer {} after failed delivery", conn_id);
                self.deregister(conn_id);
            }
        }
    }

    /// Run one keepalive sweep: connections that already missed
    /// `max_missed` pings are closed, the rest get a ping and their
    /// missed counter bumped. Returns the ids that were closed.
    pub fn keepalive_sweep(&self, max_missed: u32) -> Vec<Uuid> {
        let mut expired = Vec::new();
        let mut to_ping = Vec::new();

        for mut entry in self.connections.iter_mut() {
            if entry.missed_pings >= max_missed {
                expired.push(*entry.key());
            } else {
                entry.missed_pings += 1;
                to_ping.push(*entry.key());
            }
        }

        for conn_id in &expired {
            info!("Viewer {} missed keepalive, closing", conn_id);
            self.set_state(*conn_id, ConnState::Closing);
            self.deregister(*conn_id);
        }
        for conn_id in to_ping {
            self.send_to(conn_id, &Event::Ping);
        }

        expired
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of viewers watching one account.
    pub fn viewer_count(&self, account_id: i64) -> usize {
        self.rooms.get(&account_id).map(|r| r.len()).unwrap_or(0)
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self {
            connections: DashMap::new(),
            rooms: DashMap::new(),
        }
    }
}
