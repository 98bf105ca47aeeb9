//! Bridge API
//!
//! Endpoints for the terminal bridge pushing account snapshots:
//!
//! - GET  /api/bridge/ping - Auth probe
//! - POST /api/bridge/sync - Ingest one snapshot and reconcile
//! - POST /api/bridge/disconnect - Mark the feed offline
//!
//! Every call authenticates with `Authorization: Bearer <key>`; keys map
//! to a single account, so each call is scoped to exactly one account.

use axum::{
    extract::{FromRequestParts, State},
    http::{header, request::Parts},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::AppError;
use crate::types::{ConnectionStatusData, Event, FeedStatus, SnapshotPayload, SyncSummary};
use crate::AppState;

/// Create bridge router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/ping", get(ping))
        .route("/sync", post(sync))
        .route("/disconnect", post(disconnect))
}

/// Verified bridge identity for one request.
///
/// Key issuance and rotation live in the external identity service; this
/// extractor only maps an already-issued key to its account id.
pub struct BridgeAuth {
    pub account_id: i64,
}

#[axum::async_trait]
impl FromRequestParts<AppState> for BridgeAuth {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let key = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .unwrap_or("");

        if key.is_empty() {
            return Err(AppError::Unauthorized("API key required".to_string()));
        }

        state
            .config
            .account_for_key(key)
            .map(|account_id| BridgeAuth { account_id })
            .ok_or_else(|| AppError::Unauthorized("Invalid API key".to_string()))
    }
}

#[derive(Debug, Serialize)]
struct PingResponse {
    status: &'static str,
    account_id: i64,
    timestamp: i64,
}

#[derive(Debug, Serialize)]
struct DisconnectResponse {
    status: &'static str,
}

/// GET /api/bridge/ping
///
/// Connectivity and auth probe for the bridge.
async fn ping(auth: BridgeAuth) -> Json<PingResponse> {
    Json(PingResponse {
        status: "connected",
        account_id: auth.account_id,
        timestamp: Utc::now().timestamp_millis(),
    })
}

/// POST /api/bridge/sync
///
/// Ingest one snapshot. The payload is validated before the engine runs;
/// a rejected payload never touches the ledger. The cycle is bounded by
/// the configured ingest timeout and commits atomically, so a timeout
/// commits nothing and the next periodic push recovers.
async fn sync(
    State(state): State<AppState>,
    auth: BridgeAuth,
    Json(payload): Json<SnapshotPayload>,
) -> Result<Json<SyncSummary>, AppError> {
    if let Err(e) = payload.validate() {
        warn!(
            "Rejected snapshot for account {}: {}",
            auth.account_id, e
        );
        return Err(AppError::BadRequest(e.to_string()));
    }

    let cycle = state.engine.run_cycle(auth.account_id, &payload);
    let summary = tokio::time::timeout(
        Duration::from_millis(state.config.ingest_timeout_ms),
        cycle,
    )
    .await
    .map_err(|_| {
        warn!("Ingestion timed out for account {}", auth.account_id);
        AppError::Timeout(format!(
            "reconciliation exceeded {}ms",
            state.config.ingest_timeout_ms
        ))
    })?
    .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(summary))
}

/// POST /api/bridge/disconnect
///
/// The bridge is shutting down: notify viewers and drop the cached
/// snapshot hash so the next push reconciles unconditionally.
async fn disconnect(
    State(state): State<AppState>,
    auth: BridgeAuth,
) -> Json<DisconnectResponse> {
    info!("Bridge disconnected for account {}", auth.account_id);
    state.engine.invalidate_hash(auth.account_id);
    state.registry.broadcast_account(
        auth.account_id,
        &[Event::ConnectionStatus(ConnectionStatusData {
            account_id: auth.account_id,
            status: FeedStatus::BridgeOffline,
        })],
    );

    Json(DisconnectResponse {
        status: "disconnected",
    })
}
