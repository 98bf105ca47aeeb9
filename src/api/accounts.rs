//! Accounts API
//!
//! Ledger query surface for viewers and reporting consumers:
//!
//! - GET  /api/accounts/:id/trades - Trade history (newest first)
//! - GET  /api/accounts/:id/stats - Account snapshot + trade aggregates
//! - GET  /api/accounts/:id/performance - Closed-trade performance report
//! - POST /api/accounts/:id/cleanup - Duplicate-ticket maintenance pass
//!
//! Viewer identity is verified upstream (external session service); the
//! account id arrives as a path parameter.

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::types::{AccountSnapshot, AccountStats, PerformanceReport, Trade};
use crate::AppState;

/// Create accounts router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/:id/trades", get(list_trades))
        .route("/:id/stats", get(get_stats))
        .route("/:id/performance", get(get_performance))
        .route("/:id/cleanup", post(cleanup))
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub data: T,
}

#[derive(Debug, Deserialize)]
pub struct ListTradesQuery {
    pub limit: Option<usize>,
}

/// Combined account view: latest snapshot (if the bridge has pushed one)
/// plus ledger aggregates.
#[derive(Debug, Serialize)]
pub struct AccountStatsResponse {
    pub account: Option<AccountSnapshot>,
    pub trading: AccountStats,
}

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub removed: usize,
}

/// GET /api/accounts/:id/trades
async fn list_trades(
    State(state): State<AppState>,
    Path(account_id): Path<i64>,
    Query(query): Query<ListTradesQuery>,
) -> Result<Json<ApiResponse<Vec<Trade>>>, AppError> {
    let trades = state
        .ledger
        .trades(account_id, query.limit)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(ApiResponse { data: trades }))
}

/// GET /api/accounts/:id/stats
async fn get_stats(
    State(state): State<AppState>,
    Path(account_id): Path<i64>,
) -> Result<Json<ApiResponse<AccountStatsResponse>>, AppError> {
    let account = state
        .ledger
        .account_snapshot(account_id)
        .map_err(|e| AppError::Internal(e.to_string()))?;
    let trading = state
        .ledger
        .account_stats(account_id)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(ApiResponse {
        data: AccountStatsResponse { account, trading },
    }))
}

/// GET /api/accounts/:id/performance
async fn get_performance(
    State(state): State<AppState>,
    Path(account_id): Path<i64>,
) -> Result<Json<ApiResponse<PerformanceReport>>, AppError> {
    let report = state
        .ledger
        .performance(account_id)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(ApiResponse { data: report }))
}

/// POST /api/accounts/:id/cleanup
///
/// Collapse any duplicate ticket rows for the account, keeping the row
/// with the larger surrogate id.
async fn cleanup(
    State(state): State<AppState>,
    Path(account_id): Path<i64>,
) -> Result<Json<ApiResponse<CleanupResponse>>, AppError> {
    let removed = state
        .engine
        .cleanup_account(account_id)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(ApiResponse {
        data: CleanupResponse { removed },
    }))
}
