pub mod accounts;
pub mod bridge;
pub mod health;

use crate::AppState;
use axum::Router;

/// Create the API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .nest("/api/bridge", bridge::router())
        .nest("/api/accounts", accounts::router())
}
