use axum::{routing::get, Router};
use spyglass::config::Config;
use spyglass::services::{LedgerStore, MarginMonitor, ReconcileEngine};
use spyglass::websocket::{self, ConnectionRegistry};
use spyglass::{api, AppState};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spyglass=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Arc::new(Config::from_env());
    info!("Starting Spyglass server on {}:{}", config.host, config.port);
    if config.bridge_keys.is_empty() {
        tracing::warn!("No bridge keys configured (BRIDGE_KEYS); ingestion will reject all pushes");
    }

    // Open the trade ledger
    let ledger = Arc::new(LedgerStore::new(&config.db_path)?);

    // Viewer connection registry
    let registry = ConnectionRegistry::new();

    // Reconciliation engine
    let engine = Arc::new(ReconcileEngine::new(
        ledger.clone(),
        registry.clone(),
        MarginMonitor::new(config.margin_thresholds.clone()),
        config.update_threshold,
    ));

    // Keepalive sweep for viewer connections
    {
        let registry = registry.clone();
        let interval = config.ping_interval_secs;
        let max_missed = config.max_missed_pings;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval));
            loop {
                ticker.tick().await;
                registry.keepalive_sweep(max_missed);
            }
        });
    }

    let state = AppState {
        config: config.clone(),
        ledger,
        engine,
        registry,
    };

    // Build CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build the router
    let app = Router::new()
        .merge(api::router())
        .route("/ws/accounts/:account_id", get(websocket::ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start the server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Spyglass server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
