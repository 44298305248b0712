use anyhow::Result;
use arc_swap::ArcSwap;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
    auth,
    config::Config,
    handlers::{self, AppState},
    metrics,
    rate_limit::{self, RateLimiter},
    signals::setup_signal_handlers,
    telemetry::{SqliteStore, TelemetryStore},
};

/// Start the telemetry gateway
///
/// This function:
/// 1. Initializes metrics
/// 2. Connects the store and runs migrations
/// 3. Sets up signal handlers for graceful shutdown and config reload
/// 4. Builds the router and the admission controller
/// 5. Serves requests with graceful shutdown support
pub async fn start_server(config: Config, config_path: PathBuf) -> Result<()> {
    let metrics_handle = if config.metrics.enabled {
        info!("Initializing Prometheus metrics...");
        match metrics::init_metrics() {
            Ok(handle) => Some(Arc::new(handle)),
            Err(e) => {
                warn!("Prometheus exporter unavailable: {}", e);
                None
            }
        }
    } else {
        None
    };

    info!(url = %config.database.url, "Connecting to telemetry store");
    let store = SqliteStore::connect(&config.database).await?;

    auth::log_auth_mode(&config.auth);

    // Wrap config in ArcSwap for atomic reload support
    let config_swap = Arc::new(ArcSwap::from_pointee(config.clone()));

    // Setup signal handlers (SIGTERM, SIGINT for shutdown; SIGHUP for reload)
    let (shutdown_tx, signal_handle) = setup_signal_handlers(config_swap.clone(), config_path)?;
    let mut shutdown_rx = shutdown_tx.subscribe();

    let limiter = Arc::new(RateLimiter::from_config(&config.rate_limit));
    let sweeper = limiter.spawn_sweeper(Duration::from_secs(
        config.rate_limit.sweep_interval_seconds.max(1),
    ));

    let state = AppState::new(
        Arc::new(store.clone()) as Arc<dyn TelemetryStore>,
        config.ingest.max_bulk_entries,
    );
    let app = create_router(config_swap, state, limiter, metrics_handle);

    let addr = SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>()?,
        config.server.port,
    ));

    info!("Starting telemetry gateway on {}", addr);
    info!(
        "Configuration: {} requests / {}s per client, {} role-protected paths",
        config.rate_limit.requests_per_window,
        config.rate_limit.window_seconds,
        config.auth.endpoint_roles.len()
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Peer addresses are needed for client identification when no proxy headers are present
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = shutdown_rx.recv().await;
        info!("Shutdown signal received, draining connections...");
    })
    .await?;

    sweeper.abort();
    signal_handle.await?;
    store.pool().close().await;
    info!("Server stopped gracefully");

    Ok(())
}

/// Create the Axum router with all routes and middleware
///
/// Layers, outermost first: request tracing, body limit, admission, auth.
pub fn create_router(
    config: Arc<ArcSwap<Config>>,
    state: AppState,
    limiter: Arc<RateLimiter>,
    metrics_handle: Option<Arc<PrometheusHandle>>,
) -> Router {
    let snapshot = config.load_full();

    let api_routes = Router::new()
        .route(
            "/api/logs",
            get(handlers::logs::list_logs).post(handlers::logs::create_log),
        )
        .route("/api/logs/bulk", post(handlers::logs::create_logs_bulk))
        .route(
            "/api/metrics",
            get(handlers::metrics::list_metrics).post(handlers::metrics::create_metric),
        )
        .route(
            "/api/traces",
            get(handlers::traces::list_traces).post(handlers::traces::start_trace),
        )
        .route("/api/traces/:trace_id/end", post(handlers::traces::end_trace))
        .route(
            "/api/traces/:trace_id/spans",
            get(handlers::traces::list_trace_spans),
        )
        .route("/api/spans", post(handlers::traces::start_span))
        .route("/api/spans/:span_id/end", post(handlers::traces::end_span))
        .route_layer(middleware::from_fn_with_state(
            config,
            auth::auth_middleware,
        ))
        .with_state(state.clone());

    // Public endpoints (no auth required)
    let mut app = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/api/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        .with_state(state);

    if let Some(handle) = metrics_handle {
        app = app.merge(
            Router::new()
                .route(&snapshot.metrics.endpoint, get(handlers::prometheus::metrics))
                .with_state(handle),
        );
    }

    app.merge(api_routes)
        .layer(middleware::from_fn_with_state(
            limiter,
            rate_limit::rate_limit_middleware,
        ))
        .layer(DefaultBodyLimit::max(snapshot.server.max_body_bytes))
        .layer(TraceLayer::new_for_http())
}
