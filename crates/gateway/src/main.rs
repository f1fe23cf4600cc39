//! DocSage API Gateway
//!
//! The main entry point for all external API requests.
//! Handles:
//! - Chat sessions and their conversation history
//! - Question answering through the refinement engine
//! - Request routing and timeouts
//! - Observability (logging, metrics, tracing)

mod handlers;
mod middleware;

use axum::{
    error_handling::HandleErrorLayer,
    http::StatusCode,
    routing::{get, post},
    BoxError, Router,
};
use docsage_common::{
    config::AppConfig,
    context::{EvidenceStore, HistoryProvider, ReasoningCapability},
    db::{DbPool, PgEvidenceStore, Repository},
    embeddings::create_embedder,
    llm::{LlmClient, LlmReasoner},
    metrics::{self, QUERY_BUCKETS},
    Embedder, Engine, SessionStore,
};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::oneshot;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DbPool,
    pub sessions: SessionStore,
    pub engine: Arc<Engine>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration before logging so the level can come from it
    let config = match std::env::var("APP_CONFIG_FILE") {
        Ok(path) => AppConfig::from_file(&path)?,
        Err(_) => AppConfig::load()?,
    };
    let config = Arc::new(config);

    init_tracing(&config);

    info!("Starting DocSage API Gateway v{}", docsage_common::VERSION);

    if let Err(e) = config.engine.validate() {
        tracing::error!(error = %e, "Invalid engine configuration");
        return Err(e.into());
    }

    // Initialize metrics
    init_metrics_exporter(config.observability.metrics_port)?;
    metrics::register_metrics();

    info!("Connecting to database...");
    let db = DbPool::new(&config.database).await?;

    info!("Connecting to Redis...");
    let sessions = SessionStore::connect(&config.redis).await?;

    let embedder = create_embedder(&config.embedding)?;
    info!(
        model = embedder.model_name(),
        dimension = embedder.dimension(),
        "Embedder ready"
    );

    let store: Arc<dyn EvidenceStore> =
        Arc::new(PgEvidenceStore::new(Repository::new(db.clone()), embedder));
    let llm = LlmClient::new(config.llm.clone())?;
    info!(model = llm.model(), "Language model client ready");
    let reasoner: Arc<dyn ReasoningCapability> = Arc::new(LlmReasoner::new(llm));
    let history: Arc<dyn HistoryProvider> = Arc::new(sessions.clone());

    let engine = Engine::new(&config.engine, reasoner, store, history)?;

    let state = AppState {
        config: config.clone(),
        db,
        sessions,
        engine: Arc::new(engine),
    };

    // Build the router
    let app = create_router(state);

    // Start the server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                stop_rx.await.ok();
            })
            .await
    });

    shutdown_signal().await;
    stop_tx.send(()).ok();

    // In-flight queries get a bounded grace period to finish
    match tokio::time::timeout(config.shutdown_timeout(), server).await {
        Ok(joined) => joined??,
        Err(_) => warn!(
            timeout_secs = config.server.shutdown_timeout_secs,
            "Shutdown timed out, dropping open connections"
        ),
    }

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.observability.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Serve Prometheus metrics on their own port; 0 disables the exporter
fn init_metrics_exporter(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    if port == 0 {
        info!("Metrics exporter disabled");
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from(([0, 0, 0, 0], port)))
        .set_buckets_for_metric(
            Matcher::Suffix("query_duration_seconds".to_string()),
            QUERY_BUCKETS,
        )?
        .install()?;

    info!(port, "Metrics exporter listening");
    Ok(())
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let timeout = ServiceBuilder::new()
        .layer(HandleErrorLayer::new(handle_timeout_error))
        .timeout(state.config.request_timeout());

    // API routes
    let api_routes = Router::new()
        // Health endpoints
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))

        // Chat endpoints
        .route("/chat/start", post(handlers::chat::start_chat))
        .route("/chat/query", post(handlers::chat::query))
        .route(
            "/chat/{session_id}",
            get(handlers::chat::get_chat).delete(handlers::chat::delete_chat),
        )
        .route("/chat/{session_id}/extend", post(handlers::chat::extend_chat))

        // Collection endpoints
        .route(
            "/collections/{collection_id}/documents",
            get(handlers::collections::list_documents),
        )
        .route_layer(axum::middleware::from_fn(middleware::metrics::track_metrics));

    // Compose the app
    Router::new()
        .nest("/v1", api_routes)
        .layer(timeout)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

async fn handle_timeout_error(err: BoxError) -> (StatusCode, String) {
    if err.is::<tower::timeout::error::Elapsed>() {
        warn!("Request timed out");
        (StatusCode::REQUEST_TIMEOUT, "Request timed out".to_string())
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Unhandled internal error: {}", err),
        )
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
