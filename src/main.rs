mod config;
mod models;
mod persistence;
mod registry;
mod websocket;

use std::panic;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use config::Config;
use persistence::DocStore;
use registry::SessionRegistry;

/// Shared server state, constructed once and injected into the router.
pub struct AppState {
    pub config: Config,
    pub registry: SessionRegistry,
}

/// Build the application router. Split out so tests can stand up a full
/// server against an isolated registry.
pub fn app_router(app_state: Arc<AppState>) -> Router {
    Router::new()
        // clients select their document via the ?document= query parameter,
        // whatever path they dial
        .route("/", get(websocket::handler::websocket_handler))
        .route("/*path", get(websocket::handler::websocket_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Set panic hook for better error messages
    panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
    }));

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            // Default to info level, but allow debug for our app
            "syncdoc=debug,tower_http=debug,axum::rejection=trace,info".into()
        }))
        .init();

    info!("Starting server...");

    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        error!("Failed to load configuration: {}", e);
        warn!("Using default configuration");
        Config::default()
    });

    let store = DocStore::new(&config.data_dir, config.text_mirror);
    let registry = SessionRegistry::new(store, config.gc);
    let app_state = Arc::new(AppState {
        config: config.clone(),
        registry,
    });

    let app = app_router(app_state.clone());

    let listener = tokio::net::TcpListener::bind(config.server_address())
        .await
        .unwrap_or_else(|_| panic!("Failed to bind to {}", config.server_address()));

    info!("Server running on ws://{}", config.server_address());
    info!(
        "Persisting documents to '{}' every {}s",
        config.data_dir, config.persist_interval_secs
    );

    // Periodic persistence sweep; owned here so shutdown can cancel it.
    let persist_state = app_state.clone();
    let persist_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(
            persist_state.config.persist_interval_secs,
        ));
        interval.tick().await; // the first tick fires immediately
        loop {
            interval.tick().await;
            persist_state.registry.persist_all().await;
        }
    });

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Server error: {}", e);
        }
    });

    shutdown_signal().await;
    info!("Shutting down, persisting all documents...");

    // Teardown order is load-bearing: stop the timer, flush every session,
    // only then close the connections.
    persist_task.abort();
    app_state.registry.shutdown().await;
    server.abort();

    info!("Shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
