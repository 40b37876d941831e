//! esledger - event-sourced write path with a transactional outbox
//!
//! The binary wires the core engine (event store, snapshot store,
//! outbox dispatcher, transaction coordinator) to an example domain
//! (accounts, transfers, users) exposed over an Axum HTTP surface.

use std::net::SocketAddr;

use axum::http::HeaderName;
use axum::{middleware, Router};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod aggregate;
pub mod api;
pub mod audit;
pub mod codec;
mod config;
pub mod context;
mod db;
pub mod domain;
mod error;
pub mod event_store;
pub mod handlers;
pub mod idempotency;
pub mod jobs;
pub mod outbox;
pub mod projection;
pub mod snapshot;
pub mod transaction;

pub use config::Config;
pub use error::{AppError, AppResult};

use outbox::{LoggingPublisher, OutboxProcessor, SqlxOutboxRepository};

/// Initialize tracing/logging
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "esledger=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build the application router
fn build_router(pool: PgPool) -> Router {
    // Create API router with all routes
    let api_router = api::create_router();

    // Apply middleware to API routes
    // Note: Axum layers are applied in reverse order (last added = first executed)
    // Order: logging -> auth -> rate_limit -> handler
    let protected_routes = api_router
        .layer(middleware::from_fn_with_state(
            pool.clone(),
            api::middleware::rate_limit_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            pool.clone(),
            api::middleware::auth_middleware,
        ))
        .layer(middleware::from_fn(
            api::middleware::logging_middleware,
        ));

    let request_id_header = HeaderName::from_static("x-request-id");

    // Outermost to innermost: CORS (must see preflight before auth ever
    // runs), request-id assignment, trace (spans carry the assigned id),
    // request-id propagation onto the response, then the routes above.
    Router::new()
        // Health check (no auth)
        .route("/health", axum::routing::get(health_check))
        // Protected API routes
        .nest("/api/v1", protected_routes)
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        .layer(CorsLayer::permissive())
        .with_state(pool)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    init_tracing();

    // Load configuration
    let config = Config::from_env()?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    tracing::info!("Starting esledger server");
    tracing::info!("Connecting to database...");

    // Create database pool
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;

    // Verify database schema
    if !db::check_schema(&pool).await? {
        tracing::error!("Database schema is not complete. Please run migrations.");
        return Err(anyhow::anyhow!("Database schema incomplete"));
    }

    tracing::info!("Database connected successfully");

    if config.outbox_processor_enabled {
        let repository = std::sync::Arc::new(SqlxOutboxRepository::new(pool.clone()));
        let publisher = std::sync::Arc::new(LoggingPublisher::from_config(&config));
        let processor_config = outbox::OutboxProcessorConfig {
            batch_size: config.outbox_batch_size as i64,
            cleanup_retention: chrono::Duration::days(config.outbox_cleanup_days as i64),
            ..Default::default()
        };
        let processor = OutboxProcessor::with_config(repository, publisher, processor_config);
        processor.start();
        tracing::info!("Outbox processor started");
    } else {
        tracing::info!("Outbox processor disabled (outbox.processor.enabled=false)");
    }

    jobs::JobScheduler::new(pool.clone()).start();
    tracing::info!("Maintenance job scheduler started");

    tracing::info!("Listening on http://{}", addr);

    // Build router and start server
    let app = build_router(pool.clone());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    
    // M140: Graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Cleanup
    tracing::info!("Server shutting down...");
    pool.close().await;
    tracing::info!("Database connections closed. Goodbye!");

    Ok(())
}

/// M140: Shutdown signal handler for graceful shutdown
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}