mod capture;
mod config;
mod db;
mod error;
mod models;
mod routes;
mod services;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::{header, HeaderValue, Method};
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use capture::SubmissionCoordinator;
use config::Config;
use routes::{create_router, AppState, DraftRegistry};
use services::store::SqliteStore;
use services::submissions::{run_submission_recorder, SubmissionLog};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file (from repo root)
    dotenvy::from_filename("../../.env").ok();
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("pairshare_server=debug,tower_http=debug")),
        )
        .init();

    let config = Config::from_env();
    let port = config.server_port;

    let pool = db::create_pool(&config.sqlite_path);
    tracing::info!("Database initialized at {}", config.sqlite_path);

    std::fs::create_dir_all(&config.image_dir)
        .with_context(|| format!("Failed to create image directory {}", config.image_dir))?;
    std::fs::create_dir_all(&config.capture_dir)
        .with_context(|| format!("Failed to create capture directory {}", config.capture_dir))?;
    let store = SqliteStore::new(pool, &config.image_dir, config.jpeg_quality);

    let coordinator = Arc::new(SubmissionCoordinator::new(
        Arc::new(store.clone()),
        config.amount_policy,
    ));
    let submissions = SubmissionLog::new();

    tokio::spawn(run_submission_recorder(
        coordinator.subscribe(),
        submissions.clone(),
    ));

    let state = AppState {
        config: config.clone(),
        store,
        drafts: DraftRegistry::new(
            Duration::from_secs(config.draft_idle_secs),
            config.max_drafts,
        ),
        coordinator,
        submissions,
    };

    let cors = CorsLayer::new()
        .allow_origin(
            config
                .cors_origin
                .parse::<HeaderValue>()
                .context("CORS_ORIGIN must be a valid header value")?,
        )
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    let app = create_router(state)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr = format!("0.0.0.0:{port}");
    tracing::info!("pairshare-server listening on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("Server failed")?;

    Ok(())
}
