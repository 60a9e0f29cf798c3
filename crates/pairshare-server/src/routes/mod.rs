mod drafts;
mod lists;
mod submissions;
mod users;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Router,
};
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::services::ServeDir;

use crate::capture::SubmissionCoordinator;
use crate::config::Config;
use crate::services::store::SqliteStore;
use crate::services::submissions::SubmissionLog;

pub use drafts::DraftRegistry;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: SqliteStore,
    pub drafts: DraftRegistry,
    pub coordinator: Arc<SubmissionCoordinator>,
    pub submissions: SubmissionLog,
}

async fn health() -> &'static str {
    "ok"
}

/// API routes without rate limiting.
pub fn api_routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        // Drafts
        .route("/api/v1/drafts", post(drafts::create))
        .route(
            "/api/v1/drafts/{id}",
            get(drafts::get).delete(drafts::delete),
        )
        .route(
            "/api/v1/drafts/{id}/image",
            put(drafts::put_image)
                .delete(drafts::clear_image)
                .layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route(
            "/api/v1/drafts/{id}/image/from-source",
            post(drafts::image_from_source),
        )
        .route("/api/v1/drafts/{id}/source-path", put(drafts::put_source_path))
        .route("/api/v1/drafts/{id}/date", put(drafts::put_date))
        .route("/api/v1/drafts/{id}/submit", post(drafts::submit))
        // Submissions
        .route("/api/v1/submissions/{id}", get(submissions::get))
        // Users
        .route("/api/v1/users", put(users::upsert))
        .route("/api/v1/users/{mail}", get(users::get))
        // Expense lists
        .route("/api/v1/lists", get(lists::list).post(lists::create))
        .route("/api/v1/lists/{id}", get(lists::get))
        .route("/api/v1/lists/{id}/expenses", get(lists::expenses))
}

pub fn create_router(state: AppState) -> Router {
    // Rate limit: 120 requests per 60 seconds per IP
    let api_governor = GovernorConfigBuilder::default()
        .per_second(2)
        .burst_size(120)
        .finish()
        .unwrap();

    // Health checks are not rate limited
    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/api/v1/health", get(health));

    let api = api_routes(state.config.max_upload_bytes)
        .layer(GovernorLayer::new(Arc::new(api_governor)));

    let media = ServeDir::new(state.store.image_dir());

    Router::new()
        .merge(health_routes)
        .merge(api)
        .nest_service("/media", media)
        .with_state(state)
}
