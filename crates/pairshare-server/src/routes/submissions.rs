use axum::extract::{Path, State};
use axum::Json;

use crate::error::{AppError, AppResult};
use crate::routes::AppState;
use crate::services::submissions::SubmissionStatus;

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<SubmissionStatus>> {
    state
        .submissions
        .status(&id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound("Submission not found".into()))
}
