use axum::extract::{Path, State};
use axum::Json;

use crate::capture::ExpenseBackend;
use crate::error::AppResult;
use crate::models::{NewUser, User};
use crate::routes::AppState;

pub async fn upsert(
    State(state): State<AppState>,
    Json(body): Json<NewUser>,
) -> AppResult<Json<User>> {
    let user = state.store.create_or_update_user(body)?;
    tracing::debug!("Registered user {}", user.mail);
    Ok(Json(user))
}

pub async fn get(
    State(state): State<AppState>,
    Path(mail): Path<String>,
) -> AppResult<Json<User>> {
    Ok(Json(state.store.user_by_mail(&mail)?))
}
