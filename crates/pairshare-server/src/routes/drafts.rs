use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::capture::imaging::{self, PreparedImage};
use crate::capture::moment::MOMENT_FORMAT;
use crate::capture::{DraftCaptureState, SubmissionTicket};
use crate::error::{AppError, AppResult};
use crate::routes::AppState;

type SharedDraft = Arc<Mutex<DraftCaptureState>>;

struct Session {
    draft: SharedDraft,
    touched: Instant,
}

/// Open capture sessions, one draft each.
///
/// Sessions idle for longer than `idle_timeout` are dropped, and opening a
/// session beyond `capacity` evicts the least recently used one.
#[derive(Clone)]
pub struct DraftRegistry {
    sessions: Arc<Mutex<HashMap<String, Session>>>,
    idle_timeout: Duration,
    capacity: usize,
}

impl DraftRegistry {
    pub fn new(idle_timeout: Duration, capacity: usize) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            idle_timeout,
            capacity: capacity.max(1),
        }
    }

    fn sessions(&self) -> AppResult<MutexGuard<'_, HashMap<String, Session>>> {
        self.sessions
            .lock()
            .map_err(|_| AppError::Internal("draft registry lock poisoned".into()))
    }

    pub fn open(&self, draft: DraftCaptureState) -> AppResult<String> {
        let now = Instant::now();
        let mut sessions = self.sessions()?;

        let before = sessions.len();
        sessions.retain(|_, session| now.duration_since(session.touched) < self.idle_timeout);
        let expired = before - sessions.len();
        if expired > 0 {
            tracing::debug!("Dropped {expired} idle drafts");
        }

        if sessions.len() >= self.capacity {
            let oldest = sessions
                .iter()
                .min_by_key(|(_, session)| session.touched)
                .map(|(id, _)| id.clone());
            if let Some(oldest) = oldest {
                sessions.remove(&oldest);
                tracing::debug!("Draft limit reached, dropped least recently used draft {oldest}");
            }
        }

        let id = Uuid::new_v4().to_string();
        sessions.insert(
            id.clone(),
            Session {
                draft: Arc::new(Mutex::new(draft)),
                touched: now,
            },
        );
        Ok(id)
    }

    pub fn get(&self, id: &str) -> AppResult<SharedDraft> {
        let now = Instant::now();
        let mut sessions = self.sessions()?;

        let expired = match sessions.get_mut(id) {
            Some(session) if now.duration_since(session.touched) < self.idle_timeout => {
                session.touched = now;
                return Ok(Arc::clone(&session.draft));
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            sessions.remove(id);
            tracing::debug!("Dropped idle draft {id}");
        }
        Err(AppError::NotFound("Draft not found".into()))
    }

    pub fn close(&self, id: &str) -> AppResult<()> {
        self.sessions()?
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| AppError::NotFound("Draft not found".into()))
    }
}

/// Decode or load a photo and derive its working pair on the blocking pool.
async fn prepare_blocking<F>(read: F) -> AppResult<PreparedImage>
where
    F: FnOnce() -> AppResult<DynamicImage> + Send + 'static,
{
    tokio::task::spawn_blocking(move || imaging::prepare(&read()?))
        .await
        .map_err(|e| AppError::Internal(format!("image preparation task failed: {e}")))?
}

fn lock(draft: &SharedDraft) -> AppResult<MutexGuard<'_, DraftCaptureState>> {
    draft
        .lock()
        .map_err(|_| AppError::Internal("draft lock poisoned".into()))
}

#[derive(Debug, Serialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Serialize)]
pub struct DraftView {
    pub id: String,
    pub list_id: Option<String>,
    pub source_image_path: Option<String>,
    pub selected_moment: String,
    pub image: Option<Dimensions>,
    pub thumbnail: Option<Dimensions>,
}

impl DraftView {
    fn of(id: &str, draft: &DraftCaptureState) -> Self {
        let dimensions = |image: &DynamicImage| Dimensions {
            width: image.width(),
            height: image.height(),
        };
        Self {
            id: id.to_string(),
            list_id: draft.expense_list().map(str::to_string),
            source_image_path: draft.source_image_path().map(str::to_string),
            selected_moment: draft.moment().get().format(MOMENT_FORMAT).to_string(),
            image: draft.image().map(dimensions),
            thumbnail: draft.thumbnail().map(dimensions),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateDraftRequest {
    #[serde(default)]
    pub list_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SourcePathRequest {
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct SetDateRequest {
    pub year: i32,
    /// Zero-based month (0 = January).
    pub month: u32,
    pub day_of_month: u32,
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub amount: f64,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub username: String,
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateDraftRequest>,
) -> AppResult<(StatusCode, Json<DraftView>)> {
    let mut draft = DraftCaptureState::new();
    if let Some(list_id) = body.list_id {
        state.store.expense_list(&list_id)?;
        draft = draft.for_list(list_id);
    }

    let view_draft = DraftView::of("", &draft);
    let id = state.drafts.open(draft)?;
    tracing::debug!("Opened draft {id}");

    Ok((StatusCode::CREATED, Json(DraftView { id, ..view_draft })))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<DraftView>> {
    let draft = state.drafts.get(&id)?;
    let draft = lock(&draft)?;
    Ok(Json(DraftView::of(&id, &draft)))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    state.drafts.close(&id)?;
    tracing::debug!("Abandoned draft {id}");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn put_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> AppResult<Json<DraftView>> {
    let draft = state.drafts.get(&id)?;
    let prepared = prepare_blocking(move || imaging::decode(&body)).await?;

    let mut draft = lock(&draft)?;
    draft.set_prepared(prepared);
    Ok(Json(DraftView::of(&id, &draft)))
}

pub async fn image_from_source(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<DraftView>> {
    let draft = state.drafts.get(&id)?;
    let path = lock(&draft)?
        .source_image_path()
        .map(str::to_string)
        .ok_or_else(|| AppError::BadRequest("Draft has no source image path".into()))?;

    let capture_dir = PathBuf::from(&state.config.capture_dir);
    let prepared = prepare_blocking(move || imaging::load_within(&capture_dir, &path)).await?;

    let mut draft = lock(&draft)?;
    draft.set_prepared(prepared);
    Ok(Json(DraftView::of(&id, &draft)))
}

pub async fn clear_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<DraftView>> {
    let draft = state.drafts.get(&id)?;
    let mut draft = lock(&draft)?;
    draft.clear();
    Ok(Json(DraftView::of(&id, &draft)))
}

pub async fn put_source_path(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SourcePathRequest>,
) -> AppResult<Json<DraftView>> {
    if body.path.trim().is_empty() {
        return Err(AppError::BadRequest("Path is required".into()));
    }

    let draft = state.drafts.get(&id)?;
    let mut draft = lock(&draft)?;
    draft.set_source_image_path(body.path);
    Ok(Json(DraftView::of(&id, &draft)))
}

pub async fn put_date(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SetDateRequest>,
) -> AppResult<Json<DraftView>> {
    let draft = state.drafts.get(&id)?;
    let draft = lock(&draft)?;
    draft
        .moment()
        .set_date_parts(body.year, body.month, body.day_of_month)?;
    Ok(Json(DraftView::of(&id, &draft)))
}

pub async fn submit(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SubmitRequest>,
) -> AppResult<(StatusCode, Json<SubmissionTicket>)> {
    let draft = state.drafts.get(&id)?;
    let ticket = {
        let mut draft = lock(&draft)?;
        state
            .coordinator
            .submit(&mut draft, body.amount, &body.comment, &body.username)?
    };
    state.submissions.mark_pending(&ticket.submission_id);

    Ok((StatusCode::ACCEPTED, Json(ticket)))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use axum::Router;
    use image::{DynamicImage, ImageFormat, RgbImage};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::capture::ExpenseBackend;
    use crate::models::NewUser;
    use crate::routes::test_support::test_state;
    use crate::services::submissions::SubmissionStatus;

    async fn call(app: &Router, method: Method, uri: &str, body: Body, json: bool) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if json {
            request = request.header("content-type", "application/json");
        }
        let response = app
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn call_json(app: &Router, method: Method, uri: &str, body: Value) -> (StatusCode, Value) {
        call(app, method, uri, Body::from(body.to_string()), true).await
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::new(width, height))
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[tokio::test]
    async fn capture_session_round_trip() {
        let (_dir, state) = test_state();
        state
            .store
            .create_or_update_user(NewUser {
                mail: "a@b.com".into(),
                username: None,
                fcm_token: None,
            })
            .unwrap();
        let app = crate::routes::api_routes(1024 * 1024).with_state(state.clone());

        let (status, draft) = call_json(&app, Method::POST, "/api/v1/drafts", json!({})).await;
        assert_eq!(status, StatusCode::CREATED);
        let id = draft["id"].as_str().unwrap().to_string();
        let base = format!("/api/v1/drafts/{id}");

        let (status, view) = call(&app, Method::PUT, &format!("{base}/image"), Body::from(png(1920, 1080)), false).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["image"], json!({"width": 640, "height": 360}));
        assert_eq!(view["thumbnail"], json!({"width": 128, "height": 72}));

        let (status, _) = call(&app, Method::PUT, &format!("{base}/image"), Body::from("garbage"), false).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, view) = call_json(
            &app,
            Method::PUT,
            &format!("{base}/date"),
            json!({"year": 2023, "month": 5, "day_of_month": 10}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(view["selected_moment"].as_str().unwrap().starts_with("2023-06-10T"));
        assert_eq!(view["image"], json!({"width": 640, "height": 360}));

        let (status, body) = call_json(
            &app,
            Method::POST,
            &format!("{base}/submit"),
            json!({"amount": 42.5, "comment": "dinner", "username": ""}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("username"));

        let mut outcomes = state.coordinator.subscribe();
        let (status, ticket) = call_json(
            &app,
            Method::POST,
            &format!("{base}/submit"),
            json!({"amount": 42.5, "comment": "dinner", "username": "a@b.com"}),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let submission_id = ticket["submission_id"].as_str().unwrap().to_string();

        let (_, view) = call(&app, Method::GET, &base, Body::empty(), false).await;
        assert_eq!(view["image"], Value::Null);
        assert_eq!(view["source_image_path"], Value::Null);
        assert!(view["selected_moment"].as_str().unwrap().starts_with("2023-06-10T"));

        let outcome = outcomes.recv().await.unwrap();
        assert_eq!(outcome.submission_id, submission_id);
        state.submissions.record(outcome);

        let (status, body) = call(&app, Method::GET, &format!("/api/v1/submissions/{submission_id}"), Body::empty(), false).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "saved");
        assert!(matches!(
            state.submissions.status(&submission_id),
            Some(SubmissionStatus::Saved { .. })
        ));
    }

    #[tokio::test]
    async fn image_from_recorded_source_path() {
        let (_dir, state) = test_state();
        let photo = PathBuf::from(&state.config.capture_dir).join("JPEG_20230610_120000_.png");
        let app = crate::routes::api_routes(1024 * 1024).with_state(state);
        std::fs::write(&photo, png(300, 200)).unwrap();

        let (_, draft) = call_json(&app, Method::POST, "/api/v1/drafts", json!({})).await;
        let base = format!("/api/v1/drafts/{}", draft["id"].as_str().unwrap());

        let (status, _) = call(&app, Method::POST, &format!("{base}/image/from-source"), Body::empty(), false).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        call_json(&app, Method::PUT, &format!("{base}/source-path"), json!({"path": photo.to_str().unwrap()})).await;
        let (status, view) = call(&app, Method::POST, &format!("{base}/image/from-source"), Body::empty(), false).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["image"], json!({"width": 300, "height": 200}));
        assert_eq!(view["thumbnail"], json!({"width": 128, "height": 85}));

        let (_, view) = call(&app, Method::DELETE, &format!("{base}/image"), Body::empty(), false).await;
        assert_eq!(view["image"], Value::Null);
        assert_eq!(view["source_image_path"], Value::Null);
    }

    #[tokio::test]
    async fn source_outside_capture_dir_is_refused() {
        let (_dir, state) = test_state();
        let app = crate::routes::api_routes(1024 * 1024).with_state(state.clone());

        let elsewhere = tempfile::tempdir().unwrap();
        let private = elsewhere.path().join("private_scan.png");
        std::fs::write(&private, png(50, 40)).unwrap();
        let traversal = PathBuf::from(&state.config.capture_dir).join("../test.db");

        let (_, draft) = call_json(&app, Method::POST, "/api/v1/drafts", json!({})).await;
        let base = format!("/api/v1/drafts/{}", draft["id"].as_str().unwrap());

        for path in [&private, &traversal] {
            call_json(&app, Method::PUT, &format!("{base}/source-path"), json!({"path": path.to_str().unwrap()})).await;
            let (status, _) = call(&app, Method::POST, &format!("{base}/image/from-source"), Body::empty(), false).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
        }

        let (_, view) = call(&app, Method::GET, &base, Body::empty(), false).await;
        assert_eq!(view["image"], Value::Null);
    }

    #[tokio::test]
    async fn lenient_date_and_unknown_draft() {
        let (_dir, state) = test_state();
        let app = crate::routes::api_routes(1024 * 1024).with_state(state);

        let (_, draft) = call_json(&app, Method::POST, "/api/v1/drafts", json!({})).await;
        let base = format!("/api/v1/drafts/{}", draft["id"].as_str().unwrap());

        let (status, view) = call_json(
            &app,
            Method::PUT,
            &format!("{base}/date"),
            json!({"year": 2023, "month": 1, "day_of_month": 30}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(view["selected_moment"].as_str().unwrap().starts_with("2023-03-02T"));

        let (status, _) = call_json(
            &app,
            Method::PUT,
            &format!("{base}/date"),
            json!({"year": i32::MAX, "month": 0, "day_of_month": 1}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&app, Method::DELETE, &base, Body::empty(), false).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = call(&app, Method::GET, &base, Body::empty(), false).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call_json(&app, Method::POST, "/api/v1/drafts", json!({"list_id": "missing"})).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn registry_evicts_least_recently_used_at_capacity() {
        let registry = DraftRegistry::new(Duration::from_secs(3600), 2);
        let first = registry.open(DraftCaptureState::new()).unwrap();
        std::thread::sleep(Duration::from_millis(2));
        let second = registry.open(DraftCaptureState::new()).unwrap();
        std::thread::sleep(Duration::from_millis(2));

        registry.get(&first).unwrap();
        std::thread::sleep(Duration::from_millis(2));
        let third = registry.open(DraftCaptureState::new()).unwrap();

        assert!(registry.get(&first).is_ok());
        assert!(matches!(registry.get(&second), Err(AppError::NotFound(_))));
        assert!(registry.get(&third).is_ok());
        assert_eq!(registry.sessions().unwrap().len(), 2);
    }

    #[test]
    fn idle_drafts_are_dropped() {
        let registry = DraftRegistry::new(Duration::from_millis(20), 100);
        let stale = registry.open(DraftCaptureState::new()).unwrap();
        let other = registry.open(DraftCaptureState::new()).unwrap();
        std::thread::sleep(Duration::from_millis(40));

        assert!(matches!(registry.get(&stale), Err(AppError::NotFound(_))));
        let fresh = registry.open(DraftCaptureState::new()).unwrap();

        let sessions = registry.sessions().unwrap();
        assert_eq!(sessions.len(), 1);
        assert!(sessions.contains_key(&fresh));
        assert!(!sessions.contains_key(&other));
    }
}
