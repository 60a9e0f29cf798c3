use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use crate::error::AppResult;
use crate::models::{Expense, ExpenseList};
use crate::routes::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateListRequest {
    pub name: String,
    pub owner_mail: String,
    pub invite_mail: String,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub mail: String,
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateListRequest>,
) -> AppResult<(StatusCode, Json<ExpenseList>)> {
    let list = state
        .store
        .create_expense_list(&body.name, &body.owner_mail, &body.invite_mail)?;
    Ok((StatusCode::CREATED, Json(list)))
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Vec<ExpenseList>>> {
    Ok(Json(state.store.expense_lists_for(&query.mail)?))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<ExpenseList>> {
    Ok(Json(state.store.expense_list(&id)?))
}

pub async fn expenses(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Vec<Expense>>> {
    Ok(Json(state.store.expenses_in(&id)?))
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use axum::Router;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::capture::ExpenseBackend;
    use crate::models::NewUser;
    use crate::routes::test_support::test_state;

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        };
        let response = app.clone().oneshot(request.unwrap()).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn shared_list_lifecycle() {
        let (_dir, state) = test_state();
        for mail in ["a@b.com", "c@d.com"] {
            state
                .store
                .create_or_update_user(NewUser {
                    mail: mail.into(),
                    username: None,
                    fcm_token: None,
                })
                .unwrap();
        }
        let app = crate::routes::api_routes(1024).with_state(state);

        let (status, list) = send(
            &app,
            Method::POST,
            "/api/v1/lists",
            Some(json!({"name": "Flat", "owner_mail": "a@b.com", "invite_mail": "c@d.com"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(list["sharers"], json!(["a@b.com", "c@d.com"]));
        let id = list["id"].as_str().unwrap().to_string();

        let (status, lists) = send(&app, Method::GET, "/api/v1/lists?mail=c@d.com", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(lists.as_array().unwrap().len(), 1);

        let (status, fetched) = send(&app, Method::GET, &format!("/api/v1/lists/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["sharer_info"]["a@b.com"]["num_expenses"], 0);

        let (status, expenses) = send(&app, Method::GET, &format!("/api/v1/lists/{id}/expenses"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(expenses, json!([]));

        let (status, _) = send(&app, Method::GET, "/api/v1/lists/missing/expenses", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(
            &app,
            Method::POST,
            "/api/v1/lists",
            Some(json!({"name": "Solo", "owner_mail": "a@b.com", "invite_mail": "A@b.com"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
