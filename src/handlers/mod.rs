//! HTTP boundary: JSON in, poll snapshots or `{message}` errors out.

mod poll;
mod vote;

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::http::header::{HeaderMap, HeaderValue, RETRY_AFTER};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use log::{error, warn};
use serde::Serialize;

use crate::engine::PollEngine;
use crate::error::PollError;

/// Header carrying the caller's voter identity (anonymous token or display name).
pub const VOTER_HEADER: &str = "x-voter-id";
/// Header carrying the shared admin code for poll creation and deletion.
pub const ADMIN_HEADER: &str = "x-admin-code";

#[derive(Clone)]
pub struct AppState {
    engine: Arc<PollEngine>,
    admin_code: Option<Arc<str>>,
}

impl AppState {
    pub fn new(engine: Arc<PollEngine>, admin_code: Option<String>) -> Self {
        Self {
            engine,
            admin_code: admin_code.map(Arc::from),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/polls", get(poll::list_polls).post(poll::create_poll))
        .route("/api/polls/{id}", get(poll::get_poll).delete(poll::delete_poll))
        .route("/api/polls/{id}/results", get(poll::poll_results))
        .route("/api/polls/{id}/my-vote", get(vote::my_vote))
        .route("/api/polls/{id}/vote", post(vote::cast_vote))
        .route("/api/polls/{id}/clear-vote", post(vote::clear_vote))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Debug)]
pub enum ApiError {
    Poll(PollError),
    BadRequest(String),
    AdminRequired,
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl From<PollError> for ApiError {
    fn from(err: PollError) -> Self {
        ApiError::Poll(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message.clone()),
            ApiError::AdminRequired => (StatusCode::FORBIDDEN, "Only admins can do that.".to_string()),
            ApiError::Poll(err) if err.is_internal() => {
                error!("Request failed: {}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error.".to_string())
            }
            ApiError::Poll(err) => (status_for(err), err.to_string()),
        };

        let mut response = (status, Json(ErrorBody { message })).into_response();
        if matches!(&self, ApiError::Poll(err) if err.is_retryable()) {
            response.headers_mut().insert(RETRY_AFTER, HeaderValue::from_static("1"));
        }
        response
    }
}

fn status_for(err: &PollError) -> StatusCode {
    match err {
        PollError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        PollError::PermissionDenied(_) => StatusCode::FORBIDDEN,
        PollError::NotFound(_) => StatusCode::NOT_FOUND,
        PollError::AlreadyVoted
        | PollError::ConflictingVote
        | PollError::NoActiveVote
        | PollError::StaleVote => StatusCode::CONFLICT,
        PollError::Busy => StatusCode::SERVICE_UNAVAILABLE,
        PollError::Corrupted(_) | PollError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Absent header means "no identity"; the engine decides whether that is acceptable.
fn voter_id(headers: &HeaderMap) -> Result<String, ApiError> {
    match headers.get(VOTER_HEADER) {
        Some(value) => std::str::from_utf8(value.as_bytes())
            .map(str::to_string)
            .map_err(|_| ApiError::BadRequest(format!("{} must be valid UTF-8.", VOTER_HEADER))),
        None => Ok(String::new()),
    }
}

fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = state.admin_code.as_deref() else {
        return Ok(());
    };

    let supplied = headers.get(ADMIN_HEADER).and_then(|v| v.to_str().ok());
    if supplied == Some(expected) {
        Ok(())
    } else {
        warn!("Rejected admin request without a valid admin code");
        Err(ApiError::AdminRequired)
    }
}

fn option_index(raw: i64) -> Result<usize, ApiError> {
    usize::try_from(raw)
        .map_err(|_| ApiError::BadRequest("optionIndex must be a non-negative integer.".to_string()))
}
