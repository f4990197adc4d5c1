use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use serde::Deserialize;

use super::{require_admin, ApiError, AppState};
use crate::models::Poll;
use crate::voting::{self, PollResults};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePollRequest {
    pub question: String,
    pub options: Vec<String>,
    #[serde(default = "default_allow_anonymous")]
    pub allow_anonymous: bool,
}

fn default_allow_anonymous() -> bool {
    true
}

pub async fn list_polls(State(state): State<AppState>) -> Result<Json<Vec<Poll>>, ApiError> {
    Ok(Json(state.engine.list_polls().await?))
}

pub async fn create_poll(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<CreatePollRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Poll>), ApiError> {
    require_admin(&state, &headers)?;
    let Json(request) = payload?;

    let poll = state
        .engine
        .create_poll(&request.question, &request.options, request.allow_anonymous)
        .await?;
    Ok((StatusCode::CREATED, Json(poll)))
}

pub async fn get_poll(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Poll>, ApiError> {
    Ok(Json(state.engine.get_poll(&id).await?))
}

pub async fn delete_poll(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    require_admin(&state, &headers)?;
    state.engine.delete_poll(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn poll_results(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PollResults>, ApiError> {
    let poll = state.engine.get_poll(&id).await?;
    Ok(Json(voting::calculate_results(&poll)))
}
