use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Json;
use log::info;
use serde::{Deserialize, Serialize};

use super::{option_index, voter_id, ApiError, AppState};
use crate::models::Poll;

/// Body of both vote and clear-vote. For clear-vote it is the option the caller last saw selected.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub option_index: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MyVoteResponse {
    pub option_index: Option<usize>,
}

pub async fn cast_vote(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    payload: Result<Json<VoteRequest>, JsonRejection>,
) -> Result<Json<Poll>, ApiError> {
    let voter = voter_id(&headers)?;
    let Json(request) = payload?;
    let index = option_index(request.option_index)?;

    info!("Processing vote on poll {} for option {}", id, index);
    Ok(Json(state.engine.vote(&id, &voter, index).await?))
}

pub async fn clear_vote(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    payload: Result<Json<VoteRequest>, JsonRejection>,
) -> Result<Json<Poll>, ApiError> {
    let voter = voter_id(&headers)?;
    let Json(request) = payload?;
    let index = option_index(request.option_index)?;

    info!("Processing clear-vote on poll {} for option {}", id, index);
    Ok(Json(state.engine.clear_vote(&id, &voter, index).await?))
}

pub async fn my_vote(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<MyVoteResponse>, ApiError> {
    let voter = voter_id(&headers)?;
    let option_index = state.engine.current_vote(&id, &voter).await?;
    Ok(Json(MyVoteResponse { option_index }))
}
