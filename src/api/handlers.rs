use axum::{
    Json,
    extract::{Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
};
use log::warn;
use serde::Deserialize;
use std::sync::Arc;

use super::{ADMIN_TOKEN_HEADER, AppState, USER_ID_HEADER};
use crate::error::VoteError;
use crate::models::{Ballot, BatchEntry, Requester};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CastVoteBody {
    pub option_ids: Vec<String>,
    pub voter_fingerprint: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MyVotesQuery {
    pub fingerprint: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveVotesQuery {
    #[serde(default)]
    pub delete_all: bool,
    pub fingerprint: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BatchBody {
    pub entries: Vec<BatchEntry>,
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn requester(headers: &HeaderMap, fingerprint: Option<String>) -> Result<Requester, VoteError> {
    Requester::new(header_value(headers, USER_ID_HEADER), fingerprint)
}

pub async fn cast_vote(
    State(state): State<Arc<AppState>>,
    Path(poll_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<CastVoteBody>,
) -> Result<impl IntoResponse, VoteError> {
    let requester = requester(&headers, body.voter_fingerprint)?;
    let ballot = Ballot::new(body.option_ids)?;

    let response = state
        .coordinator
        .cast_vote(&poll_id, &requester, &ballot)
        .await?;
    Ok(Json(response))
}

pub async fn my_votes(
    State(state): State<Arc<AppState>>,
    Path(poll_id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<MyVotesQuery>,
) -> Result<impl IntoResponse, VoteError> {
    let requester = requester(&headers, query.fingerprint)?;
    let response = state.coordinator.my_votes(&poll_id, &requester).await?;
    Ok(Json(response))
}

pub async fn remove_votes(
    State(state): State<Arc<AppState>>,
    Path(poll_id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<RemoveVotesQuery>,
) -> Result<impl IntoResponse, VoteError> {
    let requester = requester(&headers, query.fingerprint)?;
    let response = state
        .coordinator
        .remove_votes(&poll_id, &requester, query.delete_all)
        .await?;
    Ok(Json(response))
}

pub async fn results(
    State(state): State<Arc<AppState>>,
    Path(poll_id): Path<String>,
) -> Result<impl IntoResponse, VoteError> {
    let results = state.coordinator.results(&poll_id).await?;
    Ok(Json(results))
}

// Bulk import skips the single-vote rule, so it is only open to holders of
// the configured admin token.
pub async fn batch_cast(
    State(state): State<Arc<AppState>>,
    Path(poll_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<BatchBody>,
) -> Result<impl IntoResponse, VoteError> {
    let Some(expected) = state.admin_token.as_deref() else {
        return Err(VoteError::AccessDenied("Bulk import is disabled".into()));
    };

    if header_value(&headers, ADMIN_TOKEN_HEADER).as_deref() != Some(expected) {
        warn!("Rejected bulk import for poll {} with a bad admin token", poll_id);
        return Err(VoteError::AccessDenied("Bulk import requires an admin token".into()));
    }

    let report = state.batch.accept(&poll_id, &body.entries).await;
    Ok(Json(report))
}
