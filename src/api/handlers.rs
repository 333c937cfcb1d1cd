//! Route handlers

use crate::api::ApiError;
use crate::attendance::{AttendanceManager, InvariantReport, ScheduleMatch};
use crate::types::{
    AuditRecord, MatchAdmission, ParticipantRecord, ParticipationState, PromotionOutcome,
    RsvpOutcome, UserId,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

type Manager = State<Arc<AttendanceManager>>;
type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Deserialize)]
pub struct RsvpRequest {
    pub user_id: String,
    /// Parsed leniently so legacy names and bad values map to `invalid_state`
    pub state: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct PromoteResponse {
    pub promoted: bool,
    #[serde(flatten)]
    pub outcome: PromotionOutcome,
}

#[derive(Debug, Serialize)]
pub struct ParticipantResponse {
    pub match_id: String,
    pub user_id: String,
    /// DECLINED when the user never responded
    pub state: ParticipationState,
    pub record: Option<ParticipantRecord>,
}

#[derive(Debug, Serialize)]
pub struct WaitlistResponse {
    pub match_id: String,
    pub user_ids: Vec<UserId>,
}

pub async fn schedule_match(
    State(manager): Manager,
    Json(request): Json<ScheduleMatch>,
) -> ApiResult<(StatusCode, Json<MatchAdmission>)> {
    let state = manager.schedule_match(request).await?;
    Ok((StatusCode::CREATED, Json(state)))
}

pub async fn get_match(
    State(manager): Manager,
    Path(match_id): Path<String>,
) -> ApiResult<Json<MatchAdmission>> {
    Ok(Json(manager.get_match(&match_id).await?))
}

pub async fn request_state(
    State(manager): Manager,
    Path(match_id): Path<String>,
    Json(request): Json<RsvpRequest>,
) -> ApiResult<Json<RsvpOutcome>> {
    let desired: ParticipationState = request.state.parse()?;
    debug!(
        "RSVP request: match {} user '{}' -> {}",
        match_id, request.user_id, desired
    );

    let outcome = manager
        .request_state(&match_id, &request.user_id, desired)
        .await?;
    Ok(Json(outcome))
}

pub async fn promote_next(
    State(manager): Manager,
    Path(match_id): Path<String>,
) -> ApiResult<Json<PromoteResponse>> {
    let outcome = manager.promote_next(&match_id).await?;
    Ok(Json(PromoteResponse {
        promoted: outcome.promoted(),
        outcome,
    }))
}

pub async fn list_participants(
    State(manager): Manager,
    Path(match_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<ParticipantRecord>>> {
    Ok(Json(
        manager.list_participants(&match_id, query.limit).await?,
    ))
}

pub async fn get_participant(
    State(manager): Manager,
    Path((match_id, user_id)): Path<(String, String)>,
) -> ApiResult<Json<ParticipantResponse>> {
    let record = manager.get_participant(&match_id, &user_id).await?;
    Ok(Json(ParticipantResponse {
        state: record.as_ref().map(|r| r.state).unwrap_or_default(),
        match_id,
        user_id,
        record,
    }))
}

pub async fn participant_history(
    State(manager): Manager,
    Path((match_id, user_id)): Path<(String, String)>,
) -> ApiResult<Json<Vec<AuditRecord>>> {
    Ok(Json(manager.participant_history(&match_id, &user_id).await?))
}

pub async fn list_waitlist(
    State(manager): Manager,
    Path(match_id): Path<String>,
) -> ApiResult<Json<WaitlistResponse>> {
    // Unknown matches report 404 rather than an empty queue.
    manager.get_match(&match_id).await?;
    let user_ids = manager.list_waitlist(&match_id).await?;
    Ok(Json(WaitlistResponse { match_id, user_ids }))
}

pub async fn list_audit(
    State(manager): Manager,
    Path(match_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<AuditRecord>>> {
    Ok(Json(manager.list_audit(&match_id, query.limit).await?))
}

pub async fn check_invariants(
    State(manager): Manager,
    Path(match_id): Path<String>,
) -> ApiResult<Json<InvariantReport>> {
    Ok(Json(manager.check_invariants(&match_id).await?))
}
