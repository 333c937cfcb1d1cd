//! HTTP API for the attendance protocol
//!
//! Thin JSON layer over [`AttendanceManager`]. Protocol errors are mapped to
//! status codes here and nowhere else.

pub mod handlers;

use crate::attendance::AttendanceManager;
use crate::error::AttendanceError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;

/// Build the attendance routes
pub fn router(manager: Arc<AttendanceManager>) -> Router {
    Router::new()
        .route("/matches", post(handlers::schedule_match))
        .route("/matches/{match_id}", get(handlers::get_match))
        .route("/matches/{match_id}/rsvp", post(handlers::request_state))
        .route("/matches/{match_id}/promote", post(handlers::promote_next))
        .route(
            "/matches/{match_id}/participants",
            get(handlers::list_participants),
        )
        .route(
            "/matches/{match_id}/participants/{user_id}",
            get(handlers::get_participant),
        )
        .route(
            "/matches/{match_id}/participants/{user_id}/history",
            get(handlers::participant_history),
        )
        .route("/matches/{match_id}/waitlist", get(handlers::list_waitlist))
        .route("/matches/{match_id}/audit", get(handlers::list_audit))
        .route(
            "/matches/{match_id}/invariants",
            get(handlers::check_invariants),
        )
        .with_state(manager)
}

/// Error body returned by every attendance route
#[derive(Debug)]
pub struct ApiError(pub AttendanceError);

impl From<AttendanceError> for ApiError {
    fn from(error: AttendanceError) -> Self {
        Self(error)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            AttendanceError::MatchNotFound { .. } => StatusCode::NOT_FOUND,
            AttendanceError::InvalidState { .. } | AttendanceError::InvalidArgument { .. } => {
                StatusCode::BAD_REQUEST
            }
            AttendanceError::MatchAlreadyExists { .. }
            | AttendanceError::TransactionConflict { .. } => StatusCode::CONFLICT,
            AttendanceError::WaitlistDisabled { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AttendanceError::Store { .. } => StatusCode::SERVICE_UNAVAILABLE,
            AttendanceError::EventPublish { .. }
            | AttendanceError::Configuration { .. }
            | AttendanceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = json!({
            "error": self.0.code(),
            "message": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}
