//! Error types for the attendance service
//!
//! Library code returns [`Result`] with an [`AttendanceError`]; the service and
//! bootstrap layers wrap these in `anyhow` the same way the rest of the binary does.

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AttendanceError>;

/// Errors surfaced by the admission protocol and its collaborators
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttendanceError {
    #[error("Match not found: {match_id}")]
    MatchNotFound { match_id: String },

    #[error("Match already exists: {match_id}")]
    MatchAlreadyExists { match_id: String },

    #[error("Waitlist is disabled for match {match_id}")]
    WaitlistDisabled { match_id: String },

    #[error("Invalid participation state: {value}")]
    InvalidState { value: String },

    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    #[error("Transaction conflict during {operation}")]
    TransactionConflict { operation: String },

    #[error("Document store error: {message}")]
    Store { message: String },

    #[error("Event publishing failed: {message}")]
    EventPublish { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Internal service error: {message}")]
    Internal { message: String },
}

impl AttendanceError {
    /// Whether repeating the same call may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, AttendanceError::TransactionConflict { .. })
    }

    /// Whether the caller sent a request that can never succeed as-is
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            AttendanceError::MatchNotFound { .. }
                | AttendanceError::MatchAlreadyExists { .. }
                | AttendanceError::WaitlistDisabled { .. }
                | AttendanceError::InvalidState { .. }
                | AttendanceError::InvalidArgument { .. }
        )
    }

    /// Stable machine-readable code used in API responses and metric labels
    pub fn code(&self) -> &'static str {
        match self {
            AttendanceError::MatchNotFound { .. } => "match_not_found",
            AttendanceError::MatchAlreadyExists { .. } => "match_already_exists",
            AttendanceError::WaitlistDisabled { .. } => "waitlist_disabled",
            AttendanceError::InvalidState { .. } => "invalid_state",
            AttendanceError::InvalidArgument { .. } => "invalid_argument",
            AttendanceError::TransactionConflict { .. } => "transaction_conflict",
            AttendanceError::Store { .. } => "store_error",
            AttendanceError::EventPublish { .. } => "event_publish_failed",
            AttendanceError::Configuration { .. } => "configuration_error",
            AttendanceError::Internal { .. } => "internal_error",
        }
    }
}
