//! Utility functions for the attendance service

use crate::error::{AttendanceError, Result};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Generate a new unique audit record ID
pub fn generate_audit_id() -> Uuid {
    Uuid::new_v4()
}

/// Generate a new correlation ID for published events
pub fn generate_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Reject empty or whitespace-only identifiers
pub fn require_id(kind: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(AttendanceError::InvalidArgument {
            reason: format!("{} must not be empty", kind),
        });
    }
    Ok(())
}
