//! AMQP message definitions and serialization

use crate::error::{AttendanceError, Result};
use crate::types::*;
use crate::utils::{current_timestamp, generate_correlation_id};

/// Default topic exchange for attendance events
pub const ATTENDANCE_EVENTS_EXCHANGE: &str = "attendance.events";

/// Routing keys for events
pub const STATE_CHANGED_ROUTING_KEY: &str = "attendance.state_changed";
pub const WAITLIST_PROMOTED_ROUTING_KEY: &str = "attendance.waitlist_promoted";

/// Message envelope with metadata
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MessageEnvelope {
    pub payload: AttendanceMessage,
    pub correlation_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub routing_key: String,
}

impl MessageEnvelope {
    /// Wrap a message, routed by its type
    pub fn new(payload: AttendanceMessage) -> Self {
        Self {
            routing_key: routing_key(&payload).to_string(),
            payload,
            correlation_id: generate_correlation_id(),
            timestamp: current_timestamp(),
        }
    }

    /// Serialize the envelope to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| AttendanceError::Internal {
            message: format!("Failed to serialize message: {}", e),
        })
    }
}

/// Routing key for a message type
pub fn routing_key(message: &AttendanceMessage) -> &'static str {
    match message {
        AttendanceMessage::ParticipantStateChanged(_) => STATE_CHANGED_ROUTING_KEY,
        AttendanceMessage::WaitlistPromoted(_) => WAITLIST_PROMOTED_ROUTING_KEY,
    }
}
