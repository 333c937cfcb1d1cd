//! Common types used throughout the attendance service

use crate::error::AttendanceError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for matches
pub type MatchId = String;

/// Unique identifier for users
pub type UserId = String;

/// Unique identifier for audit records
pub type AuditId = Uuid;

/// Actor recorded on audit entries written by the service itself
pub const SYSTEM_ACTOR: &str = "system";

/// A participant's membership state for one match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipationState {
    #[serde(alias = "GOING")]
    Admitted,
    #[serde(alias = "WAITLIST")]
    Waitlisted,
    #[default]
    #[serde(alias = "NOT_GOING")]
    Declined,
    #[serde(alias = "MAYBE")]
    Tentative,
}

impl ParticipationState {
    /// Whether this state occupies one of the match's admitted slots
    pub fn holds_slot(self) -> bool {
        self == ParticipationState::Admitted
    }

    /// Whether this state is backed by a waitlist entry
    pub fn is_waitlisted(self) -> bool {
        self == ParticipationState::Waitlisted
    }

    /// DECLINED and TENTATIVE both leave the admitted set and the waitlist
    pub fn is_withdrawal(self) -> bool {
        matches!(
            self,
            ParticipationState::Declined | ParticipationState::Tentative
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ParticipationState::Admitted => "ADMITTED",
            ParticipationState::Waitlisted => "WAITLISTED",
            ParticipationState::Declined => "DECLINED",
            ParticipationState::Tentative => "TENTATIVE",
        }
    }
}

impl std::fmt::Display for ParticipationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ParticipationState {
    type Err = AttendanceError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "ADMITTED" | "GOING" => Ok(ParticipationState::Admitted),
            "WAITLISTED" | "WAITLIST" => Ok(ParticipationState::Waitlisted),
            "DECLINED" | "NOT_GOING" => Ok(ParticipationState::Declined),
            "TENTATIVE" | "MAYBE" => Ok(ParticipationState::Tentative),
            _ => Err(AttendanceError::InvalidState {
                value: value.to_string(),
            }),
        }
    }
}

/// Per-match aggregate admission state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchAdmission {
    pub match_id: MatchId,
    pub team_id: Option<String>,
    pub capacity: u32,
    pub waitlist_enabled: bool,
    pub admitted_count: u32,
    pub waitlist_count: u32,
    pub waitlist_sequence_counter: u64,
    pub created_at: DateTime<Utc>,
}

/// Membership record for one (match, user) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantRecord {
    pub match_id: MatchId,
    pub user_id: UserId,
    pub state: ParticipationState,
    pub previous_state: Option<ParticipationState>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Queued request for admission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitlistEntry {
    pub match_id: MatchId,
    pub user_id: UserId,
    /// Assigned once from the match's sequence counter
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
}

/// Kind of transition recorded in the audit log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Rsvp,
    WaitlistAutopromote,
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuditAction::Rsvp => write!(f, "RSVP"),
            AuditAction::WaitlistAutopromote => write!(f, "WAITLIST_AUTOPROMOTE"),
        }
    }
}

/// Object an audit record refers to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditTarget {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
}

/// Action-specific audit payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditMeta {
    Rsvp {
        desired_state: ParticipationState,
        previous_state: ParticipationState,
        resulting_state: ParticipationState,
    },
    WaitlistAutopromote {
        promoted_user_id: UserId,
        from: ParticipationState,
    },
}

/// Append-only log entry describing one transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: AuditId,
    pub at: DateTime<Utc>,
    pub actor_id: String,
    pub action: AuditAction,
    pub scope: String,
    pub scope_id: String,
    pub target: AuditTarget,
    pub meta: AuditMeta,
}

impl AuditRecord {
    /// Whether this record describes a transition of the given user
    pub fn concerns_user(&self, user_id: &str) -> bool {
        match &self.meta {
            AuditMeta::Rsvp { .. } => self.actor_id == user_id,
            AuditMeta::WaitlistAutopromote {
                promoted_user_id, ..
            } => promoted_user_id == user_id,
        }
    }
}

/// Result of a `request_state` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RsvpOutcome {
    pub match_id: MatchId,
    pub user_id: UserId,
    /// The caller ended in the state it asked for
    pub accepted: bool,
    pub desired_state: ParticipationState,
    pub previous_state: ParticipationState,
    pub state: ParticipationState,
    pub waitlist_sequence: Option<u64>,
    pub auto_promoted: bool,
    /// Promotion triggered by the slot this request freed, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promotion: Option<PromotionOutcome>,
}

impl RsvpOutcome {
    /// Whether the transition changed anything the caller can observe
    pub fn changed(&self) -> bool {
        self.previous_state != self.state
    }
}

/// Why a promotion attempt ended the way it did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionResult {
    /// The waitlist was empty
    NoCandidate,
    /// A concurrent admission filled the freed slot
    CapacityFull,
    /// Waitlisting was switched off after entries were queued
    WaitlistDisabled,
    /// The candidate's entry was already consumed by another promotion
    AlreadyConsumed,
    /// The candidate was already admitted; only the stale entry was removed
    StaleEntryCleared,
    /// The candidate moved from the waitlist into the admitted set
    Promoted,
}

impl PromotionResult {
    pub fn as_str(self) -> &'static str {
        match self {
            PromotionResult::NoCandidate => "no_candidate",
            PromotionResult::CapacityFull => "capacity_full",
            PromotionResult::WaitlistDisabled => "waitlist_disabled",
            PromotionResult::AlreadyConsumed => "already_consumed",
            PromotionResult::StaleEntryCleared => "stale_entry_cleared",
            PromotionResult::Promoted => "promoted",
        }
    }
}

/// Result of a `promote_next` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionOutcome {
    pub match_id: MatchId,
    pub user_id: Option<UserId>,
    pub sequence: Option<u64>,
    pub result: PromotionResult,
}

impl PromotionOutcome {
    pub fn none(match_id: &str, result: PromotionResult) -> Self {
        Self {
            match_id: match_id.to_string(),
            user_id: None,
            sequence: None,
            result,
        }
    }

    /// Whether the candidate's promotion is satisfied
    pub fn promoted(&self) -> bool {
        matches!(
            self.result,
            PromotionResult::Promoted
                | PromotionResult::AlreadyConsumed
                | PromotionResult::StaleEntryCleared
        )
    }
}

/// Event emitted when a participant's state changes through an RSVP
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantStateChanged {
    pub match_id: MatchId,
    pub user_id: UserId,
    pub previous_state: ParticipationState,
    pub state: ParticipationState,
    pub waitlist_sequence: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

/// Event emitted when a waitlisted participant is promoted into the match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitlistPromoted {
    pub match_id: MatchId,
    pub user_id: UserId,
    pub sequence: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

/// Union type for all published attendance messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AttendanceMessage {
    ParticipantStateChanged(ParticipantStateChanged),
    WaitlistPromoted(WaitlistPromoted),
}
