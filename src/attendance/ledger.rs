//! Admission ledger: per-match capacity accounting
//!
//! The ledger is the single point of mutual exclusion per match. Every transition
//! reads it inside its transaction, so concurrent writers touching the same match
//! conflict at commit and the store serializes them.

use crate::error::{AttendanceError, Result};
use crate::store::{Document, DocumentKey, Transaction};
use crate::types::MatchAdmission;
use chrono::{DateTime, Utc};

/// Audit scope id used when a match has no owning team
pub const UNKNOWN_SCOPE: &str = "unknown";

impl MatchAdmission {
    /// Fresh admission state for a newly scheduled match
    pub fn new(
        match_id: &str,
        capacity: u32,
        waitlist_enabled: bool,
        team_id: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            match_id: match_id.to_string(),
            team_id,
            capacity,
            waitlist_enabled,
            admitted_count: 0,
            waitlist_count: 0,
            waitlist_sequence_counter: 0,
            created_at,
        }
    }

    pub fn has_free_slot(&self) -> bool {
        self.admitted_count < self.capacity
    }

    pub fn free_slots(&self) -> u32 {
        self.capacity.saturating_sub(self.admitted_count)
    }

    /// Take one admitted slot
    pub fn admit(&mut self) {
        self.admitted_count += 1;
    }

    /// Give back one admitted slot
    pub fn release(&mut self) {
        self.admitted_count = self.admitted_count.saturating_sub(1);
    }

    /// Account for a newly queued waitlist entry
    pub fn enqueue(&mut self) {
        self.waitlist_count += 1;
    }

    /// Account for a removed waitlist entry
    pub fn dequeue(&mut self) {
        self.waitlist_count = self.waitlist_count.saturating_sub(1);
    }

    /// Scope id recorded on audit entries
    pub fn scope_id(&self) -> &str {
        self.team_id.as_deref().unwrap_or(UNKNOWN_SCOPE)
    }
}

/// Read the admission state of `match_id` inside `txn`
pub async fn load(txn: &mut dyn Transaction, match_id: &str) -> Result<MatchAdmission> {
    match txn.get(&DocumentKey::match_state(match_id)).await? {
        Some(document) => document.into_match(),
        None => Err(AttendanceError::MatchNotFound {
            match_id: match_id.to_string(),
        }),
    }
}

/// Buffer the updated admission state in `txn`
pub fn stage(txn: &mut dyn Transaction, state: &MatchAdmission) {
    txn.update(
        DocumentKey::match_state(&state.match_id),
        Document::Match(state.clone()),
    );
}
