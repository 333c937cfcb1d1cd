//! Consistency checks recomputed from stored documents

use crate::error::{AttendanceError, Result};
use crate::store::{DocumentKey, DocumentStore};
use crate::types::{MatchId, ParticipationState, UserId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

/// A single violated invariant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InvariantViolation {
    OverCapacity { admitted: u32, capacity: u32 },
    AdmittedCountMismatch { stored: u32, actual: u32 },
    WaitlistCountMismatch { stored: u32, actual: u32 },
    WaitlistedWithoutEntry { user_id: UserId },
    EntryWithoutWaitlistedRecord { user_id: UserId },
    DuplicateSequence { sequence: u64 },
    SequenceAheadOfCounter { sequence: u64, counter: u64 },
}

/// Snapshot comparison of a match's counters against its records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvariantReport {
    pub match_id: MatchId,
    pub capacity: u32,
    pub admitted_count: u32,
    pub waitlist_count: u32,
    pub admitted_records: u32,
    pub waitlist_entries: u32,
    pub violations: Vec<InvariantViolation>,
}

impl InvariantReport {
    pub fn is_consistent(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Read the match, its participants and its waitlist and cross-check them
///
/// Reads are not transactional, so a report taken while requests are in flight
/// can show transient mismatches. Take it on a quiescent match.
pub async fn check(store: &dyn DocumentStore, match_id: &str) -> Result<InvariantReport> {
    let state = store
        .get(&DocumentKey::match_state(match_id))
        .await?
        .ok_or_else(|| AttendanceError::MatchNotFound {
            match_id: match_id.to_string(),
        })?
        .into_match()?;
    let participants = store.query_participants(match_id, None).await?;
    let entries = store.query_waitlist(match_id, None).await?;

    let mut violations = Vec::new();

    let admitted: BTreeSet<&str> = participants
        .iter()
        .filter(|p| p.state == ParticipationState::Admitted)
        .map(|p| p.user_id.as_str())
        .collect();
    let waitlisted: BTreeSet<&str> = participants
        .iter()
        .filter(|p| p.state == ParticipationState::Waitlisted)
        .map(|p| p.user_id.as_str())
        .collect();
    let queued: BTreeSet<&str> = entries.iter().map(|e| e.user_id.as_str()).collect();

    let admitted_records = admitted.len() as u32;
    let waitlist_entries = entries.len() as u32;

    if state.admitted_count > state.capacity {
        violations.push(InvariantViolation::OverCapacity {
            admitted: state.admitted_count,
            capacity: state.capacity,
        });
    }
    if state.admitted_count != admitted_records {
        violations.push(InvariantViolation::AdmittedCountMismatch {
            stored: state.admitted_count,
            actual: admitted_records,
        });
    }
    if state.waitlist_count != waitlist_entries {
        violations.push(InvariantViolation::WaitlistCountMismatch {
            stored: state.waitlist_count,
            actual: waitlist_entries,
        });
    }

    for user_id in waitlisted.difference(&queued) {
        violations.push(InvariantViolation::WaitlistedWithoutEntry {
            user_id: user_id.to_string(),
        });
    }
    for user_id in queued.difference(&waitlisted) {
        violations.push(InvariantViolation::EntryWithoutWaitlistedRecord {
            user_id: user_id.to_string(),
        });
    }

    let mut seen = HashSet::new();
    for entry in &entries {
        if !seen.insert(entry.sequence) {
            violations.push(InvariantViolation::DuplicateSequence {
                sequence: entry.sequence,
            });
        }
        if entry.sequence > state.waitlist_sequence_counter {
            violations.push(InvariantViolation::SequenceAheadOfCounter {
                sequence: entry.sequence,
                counter: state.waitlist_sequence_counter,
            });
        }
    }

    Ok(InvariantReport {
        match_id: state.match_id,
        capacity: state.capacity,
        admitted_count: state.admitted_count,
        waitlist_count: state.waitlist_count,
        admitted_records,
        waitlist_entries,
        violations,
    })
}
