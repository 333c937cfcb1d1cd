//! Participant registry: one membership record per (match, user)

use crate::error::Result;
use crate::store::{Document, DocumentKey, Transaction};
use crate::types::{ParticipantRecord, ParticipationState};
use chrono::{DateTime, Utc};

/// Read the caller's record inside `txn`; `None` means DECLINED by default
pub async fn load(
    txn: &mut dyn Transaction,
    match_id: &str,
    user_id: &str,
) -> Result<Option<ParticipantRecord>> {
    txn.get(&DocumentKey::participant(match_id, user_id))
        .await?
        .map(Document::into_participant)
        .transpose()
}

/// Buffer a state change for a participant
///
/// Creates the record on first write and updates it afterwards, keeping
/// `created_at` stable and remembering the state it came from.
pub fn write_state(
    txn: &mut dyn Transaction,
    existing: Option<&ParticipantRecord>,
    match_id: &str,
    user_id: &str,
    state: ParticipationState,
    now: DateTime<Utc>,
) -> ParticipantRecord {
    let key = DocumentKey::participant(match_id, user_id);

    match existing {
        Some(current) => {
            let record = ParticipantRecord {
                state,
                previous_state: Some(current.state),
                updated_at: now,
                ..current.clone()
            };
            txn.update(key, Document::Participant(record.clone()));
            record
        }
        None => {
            let record = ParticipantRecord {
                match_id: match_id.to_string(),
                user_id: user_id.to_string(),
                state,
                previous_state: None,
                created_at: now,
                updated_at: now,
            };
            txn.set(key, Document::Participant(record.clone()));
            record
        }
    }
}
