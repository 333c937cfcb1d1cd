//! Waitlist queue: pending entrants of a match ordered by sequence

use crate::error::Result;
use crate::store::{Document, DocumentKey, DocumentStore, Transaction};
use crate::types::{UserId, WaitlistEntry};
use std::sync::Arc;
use tracing::debug;

/// Read the caller's waitlist entry inside `txn`
pub async fn load_entry(
    txn: &mut dyn Transaction,
    match_id: &str,
    user_id: &str,
) -> Result<Option<WaitlistEntry>> {
    txn.get(&DocumentKey::waitlist(match_id, user_id))
        .await?
        .map(Document::into_waitlist)
        .transpose()
}

/// Buffer a new waitlist entry
pub fn insert(txn: &mut dyn Transaction, entry: WaitlistEntry) {
    txn.set(
        DocumentKey::waitlist(&entry.match_id, &entry.user_id),
        Document::Waitlist(entry),
    );
}

/// Buffer removal of a waitlist entry
pub fn remove(txn: &mut dyn Transaction, match_id: &str, user_id: &str) {
    txn.delete(DocumentKey::waitlist(match_id, user_id));
}

/// Read side of the waitlist, used outside transactions
#[derive(Clone)]
pub struct WaitlistQueue {
    store: Arc<dyn DocumentStore>,
}

impl WaitlistQueue {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Entry with the lowest sequence (ties broken by user id)
    pub async fn next_candidate(&self, match_id: &str) -> Result<Option<WaitlistEntry>> {
        let mut entries = self.store.query_waitlist(match_id, Some(1)).await?;
        let candidate = entries.pop();

        if let Some(entry) = &candidate {
            debug!(
                "Next waitlist candidate for match {}: '{}' (sequence {})",
                match_id, entry.user_id, entry.sequence
            );
        }

        Ok(candidate)
    }

    /// All live entries in promotion order
    pub async fn entries(&self, match_id: &str) -> Result<Vec<WaitlistEntry>> {
        self.store.query_waitlist(match_id, None).await
    }

    /// User ids in promotion order
    pub async fn list(&self, match_id: &str) -> Result<Vec<UserId>> {
        Ok(self
            .entries(match_id)
            .await?
            .into_iter()
            .map(|entry| entry.user_id)
            .collect())
    }
}
