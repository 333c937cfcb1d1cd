//! Transactional document store interface
//!
//! The admission protocol never keeps state in process: every counter and record
//! lives in a [`DocumentStore`] and is only mutated through a [`Transaction`].
//! Transactions are optimistic. Reads register the version they observed and
//! `commit` fails with [`AttendanceError::TransactionConflict`] if any of those
//! documents changed in the meantime.

pub mod clock;
pub mod memory;

pub use clock::{Clock, SystemClock};
pub use memory::InMemoryDocumentStore;

use crate::error::{AttendanceError, Result};
use crate::types::{
    AuditId, AuditRecord, MatchAdmission, MatchId, ParticipantRecord, UserId, WaitlistEntry,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Address of a single document
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DocumentKey {
    Match(MatchId),
    Participant { match_id: MatchId, user_id: UserId },
    Waitlist { match_id: MatchId, user_id: UserId },
    Audit { match_id: MatchId, id: AuditId },
}

impl DocumentKey {
    pub fn match_state(match_id: &str) -> Self {
        DocumentKey::Match(match_id.to_string())
    }

    pub fn participant(match_id: &str, user_id: &str) -> Self {
        DocumentKey::Participant {
            match_id: match_id.to_string(),
            user_id: user_id.to_string(),
        }
    }

    pub fn waitlist(match_id: &str, user_id: &str) -> Self {
        DocumentKey::Waitlist {
            match_id: match_id.to_string(),
            user_id: user_id.to_string(),
        }
    }

    pub fn audit(match_id: &str, id: AuditId) -> Self {
        DocumentKey::Audit {
            match_id: match_id.to_string(),
            id,
        }
    }

    /// Match this document belongs to
    pub fn match_id(&self) -> &str {
        match self {
            DocumentKey::Match(match_id)
            | DocumentKey::Participant { match_id, .. }
            | DocumentKey::Waitlist { match_id, .. }
            | DocumentKey::Audit { match_id, .. } => match_id,
        }
    }
}

impl std::fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocumentKey::Match(match_id) => write!(f, "matches/{}", match_id),
            DocumentKey::Participant { match_id, user_id } => {
                write!(f, "matches/{}/participants/{}", match_id, user_id)
            }
            DocumentKey::Waitlist { match_id, user_id } => {
                write!(f, "matches/{}/waitlist/{}", match_id, user_id)
            }
            DocumentKey::Audit { match_id, id } => write!(f, "matches/{}/audits/{}", match_id, id),
        }
    }
}

/// A stored document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Document {
    Match(MatchAdmission),
    Participant(ParticipantRecord),
    Waitlist(WaitlistEntry),
    Audit(AuditRecord),
}

impl Document {
    pub fn kind(&self) -> &'static str {
        match self {
            Document::Match(_) => "match",
            Document::Participant(_) => "participant",
            Document::Waitlist(_) => "waitlist",
            Document::Audit(_) => "audit",
        }
    }

    pub fn into_match(self) -> Result<MatchAdmission> {
        match self {
            Document::Match(state) => Ok(state),
            other => Err(kind_mismatch("match", &other)),
        }
    }

    pub fn into_participant(self) -> Result<ParticipantRecord> {
        match self {
            Document::Participant(record) => Ok(record),
            other => Err(kind_mismatch("participant", &other)),
        }
    }

    pub fn into_waitlist(self) -> Result<WaitlistEntry> {
        match self {
            Document::Waitlist(entry) => Ok(entry),
            other => Err(kind_mismatch("waitlist", &other)),
        }
    }

    pub fn into_audit(self) -> Result<AuditRecord> {
        match self {
            Document::Audit(record) => Ok(record),
            other => Err(kind_mismatch("audit", &other)),
        }
    }
}

fn kind_mismatch(expected: &str, found: &Document) -> AttendanceError {
    AttendanceError::Store {
        message: format!("expected {} document, found {}", expected, found.kind()),
    }
}

/// A single optimistic transaction
///
/// Writes are buffered until `commit`; reads see the transaction's own writes.
#[async_trait]
pub trait Transaction: Send {
    /// Read a document and register it in the read set
    async fn get(&mut self, key: &DocumentKey) -> Result<Option<Document>>;

    /// Create or replace a document
    fn set(&mut self, key: DocumentKey, document: Document);

    /// Replace a document that must already exist at commit time
    fn update(&mut self, key: DocumentKey, document: Document);

    /// Remove a document (no-op if absent)
    fn delete(&mut self, key: DocumentKey);

    /// Atomically apply all buffered writes
    ///
    /// Fails with `TransactionConflict` if any document read by this transaction
    /// was modified by another commit after it was read.
    async fn commit(&mut self) -> Result<()>;
}

/// Storage backend consumed by the admission protocol
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Start a new transaction
    async fn begin(&self) -> Result<Box<dyn Transaction>>;

    /// Non-transactional point read
    async fn get(&self, key: &DocumentKey) -> Result<Option<Document>>;

    /// Waitlist entries of a match ordered by sequence ascending, ties by user id
    async fn query_waitlist(&self, match_id: &str, limit: Option<usize>)
        -> Result<Vec<WaitlistEntry>>;

    /// Participant records of a match ordered by user id
    async fn query_participants(
        &self,
        match_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<ParticipantRecord>>;

    /// Audit records of a match ordered by timestamp ascending
    async fn query_audit(&self, match_id: &str, limit: Option<usize>) -> Result<Vec<AuditRecord>>;

    /// Matches that currently have at least one waitlist entry
    async fn query_matches_with_waitlist(&self) -> Result<Vec<MatchId>>;

    /// Cheap reachability check for health endpoints
    async fn ping(&self) -> Result<()>;

    /// Server-assigned monotonic timestamp
    fn server_timestamp(&self) -> DateTime<Utc>;
}
