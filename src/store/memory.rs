//! In-memory document store with optimistic concurrency control
//!
//! Every committed write stamps the document with a fresh version. A transaction
//! remembers the version of each document it read (0 for absent documents) and
//! commit re-checks those versions under the write lock before applying anything.

use crate::error::{AttendanceError, Result};
use crate::store::{Clock, Document, DocumentKey, DocumentStore, SystemClock, Transaction};
use crate::types::{AuditRecord, MatchId, ParticipantRecord, WaitlistEntry};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone)]
struct VersionedDocument {
    version: u64,
    document: Document,
}

#[derive(Debug, Default)]
struct StoreState {
    documents: BTreeMap<DocumentKey, VersionedDocument>,
    last_version: u64,
}

impl StoreState {
    fn version_of(&self, key: &DocumentKey) -> u64 {
        self.documents.get(key).map(|v| v.version).unwrap_or(0)
    }
}

/// Non-persistent store used by tests, benchmarks and single-node deployments
#[derive(Debug, Clone)]
pub struct InMemoryDocumentStore {
    state: Arc<RwLock<StoreState>>,
    clock: Arc<dyn Clock>,
    injected_conflicts: Arc<AtomicUsize>,
    commits: Arc<AtomicU64>,
    conflicts: Arc<AtomicU64>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(RwLock::new(StoreState::default())),
            clock,
            injected_conflicts: Arc::new(AtomicUsize::new(0)),
            commits: Arc::new(AtomicU64::new(0)),
            conflicts: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Make the next `count` commits fail with a conflict (for testing)
    pub fn inject_conflicts(&self, count: usize) {
        self.injected_conflicts.fetch_add(count, Ordering::SeqCst);
    }

    /// Write a document directly, bypassing transactions (for seeding and testing)
    pub async fn put(&self, key: DocumentKey, document: Document) {
        let mut state = self.state.write().await;
        state.last_version += 1;
        let version = state.last_version;
        state
            .documents
            .insert(key, VersionedDocument { version, document });
    }

    /// Remove a document directly, bypassing transactions (for testing)
    pub async fn remove(&self, key: &DocumentKey) -> bool {
        self.state.write().await.documents.remove(key).is_some()
    }

    /// Number of successful commits so far
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    /// Number of commits rejected because of a conflict
    pub fn conflict_count(&self) -> u64 {
        self.conflicts.load(Ordering::Relaxed)
    }

    /// Total number of stored documents
    pub async fn document_count(&self) -> usize {
        self.state.read().await.documents.len()
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        Ok(Box::new(InMemoryTransaction {
            state: self.state.clone(),
            injected_conflicts: self.injected_conflicts.clone(),
            commits: self.commits.clone(),
            conflicts: self.conflicts.clone(),
            read_set: HashMap::new(),
            writes: BTreeMap::new(),
            finished: false,
        }))
    }

    async fn get(&self, key: &DocumentKey) -> Result<Option<Document>> {
        let state = self.state.read().await;
        Ok(state.documents.get(key).map(|v| v.document.clone()))
    }

    async fn query_waitlist(
        &self,
        match_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<WaitlistEntry>> {
        let state = self.state.read().await;
        let start = DocumentKey::waitlist(match_id, "");

        let mut entries = Vec::new();
        for (key, stored) in state.documents.range(start..) {
            match key {
                DocumentKey::Waitlist { match_id: m, .. } if m == match_id => {
                    entries.push(stored.document.clone().into_waitlist()?);
                }
                _ => break,
            }
        }

        entries.sort_by(|a, b| {
            a.sequence
                .cmp(&b.sequence)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        if let Some(limit) = limit {
            entries.truncate(limit);
        }

        Ok(entries)
    }

    async fn query_participants(
        &self,
        match_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<ParticipantRecord>> {
        let state = self.state.read().await;
        let start = DocumentKey::participant(match_id, "");

        let mut records = Vec::new();
        for (key, stored) in state.documents.range(start..) {
            if let Some(limit) = limit {
                if records.len() >= limit {
                    break;
                }
            }
            match key {
                DocumentKey::Participant { match_id: m, .. } if m == match_id => {
                    records.push(stored.document.clone().into_participant()?);
                }
                _ => break,
            }
        }

        Ok(records)
    }

    async fn query_audit(&self, match_id: &str, limit: Option<usize>) -> Result<Vec<AuditRecord>> {
        let state = self.state.read().await;

        let mut records = Vec::new();
        for (key, stored) in state.documents.iter() {
            if let DocumentKey::Audit { match_id: m, .. } = key {
                if m == match_id {
                    records.push(stored.document.clone().into_audit()?);
                }
            }
        }

        records.sort_by(|a, b| a.at.cmp(&b.at).then_with(|| a.id.cmp(&b.id)));
        if let Some(limit) = limit {
            records.truncate(limit);
        }

        Ok(records)
    }

    async fn query_matches_with_waitlist(&self) -> Result<Vec<MatchId>> {
        let state = self.state.read().await;
        let match_ids: BTreeSet<MatchId> = state
            .documents
            .keys()
            .filter_map(|key| match key {
                DocumentKey::Waitlist { match_id, .. } => Some(match_id.clone()),
                _ => None,
            })
            .collect();

        Ok(match_ids.into_iter().collect())
    }

    async fn ping(&self) -> Result<()> {
        let _state = self.state.read().await;
        Ok(())
    }

    fn server_timestamp(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

#[derive(Debug)]
enum PendingWrite {
    Set(Document),
    Update(Document),
    Delete,
}

/// Transaction handle returned by [`InMemoryDocumentStore::begin`]
pub struct InMemoryTransaction {
    state: Arc<RwLock<StoreState>>,
    injected_conflicts: Arc<AtomicUsize>,
    commits: Arc<AtomicU64>,
    conflicts: Arc<AtomicU64>,
    read_set: HashMap<DocumentKey, u64>,
    writes: BTreeMap<DocumentKey, PendingWrite>,
    finished: bool,
}

impl InMemoryTransaction {
    fn take_injected_conflict(&self) -> bool {
        self.injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn conflict(&self, key: &DocumentKey) -> AttendanceError {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
        debug!("Commit rejected, {} changed since it was read", key);
        AttendanceError::TransactionConflict {
            operation: format!("commit ({})", key),
        }
    }
}

#[async_trait]
impl Transaction for InMemoryTransaction {
    async fn get(&mut self, key: &DocumentKey) -> Result<Option<Document>> {
        if let Some(pending) = self.writes.get(key) {
            return Ok(match pending {
                PendingWrite::Set(doc) | PendingWrite::Update(doc) => Some(doc.clone()),
                PendingWrite::Delete => None,
            });
        }

        let state = self.state.read().await;
        let version = state.version_of(key);
        self.read_set.entry(key.clone()).or_insert(version);

        Ok(state.documents.get(key).map(|v| v.document.clone()))
    }

    fn set(&mut self, key: DocumentKey, document: Document) {
        self.writes.insert(key, PendingWrite::Set(document));
    }

    fn update(&mut self, key: DocumentKey, document: Document) {
        let write = match self.writes.get(&key) {
            // Updating a document created in this transaction keeps create semantics
            Some(PendingWrite::Set(_)) => PendingWrite::Set(document),
            _ => PendingWrite::Update(document),
        };
        self.writes.insert(key, write);
    }

    fn delete(&mut self, key: DocumentKey) {
        self.writes.insert(key, PendingWrite::Delete);
    }

    async fn commit(&mut self) -> Result<()> {
        if self.finished {
            return Err(AttendanceError::Store {
                message: "transaction already committed".to_string(),
            });
        }
        self.finished = true;

        if self.take_injected_conflict() {
            self.conflicts.fetch_add(1, Ordering::Relaxed);
            return Err(AttendanceError::TransactionConflict {
                operation: "commit (injected)".to_string(),
            });
        }

        let mut state = self.state.write().await;

        for (key, seen_version) in &self.read_set {
            if state.version_of(key) != *seen_version {
                return Err(self.conflict(key));
            }
        }

        for (key, write) in &self.writes {
            if matches!(write, PendingWrite::Update(_)) && !state.documents.contains_key(key) {
                return Err(AttendanceError::Store {
                    message: format!("update of missing document {}", key),
                });
            }
        }

        state.last_version += 1;
        let version = state.last_version;
        for (key, write) in std::mem::take(&mut self.writes) {
            match write {
                PendingWrite::Set(document) | PendingWrite::Update(document) => {
                    state
                        .documents
                        .insert(key, VersionedDocument { version, document });
                }
                PendingWrite::Delete => {
                    state.documents.remove(&key);
                }
            }
        }

        self.commits.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
