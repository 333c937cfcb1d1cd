//! Test fixtures shared by the integration suites

#![allow(dead_code)]

use async_trait::async_trait;
use match_attendance::amqp::publisher::EventPublisher;
use match_attendance::attendance::{AttendanceManager, ScheduleMatch};
use match_attendance::config::AdmissionSettings;
use chrono::{DateTime, Utc};
use match_attendance::error::{AttendanceError, Result};
use match_attendance::metrics::MetricsCollector;
use match_attendance::store::{
    Document, DocumentKey, DocumentStore, InMemoryDocumentStore, Transaction,
};
use match_attendance::types::{
    AttendanceMessage, AuditRecord, MatchAdmission, MatchId, ParticipantRecord,
    ParticipantStateChanged, ParticipationState, WaitlistEntry, WaitlistPromoted,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Event publisher that keeps every published message in memory
#[derive(Debug, Default)]
pub struct RecordingEventPublisher {
    published_events: Arc<Mutex<Vec<AttendanceMessage>>>,
}

impl RecordingEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_published_events(&self) -> Vec<AttendanceMessage> {
        self.published_events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Users promoted off a waitlist, in publish order
    pub fn promoted_users(&self) -> Vec<String> {
        self.get_published_events()
            .into_iter()
            .filter_map(|event| match event {
                AttendanceMessage::WaitlistPromoted(e) => Some(e.user_id),
                _ => None,
            })
            .collect()
    }

    /// State changes published for one user
    pub fn state_changes_for(
        &self,
        user_id: &str,
    ) -> Vec<(ParticipationState, ParticipationState)> {
        self.get_published_events()
            .into_iter()
            .filter_map(|event| match event {
                AttendanceMessage::ParticipantStateChanged(e) if e.user_id == user_id => {
                    Some((e.previous_state, e.state))
                }
                _ => None,
            })
            .collect()
    }

    pub fn count_events_of_type(&self, event_type: &str) -> usize {
        self.get_published_events()
            .iter()
            .filter(|event| match event {
                AttendanceMessage::ParticipantStateChanged(_) => {
                    event_type == "ParticipantStateChanged"
                }
                AttendanceMessage::WaitlistPromoted(_) => event_type == "WaitlistPromoted",
            })
            .count()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.published_events.lock() {
            events.clear();
        }
    }
}

#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish_participant_state_changed(
        &self,
        event: ParticipantStateChanged,
    ) -> Result<()> {
        if let Ok(mut events) = self.published_events.lock() {
            events.push(AttendanceMessage::ParticipantStateChanged(event));
        }
        Ok(())
    }

    async fn publish_waitlist_promoted(&self, event: WaitlistPromoted) -> Result<()> {
        if let Ok(mut events) = self.published_events.lock() {
            events.push(AttendanceMessage::WaitlistPromoted(event));
        }
        Ok(())
    }
}

/// Store wrapper that fails one chosen commit with a store error
pub struct FailingCommitStore {
    inner: Arc<InMemoryDocumentStore>,
    commits: Arc<AtomicUsize>,
    fail_at: Arc<AtomicUsize>,
}

impl FailingCommitStore {
    pub fn new(inner: Arc<InMemoryDocumentStore>) -> Self {
        Self {
            inner,
            commits: Arc::new(AtomicUsize::new(0)),
            fail_at: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fail the `n`th commit attempted from now on (1 is the next one)
    pub fn fail_nth_commit(&self, n: usize) {
        let done = self.commits.load(Ordering::SeqCst);
        self.fail_at.store(done + n, Ordering::SeqCst);
    }
}

struct FailingCommitTransaction {
    inner: Box<dyn Transaction>,
    commits: Arc<AtomicUsize>,
    fail_at: Arc<AtomicUsize>,
}

#[async_trait]
impl Transaction for FailingCommitTransaction {
    async fn get(&mut self, key: &DocumentKey) -> Result<Option<Document>> {
        self.inner.get(key).await
    }

    fn set(&mut self, key: DocumentKey, document: Document) {
        self.inner.set(key, document);
    }

    fn update(&mut self, key: DocumentKey, document: Document) {
        self.inner.update(key, document);
    }

    fn delete(&mut self, key: DocumentKey) {
        self.inner.delete(key);
    }

    async fn commit(&mut self) -> Result<()> {
        let attempt = self.commits.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt == self.fail_at.load(Ordering::SeqCst) {
            return Err(AttendanceError::Store {
                message: "backend unavailable".to_string(),
            });
        }
        self.inner.commit().await
    }
}

#[async_trait]
impl DocumentStore for FailingCommitStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        Ok(Box::new(FailingCommitTransaction {
            inner: self.inner.begin().await?,
            commits: self.commits.clone(),
            fail_at: self.fail_at.clone(),
        }))
    }

    async fn get(&self, key: &DocumentKey) -> Result<Option<Document>> {
        self.inner.get(key).await
    }

    async fn query_waitlist(
        &self,
        match_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<WaitlistEntry>> {
        self.inner.query_waitlist(match_id, limit).await
    }

    async fn query_participants(
        &self,
        match_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<ParticipantRecord>> {
        self.inner.query_participants(match_id, limit).await
    }

    async fn query_audit(&self, match_id: &str, limit: Option<usize>) -> Result<Vec<AuditRecord>> {
        self.inner.query_audit(match_id, limit).await
    }

    async fn query_matches_with_waitlist(&self) -> Result<Vec<MatchId>> {
        self.inner.query_matches_with_waitlist().await
    }

    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }

    fn server_timestamp(&self) -> DateTime<Utc> {
        self.inner.server_timestamp()
    }
}

/// Complete system backed by a fresh in-memory store
pub struct TestSystem {
    pub manager: Arc<AttendanceManager>,
    pub store: Arc<InMemoryDocumentStore>,
    pub events: Arc<RecordingEventPublisher>,
}

impl TestSystem {
    pub fn new() -> Self {
        Self::with_settings(AdmissionSettings {
            enable_sweeper: false,
            ..Default::default()
        })
    }

    /// Generous retry budget for heavily contended tests
    pub fn contended() -> Self {
        Self::with_settings(AdmissionSettings {
            max_transaction_attempts: 200,
            retry_base_delay_ms: 1,
            retry_max_delay_ms: 10,
            enable_sweeper: false,
            ..Default::default()
        })
    }

    pub fn with_settings(settings: AdmissionSettings) -> Self {
        let store = Arc::new(InMemoryDocumentStore::new());
        Self::build(store.clone(), store, settings)
    }

    /// System whose manager runs on a [`FailingCommitStore`]
    pub fn with_failing_commits() -> (Self, Arc<FailingCommitStore>) {
        let store = Arc::new(InMemoryDocumentStore::new());
        let faults = Arc::new(FailingCommitStore::new(store.clone()));
        let settings = AdmissionSettings {
            enable_sweeper: false,
            ..Default::default()
        };
        (Self::build(faults.clone(), store, settings), faults)
    }

    fn build(
        backend: Arc<dyn DocumentStore>,
        store: Arc<InMemoryDocumentStore>,
        settings: AdmissionSettings,
    ) -> Self {
        let events = Arc::new(RecordingEventPublisher::new());
        let metrics = Arc::new(MetricsCollector::new().expect("metrics collector"));
        let manager = Arc::new(AttendanceManager::with_settings(
            backend,
            events.clone(),
            settings,
            metrics,
        ));

        Self {
            manager,
            store,
            events,
        }
    }

    pub async fn schedule(&self, match_id: &str, capacity: u32, waitlist: bool) -> MatchAdmission {
        self.manager
            .schedule_match(ScheduleMatch {
                match_id: match_id.to_string(),
                team_id: Some("team-1".to_string()),
                capacity: Some(capacity),
                waitlist_enabled: Some(waitlist),
            })
            .await
            .expect("schedule match")
    }

    pub async fn rsvp(
        &self,
        match_id: &str,
        user_id: &str,
        state: ParticipationState,
    ) -> ParticipationState {
        self.manager
            .request_state(match_id, user_id, state)
            .await
            .expect("request state")
            .state
    }

    /// Recorded events once everything queued so far has been published
    pub async fn published(&self) -> &RecordingEventPublisher {
        self.manager.flush_events().await;
        &self.events
    }

    pub async fn state_of(&self, match_id: &str, user_id: &str) -> Option<ParticipationState> {
        self.manager
            .get_participant_state(match_id, user_id)
            .await
            .expect("participant state")
    }

    pub async fn assert_consistent(&self, match_id: &str) {
        let report = self
            .manager
            .check_invariants(match_id)
            .await
            .expect("invariant report");
        assert!(
            report.is_consistent(),
            "invariant violations: {:?}",
            report.violations
        );
    }
}
