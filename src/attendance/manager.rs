//! Attendance manager
//!
//! Facade over the admission controller and the auto-promotion service. It owns
//! match scheduling, the read-side queries, best-effort event publishing after
//! commits and the periodic waitlist sweeper.

use crate::amqp::dispatcher::{EventDispatcher, DEFAULT_EVENT_QUEUE_CAPACITY};
use crate::amqp::publisher::EventPublisher;
use crate::attendance::audit::AuditRecorder;
use crate::attendance::controller::AdmissionController;
use crate::attendance::invariants::{self, InvariantReport};
use crate::attendance::promotion::AutoPromotionService;
use crate::attendance::waitlist::WaitlistQueue;
use crate::config::AdmissionSettings;
use crate::error::{AttendanceError, Result};
use crate::metrics::MetricsCollector;
use crate::store::{Document, DocumentKey, DocumentStore};
use crate::types::{
    AttendanceMessage, AuditRecord, MatchAdmission, ParticipantRecord, ParticipantStateChanged,
    ParticipationState, PromotionOutcome, PromotionResult, RsvpOutcome, UserId, WaitlistPromoted,
};
use crate::utils::require_id;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

/// Default page size for participant listings
pub const DEFAULT_PARTICIPANT_LIMIT: usize = 100;

/// Parameters for scheduling a match
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleMatch {
    pub match_id: String,
    #[serde(default)]
    pub team_id: Option<String>,
    #[serde(default)]
    pub capacity: Option<u32>,
    #[serde(default)]
    pub waitlist_enabled: Option<bool>,
}

/// Summary of one sweeper pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub matches_scanned: usize,
    pub promoted: usize,
    pub failures: usize,
}

/// The main attendance manager
#[derive(Clone)]
pub struct AttendanceManager {
    store: Arc<dyn DocumentStore>,
    controller: AdmissionController,
    promoter: Arc<AutoPromotionService>,
    queue: WaitlistQueue,
    auditor: AuditRecorder,
    events: EventDispatcher,
    metrics_collector: Arc<MetricsCollector>,
    settings: AdmissionSettings,
}

impl AttendanceManager {
    /// Create a manager with default settings and its own metrics collector
    ///
    /// Must be called from within a Tokio runtime; events are published by a
    /// task spawned here.
    pub fn new(store: Arc<dyn DocumentStore>, event_publisher: Arc<dyn EventPublisher>) -> Self {
        Self::with_settings(
            store,
            event_publisher,
            AdmissionSettings::default(),
            Arc::new(MetricsCollector::default()),
        )
    }

    pub fn with_settings(
        store: Arc<dyn DocumentStore>,
        event_publisher: Arc<dyn EventPublisher>,
        settings: AdmissionSettings,
        metrics_collector: Arc<MetricsCollector>,
    ) -> Self {
        let retry_policy = settings.retry_policy();
        let promoter = Arc::new(AutoPromotionService::new(
            store.clone(),
            retry_policy.clone(),
            metrics_collector.clone(),
        ));
        let controller = AdmissionController::new(
            store.clone(),
            promoter.clone(),
            retry_policy,
            metrics_collector.clone(),
        );

        Self {
            queue: WaitlistQueue::new(store.clone()),
            auditor: AuditRecorder::new(store.clone()),
            store,
            controller,
            promoter,
            events: EventDispatcher::spawn(
                event_publisher,
                metrics_collector.clone(),
                DEFAULT_EVENT_QUEUE_CAPACITY,
            ),
            metrics_collector,
            settings,
        }
    }

    pub fn settings(&self) -> &AdmissionSettings {
        &self.settings
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics_collector.clone()
    }

    pub fn store(&self) -> Arc<dyn DocumentStore> {
        self.store.clone()
    }

    /// Create the admission state of a new match with zeroed counters
    pub async fn schedule_match(&self, request: ScheduleMatch) -> Result<MatchAdmission> {
        require_id("match_id", &request.match_id)?;
        let capacity = request.capacity.unwrap_or(self.settings.default_capacity);
        if capacity == 0 {
            return Err(AttendanceError::InvalidArgument {
                reason: "capacity must be greater than 0".to_string(),
            });
        }
        let waitlist_enabled = request
            .waitlist_enabled
            .unwrap_or(self.settings.default_waitlist_enabled);

        let timer = self.metrics_collector.start_timer();
        let request = &request;
        let state = self
            .settings
            .retry_policy()
            .run("schedule_match", &self.metrics_collector, move || async move {
                let mut txn = self.store.begin().await?;
                let key = DocumentKey::match_state(&request.match_id);

                if txn.get(&key).await?.is_some() {
                    return Err(AttendanceError::MatchAlreadyExists {
                        match_id: request.match_id.clone(),
                    });
                }

                let state = MatchAdmission::new(
                    &request.match_id,
                    capacity,
                    waitlist_enabled,
                    request.team_id.clone(),
                    self.store.server_timestamp(),
                );
                txn.set(key, Document::Match(state.clone()));
                txn.commit().await?;
                Ok(state)
            })
            .await?;

        self.metrics_collector
            .record_operation("schedule_match", timer.stop());
        info!(
            "Scheduled match {} (capacity {}, waitlist {})",
            state.match_id,
            state.capacity,
            if state.waitlist_enabled { "on" } else { "off" }
        );

        Ok(state)
    }

    /// Admission state of a match
    pub async fn get_match(&self, match_id: &str) -> Result<MatchAdmission> {
        require_id("match_id", match_id)?;
        self.store
            .get(&DocumentKey::match_state(match_id))
            .await?
            .ok_or_else(|| AttendanceError::MatchNotFound {
                match_id: match_id.to_string(),
            })?
            .into_match()
    }

    /// Move a participant towards `desired`, then queue events for what changed
    pub async fn request_state(
        &self,
        match_id: &str,
        user_id: &str,
        desired: ParticipationState,
    ) -> Result<RsvpOutcome> {
        let outcome = self
            .controller
            .request_state(match_id, user_id, desired)
            .await?;

        if outcome.changed() {
            let event = ParticipantStateChanged {
                match_id: outcome.match_id.clone(),
                user_id: outcome.user_id.clone(),
                previous_state: outcome.previous_state,
                state: outcome.state,
                waitlist_sequence: outcome.waitlist_sequence,
                timestamp: self.store.server_timestamp(),
            };
            self.events
                .dispatch(AttendanceMessage::ParticipantStateChanged(event));
        }

        if let Some(promotion) = &outcome.promotion {
            self.publish_promotion(promotion);
        }

        Ok(outcome)
    }

    /// Promote the head of a match's waitlist if a slot is free
    pub async fn promote_next(&self, match_id: &str) -> Result<PromotionOutcome> {
        let outcome = self.promoter.promote_next(match_id).await?;
        self.publish_promotion(&outcome);
        Ok(outcome)
    }

    fn publish_promotion(&self, outcome: &PromotionOutcome) {
        if outcome.result != PromotionResult::Promoted {
            return;
        }
        let Some(user_id) = outcome.user_id.clone() else {
            return;
        };

        let event = WaitlistPromoted {
            match_id: outcome.match_id.clone(),
            user_id,
            sequence: outcome.sequence,
            timestamp: self.store.server_timestamp(),
        };
        self.events.dispatch(AttendanceMessage::WaitlistPromoted(event));
    }

    /// Wait for every queued event to reach the publisher
    pub async fn flush_events(&self) {
        self.events.flush().await;
    }

    /// Participant record, `None` if the user never responded
    pub async fn get_participant(
        &self,
        match_id: &str,
        user_id: &str,
    ) -> Result<Option<ParticipantRecord>> {
        require_id("match_id", match_id)?;
        require_id("user_id", user_id)?;
        self.store
            .get(&DocumentKey::participant(match_id, user_id))
            .await?
            .map(Document::into_participant)
            .transpose()
    }

    pub async fn get_participant_state(
        &self,
        match_id: &str,
        user_id: &str,
    ) -> Result<Option<ParticipationState>> {
        Ok(self
            .get_participant(match_id, user_id)
            .await?
            .map(|record| record.state))
    }

    /// Waitlisted user ids by sequence ascending
    pub async fn list_waitlist(&self, match_id: &str) -> Result<Vec<UserId>> {
        require_id("match_id", match_id)?;
        self.queue.list(match_id).await
    }

    pub async fn list_participants(
        &self,
        match_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<ParticipantRecord>> {
        require_id("match_id", match_id)?;
        self.store
            .query_participants(match_id, Some(limit.unwrap_or(DEFAULT_PARTICIPANT_LIMIT)))
            .await
    }

    pub async fn list_audit(
        &self,
        match_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<AuditRecord>> {
        require_id("match_id", match_id)?;
        self.auditor.list(match_id, limit).await
    }

    pub async fn participant_history(
        &self,
        match_id: &str,
        user_id: &str,
    ) -> Result<Vec<AuditRecord>> {
        require_id("match_id", match_id)?;
        require_id("user_id", user_id)?;
        self.auditor.history(match_id, user_id).await
    }

    pub async fn check_invariants(&self, match_id: &str) -> Result<InvariantReport> {
        require_id("match_id", match_id)?;
        invariants::check(self.store.as_ref(), match_id).await
    }

    /// Drain promotable entries on every match with a live waitlist
    pub async fn sweep_waitlists(&self) -> Result<SweepReport> {
        let matches = self.store.query_matches_with_waitlist().await?;
        let mut report = SweepReport {
            matches_scanned: matches.len(),
            ..Default::default()
        };

        for match_id in matches {
            // Each entry is consumed at most once, so this bounds the loop.
            let budget = self.queue.entries(&match_id).await?.len();

            for _ in 0..budget {
                match self.promote_next(&match_id).await {
                    Ok(outcome) if outcome.promoted() => {
                        if outcome.result == PromotionResult::Promoted {
                            report.promoted += 1;
                        }
                    }
                    Ok(outcome) => {
                        debug!(
                            "Sweeper stopped on match {}: {}",
                            match_id,
                            outcome.result.as_str()
                        );
                        break;
                    }
                    Err(e) => {
                        report.failures += 1;
                        warn!("Sweeper failed to promote on match {}: {}", match_id, e);
                        break;
                    }
                }
            }
        }

        self.metrics_collector.record_sweep();
        if report.promoted > 0 || report.failures > 0 {
            info!(
                "Waitlist sweep: {} matches, {} promoted, {} failures",
                report.matches_scanned, report.promoted, report.failures
            );
        }

        Ok(report)
    }

    /// Start the sweeper that runs periodically
    pub fn start_sweeper_task(self: Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(&self);
        let period = self.settings.sweep_interval();

        let handle = tokio::spawn(async move {
            let mut sweep_interval = interval(period);

            loop {
                sweep_interval.tick().await;

                if let Err(e) = manager.sweep_waitlists().await {
                    error!("Error during waitlist sweep: {}", e);
                }
            }
        });

        info!("Started waitlist sweeper (every {:?})", period);
        handle
    }
}
