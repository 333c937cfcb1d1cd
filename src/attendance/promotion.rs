//! Waitlist auto-promotion
//!
//! Promotion runs in two phases. The lowest-sequence candidate is picked with a
//! plain query, then a transaction re-reads the candidate's entry together with
//! the match's admission state and only promotes if both still allow it. The
//! query is never trusted on its own; the transaction is the source of truth.

use crate::attendance::audit::AuditRecorder;
use crate::attendance::retry::RetryPolicy;
use crate::attendance::waitlist::WaitlistQueue;
use crate::attendance::{ledger, registry, waitlist};
use crate::error::{AttendanceError, Result};
use crate::metrics::MetricsCollector;
use crate::store::{DocumentKey, DocumentStore};
use crate::types::{ParticipationState, PromotionOutcome, PromotionResult};
use crate::utils::require_id;
use std::sync::Arc;
use tracing::{debug, info};

/// Moves waitlisted participants into freed slots
#[derive(Clone)]
pub struct AutoPromotionService {
    store: Arc<dyn DocumentStore>,
    queue: WaitlistQueue,
    auditor: AuditRecorder,
    retry_policy: RetryPolicy,
    metrics: Arc<MetricsCollector>,
}

impl AutoPromotionService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        retry_policy: RetryPolicy,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            queue: WaitlistQueue::new(store.clone()),
            auditor: AuditRecorder::new(store.clone()),
            store,
            retry_policy,
            metrics,
        }
    }

    /// Promote the head of the waitlist if a slot is free
    ///
    /// Safe to call at any time and from any number of callers at once; each
    /// entry is consumed at most once.
    pub async fn promote_next(&self, match_id: &str) -> Result<PromotionOutcome> {
        require_id("match_id", match_id)?;

        if self
            .store
            .get(&DocumentKey::match_state(match_id))
            .await?
            .is_none()
        {
            return Err(AttendanceError::MatchNotFound {
                match_id: match_id.to_string(),
            });
        }

        let outcome = match self.queue.next_candidate(match_id).await? {
            Some(candidate) => self.promote_candidate(match_id, &candidate.user_id).await?,
            None => PromotionOutcome::none(match_id, PromotionResult::NoCandidate),
        };

        self.metrics.record_promotion(outcome.result);
        Ok(outcome)
    }

    /// Transactional phase for a specific candidate
    ///
    /// Conflicts re-run this phase for the same candidate. If another promoter
    /// consumed the entry meanwhile the result is `AlreadyConsumed`.
    pub async fn promote_candidate(
        &self,
        match_id: &str,
        user_id: &str,
    ) -> Result<PromotionOutcome> {
        self.retry_policy
            .run("promote_next", &self.metrics, move || {
                self.try_promote(match_id, user_id)
            })
            .await
    }

    async fn try_promote(&self, match_id: &str, user_id: &str) -> Result<PromotionOutcome> {
        let mut txn = self.store.begin().await?;
        let txn = txn.as_mut();

        let mut state = ledger::load(txn, match_id).await?;
        let entry = match waitlist::load_entry(txn, match_id, user_id).await? {
            Some(entry) => entry,
            None => {
                debug!(
                    "Waitlist entry for '{}' on match {} already consumed",
                    user_id, match_id
                );
                return Ok(self.outcome(match_id, user_id, None, PromotionResult::AlreadyConsumed));
            }
        };
        let sequence = Some(entry.sequence);

        if !state.waitlist_enabled {
            return Ok(self.outcome(match_id, user_id, sequence, PromotionResult::WaitlistDisabled));
        }
        if !state.has_free_slot() {
            return Ok(self.outcome(match_id, user_id, sequence, PromotionResult::CapacityFull));
        }

        let record = registry::load(txn, match_id, user_id).await?;
        let now = self.store.server_timestamp();

        waitlist::remove(txn, match_id, user_id);
        state.dequeue();

        let current = record.as_ref().map(|r| r.state).unwrap_or_default();
        if current == ParticipationState::Admitted {
            ledger::stage(txn, &state);
            txn.commit().await?;
            info!(
                "Cleared stale waitlist entry of already admitted '{}' on match {}",
                user_id, match_id
            );
            return Ok(self.outcome(
                match_id,
                user_id,
                sequence,
                PromotionResult::StaleEntryCleared,
            ));
        }

        state.admit();
        registry::write_state(
            txn,
            record.as_ref(),
            match_id,
            user_id,
            ParticipationState::Admitted,
            now,
        );
        ledger::stage(txn, &state);

        let audit = self.auditor.autopromote(&state, user_id, current, now);
        self.auditor.append(txn, audit);

        txn.commit().await?;

        info!(
            "Promoted '{}' from waitlist on match {} (sequence {}, {}/{} admitted)",
            user_id, match_id, entry.sequence, state.admitted_count, state.capacity
        );

        Ok(self.outcome(match_id, user_id, sequence, PromotionResult::Promoted))
    }

    fn outcome(
        &self,
        match_id: &str,
        user_id: &str,
        sequence: Option<u64>,
        result: PromotionResult,
    ) -> PromotionOutcome {
        PromotionOutcome {
            match_id: match_id.to_string(),
            user_id: Some(user_id.to_string()),
            sequence,
            result,
        }
    }
}
