//! Admission controller: the RSVP state-transition protocol
//!
//! A request is evaluated in one transaction that reads the match's admission
//! state, the caller's participant record and the caller's waitlist entry. The
//! capacity check and every counter mutation happen inside that transaction, so
//! concurrent callers racing on the same match are serialized by the store.
//! When the transition frees an admitted slot, the auto-promotion service is
//! invoked after the commit; its outcome never affects the request itself.

use crate::attendance::audit::AuditRecorder;
use crate::attendance::promotion::AutoPromotionService;
use crate::attendance::retry::RetryPolicy;
use crate::attendance::{ledger, registry, sequence, waitlist};
use crate::error::{AttendanceError, Result};
use crate::metrics::MetricsCollector;
use crate::store::DocumentStore;
use crate::types::{
    MatchAdmission, ParticipationState, PromotionOutcome, RsvpOutcome, WaitlistEntry,
};
use crate::utils::require_id;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a request does, decided from the state read inside the transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Already admitted; nothing but the audit record is written
    AlreadyAdmitted,
    /// Take a free slot, dropping the caller's waitlist entry if one exists
    Admit { clear_entry: bool },
    /// Match is full; queue the caller, minting an entry if it has none
    Waitlist { mint_entry: bool },
    /// Match is full and waitlisting is off
    RejectOverflow { clear_entry: bool },
    /// Leave the admitted set and/or the waitlist
    Withdraw {
        to: ParticipationState,
        release_slot: bool,
        clear_entry: bool,
    },
}

impl Decision {
    /// State the caller ends up in
    pub fn resulting_state(self, previous: ParticipationState) -> ParticipationState {
        match self {
            Decision::AlreadyAdmitted => previous,
            Decision::Admit { .. } => ParticipationState::Admitted,
            Decision::Waitlist { .. } => ParticipationState::Waitlisted,
            Decision::RejectOverflow { .. } => ParticipationState::Declined,
            Decision::Withdraw { to, .. } => to,
        }
    }

    pub fn frees_slot(self) -> bool {
        matches!(
            self,
            Decision::Withdraw {
                release_slot: true,
                ..
            }
        )
    }
}

/// Evaluate the transition table
///
/// `desired = WAITLISTED` must already have been checked against
/// `waitlist_enabled`; here it is treated exactly like `ADMITTED`, so a direct
/// waitlist request never skips a free slot.
pub fn decide(
    state: &MatchAdmission,
    previous: ParticipationState,
    desired: ParticipationState,
    has_entry: bool,
) -> Decision {
    if desired.is_withdrawal() {
        Decision::Withdraw {
            to: desired,
            release_slot: previous.holds_slot(),
            clear_entry: has_entry,
        }
    } else if previous.holds_slot() {
        Decision::AlreadyAdmitted
    } else if state.has_free_slot() {
        Decision::Admit {
            clear_entry: has_entry,
        }
    } else if state.waitlist_enabled {
        Decision::Waitlist {
            mint_entry: !has_entry,
        }
    } else {
        Decision::RejectOverflow {
            clear_entry: has_entry,
        }
    }
}

/// Committed result of one transaction attempt
#[derive(Debug, Clone)]
struct Transition {
    previous: ParticipationState,
    resulting: ParticipationState,
    sequence: Option<u64>,
    slot_freed: bool,
    waitlist_enabled: bool,
}

/// Entry point for participant-initiated state changes
#[derive(Clone)]
pub struct AdmissionController {
    store: Arc<dyn DocumentStore>,
    auditor: AuditRecorder,
    promoter: Arc<AutoPromotionService>,
    retry_policy: RetryPolicy,
    metrics: Arc<MetricsCollector>,
}

impl AdmissionController {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        promoter: Arc<AutoPromotionService>,
        retry_policy: RetryPolicy,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            auditor: AuditRecorder::new(store.clone()),
            store,
            promoter,
            retry_policy,
            metrics,
        }
    }

    /// Move `user_id` towards `desired` on `match_id`
    ///
    /// Idempotent: repeating a successful request leaves the same end state and
    /// never double counts. Conflicts are retried per the controller's policy and
    /// surface as `TransactionConflict` once it is exhausted.
    pub async fn request_state(
        &self,
        match_id: &str,
        user_id: &str,
        desired: ParticipationState,
    ) -> Result<RsvpOutcome> {
        require_id("match_id", match_id)?;
        require_id("user_id", user_id)?;

        let timer = self.metrics.start_timer();
        let result = self
            .retry_policy
            .run("request_state", &self.metrics, move || {
                self.try_transition(match_id, user_id, desired)
            })
            .await;

        let transition = match result {
            Ok(transition) => transition,
            Err(e) => {
                self.metrics.record_rsvp_failure(desired, &e);
                if e.is_validation() {
                    debug!("RSVP rejected for '{}' on match {}: {}", user_id, match_id, e);
                } else {
                    warn!("RSVP failed for '{}' on match {}: {}", user_id, match_id, e);
                }
                return Err(e);
            }
        };

        let mut promotion: Option<PromotionOutcome> = None;
        if transition.slot_freed && transition.waitlist_enabled {
            match self.promoter.promote_next(match_id).await {
                Ok(outcome) => promotion = Some(outcome),
                Err(e) => {
                    self.metrics.record_auto_promotion_failure();
                    warn!(
                        "Auto-promotion after '{}' left match {} failed: {}. \
                         Leaving it to the sweeper",
                        user_id, match_id, e
                    );
                }
            }
        }

        let accepted = transition.resulting == desired
            || (desired.is_waitlisted() && transition.resulting.holds_slot());
        let outcome = RsvpOutcome {
            match_id: match_id.to_string(),
            user_id: user_id.to_string(),
            accepted,
            desired_state: desired,
            previous_state: transition.previous,
            state: transition.resulting,
            waitlist_sequence: transition.sequence,
            auto_promoted: promotion.as_ref().is_some_and(|p| p.promoted()),
            promotion,
        };

        self.metrics.record_rsvp(desired, outcome.state, timer.stop());
        info!(
            "RSVP match {} user '{}': {} -> {} (desired {}, accepted: {})",
            match_id, user_id, outcome.previous_state, outcome.state, desired, accepted
        );

        Ok(outcome)
    }

    async fn try_transition(
        &self,
        match_id: &str,
        user_id: &str,
        desired: ParticipationState,
    ) -> Result<Transition> {
        let mut txn = self.store.begin().await?;
        let txn = txn.as_mut();

        let mut state = ledger::load(txn, match_id).await?;
        let record = registry::load(txn, match_id, user_id).await?;
        let entry = waitlist::load_entry(txn, match_id, user_id).await?;
        let previous = record.as_ref().map(|r| r.state).unwrap_or_default();

        if desired.is_waitlisted() && !state.waitlist_enabled {
            return Err(AttendanceError::WaitlistDisabled {
                match_id: match_id.to_string(),
            });
        }

        let decision = decide(&state, previous, desired, entry.is_some());
        debug!(
            "Match {} ({}/{} admitted, {} waitlisted): '{}' {} -> desired {} => {:?}",
            match_id,
            state.admitted_count,
            state.capacity,
            state.waitlist_count,
            user_id,
            previous,
            desired,
            decision
        );

        let now = self.store.server_timestamp();
        let resulting = decision.resulting_state(previous);
        let mut sequence = entry.as_ref().map(|e| e.sequence);
        let mut ledger_dirty = false;

        match decision {
            Decision::AlreadyAdmitted => {}
            Decision::Admit { clear_entry } => {
                state.admit();
                if clear_entry {
                    waitlist::remove(txn, match_id, user_id);
                    state.dequeue();
                    sequence = None;
                }
                ledger_dirty = true;
            }
            Decision::Waitlist { mint_entry } => {
                if mint_entry {
                    let minted = sequence::allocate(&mut state);
                    waitlist::insert(
                        txn,
                        WaitlistEntry {
                            match_id: match_id.to_string(),
                            user_id: user_id.to_string(),
                            sequence: minted,
                            created_at: now,
                        },
                    );
                    state.enqueue();
                    sequence = Some(minted);
                    ledger_dirty = true;
                }
            }
            Decision::RejectOverflow { clear_entry } | Decision::Withdraw { clear_entry, .. } => {
                if decision.frees_slot() {
                    state.release();
                    ledger_dirty = true;
                }
                if clear_entry {
                    waitlist::remove(txn, match_id, user_id);
                    state.dequeue();
                    ledger_dirty = true;
                }
                sequence = None;
            }
        }

        if record.is_none() || resulting != previous {
            registry::write_state(txn, record.as_ref(), match_id, user_id, resulting, now);
        }
        if ledger_dirty {
            ledger::stage(txn, &state);
        }

        let audit = self
            .auditor
            .rsvp(&state, user_id, desired, previous, resulting, now);
        self.auditor.append(txn, audit);

        txn.commit().await?;

        Ok(Transition {
            previous,
            resulting,
            sequence: if resulting.is_waitlisted() {
                sequence
            } else {
                None
            },
            slot_freed: decision.frees_slot(),
            waitlist_enabled: state.waitlist_enabled,
        })
    }
}
