//! Audit recorder
//!
//! Every transition appends exactly one record inside the transaction that
//! performs it, so the audit log never disagrees with committed state.

use crate::error::Result;
use crate::store::{Document, DocumentKey, DocumentStore, Transaction};
use crate::types::{
    AuditAction, AuditMeta, AuditRecord, AuditTarget, MatchAdmission, ParticipationState,
    SYSTEM_ACTOR,
};
use crate::utils::generate_audit_id;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

/// Audit scope for match transitions
pub const TEAM_SCOPE: &str = "TEAM";

/// Target type recorded for match transitions
pub const MATCH_TARGET: &str = "match";

/// Builds audit records and appends them to transactions
#[derive(Clone)]
pub struct AuditRecorder {
    store: Arc<dyn DocumentStore>,
}

impl AuditRecorder {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Record of a participant-initiated RSVP
    pub fn rsvp(
        &self,
        state: &MatchAdmission,
        user_id: &str,
        desired_state: ParticipationState,
        previous_state: ParticipationState,
        resulting_state: ParticipationState,
        at: DateTime<Utc>,
    ) -> AuditRecord {
        Self::build(
            state,
            user_id,
            AuditAction::Rsvp,
            AuditMeta::Rsvp {
                desired_state,
                previous_state,
                resulting_state,
            },
            at,
        )
    }

    /// Record of a system-initiated waitlist promotion
    pub fn autopromote(
        &self,
        state: &MatchAdmission,
        promoted_user_id: &str,
        from: ParticipationState,
        at: DateTime<Utc>,
    ) -> AuditRecord {
        Self::build(
            state,
            SYSTEM_ACTOR,
            AuditAction::WaitlistAutopromote,
            AuditMeta::WaitlistAutopromote {
                promoted_user_id: promoted_user_id.to_string(),
                from,
            },
            at,
        )
    }

    fn build(
        state: &MatchAdmission,
        actor_id: &str,
        action: AuditAction,
        meta: AuditMeta,
        at: DateTime<Utc>,
    ) -> AuditRecord {
        AuditRecord {
            id: generate_audit_id(),
            at,
            actor_id: actor_id.to_string(),
            action,
            scope: TEAM_SCOPE.to_string(),
            scope_id: state.scope_id().to_string(),
            target: AuditTarget {
                kind: MATCH_TARGET.to_string(),
                id: state.match_id.clone(),
            },
            meta,
        }
    }

    /// Buffer `record` in `txn`
    pub fn append(&self, txn: &mut dyn Transaction, record: AuditRecord) {
        debug!(
            "Audit {} by '{}' on match {}",
            record.action, record.actor_id, record.target.id
        );
        txn.set(
            DocumentKey::audit(&record.target.id, record.id),
            Document::Audit(record),
        );
    }

    /// Audit log of a match, oldest first
    pub async fn list(&self, match_id: &str, limit: Option<usize>) -> Result<Vec<AuditRecord>> {
        self.store.query_audit(match_id, limit).await
    }

    /// Records describing transitions of one participant, oldest first
    pub async fn history(&self, match_id: &str, user_id: &str) -> Result<Vec<AuditRecord>> {
        Ok(self
            .store
            .query_audit(match_id, None)
            .await?
            .into_iter()
            .filter(|record| record.concerns_user(user_id))
            .collect())
    }
}
