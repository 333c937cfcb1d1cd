//! Integration tests for the match attendance service
//!
//! These tests drive the public manager API end to end against the in-memory
//! store, covering:
//! - Admission, overflow and auto-promotion workflows
//! - Waitlist ordering and disabled-waitlist handling
//! - Published events and the audit trail
//! - Idempotent repeats and error reporting

mod fixtures;

use fixtures::TestSystem;
use match_attendance::config::AdmissionSettings;
use match_attendance::types::{AuditAction, AuditMeta, ParticipationState, PromotionResult};
use match_attendance::AttendanceError;

use ParticipationState::{Admitted, Declined, Tentative, Waitlisted};

#[tokio::test]
async fn test_decline_promotes_waitlisted_participant() {
    let system = TestSystem::new();
    system.schedule("match-a", 1, true).await;

    assert_eq!(system.rsvp("match-a", "user1", Admitted).await, Admitted);

    let overflow = system
        .manager
        .request_state("match-a", "user2", Admitted)
        .await
        .unwrap();
    assert_eq!(overflow.state, Waitlisted);
    assert_eq!(overflow.waitlist_sequence, Some(1));
    assert!(!overflow.accepted);

    let decline = system
        .manager
        .request_state("match-a", "user1", Declined)
        .await
        .unwrap();
    assert_eq!(decline.state, Declined);
    assert!(decline.auto_promoted);
    let promotion = decline.promotion.expect("promotion attempted");
    assert_eq!(promotion.result, PromotionResult::Promoted);
    assert_eq!(promotion.user_id.as_deref(), Some("user2"));

    let state = system.manager.get_match("match-a").await.unwrap();
    assert_eq!(state.admitted_count, 1);
    assert_eq!(state.waitlist_count, 0);
    assert_eq!(system.state_of("match-a", "user2").await, Some(Admitted));
    assert!(system.manager.list_waitlist("match-a").await.unwrap().is_empty());

    assert_eq!(
        system.published().await.promoted_users(),
        vec!["user2".to_string()]
    );
    system.assert_consistent("match-a").await;
}

#[tokio::test]
async fn test_overflow_without_waitlist_is_declined() {
    let system = TestSystem::new();
    system.schedule("match-b", 1, false).await;

    system.rsvp("match-b", "user1", Admitted).await;
    let outcome = system
        .manager
        .request_state("match-b", "user2", Admitted)
        .await
        .unwrap();

    assert_eq!(outcome.state, Declined);
    assert!(!outcome.accepted);
    assert_eq!(outcome.waitlist_sequence, None);
    assert!(system.manager.list_waitlist("match-b").await.unwrap().is_empty());

    let state = system.manager.get_match("match-b").await.unwrap();
    assert_eq!(state.admitted_count, 1);
    assert_eq!(state.waitlist_count, 0);
    system.assert_consistent("match-b").await;
}

#[tokio::test]
async fn test_direct_waitlist_request_on_disabled_match_fails() {
    let system = TestSystem::new();
    system.schedule("match-c", 1, false).await;
    system.rsvp("match-c", "user1", Admitted).await;

    let result = system
        .manager
        .request_state("match-c", "user3", Waitlisted)
        .await;

    assert!(matches!(
        result,
        Err(AttendanceError::WaitlistDisabled { .. })
    ));
    assert_eq!(system.state_of("match-c", "user3").await, None);
    assert!(system.published().await.state_changes_for("user3").is_empty());
}

#[tokio::test]
async fn test_direct_waitlist_request_with_free_slot_admits() {
    let system = TestSystem::new();
    system.schedule("match-free", 2, true).await;

    let outcome = system
        .manager
        .request_state("match-free", "user1", Waitlisted)
        .await
        .unwrap();

    assert_eq!(outcome.state, Admitted);
    assert!(outcome.accepted);
    assert!(system
        .manager
        .list_waitlist("match-free")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_waitlist_is_first_in_first_out() {
    let system = TestSystem::new();
    system.schedule("match-fifo", 1, true).await;

    system.rsvp("match-fifo", "holder", Admitted).await;
    for user in ["w1", "w2", "w3"] {
        assert_eq!(system.rsvp("match-fifo", user, Admitted).await, Waitlisted);
    }
    assert_eq!(
        system.manager.list_waitlist("match-fifo").await.unwrap(),
        vec!["w1", "w2", "w3"]
    );

    // Each withdrawal of the current holder admits the next queued user
    system.rsvp("match-fifo", "holder", Declined).await;
    system.rsvp("match-fifo", "w1", Tentative).await;
    system.rsvp("match-fifo", "w2", Declined).await;

    assert_eq!(
        system.published().await.promoted_users(),
        vec!["w1".to_string(), "w2".to_string(), "w3".to_string()]
    );
    assert_eq!(system.state_of("match-fifo", "w3").await, Some(Admitted));
    system.assert_consistent("match-fifo").await;
}

#[tokio::test]
async fn test_leaving_waitlist_does_not_free_a_slot() {
    let system = TestSystem::new();
    system.schedule("match-leave", 1, true).await;

    system.rsvp("match-leave", "holder", Admitted).await;
    system.rsvp("match-leave", "w1", Admitted).await;
    system.rsvp("match-leave", "w2", Admitted).await;

    let outcome = system
        .manager
        .request_state("match-leave", "w1", Declined)
        .await
        .unwrap();
    assert!(!outcome.auto_promoted);
    assert!(outcome.promotion.is_none());

    assert_eq!(
        system.manager.list_waitlist("match-leave").await.unwrap(),
        vec!["w2"]
    );
    let state = system.manager.get_match("match-leave").await.unwrap();
    assert_eq!(state.admitted_count, 1);
    assert_eq!(state.waitlist_count, 1);
    system.assert_consistent("match-leave").await;
}

#[tokio::test]
async fn test_rejoining_waitlist_gets_new_sequence() {
    let system = TestSystem::new();
    system.schedule("match-rejoin", 1, true).await;

    system.rsvp("match-rejoin", "holder", Admitted).await;
    system.rsvp("match-rejoin", "w1", Admitted).await;
    system.rsvp("match-rejoin", "w2", Admitted).await;
    system.rsvp("match-rejoin", "w1", Declined).await;

    let rejoin = system
        .manager
        .request_state("match-rejoin", "w1", Admitted)
        .await
        .unwrap();
    assert_eq!(rejoin.state, Waitlisted);
    assert_eq!(rejoin.waitlist_sequence, Some(3));
    assert_eq!(
        system.manager.list_waitlist("match-rejoin").await.unwrap(),
        vec!["w2", "w1"]
    );
}

#[tokio::test]
async fn test_repeated_requests_are_idempotent() {
    let system = TestSystem::new();
    system.schedule("match-idem", 1, true).await;

    system.rsvp("match-idem", "user1", Admitted).await;
    system.rsvp("match-idem", "user2", Admitted).await;
    system.published().await.clear();

    let again = system
        .manager
        .request_state("match-idem", "user1", Admitted)
        .await
        .unwrap();
    assert!(again.accepted);
    assert!(!again.changed());

    let queued_again = system
        .manager
        .request_state("match-idem", "user2", Admitted)
        .await
        .unwrap();
    assert_eq!(queued_again.state, Waitlisted);
    assert_eq!(queued_again.waitlist_sequence, Some(1));

    let state = system.manager.get_match("match-idem").await.unwrap();
    assert_eq!(state.admitted_count, 1);
    assert_eq!(state.waitlist_count, 1);
    assert_eq!(state.waitlist_sequence_counter, 1);
    let events = system.published().await;
    assert_eq!(events.count_events_of_type("ParticipantStateChanged"), 0);
    system.assert_consistent("match-idem").await;
}

#[tokio::test]
async fn test_tentative_participant_keeps_no_slot() {
    let system = TestSystem::new();
    system.schedule("match-tent", 2, true).await;

    assert_eq!(system.rsvp("match-tent", "user1", Tentative).await, Tentative);
    let state = system.manager.get_match("match-tent").await.unwrap();
    assert_eq!(state.admitted_count, 0);

    assert_eq!(system.rsvp("match-tent", "user1", Admitted).await, Admitted);
    assert_eq!(
        system.published().await.state_changes_for("user1"),
        vec![(Declined, Tentative), (Tentative, Admitted)]
    );
}

#[tokio::test]
async fn test_audit_trail_records_rsvps_and_promotions() {
    let system = TestSystem::new();
    system.schedule("match-audit", 1, true).await;

    system.rsvp("match-audit", "user1", Admitted).await;
    system.rsvp("match-audit", "user2", Admitted).await;
    system.rsvp("match-audit", "user1", Declined).await;

    let audit = system
        .manager
        .list_audit("match-audit", None)
        .await
        .unwrap();
    let rsvps = audit
        .iter()
        .filter(|r| r.action == AuditAction::Rsvp)
        .count();
    let promotions = audit
        .iter()
        .filter(|r| r.action == AuditAction::WaitlistAutopromote)
        .count();
    assert_eq!(rsvps, 3);
    assert_eq!(promotions, 1);
    assert!(audit.iter().all(|r| r.scope_id == "team-1"));

    let history = system
        .manager
        .participant_history("match-audit", "user2")
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().any(|r| matches!(
        &r.meta,
        AuditMeta::WaitlistAutopromote { promoted_user_id, from }
            if promoted_user_id == "user2" && *from == Waitlisted
    )));
    assert!(history.iter().any(|r| matches!(
        r.meta,
        AuditMeta::Rsvp {
            desired_state: Admitted,
            resulting_state: Waitlisted,
            ..
        }
    )));
}

#[tokio::test]
async fn test_manual_promote_next_results() {
    let system = TestSystem::new();
    system.schedule("match-manual", 1, true).await;

    let empty = system.manager.promote_next("match-manual").await.unwrap();
    assert_eq!(empty.result, PromotionResult::NoCandidate);
    assert!(!empty.promoted());

    system.rsvp("match-manual", "user1", Admitted).await;
    system.rsvp("match-manual", "user2", Admitted).await;

    let full = system.manager.promote_next("match-manual").await.unwrap();
    assert_eq!(full.result, PromotionResult::CapacityFull);
    assert_eq!(full.user_id.as_deref(), Some("user2"));
    assert!(!full.promoted());

    assert!(matches!(
        system.manager.promote_next("missing").await,
        Err(AttendanceError::MatchNotFound { .. })
    ));
}

#[tokio::test]
async fn test_unknown_match_and_bad_input_are_rejected() {
    let system = TestSystem::new();

    assert!(matches!(
        system
            .manager
            .request_state("missing", "user1", Admitted)
            .await,
        Err(AttendanceError::MatchNotFound { .. })
    ));

    system.schedule("match-err", 1, true).await;
    let empty_user = system.manager.request_state("match-err", "", Admitted).await;
    assert!(matches!(
        empty_user,
        Err(AttendanceError::InvalidArgument { .. })
    ));

    assert!(matches!(
        system
            .manager
            .schedule_match(match_attendance::ScheduleMatch {
                match_id: "match-err".to_string(),
                ..Default::default()
            })
            .await,
        Err(AttendanceError::MatchAlreadyExists { .. })
    ));
}

#[tokio::test]
async fn test_participant_listing_and_defaults() {
    let system = TestSystem::new();
    system.schedule("match-list", 2, true).await;

    for user in ["a", "b", "c", "d"] {
        system.rsvp("match-list", user, Admitted).await;
    }

    let participants = system
        .manager
        .list_participants("match-list", None)
        .await
        .unwrap();
    assert_eq!(participants.len(), 4);
    let admitted = participants.iter().filter(|p| p.state == Admitted).count();
    assert_eq!(admitted, 2);

    let limited = system
        .manager
        .list_participants("match-list", Some(1))
        .await
        .unwrap();
    assert_eq!(limited.len(), 1);

    assert_eq!(system.state_of("match-list", "nobody").await, None);
}

#[tokio::test]
async fn test_failed_auto_promotion_keeps_withdrawal() {
    let (system, faults) = TestSystem::with_failing_commits();
    system.schedule("match-fault", 1, true).await;
    system.rsvp("match-fault", "user1", Admitted).await;
    system.rsvp("match-fault", "user2", Admitted).await;

    // The withdrawal commits, the promotion right after it does not
    faults.fail_nth_commit(2);
    let outcome = system
        .manager
        .request_state("match-fault", "user1", Declined)
        .await
        .unwrap();

    assert_eq!(outcome.state, Declined);
    assert!(outcome.accepted);
    assert!(!outcome.auto_promoted);
    assert!(outcome.promotion.is_none());
    assert_eq!(system.manager.metrics().snapshot().auto_promotion_failures, 1);

    assert_eq!(
        system.manager.list_waitlist("match-fault").await.unwrap(),
        vec!["user2"]
    );
    let state = system.manager.get_match("match-fault").await.unwrap();
    assert_eq!(state.admitted_count, 0);
    assert_eq!(state.waitlist_count, 1);
    system.assert_consistent("match-fault").await;

    // The entry is still there for the sweeper
    let report = system.manager.sweep_waitlists().await.unwrap();
    assert_eq!(report.promoted, 1);
    assert_eq!(system.state_of("match-fault", "user2").await, Some(Admitted));
    assert_eq!(
        system.published().await.promoted_users(),
        vec!["user2".to_string()]
    );
    system.assert_consistent("match-fault").await;
}

#[tokio::test]
async fn test_conflict_surfaces_once_retries_are_spent() {
    let system = TestSystem::with_settings(AdmissionSettings {
        max_transaction_attempts: 1,
        enable_sweeper: false,
        ..Default::default()
    });
    system.schedule("match-busy", 2, true).await;
    system.rsvp("match-busy", "user1", Admitted).await;

    system.store.inject_conflicts(1);
    let result = system
        .manager
        .request_state("match-busy", "user2", Admitted)
        .await;

    assert!(matches!(
        result,
        Err(AttendanceError::TransactionConflict { .. })
    ));
    assert_eq!(system.store.conflict_count(), 1);
    assert_eq!(system.state_of("match-busy", "user2").await, None);

    let state = system.manager.get_match("match-busy").await.unwrap();
    assert_eq!(state.admitted_count, 1);
    assert_eq!(state.waitlist_count, 0);
    assert_eq!(state.waitlist_sequence_counter, 0);
    assert!(system.published().await.state_changes_for("user2").is_empty());

    // Nothing was half-applied, so the next attempt goes through
    assert_eq!(system.rsvp("match-busy", "user2", Admitted).await, Admitted);
    system.assert_consistent("match-busy").await;
}
