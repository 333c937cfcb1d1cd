//! Concurrent request handling against a shared store
//!
//! Requests are spawned onto a multi-threaded runtime so transactions really
//! interleave and conflict; the counters must still match the records.

mod fixtures;

use fixtures::TestSystem;
use futures::future::join_all;
use match_attendance::attendance::AutoPromotionService;
use match_attendance::metrics::MetricsCollector;
use match_attendance::store::{Document, DocumentKey};
use match_attendance::types::{ParticipationState, PromotionResult, WaitlistEntry};
use std::sync::Arc;

use ParticipationState::{Admitted, Declined, Waitlisted};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_admissions_never_exceed_capacity() {
    let system = TestSystem::contended();
    system.schedule("race", 2, true).await;

    let handles = (0..5).map(|i| {
        let manager = system.manager.clone();
        tokio::spawn(async move {
            manager
                .request_state("race", &format!("user{}", i), Admitted)
                .await
        })
    });
    let outcomes: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.expect("task panicked").expect("request failed"))
        .collect();

    let admitted = outcomes.iter().filter(|o| o.state == Admitted).count();
    let waitlisted = outcomes.iter().filter(|o| o.state == Waitlisted).count();
    assert_eq!(admitted, 2);
    assert_eq!(waitlisted, 3);

    let mut sequences: Vec<u64> = outcomes
        .iter()
        .filter_map(|o| o.waitlist_sequence)
        .collect();
    sequences.sort_unstable();
    assert_eq!(sequences, vec![1, 2, 3]);

    let state = system.manager.get_match("race").await.unwrap();
    assert_eq!(state.admitted_count, 2);
    assert_eq!(state.waitlist_count, 3);
    system.assert_consistent("race").await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_promotions_admit_candidate_once() {
    let system = TestSystem::contended();
    system.schedule("double", 1, true).await;

    system.rsvp("double", "holder", Admitted).await;
    system.rsvp("double", "filler1", Admitted).await;
    system.rsvp("double", "filler2", Admitted).await;
    assert_eq!(system.rsvp("double", "user2", Admitted).await, Waitlisted);

    // Free the slot and drop the earlier entries without triggering promotion
    // through the holder, so user2 (sequence 3) is the head.
    system.rsvp("double", "filler1", Declined).await;
    system.rsvp("double", "filler2", Declined).await;
    let queue = system.manager.list_waitlist("double").await.unwrap();
    assert_eq!(queue, vec!["user2"]);

    let promoter = Arc::new(AutoPromotionService::new(
        system.store.clone(),
        system.manager.settings().retry_policy(),
        Arc::new(MetricsCollector::new().unwrap()),
    ));

    // The holder's withdrawal races two explicit promotions for user2
    let withdraw = {
        let manager = system.manager.clone();
        tokio::spawn(async move { manager.request_state("double", "holder", Declined).await })
    };
    let racers = (0..2).map(|_| {
        let promoter = promoter.clone();
        tokio::spawn(async move { promoter.promote_candidate("double", "user2").await })
    });
    let results: Vec<_> = join_all(racers)
        .await
        .into_iter()
        .map(|joined| joined.expect("task panicked").expect("promotion failed"))
        .collect();
    withdraw.await.unwrap().unwrap();

    let promoted = results
        .iter()
        .filter(|o| o.result == PromotionResult::Promoted)
        .count();
    assert!(promoted <= 1);
    assert!(results.iter().all(|o| o.promoted() || o.result == PromotionResult::CapacityFull));

    let state = system.manager.get_match("double").await.unwrap();
    assert_eq!(state.admitted_count, 1);
    assert_eq!(state.waitlist_count, 0);
    assert_eq!(system.state_of("double", "user2").await, Some(Admitted));
    system.assert_consistent("double").await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_promote_next_consumes_each_entry_once() {
    let system = TestSystem::contended();
    system.schedule("drain", 3, true).await;

    for user in ["a", "b", "c"] {
        system.rsvp("drain", user, Admitted).await;
    }
    for user in ["w1", "w2", "w3", "w4"] {
        system.rsvp("drain", user, Admitted).await;
    }

    // Withdraw all holders concurrently; each frees a slot and triggers a promotion
    let handles = ["a", "b", "c"].into_iter().map(|user| {
        let manager = system.manager.clone();
        tokio::spawn(async move { manager.request_state("drain", user, Declined).await })
    });
    for joined in join_all(handles).await {
        joined.unwrap().unwrap();
    }
    // Anything a lost race left behind is picked up by the sweeper
    system.manager.sweep_waitlists().await.unwrap();

    assert_eq!(system.manager.list_waitlist("drain").await.unwrap(), vec!["w4"]);
    for user in ["w1", "w2", "w3"] {
        assert_eq!(system.state_of("drain", user).await, Some(Admitted));
    }

    let mut promoted = system.published().await.promoted_users();
    promoted.sort();
    assert_eq!(promoted, vec!["w1", "w2", "w3"]);

    let state = system.manager.get_match("drain").await.unwrap();
    assert_eq!(state.admitted_count, 3);
    assert_eq!(state.waitlist_count, 1);
    system.assert_consistent("drain").await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mixed_traffic_keeps_invariants() {
    let system = TestSystem::contended();
    system.schedule("mixed", 3, true).await;

    for round in 0..4 {
        let handles = (0..12).map(|i| {
            let manager = system.manager.clone();
            let desired = if (i + round) % 3 == 0 { Declined } else { Admitted };
            tokio::spawn(async move {
                manager
                    .request_state("mixed", &format!("user{}", i), desired)
                    .await
            })
        });
        for joined in join_all(handles).await {
            joined.unwrap().unwrap();
        }
    }
    system.manager.sweep_waitlists().await.unwrap();

    let state = system.manager.get_match("mixed").await.unwrap();
    assert!(state.admitted_count <= state.capacity);
    if state.waitlist_count > 0 {
        assert_eq!(state.admitted_count, state.capacity);
    }
    system.assert_consistent("mixed").await;
}

/// Simulate a withdrawal whose inline promotion never ran
async fn free_slot_without_promotion(system: &TestSystem, match_id: &str, holder: &str) {
    let mut state = system.manager.get_match(match_id).await.unwrap();
    state.admitted_count -= 1;
    system
        .store
        .put(DocumentKey::match_state(match_id), Document::Match(state))
        .await;

    let mut record = system
        .manager
        .get_participant(match_id, holder)
        .await
        .unwrap()
        .expect("holder record");
    record.previous_state = Some(record.state);
    record.state = Declined;
    system
        .store
        .put(
            DocumentKey::participant(match_id, holder),
            Document::Participant(record),
        )
        .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_promote_next_counts_candidate_once() {
    let system = TestSystem::contended();
    system.schedule("scenario-d", 1, true).await;

    system.rsvp("scenario-d", "user1", Admitted).await;
    system.rsvp("scenario-d", "user2", Admitted).await;
    free_slot_without_promotion(&system, "scenario-d", "user1").await;

    let racers = (0..2).map(|_| {
        let manager = system.manager.clone();
        tokio::spawn(async move { manager.promote_next("scenario-d").await })
    });
    let results: Vec<_> = join_all(racers)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    let promoted = results
        .iter()
        .filter(|o| o.result == PromotionResult::Promoted)
        .count();
    assert_eq!(promoted, 1);
    // The loser either saw the entry consumed or found the queue already empty
    assert!(results
        .iter()
        .all(|o| o.promoted() || o.result == PromotionResult::NoCandidate));

    let state = system.manager.get_match("scenario-d").await.unwrap();
    assert_eq!(state.admitted_count, 1);
    assert_eq!(state.waitlist_count, 0);
    assert_eq!(
        system.published().await.promoted_users(),
        vec!["user2".to_string()]
    );
    system.assert_consistent("scenario-d").await;
}

#[tokio::test]
async fn test_stale_entry_for_admitted_user_is_cleared() {
    let system = TestSystem::new();
    system.schedule("stale", 2, true).await;
    system.rsvp("stale", "user1", Admitted).await;

    // Leftover entry for a user who is already admitted
    let mut state = system.manager.get_match("stale").await.unwrap();
    state.waitlist_sequence_counter += 1;
    state.waitlist_count += 1;
    let sequence = state.waitlist_sequence_counter;
    let created_at = state.created_at;
    system
        .store
        .put(DocumentKey::match_state("stale"), Document::Match(state))
        .await;
    system
        .store
        .put(
            DocumentKey::waitlist("stale", "user1"),
            Document::Waitlist(WaitlistEntry {
                match_id: "stale".to_string(),
                user_id: "user1".to_string(),
                sequence,
                created_at,
            }),
        )
        .await;

    let outcome = system.manager.promote_next("stale").await.unwrap();
    assert_eq!(outcome.result, PromotionResult::StaleEntryCleared);
    assert!(outcome.promoted());

    let state = system.manager.get_match("stale").await.unwrap();
    assert_eq!(state.admitted_count, 1);
    assert_eq!(state.waitlist_count, 0);
    assert!(system.published().await.promoted_users().is_empty());
    system.assert_consistent("stale").await;
}
