//! RSVP Load Generator
//!
//! Drives concurrent RSVP traffic against an in-memory store and verifies the
//! admission invariants afterwards.
//!
//! Usage:
//!   cargo run --bin rsvp-load -- --help
//!   cargo run --bin rsvp-load -- --capacity 10 --users 50 --rounds 5
//!   cargo run --bin rsvp-load -- --capacity 4 --users 40 --no-waitlist

use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Result};
use clap::Parser;
use match_attendance::attendance::{AttendanceManager, ScheduleMatch};
use match_attendance::config::AdmissionSettings;
use match_attendance::metrics::MetricsCollector;
use match_attendance::{
    AttendanceError, InMemoryDocumentStore, NoopEventPublisher, ParticipationState,
};
use tokio::task::JoinSet;

#[derive(Parser)]
#[command(name = "rsvp-load")]
#[command(about = "Concurrent RSVP load generator with invariant verification")]
struct Cli {
    /// Match identifier to schedule
    #[arg(long, default_value = "load-match")]
    match_id: String,

    /// Admitted slots for the match
    #[arg(short, long, default_value = "10")]
    capacity: u32,

    /// Number of distinct users
    #[arg(short, long, default_value = "50")]
    users: usize,

    /// Rounds of requests; every user sends one request per round
    #[arg(short, long, default_value = "3")]
    rounds: usize,

    /// Schedule the match with the waitlist switched off
    #[arg(long)]
    no_waitlist: bool,

    /// Transaction attempts before a conflict is surfaced
    #[arg(long, default_value = "25")]
    max_attempts: u32,
}

/// Deterministic request mix: mostly joins, with withdrawals to churn slots
fn desired_state(user: usize, round: usize) -> ParticipationState {
    match (user * 7 + round * 3) % 10 {
        0..=5 => ParticipationState::Admitted,
        6 => ParticipationState::Waitlisted,
        7 | 8 => ParticipationState::Declined,
        _ => ParticipationState::Tentative,
    }
}

#[derive(Default)]
struct RoundTally {
    requests: usize,
    accepted: usize,
    auto_promoted: usize,
    rejected: usize,
    errors: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    if cli.capacity == 0 {
        bail!("capacity must be greater than zero");
    }

    let settings = AdmissionSettings {
        max_transaction_attempts: cli.max_attempts,
        enable_sweeper: false,
        ..Default::default()
    };
    let store = Arc::new(InMemoryDocumentStore::new());
    let metrics = Arc::new(MetricsCollector::new()?);
    let manager = Arc::new(AttendanceManager::with_settings(
        store.clone(),
        Arc::new(NoopEventPublisher),
        settings,
        metrics,
    ));

    manager
        .schedule_match(ScheduleMatch {
            match_id: cli.match_id.clone(),
            capacity: Some(cli.capacity),
            waitlist_enabled: Some(!cli.no_waitlist),
            ..Default::default()
        })
        .await?;

    println!(
        "🎯 Match '{}' scheduled: capacity {}, waitlist {}",
        cli.match_id,
        cli.capacity,
        if cli.no_waitlist { "off" } else { "on" }
    );

    let started = Instant::now();
    let mut tally = RoundTally::default();

    for round in 0..cli.rounds {
        let mut tasks = JoinSet::new();
        for user in 0..cli.users {
            let manager = manager.clone();
            let match_id = cli.match_id.clone();
            let desired = desired_state(user, round);
            tasks.spawn(async move {
                manager
                    .request_state(&match_id, &format!("user-{}", user), desired)
                    .await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            tally.requests += 1;
            match joined? {
                Ok(outcome) => {
                    if outcome.accepted {
                        tally.accepted += 1;
                    }
                    if outcome.promotion.as_ref().is_some_and(|p| p.promoted()) {
                        tally.auto_promoted += 1;
                    }
                }
                Err(AttendanceError::WaitlistDisabled { .. }) => tally.rejected += 1,
                Err(e) => {
                    tally.errors += 1;
                    eprintln!("❌ request failed: {}", e);
                }
            }
        }

        let state = manager.get_match(&cli.match_id).await?;
        println!(
            "  round {}: admitted {}/{} ({} free) waitlisted {}",
            round + 1,
            state.admitted_count,
            state.capacity,
            state.free_slots(),
            state.waitlist_count
        );
    }

    let elapsed = started.elapsed();
    let report = manager.check_invariants(&cli.match_id).await?;

    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!(
        "📊 {} requests in {:.2?} ({:.0} req/s)",
        tally.requests,
        elapsed,
        tally.requests as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
    );
    println!(
        "   accepted {} | auto-promoted {} | waitlist rejected {} | errors {}",
        tally.accepted, tally.auto_promoted, tally.rejected, tally.errors
    );
    println!(
        "   commits {} | conflicts {}",
        store.commit_count(),
        store.conflict_count()
    );
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.is_consistent() {
        bail!("{} invariant violations detected", report.violations.len());
    }

    println!("✅ Invariants hold");
    Ok(())
}
