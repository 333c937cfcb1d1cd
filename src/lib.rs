//! Match attendance - capacity-bounded admission with a FIFO waitlist
//!
//! This crate provides the RSVP protocol for scheduled matches: participants ask
//! to attend, are admitted while slots remain, queue on a waitlist once the
//! match is full and are promoted automatically when a slot frees up. All state
//! lives in a transactional document store, so concurrent callers never
//! over-admit and no queued participant is skipped.

pub mod amqp;
pub mod api;
pub mod attendance;
pub mod config;
pub mod error;
pub mod metrics;
pub mod service;
pub mod store;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{AttendanceError, Result};
pub use types::*;

// Re-export key components
pub use amqp::publisher::{EventPublisher, NoopEventPublisher};
pub use attendance::{AttendanceManager, ScheduleMatch};
pub use store::{DocumentStore, InMemoryDocumentStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
