//! Match attendance: admission, waitlist and auto-promotion
//!
//! Every operation here is a read-validate-write transaction against the
//! document store. Nothing is cached in process, so any number of service
//! instances can serve the same match.

pub mod audit;
pub mod controller;
pub mod invariants;
pub mod ledger;
pub mod manager;
pub mod promotion;
pub mod registry;
pub mod retry;
pub mod sequence;
pub mod waitlist;

pub use audit::AuditRecorder;
pub use controller::{decide, AdmissionController, Decision};
pub use invariants::{InvariantReport, InvariantViolation};
pub use manager::{AttendanceManager, ScheduleMatch, SweepReport, DEFAULT_PARTICIPANT_LIMIT};
pub use promotion::AutoPromotionService;
pub use retry::RetryPolicy;
pub use waitlist::WaitlistQueue;
