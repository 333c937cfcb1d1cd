//! Waitlist sequence allocation
//!
//! Sequence numbers come from the match's persisted `waitlist_sequence_counter`
//! and are only ever minted inside the transaction that persists the new counter.

use crate::types::MatchAdmission;

/// Mint the next waitlist sequence for `state`, advancing its counter
pub fn allocate(state: &mut MatchAdmission) -> u64 {
    state.waitlist_sequence_counter += 1;
    state.waitlist_sequence_counter
}
