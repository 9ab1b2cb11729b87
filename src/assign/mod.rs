//! Assigning codes to clinical note text.
//!
//! [`SearchCoordinator`] fans a note out over every cluster index, the
//! reducer picks the winner, and an [`AssignmentSink`] receives the result.

mod coordinator;
pub mod reducer;
mod sink;

pub use coordinator::{SearchCoordinator, note_source_id};
pub use reducer::{Candidate, Match, reduce};
pub use sink::{AssignmentSink, JsonLinesSink, MemorySink};
