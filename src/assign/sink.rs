//! Destinations for finished assignments.
//!
//! Chart and note persistence live outside this crate. The engine hands each
//! match to an [`AssignmentSink`] and stays unaware of how it is stored.

use std::collections::BTreeMap;
use std::io::Write;

use crate::assign::Match;
use crate::error::{CodingError, CodingResult};

/// Receives one match per assigned note.
pub trait AssignmentSink {
    fn record(&mut self, assignment: &Match) -> CodingResult<()>;
}

/// In-memory sink keyed by source id.
///
/// Recording a note again replaces its earlier assignment, so repeated
/// uploads of the same note leave one entry.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    assignments: BTreeMap<String, Match>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, source_id: &str) -> Option<&Match> {
        self.assignments.get(source_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Assignments ordered by source id.
    pub fn iter(&self) -> impl Iterator<Item = &Match> {
        self.assignments.values()
    }
}

impl AssignmentSink for MemorySink {
    fn record(&mut self, assignment: &Match) -> CodingResult<()> {
        self.assignments
            .insert(assignment.source_id.clone(), assignment.clone());
        Ok(())
    }
}

/// Writes one JSON object per line.
#[derive(Debug)]
pub struct JsonLinesSink<W: Write> {
    writer: W,
    written: usize,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, written: 0 }
    }

    /// Number of lines written so far.
    #[must_use]
    pub fn written(&self) -> usize {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> AssignmentSink for JsonLinesSink<W> {
    fn record(&mut self, assignment: &Match) -> CodingResult<()> {
        let to_storage = |e: &dyn std::fmt::Display| CodingError::storage("<assignment output>", e);

        serde_json::to_writer(&mut self.writer, assignment).map_err(|e| to_storage(&e))?;
        self.writer.write_all(b"\n").map_err(|e| to_storage(&e))?;
        self.writer.flush().map_err(|e| to_storage(&e))?;
        self.written += 1;
        Ok(())
    }
}
