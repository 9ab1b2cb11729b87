//! Picking the single best code among per-cluster candidates.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::catalog::Code;
use crate::vector::{ClusterId, Score};

/// Best code of one cluster for one note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(rename = "cluster_id")]
    pub cluster: ClusterId,
    #[serde(flatten)]
    pub code: Code,
    pub score: Score,
}

/// Final assignment of a code to a piece of note text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    /// Identifier of the note the text came from
    pub source_id: String,
    #[serde(flatten)]
    pub code: Code,
    pub score: Score,
    /// Cluster the code was found in
    #[serde(rename = "cluster_id")]
    pub cluster: ClusterId,
}

/// Reducer order: higher score first, then smaller cluster id, then smaller
/// code id.
pub fn compare(a: &Candidate, b: &Candidate) -> Ordering {
    b.score
        .cmp(&a.score)
        .then_with(|| a.cluster.cmp(&b.cluster))
        .then_with(|| a.code.id.cmp(&b.code.id))
}

/// Sorts candidates into reducer order.
pub fn rank(candidates: &mut [Candidate]) {
    candidates.sort_by(compare);
}

/// Returns the best candidate as a match for `source_id`.
///
/// There is no confidence threshold: any non-empty input yields a match.
/// Returns `None` only for an empty input.
pub fn reduce(
    source_id: &str,
    candidates: impl IntoIterator<Item = Candidate>,
) -> Option<Match> {
    candidates
        .into_iter()
        .min_by(compare)
        .map(|best| Match {
            source_id: source_id.to_string(),
            code: best.code,
            score: best.score,
            cluster: best.cluster,
        })
}
