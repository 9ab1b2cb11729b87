//! Two-code catalog: migraine versus epilepsy.

use chartcoder::{CodingEngine, Score};
use tempfile::TempDir;

use crate::fixtures::{scenario_catalog, settings};

const NOTE: &str = "patient reports recurrent migraines";

#[test]
fn test_two_codes_give_two_singleton_clusters() {
    let dir = TempDir::new().unwrap();
    let engine = CodingEngine::open(settings(&dir, 2, 2)).unwrap();

    let report = engine.build_catalog_index(&scenario_catalog()).unwrap();
    assert_eq!(report.result.k, 2);
    assert_eq!(report.result.scores.len(), 1);

    let summaries = engine.summaries().unwrap();
    assert_eq!(summaries.len(), 2);
    assert!(summaries.iter().all(|s| s.size == 1));
    assert_eq!(summaries[0].codes[0].id.as_str(), "G43.909");
    assert_eq!(summaries[1].codes[0].id.as_str(), "G40.909");
}

#[test]
fn test_migraine_note_gets_migraine_code() {
    let dir = TempDir::new().unwrap();
    let engine = CodingEngine::open(settings(&dir, 2, 2)).unwrap();
    engine.build_catalog_index(&scenario_catalog()).unwrap();

    let best = engine.assign(NOTE).unwrap();
    assert_eq!(best.code.id.as_str(), "G43.909");
    assert!(best.source_id.starts_with("note-"));

    let candidates = engine.candidates(NOTE).unwrap();
    assert_eq!(candidates.len(), 2);
    let epilepsy = candidates
        .iter()
        .find(|c| c.code.id.as_str() == "G40.909")
        .unwrap();
    assert!(best.score > epilepsy.score);
}

#[test]
fn test_scores_stay_in_unit_interval() {
    let dir = TempDir::new().unwrap();
    let engine = CodingEngine::open(settings(&dir, 2, 2)).unwrap();
    engine.build_catalog_index(&scenario_catalog()).unwrap();

    for note in [NOTE, "seizure overnight", "x"] {
        for candidate in engine.candidates(note).unwrap() {
            assert!(candidate.score >= Score::zero() && candidate.score <= Score::one());
        }
    }
}
