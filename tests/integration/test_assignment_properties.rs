//! Behavioral guarantees of building and assigning over a mixed catalog.

use std::collections::BTreeSet;

use chartcoder::{ClusterBuilder, CodingEngine, CodingError, MemorySink, note_source_id};
use tempfile::TempDir;

use crate::fixtures::{built_engine, hashing, mixed_catalog, settings};

const NOTES: &[&str] = &[
    "patient reports recurrent migraines with visual aura",
    "wheezing, known asthma, uses albuterol inhaler",
    "fasting glucose elevated, type 2 diabetes follow up",
    "blood pressure 160/100, essential hypertension",
    "generalized seizure last night, history of epilepsy",
];

#[test]
fn test_every_code_lands_in_exactly_one_cluster() {
    let dir = TempDir::new().unwrap();
    let engine = built_engine(&dir);
    let catalog = mixed_catalog();

    let summaries = engine.summaries().unwrap();
    let mut seen: Vec<String> = summaries
        .iter()
        .flat_map(|s| s.codes.iter().map(|c| c.id.to_string()))
        .collect();
    let total = seen.len();
    seen.sort();
    seen.dedup();

    assert_eq!(total, catalog.len());
    assert_eq!(seen.len(), catalog.len());
    assert!(summaries.iter().all(|s| s.size == s.codes.len() && s.size > 0));
}

#[test]
fn test_build_is_deterministic() {
    let catalog = mixed_catalog();
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();

    let a = CodingEngine::open(settings(&first, 2, 6))
        .unwrap()
        .build_catalog_index(&catalog)
        .unwrap();
    let b = CodingEngine::open(settings(&second, 2, 6))
        .unwrap()
        .build_catalog_index(&catalog)
        .unwrap();

    assert_eq!(a.result.k, b.result.k);
    assert_eq!(a.result.assignments, b.result.assignments);
    assert_eq!(a.result.scores, b.result.scores);
}

#[test]
fn test_builder_and_engine_agree() {
    let dir = TempDir::new().unwrap();
    let config = settings(&dir, 2, 6);
    let catalog = mixed_catalog();

    let standalone = ClusterBuilder::new(hashing(), config.clustering.clone(), 4)
        .build(&catalog)
        .unwrap();
    let report = CodingEngine::open(config)
        .unwrap()
        .build_catalog_index(&catalog)
        .unwrap();

    assert_eq!(standalone.k, report.result.k);
    assert_eq!(standalone.assignments, report.result.assignments);
    let silhouettes: BTreeSet<usize> = standalone.scores.iter().map(|s| s.k).collect();
    assert_eq!(silhouettes, (2..=6).collect());
}

#[test]
fn test_match_score_is_best_candidate_score() {
    let dir = TempDir::new().unwrap();
    let engine = built_engine(&dir);
    let catalog = mixed_catalog();

    for note in NOTES {
        let best = engine.assign(note).unwrap();
        let candidates = engine.candidates(note).unwrap();
        let max = candidates.iter().map(|c| c.score).max().unwrap();

        assert_eq!(best.score, max, "note: {note}");
        assert!(catalog.get(&best.code.id).is_some());
        assert_eq!(candidates.len(), engine.summaries().unwrap().len());
    }
}

#[test]
fn test_own_description_finds_itself() {
    let dir = TempDir::new().unwrap();
    let engine = built_engine(&dir);

    for code in mixed_catalog().iter() {
        let best = engine.assign(&code.long_description).unwrap();
        assert_eq!(best.code.id, code.id);

        let candidates = engine.candidates(&code.long_description).unwrap();
        assert!(candidates.iter().all(|c| c.score <= best.score));
    }
}

#[test]
fn test_repeated_assignment_is_identical() {
    let dir = TempDir::new().unwrap();
    let engine = built_engine(&dir);

    for note in NOTES {
        let first = engine.assign(note).unwrap();
        let second = engine.assign(note).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.source_id, note_source_id(note));
    }
}

#[test]
fn test_expected_codes_for_clinical_notes() {
    let dir = TempDir::new().unwrap();
    let engine = built_engine(&dir);

    let code_of = |note: &str| engine.assign(note).unwrap().code.id.to_string();
    assert!(code_of("patient reports recurrent migraines with visual aura").starts_with("G43"));
    assert!(code_of("mild intermittent asthma, uncomplicated").starts_with("J45"));
    assert!(code_of("type 1 diabetes mellitus").starts_with("E10"));
}

#[test]
fn test_batch_keeps_order_and_isolates_failures() {
    let dir = TempDir::new().unwrap();
    let engine = built_engine(&dir);

    let batch = [NOTES[0], "", NOTES[1], "   ", NOTES[2]];
    let results = engine.assign_many(&batch);

    assert_eq!(results.len(), batch.len());
    for (note, result) in batch.iter().zip(&results) {
        if note.trim().is_empty() {
            assert!(matches!(result, Err(CodingError::Embedding { .. })));
        } else {
            assert_eq!(result.as_ref().unwrap(), &engine.assign(note).unwrap());
        }
    }
}

#[test]
fn test_recording_the_same_note_twice_keeps_one_assignment() {
    let dir = TempDir::new().unwrap();
    let engine = built_engine(&dir);
    let mut sink = MemorySink::new();

    let results = engine.assign_many_and_record(&[NOTES[0], NOTES[1], NOTES[0]], &mut sink);
    assert!(results.iter().all(Result::is_ok));
    assert_eq!(sink.len(), 2);

    let recorded = sink.get(&note_source_id(NOTES[0])).unwrap();
    assert_eq!(recorded, results[0].as_ref().unwrap());
}

#[test]
fn test_empty_catalog_is_rejected() {
    let dir = TempDir::new().unwrap();
    let engine = CodingEngine::open(settings(&dir, 2, 2)).unwrap();
    let empty = chartcoder::Catalog::new(Vec::new()).unwrap();

    assert!(matches!(
        engine.build_catalog_index(&empty),
        Err(CodingError::Data { .. })
    ));
    assert!(!engine.store().exists());
}

#[test]
fn test_empty_note_is_rejected() {
    let dir = TempDir::new().unwrap();
    let engine = built_engine(&dir);

    for note in ["", " ", "\n\t"] {
        let error = engine.assign(note).unwrap_err();
        assert!(matches!(error, CodingError::Embedding { .. }));
        assert_eq!(error.status_code(), "EMBEDDING_ERROR");
    }
}

#[test]
fn test_k_range_beyond_catalog_is_config_error() {
    let dir = TempDir::new().unwrap();
    let engine = CodingEngine::open(settings(&dir, 2, 50)).unwrap();

    let error = engine.build_catalog_index(&mixed_catalog()).unwrap_err();
    assert!(matches!(error, CodingError::Config { .. }));
    assert!(!error.recovery_suggestions().is_empty());
}
