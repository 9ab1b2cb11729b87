//! The real sentence-embedding model on the migraine scenario.

use std::sync::Arc;

use chartcoder::{CodingEngine, EmbeddingGenerator, FastEmbedGenerator, Settings};
use tempfile::TempDir;

use crate::fixtures::{mixed_catalog, scenario_catalog};

fn test_cache_dir(test_name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!(
        "chartcoder_test_fastembed_{test_name}_{}",
        std::process::id()
    ))
}

fn engine(dir: &TempDir, test_name: &str, k_min: usize, k_max: usize) -> CodingEngine {
    let generator =
        FastEmbedGenerator::new("AllMiniLML6V2", test_cache_dir(test_name), false).unwrap();
    assert_eq!(generator.dimension().get(), 384);

    let mut settings = Settings::default();
    settings.index_path = dir.path().join("index");
    settings.clustering.k_min = k_min;
    settings.clustering.k_max = k_max;
    CodingEngine::with_generator(settings, Arc::new(generator)).unwrap()
}

#[test]
#[ignore = "Downloads 86MB model - run with --ignored for embedding tests"]
fn test_fastembed_migraine_scenario() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir, "scenario", 2, 2);
    engine.build_catalog_index(&scenario_catalog()).unwrap();

    let best = engine.assign("patient reports recurrent migraines").unwrap();
    assert_eq!(best.code.id.as_str(), "G43.909");

    let candidates = engine
        .candidates("patient reports recurrent migraines")
        .unwrap();
    assert!(candidates[0].score > candidates[1].score);
}

#[test]
#[ignore = "Downloads 86MB model - run with --ignored for embedding tests"]
fn test_fastembed_paraphrases() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir, "paraphrases", 3, 6);
    engine.build_catalog_index(&mixed_catalog()).unwrap();

    let code_of = |note: &str| engine.assign(note).unwrap().code.id.to_string();
    assert!(code_of("high blood pressure").starts_with("I1"));
    assert!(code_of("wheezing and shortness of breath, uses inhaler").starts_with('J'));
    assert!(code_of("elevated blood sugar, on metformin").starts_with("E1"));
}
