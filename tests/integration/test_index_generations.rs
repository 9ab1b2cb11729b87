//! Persisted index generations: reload, swap, staleness and corruption.

use std::sync::Arc;

use chartcoder::{CodingEngine, CodingError, IndexStore};
use tempfile::TempDir;

use crate::fixtures::{
    NEUROLOGY_AND_MORE, built_engine, catalog_of, hashing, mixed_catalog, settings,
};

const NOTE: &str = "throbbing migraine with aura since this morning";

#[test]
fn test_reopened_engine_serves_published_index() {
    let dir = TempDir::new().unwrap();
    let expected = {
        let engine = built_engine(&dir);
        let expected = engine.assign(NOTE).unwrap();
        engine.close();
        expected
    };

    let engine = CodingEngine::open(settings(&dir, 2, 6)).unwrap();
    assert_eq!(engine.assign(NOTE).unwrap(), expected);

    let manifest = engine.manifest().unwrap();
    assert_eq!(manifest.code_count, mixed_catalog().len());
    assert_eq!(manifest.model_name, "hashing");
    assert!(engine.check_catalog(&mixed_catalog()).is_ok());
}

#[test]
fn test_rebuild_swaps_generation_and_prunes_old_one() {
    let dir = TempDir::new().unwrap();
    let engine = built_engine(&dir);
    let first = engine.store().current_generation().unwrap().unwrap();

    let smaller = catalog_of(&NEUROLOGY_AND_MORE[..6]);
    let report = engine.build_catalog_index(&smaller).unwrap();
    let second = engine.store().current_generation().unwrap().unwrap();

    assert_ne!(first, second);
    assert_eq!(report.generation, second);
    assert!(!first.exists());
    assert_eq!(engine.store().generations().unwrap().len(), 1);
    assert_eq!(engine.manifest().unwrap().code_count, 6);
}

#[test]
fn test_snapshot_outlives_rebuild() {
    let dir = TempDir::new().unwrap();
    let engine = built_engine(&dir);
    let before = engine.index().unwrap();

    engine
        .build_catalog_index(&catalog_of(&NEUROLOGY_AND_MORE[..6]))
        .unwrap();
    let after = engine.index().unwrap();

    assert!(!Arc::ptr_eq(&before, &after));
    assert_eq!(before.code_count(), NEUROLOGY_AND_MORE.len());
    assert_eq!(after.code_count(), 6);
}

#[test]
fn test_queries_run_during_rebuild() {
    let dir = TempDir::new().unwrap();
    let engine = built_engine(&dir);
    let catalog = mixed_catalog();

    std::thread::scope(|scope| {
        let readers: Vec<_> = (0..4)
            .map(|_| {
                scope.spawn(|| {
                    (0..20)
                        .map(|_| engine.assign(NOTE).map(|m| m.code.id.to_string()))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        scope.spawn(|| engine.build_catalog_index(&catalog).unwrap());

        for reader in readers {
            for result in reader.join().unwrap() {
                assert!(result.unwrap().starts_with("G43"));
            }
        }
    });
}

#[test]
fn test_first_load_races_rebuild() {
    let dir = TempDir::new().unwrap();
    built_engine(&dir).close();
    let catalog = mixed_catalog();

    // same engine: nothing loaded yet when the rebuild starts
    let engine = CodingEngine::open(settings(&dir, 2, 6)).unwrap();
    std::thread::scope(|scope| {
        let readers: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| engine.assign(NOTE)))
            .collect();
        scope.spawn(|| engine.build_catalog_index(&catalog).unwrap());

        for reader in readers {
            assert!(reader.join().unwrap().is_ok());
        }
    });

    // another engine publishing over the generation a fresh engine is reading
    let builder = CodingEngine::open(settings(&dir, 2, 6)).unwrap();
    std::thread::scope(|scope| {
        let readers: Vec<_> = (0..4)
            .map(|_| {
                scope.spawn(|| {
                    (0..5)
                        .map(|_| {
                            let fresh = CodingEngine::open(settings(&dir, 2, 6)).unwrap();
                            fresh.assign(NOTE).map(|m| m.code.id.to_string())
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        scope.spawn(|| {
            for _ in 0..2 {
                builder.build_catalog_index(&catalog).unwrap();
            }
        });

        for reader in readers {
            for result in reader.join().unwrap() {
                assert!(result.unwrap().starts_with("G43"));
            }
        }
    });
}

#[test]
fn test_changed_catalog_is_stale() {
    let dir = TempDir::new().unwrap();
    built_engine(&dir).close();

    let engine = CodingEngine::open(settings(&dir, 2, 6)).unwrap();
    let edited = catalog_of(&NEUROLOGY_AND_MORE[1..]);
    let error = engine.check_catalog(&edited).unwrap_err();

    assert!(matches!(error, CodingError::StaleIndex { .. }));
    assert_eq!(error.status_code(), "STALE_INDEX");
}

#[test]
fn test_assign_without_index_is_not_built() {
    let dir = TempDir::new().unwrap();
    let engine = CodingEngine::open(settings(&dir, 2, 6)).unwrap();

    let error = engine.assign(NOTE).unwrap_err();
    assert!(matches!(error, CodingError::NotBuilt { .. }));
    assert!(matches!(
        engine.check_catalog(&mixed_catalog()),
        Err(CodingError::NotBuilt { .. })
    ));
}

#[test]
fn test_other_embedding_width_is_dimension_mismatch() {
    let dir = TempDir::new().unwrap();
    built_engine(&dir).close();

    let mut narrower = settings(&dir, 2, 6);
    narrower.embedding.hashing_dimension = 512;
    let engine = CodingEngine::open(narrower).unwrap();

    assert!(matches!(
        engine.assign(NOTE),
        Err(CodingError::DimensionMismatch { actual: 512, .. })
    ));
}

#[test]
fn test_corrupt_pointer_does_not_block_rebuild() {
    let dir = TempDir::new().unwrap();
    built_engine(&dir).close();

    let config = settings(&dir, 2, 6);
    std::fs::write(config.index_dir().join("CURRENT"), "../../etc").unwrap();

    let engine = CodingEngine::with_generator(config, hashing()).unwrap();
    assert!(matches!(
        engine.assign(NOTE),
        Err(CodingError::Storage { .. })
    ));

    engine.build_catalog_index(&mixed_catalog()).unwrap();
    assert!(engine.assign(NOTE).is_ok());
    assert!(IndexStore::new(engine.store().root()).load().is_ok());
}

#[test]
fn test_csv_catalog_builds_end_to_end() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("codes.csv");
    let mut csv = String::from("icd_code,short_description,long_description\n");
    for (id, short, long) in NEUROLOGY_AND_MORE {
        csv.push_str(&format!("{id},\"{short}\",\"{long}\"\n"));
    }
    std::fs::write(&path, csv).unwrap();

    let catalog = chartcoder::Catalog::load(&path).unwrap();
    assert_eq!(catalog.fingerprint(), mixed_catalog().fingerprint());

    let engine = CodingEngine::open(settings(&dir, 2, 6)).unwrap();
    engine.build_catalog_index(&catalog).unwrap();
    assert!(engine.check_catalog(&mixed_catalog()).is_ok());
}
