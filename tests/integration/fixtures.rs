//! Catalogs and settings shared by the integration tests.

use std::sync::Arc;

use chartcoder::vector::HASHING_MODEL_NAME;
use chartcoder::{
    Catalog, Code, CodingEngine, EmbeddingGenerator, HashingEmbeddingGenerator, Settings,
    VectorDimension,
};
use tempfile::TempDir;

/// Wide enough that trigram collisions do not decide any test.
pub const HASHING_DIMENSION: usize = 4096;

pub const NEUROLOGY_AND_MORE: &[(&str, &str, &str)] = &[
    (
        "G43.909",
        "Migraine, unsp, not intractable",
        "Migraine, unspecified, not intractable, without status migrainosus",
    ),
    (
        "G43.009",
        "Migraine w/o aura, not intractable",
        "Migraine without aura, not intractable, without status migrainosus",
    ),
    (
        "G43.109",
        "Migraine with aura, not intractable",
        "Migraine with aura, not intractable, without status migrainosus",
    ),
    (
        "G40.909",
        "Epilepsy, unsp, not intractable",
        "Epilepsy, unspecified, not intractable, without status epilepticus",
    ),
    ("R51.9", "Headache, unspecified", "Headache, unspecified"),
    (
        "J45.909",
        "Unspecified asthma, uncomplicated",
        "Unspecified asthma, uncomplicated",
    ),
    (
        "J45.20",
        "Mild intermittent asthma, uncomplicated",
        "Mild intermittent asthma, uncomplicated",
    ),
    (
        "J44.9",
        "Chronic obstructive pulmonary disease, unsp",
        "Chronic obstructive pulmonary disease, unspecified",
    ),
    (
        "E11.9",
        "Type 2 diabetes mellitus w/o complications",
        "Type 2 diabetes mellitus without complications",
    ),
    (
        "E10.9",
        "Type 1 diabetes mellitus w/o complications",
        "Type 1 diabetes mellitus without complications",
    ),
    (
        "I10",
        "Essential (primary) hypertension",
        "Essential (primary) hypertension",
    ),
    (
        "I11.9",
        "Hypertensive heart disease w/o heart failure",
        "Hypertensive heart disease without heart failure",
    ),
];

pub fn catalog_of(rows: &[(&str, &str, &str)]) -> Catalog {
    let codes = rows
        .iter()
        .map(|(id, short, long)| Code::new(*id, *short, *long).unwrap())
        .collect();
    Catalog::new(codes).unwrap()
}

pub fn mixed_catalog() -> Catalog {
    catalog_of(NEUROLOGY_AND_MORE)
}

/// The two-code migraine/epilepsy catalog.
pub fn scenario_catalog() -> Catalog {
    catalog_of(&[
        (
            "G43.909",
            "Migraine unsp",
            "Migraine, unspecified, not intractable",
        ),
        (
            "G40.909",
            "Epilepsy unsp",
            "Epilepsy, unspecified, not intractable",
        ),
    ])
}

/// Settings using the offline hashing provider with the index under `dir`.
pub fn settings(dir: &TempDir, k_min: usize, k_max: usize) -> Settings {
    let mut settings = Settings::default();
    settings.index_path = dir.path().join("index");
    settings.embedding.model = HASHING_MODEL_NAME.to_string();
    settings.embedding.hashing_dimension = HASHING_DIMENSION;
    settings.clustering.k_min = k_min;
    settings.clustering.k_max = k_max;
    settings
}

pub fn hashing() -> Arc<dyn EmbeddingGenerator> {
    Arc::new(HashingEmbeddingGenerator::new(
        VectorDimension::new(HASHING_DIMENSION).unwrap(),
    ))
}

/// Engine with the mixed catalog already built, k searched over [2, 6].
pub fn built_engine(dir: &TempDir) -> CodingEngine {
    let engine = CodingEngine::open(settings(dir, 2, 6)).unwrap();
    engine.build_catalog_index(&mixed_catalog()).unwrap();
    engine
}
