//! Settings files driving a real engine.

use std::fs;

use chartcoder::{CodingEngine, CodingError, Linkage, Settings};
use tempfile::TempDir;

use crate::fixtures::{HASHING_DIMENSION, mixed_catalog};

#[test]
fn test_template_round_trips_to_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(".chartcoder").join("settings.toml");

    Settings::write_config_template(&path, false).unwrap();
    assert!(Settings::write_config_template(&path, false).is_err());
    Settings::write_config_template(&path, true).unwrap();

    let loaded = Settings::load_from(&path).unwrap();
    let defaults = Settings::default();
    assert_eq!(loaded.embedding, defaults.embedding);
    assert_eq!(loaded.clustering, defaults.clustering);
    assert_eq!(loaded.search, defaults.search);
}

#[test]
fn test_settings_file_configures_engine() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("settings.toml");
    let index = dir.path().join("custom-index");
    fs::write(
        &path,
        format!(
            r#"index_path = "{}"

[embedding]
model = "hashing"
hashing_dimension = {HASHING_DIMENSION}
batch_size = 5

[clustering]
k_min = 3
k_max = 4
linkage = "average"

[search]
parallel = false
"#,
            index.display()
        ),
    )
    .unwrap();

    let settings = Settings::load_from(&path).unwrap();
    assert_eq!(settings.clustering.linkage, Linkage::Average);
    assert!(!settings.search.parallel);

    let engine = CodingEngine::open(settings).unwrap();
    assert_eq!(engine.generator().dimension().get(), HASHING_DIMENSION);

    let report = engine.build_catalog_index(&mixed_catalog()).unwrap();
    assert!((3..=4).contains(&report.result.k));
    assert_eq!(report.manifest.linkage, Linkage::Average);
    assert!(report.generation.starts_with(&index));
    assert!(engine.assign("asthma exacerbation").is_ok());
}

#[test]
fn test_invalid_settings_fail_on_open() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("settings.toml");
    fs::write(&path, "[clustering]\nk_min = 9\nk_max = 4\n").unwrap();

    let settings = Settings::load_from(&path).unwrap();
    let error = CodingEngine::open(settings).unwrap_err();
    assert!(matches!(error, CodingError::Config { .. }));
    assert_eq!(error.status_code(), "CONFIG_ERROR");
}

#[test]
fn test_unknown_model_is_reported() {
    let mut settings = Settings::default();
    settings.embedding.model = "NotARealModel".to_string();

    assert!(matches!(
        CodingEngine::open(settings),
        Err(CodingError::Config { .. } | CodingError::Embedding { .. })
    ));
}

#[test]
fn test_malformed_toml_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("settings.toml");
    fs::write(&path, "[clustering\nk_min = ").unwrap();
    assert!(Settings::load_from(&path).is_err());
}
