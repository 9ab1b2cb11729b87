//! The engine context tying settings, embeddings and indexes together.
//!
//! A [`CodingEngine`] is created explicitly and passed around; there is no
//! global state. Tests build engines around their own embedding provider
//! with [`CodingEngine::with_generator`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use crate::assign::{AssignmentSink, Candidate, Match, SearchCoordinator};
use crate::catalog::Catalog;
use crate::config::{EmbeddingConfig, Settings};
use crate::error::{CodingError, CodingResult};
use crate::index::{
    ClusterBuilder, ClusterSummary, ClusteringResult, IndexHandle, IndexManifest, IndexSet,
    IndexStore,
};
use crate::vector::{
    EmbeddingGenerator, FastEmbedGenerator, HASHING_MODEL_NAME, HashingEmbeddingGenerator,
    VectorDimension, default_models_dir,
};

/// Outcome of [`CodingEngine::build_catalog_index`].
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub result: ClusteringResult,
    pub manifest: IndexManifest,
    /// Directory of the published generation
    pub generation: PathBuf,
    pub elapsed: Duration,
}

/// Creates the embedding provider named by `config.model`.
pub fn create_generator(config: &EmbeddingConfig) -> CodingResult<Arc<dyn EmbeddingGenerator>> {
    if config.model == HASHING_MODEL_NAME {
        let dimension = VectorDimension::new(config.hashing_dimension)?;
        return Ok(Arc::new(HashingEmbeddingGenerator::new(dimension)));
    }

    let cache_dir = config.cache_dir.clone().unwrap_or_else(default_models_dir);
    let generator =
        FastEmbedGenerator::new(&config.model, cache_dir, console::user_attended_stderr())?;
    Ok(Arc::new(generator))
}

/// Code assignment engine.
pub struct CodingEngine {
    settings: Settings,
    generator: Arc<dyn EmbeddingGenerator>,
    store: IndexStore,
    handle: IndexHandle,
    manifest: RwLock<Option<IndexManifest>>,
    build_lock: Mutex<()>,
}

impl std::fmt::Debug for CodingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodingEngine")
            .field("model", &self.generator.model_name())
            .field("index_root", &self.store.root())
            .field("loaded", &self.handle.snapshot().is_some())
            .finish()
    }
}

impl CodingEngine {
    /// Opens an engine with the provider configured in `settings`.
    ///
    /// The persisted index is loaded lazily on first use.
    pub fn open(settings: Settings) -> CodingResult<Self> {
        settings.validate()?;
        let generator = create_generator(&settings.embedding)?;
        Self::with_generator(settings, generator)
    }

    /// Opens an engine around an explicit embedding provider.
    pub fn with_generator(
        settings: Settings,
        generator: Arc<dyn EmbeddingGenerator>,
    ) -> CodingResult<Self> {
        settings.validate()?;
        let store = IndexStore::new(settings.index_dir());

        tracing::debug!(
            model = generator.model_name(),
            dimension = generator.dimension().get(),
            index = %store.root().display(),
            "opened coding engine"
        );

        Ok(Self {
            settings,
            generator,
            store,
            handle: IndexHandle::new(),
            manifest: RwLock::new(None),
            build_lock: Mutex::new(()),
        })
    }

    /// Releases the engine. In-flight snapshots held elsewhere stay valid.
    pub fn close(self) {
        tracing::debug!(index = %self.store.root().display(), "closed coding engine");
    }

    /// Embeds and clusters `catalog`, publishes the new index generation and
    /// swaps it in.
    ///
    /// Queries running during the build keep using the previous index set.
    pub fn build_catalog_index(&self, catalog: &Catalog) -> CodingResult<BuildReport> {
        let _guard = self.build_lock.lock();
        let started = Instant::now();

        tracing::info!(
            codes = catalog.len(),
            model = self.generator.model_name(),
            "building catalog index"
        );

        let builder = ClusterBuilder::new(
            self.generator.clone(),
            self.settings.clustering.clone(),
            self.settings.embedding.batch_size,
        );
        let embeddings = builder.embed_catalog(catalog)?;
        let result = builder.build_with_embeddings(catalog, &embeddings)?;

        let set = IndexSet::build(catalog, &result, embeddings, self.generator.dimension())?;
        let manifest = IndexManifest::new(
            &result,
            &set,
            self.generator.model_name(),
            self.settings.clustering.linkage,
        );
        let generation = self.store.publish(&set, &manifest)?;

        self.handle.install(set);
        *self.manifest.write() = Some(manifest.clone());

        let elapsed = started.elapsed();
        tracing::info!(
            k = result.k,
            silhouette = result.silhouette,
            elapsed_ms = elapsed.as_millis() as u64,
            "catalog index ready"
        );

        Ok(BuildReport {
            result,
            manifest,
            generation,
            elapsed,
        })
    }

    /// Best code for `note_text`.
    pub fn assign(&self, note_text: &str) -> CodingResult<Match> {
        self.coordinator()?.assign(note_text)
    }

    /// Best code for `note_text`, recorded under `note_id`.
    pub fn assign_note(&self, note_id: &str, note_text: &str) -> CodingResult<Match> {
        self.coordinator()?.assign_note(note_id, note_text)
    }

    /// Per-cluster top candidates in reducer order.
    pub fn candidates(&self, note_text: &str) -> CodingResult<Vec<Candidate>> {
        self.coordinator()?.candidates(note_text)
    }

    /// Assigns every note, one result per input in input order.
    ///
    /// A failing note does not affect the others.
    pub fn assign_many(&self, note_texts: &[&str]) -> Vec<CodingResult<Match>> {
        let coordinator = match self.coordinator() {
            Ok(coordinator) => coordinator,
            Err(e) => return note_texts.iter().map(|_| Err(e.clone())).collect(),
        };

        note_texts
            .iter()
            .enumerate()
            .map(|(position, text)| {
                coordinator.assign(text).inspect_err(|e| {
                    tracing::warn!(position, status = %e.status_code(), error = %e, "note assignment failed");
                })
            })
            .collect()
    }

    /// Assigns `note_text` and hands the match to `sink`.
    pub fn assign_and_record(
        &self,
        note_text: &str,
        sink: &mut dyn AssignmentSink,
    ) -> CodingResult<Match> {
        let assignment = self.assign(note_text)?;
        sink.record(&assignment)?;
        Ok(assignment)
    }

    /// [`CodingEngine::assign_many`], recording every successful match.
    pub fn assign_many_and_record(
        &self,
        note_texts: &[&str],
        sink: &mut dyn AssignmentSink,
    ) -> Vec<CodingResult<Match>> {
        self.assign_many(note_texts)
            .into_iter()
            .map(|result| {
                let assignment = result?;
                sink.record(&assignment)?;
                Ok(assignment)
            })
            .collect()
    }

    /// Fails with `StaleIndex` if the active index was built from another
    /// catalog version.
    pub fn check_catalog(&self, catalog: &Catalog) -> CodingResult<()> {
        self.index()?;
        match self.manifest.read().as_ref() {
            Some(manifest) => manifest.check_catalog(catalog),
            None => Err(CodingError::NotBuilt {
                target: "Code index manifest".to_string(),
            }),
        }
    }

    /// Sizes and members of every cluster of the active index.
    pub fn summaries(&self) -> CodingResult<Vec<ClusterSummary>> {
        Ok(self.index()?.summaries())
    }

    /// Manifest of the active index, loading it if needed.
    pub fn manifest(&self) -> CodingResult<IndexManifest> {
        self.index()?;
        self.manifest
            .read()
            .clone()
            .ok_or_else(|| CodingError::NotBuilt {
                target: "Code index manifest".to_string(),
            })
    }

    /// Snapshot of the active index set, loading the persisted one on first use.
    ///
    /// The disk load holds the build lock, so a rebuild in this engine cannot
    /// prune the generation while it is being read.
    pub fn index(&self) -> CodingResult<Arc<IndexSet>> {
        if let Some(set) = self.handle.snapshot() {
            return Ok(set);
        }

        let _guard = self.build_lock.lock();
        if let Some(set) = self.handle.snapshot() {
            return Ok(set);
        }

        let (set, manifest) = self.store.load()?;
        if manifest.model_name != self.generator.model_name() {
            tracing::warn!(
                indexed = %manifest.model_name,
                configured = self.generator.model_name(),
                "index was built with a different embedding model"
            );
        }

        let mut current = self.manifest.write();
        let active = self.handle.install_if_empty(set);
        if current.is_none() {
            *current = Some(manifest);
        }
        Ok(active)
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    #[must_use]
    pub fn generator(&self) -> &Arc<dyn EmbeddingGenerator> {
        &self.generator
    }

    #[must_use]
    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    fn coordinator(&self) -> CodingResult<SearchCoordinator> {
        Ok(
            SearchCoordinator::new(self.generator.clone(), self.index()?)
                .with_parallel(self.settings.search.parallel),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assign::MemorySink;
    use crate::catalog::Code;
    use crate::vector::MockEmbeddingGenerator;
    use tempfile::TempDir;

    fn settings(dir: &TempDir) -> Settings {
        let mut settings = Settings::default();
        settings.index_path = dir.path().join("index");
        settings.clustering.k_min = 2;
        settings.clustering.k_max = 2;
        settings
    }

    fn catalog() -> Catalog {
        Catalog::new(vec![
            Code::new("A1", "alpha", "alpha").unwrap(),
            Code::new("B1", "beta", "beta").unwrap(),
            Code::new("A2", "alpha prime", "alpha prime").unwrap(),
        ])
        .unwrap()
    }

    fn generator() -> Arc<MockEmbeddingGenerator> {
        Arc::new(
            MockEmbeddingGenerator::with_dimension(VectorDimension::new(2).unwrap())
                .with_vector("alpha", vec![1.0, 0.0])
                .with_vector("alpha prime", vec![0.9, 0.1])
                .with_vector("beta", vec![0.0, 1.0])
                .with_vector("mostly beta", vec![0.2, 0.9]),
        )
    }

    #[test]
    fn test_assign_before_build() {
        let dir = TempDir::new().unwrap();
        let engine = CodingEngine::with_generator(settings(&dir), generator()).unwrap();
        assert!(matches!(
            engine.assign("alpha"),
            Err(CodingError::NotBuilt { .. })
        ));
        let results = engine.assign_many(&["alpha", "beta"]);
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| matches!(r, Err(CodingError::NotBuilt { .. }))));
    }

    #[test]
    fn test_build_then_assign() {
        let dir = TempDir::new().unwrap();
        let engine = CodingEngine::with_generator(settings(&dir), generator()).unwrap();

        let report = engine.build_catalog_index(&catalog()).unwrap();
        assert_eq!(report.result.k, 2);
        assert!(report.generation.exists());
        assert_eq!(report.manifest.code_count, 3);

        let best = engine.assign("mostly beta").unwrap();
        assert_eq!(best.code.id.as_str(), "B1");
        assert!(engine.check_catalog(&catalog()).is_ok());
    }

    #[test]
    fn test_reopen_loads_published_index() {
        let dir = TempDir::new().unwrap();
        {
            let engine = CodingEngine::with_generator(settings(&dir), generator()).unwrap();
            engine.build_catalog_index(&catalog()).unwrap();
            engine.close();
        }

        let engine = CodingEngine::with_generator(settings(&dir), generator()).unwrap();
        assert_eq!(engine.assign("mostly beta").unwrap().code.id.as_str(), "B1");
        assert_eq!(engine.manifest().unwrap().k, 2);
        assert_eq!(engine.summaries().unwrap().len(), 2);
    }

    #[test]
    fn test_stale_catalog_detected() {
        let dir = TempDir::new().unwrap();
        let engine = CodingEngine::with_generator(settings(&dir), generator()).unwrap();
        engine.build_catalog_index(&catalog()).unwrap();

        let changed = Catalog::new(vec![
            Code::new("A1", "alpha", "alpha").unwrap(),
            Code::new("B1", "beta", "beta").unwrap(),
        ])
        .unwrap();
        assert!(matches!(
            engine.check_catalog(&changed),
            Err(CodingError::StaleIndex { .. })
        ));
    }

    #[test]
    fn test_assign_many_isolates_failures() {
        let dir = TempDir::new().unwrap();
        let engine = CodingEngine::with_generator(settings(&dir), generator()).unwrap();
        engine.build_catalog_index(&catalog()).unwrap();

        let results = engine.assign_many(&["alpha", "", "beta"]);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().code.id.as_str(), "A1");
        assert!(matches!(results[1], Err(CodingError::Embedding { .. })));
        assert_eq!(results[2].as_ref().unwrap().code.id.as_str(), "B1");
    }

    #[test]
    fn test_assign_and_record() {
        let dir = TempDir::new().unwrap();
        let engine = CodingEngine::with_generator(settings(&dir), generator()).unwrap();
        engine.build_catalog_index(&catalog()).unwrap();

        let mut sink = MemorySink::new();
        engine.assign_and_record("alpha", &mut sink).unwrap();
        engine.assign_and_record("alpha", &mut sink).unwrap();
        let results = engine.assign_many_and_record(&["beta", "  "], &mut sink);

        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        // the repeated note is stored once
        assert_eq!(sink.len(), 2);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let dir = TempDir::new().unwrap();
        let mut bad = settings(&dir);
        bad.clustering.k_min = 1;
        assert!(matches!(
            CodingEngine::with_generator(bad, generator()),
            Err(CodingError::Config { .. })
        ));
    }

    #[test]
    fn test_create_hashing_generator() {
        let config = EmbeddingConfig {
            model: HASHING_MODEL_NAME.to_string(),
            hashing_dimension: 32,
            ..EmbeddingConfig::default()
        };
        let generator = create_generator(&config).unwrap();
        assert_eq!(generator.dimension().get(), 32);
        assert_eq!(generator.model_name(), "hashing");
    }
}
