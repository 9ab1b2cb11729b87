//! On-disk index generations.
//!
//! Layout under the index root:
//!
//! ```text
//! CURRENT                  name of the active generation
//! gen-<fingerprint8>-<n>/  one complete index set
//!   manifest.json
//!   cluster_<id>.vec
//!   cluster_<id>.json
//! ```
//!
//! A generation is written into a staging directory, renamed into place, and
//! activated by replacing `CURRENT` through write-to-temp plus rename. Readers
//! therefore see either the old or the new generation, never a mix.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::{CodingError, CodingResult, ErrorContext};
use crate::index::{ClusterIndex, IndexManifest, IndexSet};
use crate::vector::VectorDimension;

const CURRENT_FILE: &str = "CURRENT";
const GENERATION_PREFIX: &str = "gen-";
const STAGING_PREFIX: &str = ".staging-";
const LOAD_ATTEMPTS: usize = 3;

/// Persistent home of the published index set.
#[derive(Debug, Clone)]
pub struct IndexStore {
    root: PathBuf,
}

impl IndexStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// True if an active generation with a manifest exists.
    #[must_use]
    pub fn exists(&self) -> bool {
        matches!(self.current_generation(), Ok(Some(dir)) if IndexManifest::exists(&dir))
    }

    /// Directory of the active generation, if any.
    pub fn current_generation(&self) -> CodingResult<Option<PathBuf>> {
        let pointer = self.root.join(CURRENT_FILE);
        let name = match std::fs::read_to_string(&pointer) {
            Ok(name) => name,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CodingError::storage(&pointer, e)),
        };

        let name = name.trim();
        if !name.starts_with(GENERATION_PREFIX) || name.contains(['/', '\\']) {
            return Err(CodingError::storage(
                &pointer,
                format!("'{name}' is not a generation name"),
            ));
        }
        Ok(Some(self.root.join(name)))
    }

    /// Writes `set` as a new generation and makes it the active one.
    ///
    /// Older generations are removed afterwards; failure to remove them is
    /// logged, not returned.
    pub fn publish(&self, set: &IndexSet, manifest: &IndexManifest) -> CodingResult<PathBuf> {
        std::fs::create_dir_all(&self.root).with_path(&self.root)?;

        let fingerprint = manifest
            .catalog_fingerprint
            .get(..8)
            .unwrap_or(&manifest.catalog_fingerprint);
        let name = format!(
            "{GENERATION_PREFIX}{fingerprint}-{}",
            self.next_sequence()?
        );

        let staging = self.root.join(format!("{STAGING_PREFIX}{name}"));
        if staging.exists() {
            std::fs::remove_dir_all(&staging).with_path(&staging)?;
        }
        std::fs::create_dir_all(&staging).with_path(&staging)?;

        for index in set.iter() {
            index.save(&staging)?;
        }
        manifest.save(&staging)?;

        let generation = self.root.join(&name);
        std::fs::rename(&staging, &generation).with_path(&generation)?;
        self.write_pointer(&name)?;

        tracing::info!(
            generation = %name,
            clusters = set.len(),
            codes = set.code_count(),
            "published index generation"
        );

        self.prune(&name);
        Ok(generation)
    }

    /// Loads the active generation.
    ///
    /// # Errors
    /// `NotBuilt` if nothing was published yet, `Storage` for unreadable or
    /// inconsistent files.
    pub fn load(&self) -> CodingResult<(IndexSet, IndexManifest)> {
        let generation = self
            .current_generation()?
            .ok_or_else(|| CodingError::NotBuilt {
                target: format!("Code index at {}", self.root.display()),
            })?;
        self.load_resolved(generation)
    }

    /// Loads `generation`, following `CURRENT` if it moved on while reading.
    ///
    /// A publish prunes the generation it replaced, so a reader that resolved
    /// the old pointer can find its files gone.
    fn load_resolved(&self, mut generation: PathBuf) -> CodingResult<(IndexSet, IndexManifest)> {
        for _ in 0..LOAD_ATTEMPTS {
            match self.load_generation(&generation) {
                Ok(loaded) => return Ok(loaded),
                Err(e) => match self.current_generation() {
                    Ok(Some(current)) if current != generation => {
                        tracing::debug!(
                            from = %generation.display(),
                            to = %current.display(),
                            error = %e,
                            "index generation replaced during load, retrying"
                        );
                        generation = current;
                    }
                    _ => return Err(e),
                },
            }
        }
        self.load_generation(&generation)
    }

    fn load_generation(&self, generation: &Path) -> CodingResult<(IndexSet, IndexManifest)> {
        let manifest = IndexManifest::load(generation)?;
        let dimension = VectorDimension::new(manifest.dimension)?;

        let mut set = IndexSet::new(dimension);
        for cluster in &manifest.clusters {
            let index = ClusterIndex::open(generation, cluster.id)?;
            if index.len() != cluster.size {
                return Err(CodingError::storage(
                    generation,
                    format!(
                        "cluster {} holds {} codes, manifest says {}",
                        cluster.id,
                        index.len(),
                        cluster.size
                    ),
                ));
            }
            set.insert(index).map_err(|e| CodingError::storage(generation, e))?;
        }

        tracing::debug!(
            generation = %generation.display(),
            clusters = set.len(),
            "loaded index generation"
        );
        Ok((set, manifest))
    }

    /// Names of all generation directories, oldest first.
    pub fn generations(&self) -> CodingResult<Vec<String>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CodingError::storage(&self.root, e)),
        };

        let mut generations: Vec<(u64, String)> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter_map(|name| sequence_of(&name).map(|n| (n, name)))
            .collect();
        generations.sort();
        Ok(generations.into_iter().map(|(_, name)| name).collect())
    }

    fn next_sequence(&self) -> CodingResult<u64> {
        Ok(self
            .generations()?
            .iter()
            .filter_map(|name| sequence_of(name))
            .max()
            .map_or(1, |n| n + 1))
    }

    fn write_pointer(&self, name: &str) -> CodingResult<()> {
        let pointer = self.root.join(CURRENT_FILE);
        let temp = self.root.join(format!("{CURRENT_FILE}.tmp"));

        let mut file = std::fs::File::create(&temp).with_path(&temp)?;
        writeln!(file, "{name}").with_path(&temp)?;
        file.sync_all().with_path(&temp)?;
        drop(file);

        std::fs::rename(&temp, &pointer).with_path(&pointer)
    }

    fn prune(&self, keep: &str) {
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return;
        };
        for entry in entries.filter_map(Result::ok) {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            let stale = name != keep
                && (name.starts_with(GENERATION_PREFIX) || name.starts_with(STAGING_PREFIX));
            if stale {
                if let Err(e) = std::fs::remove_dir_all(entry.path()) {
                    tracing::warn!(generation = %name, error = %e, "failed to prune old generation");
                }
            }
        }
    }
}

fn sequence_of(name: &str) -> Option<u64> {
    name.strip_prefix(GENERATION_PREFIX)?
        .rsplit('-')
        .next()?
        .parse()
        .ok()
}
