//! Configuration module for the code assignment engine.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file
//! - Environment variable overrides
//! - CLI argument overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `CC_` and use double underscores
//! to separate nested levels:
//! - `CC_CLUSTERING__K_MAX=80` sets `clustering.k_max`
//! - `CC_EMBEDDING__MODEL=hashing` sets `embedding.model`
//! - `CC_LOGGING__LEVEL=debug` sets `logging.level`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CodingError, CodingResult};
use crate::vector::Linkage;

/// Directory holding the workspace configuration and index.
pub const CONFIG_DIR: &str = ".chartcoder";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Path to the index directory
    #[serde(default = "default_index_path")]
    pub index_path: PathBuf,

    /// Workspace root directory (where .chartcoder is located)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<PathBuf>,

    /// Global debug mode
    #[serde(default = "default_false")]
    pub debug: bool,

    /// Embedding provider settings
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Cluster count search and linkage
    #[serde(default)]
    pub clustering: ClusteringConfig,

    /// Query-time settings
    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct EmbeddingConfig {
    /// fastembed model name, or "hashing" for the offline provider
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Number of descriptions embedded per provider call
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Vector width of the hashing provider
    #[serde(default = "default_hashing_dimension")]
    pub hashing_dimension: usize,

    /// Where fastembed caches downloaded models
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ClusteringConfig {
    /// Smallest cluster count tried
    #[serde(default = "default_k_min")]
    pub k_min: usize,

    /// Largest cluster count tried
    #[serde(default = "default_k_max")]
    pub k_max: usize,

    /// Step between tried cluster counts
    #[serde(default = "default_k_step")]
    pub k_step: usize,

    #[serde(default)]
    pub linkage: Linkage,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SearchConfig {
    /// Query clusters in parallel
    #[serde(default = "default_true")]
    pub parallel: bool,

    /// Candidates within this score distance of the best are reported as ambiguous
    #[serde(default)]
    pub ambiguity_margin: f32,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Default level filter; RUST_LOG takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_index_path() -> PathBuf {
    PathBuf::from(CONFIG_DIR).join("index")
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_embedding_model() -> String {
    "AllMiniLML6V2".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_hashing_dimension() -> usize {
    256
}
fn default_k_min() -> usize {
    8
}
fn default_k_max() -> usize {
    100
}
fn default_k_step() -> usize {
    1
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            index_path: default_index_path(),
            workspace_root: None,
            debug: false,
            embedding: EmbeddingConfig::default(),
            clustering: ClusteringConfig::default(),
            search: SearchConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            batch_size: default_batch_size(),
            hashing_dimension: default_hashing_dimension(),
            cache_dir: None,
        }
    }
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            k_min: default_k_min(),
            k_max: default_k_max(),
            k_step: default_k_step(),
            linkage: Linkage::default(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            ambiguity_margin: 0.0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl ClusteringConfig {
    /// Candidate cluster counts, in increasing order.
    pub fn candidates(&self) -> impl Iterator<Item = usize> + use<> {
        (self.k_min..=self.k_max).step_by(self.k_step.max(1))
    }

    /// Checks the range on its own and against a catalog of `code_count` codes.
    pub fn validate_for(&self, code_count: usize) -> CodingResult<()> {
        self.validate()?;
        if self.k_max > code_count {
            return Err(CodingError::Config {
                reason: format!(
                    "clustering.k_max ({}) exceeds the catalog size ({code_count})",
                    self.k_max
                ),
            });
        }
        Ok(())
    }

    fn validate(&self) -> CodingResult<()> {
        if self.k_min < 2 {
            return Err(CodingError::Config {
                reason: format!("clustering.k_min must be at least 2, got {}", self.k_min),
            });
        }
        if self.k_min > self.k_max {
            return Err(CodingError::Config {
                reason: format!(
                    "clustering.k_min ({}) is greater than clustering.k_max ({})",
                    self.k_min, self.k_max
                ),
            });
        }
        if self.k_step == 0 {
            return Err(CodingError::Config {
                reason: "clustering.k_step must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        // Try to find the workspace root by looking for .chartcoder directory
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join("settings.toml"));

        Self::figment(&config_path)
            .extract()
            .map_err(Box::new)
            .map(|mut settings: Settings| {
                if settings.workspace_root.is_none() {
                    settings.workspace_root = Self::workspace_root();
                }
                settings
            })
    }

    /// Load configuration from a specific file
    ///
    /// Relative paths in the file resolve against the workspace that owns it:
    /// the parent of `.chartcoder/` for `.chartcoder/settings.toml`, otherwise
    /// the file's own directory.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        let path = path.as_ref();
        let mut settings: Settings = Self::figment(path).extract().map_err(Box::new)?;
        if settings.workspace_root.is_none() {
            settings.workspace_root = Self::root_of_config(path);
        }
        Ok(settings)
    }

    fn root_of_config(config_path: &Path) -> Option<PathBuf> {
        let absolute = std::path::absolute(config_path).ok()?;
        let dir = absolute.parent()?;
        if dir.file_name().is_some_and(|name| name == CONFIG_DIR) {
            dir.parent().map(Path::to_path_buf)
        } else {
            Some(dir.to_path_buf())
        }
    }

    fn figment(config_path: &Path) -> Figment {
        Figment::new()
            // Start with defaults
            .merge(Serialized::defaults(Settings::default()))
            // Layer in config file if it exists
            .merge(Toml::file(config_path))
            // Layer in environment variables with CC_ prefix
            // Use double underscore (__) to separate nested levels
            // Single underscore (_) remains as is within field names
            .merge(Env::prefixed("CC_").map(|key| {
                key.as_str()
                    .to_lowercase()
                    .replace("__", ".") // Double underscore becomes dot
                    .into()
            }))
    }

    /// Find the workspace config by looking for .chartcoder directory
    /// Searches from current directory up to root
    fn find_workspace_config() -> Option<PathBuf> {
        Self::workspace_root().map(|root| root.join(CONFIG_DIR).join("settings.toml"))
    }

    /// Get the workspace root directory (where .chartcoder is located)
    pub fn workspace_root() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        current
            .ancestors()
            .find(|ancestor| ancestor.join(CONFIG_DIR).is_dir())
            .map(Path::to_path_buf)
    }

    /// Check if configuration is properly initialized
    pub fn check_init() -> Result<(), String> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join("settings.toml"));

        if !config_path.exists() {
            return Err("No configuration file found".to_string());
        }

        match std::fs::read_to_string(&config_path) {
            Ok(content) => {
                if let Err(e) = toml::from_str::<Settings>(&content) {
                    return Err(format!(
                        "Configuration file is corrupted: {e}\nRun 'chartcoder init --force' to regenerate."
                    ));
                }
            }
            Err(e) => {
                return Err(format!("Cannot read configuration file: {e}"));
            }
        }

        Ok(())
    }

    /// Index directory, resolved against the workspace root when relative.
    #[must_use]
    pub fn index_dir(&self) -> PathBuf {
        match &self.workspace_root {
            Some(root) if self.index_path.is_relative() => root.join(&self.index_path),
            _ => self.index_path.clone(),
        }
    }

    /// Checks value ranges that do not depend on the catalog.
    pub fn validate(&self) -> CodingResult<()> {
        self.clustering.validate()?;

        if self.embedding.batch_size == 0 {
            return Err(CodingError::Config {
                reason: "embedding.batch_size must be at least 1".to_string(),
            });
        }
        if self.embedding.hashing_dimension == 0 {
            return Err(CodingError::Config {
                reason: "embedding.hashing_dimension must be at least 1".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.search.ambiguity_margin) {
            return Err(CodingError::Config {
                reason: format!(
                    "search.ambiguity_margin must be within [0, 1], got {}",
                    self.search.ambiguity_margin
                ),
            });
        }
        if self
            .logging
            .level
            .parse::<tracing_subscriber::filter::LevelFilter>()
            .is_err()
        {
            return Err(CodingError::Config {
                reason: format!(
                    "logging.level '{}' is not one of off, error, warn, info, debug, trace",
                    self.logging.level
                ),
            });
        }
        Ok(())
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Create a default settings file with helpful comments
    pub fn init_config_file(force: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = PathBuf::from(CONFIG_DIR).join("settings.toml");
        Self::write_config_template(&config_path, force)?;

        if force {
            println!("Overwrote configuration at: {}", config_path.display());
        } else {
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
        }

        Ok(config_path)
    }

    /// Write the commented settings template to `config_path`
    pub fn write_config_template(
        config_path: &Path,
        force: bool,
    ) -> Result<(), Box<dyn std::error::Error>> {
        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let defaults = Settings::default();
        let template = format!(
            r#"# chartcoder configuration file

# Version of the configuration schema
version = {version}

# Path to the index directory (relative to workspace root)
index_path = "{index_path}"

# Global debug mode
debug = false

[embedding]
# fastembed model used for codes and notes, or "hashing" for the
# offline feature-hashing embedder (no download, lower quality)
model = "{model}"

# Number of descriptions embedded per call while building
batch_size = {batch_size}

# Vector width of the "hashing" embedder
hashing_dimension = {hashing_dimension}

# Model cache directory (defaults to the user cache dir)
# cache_dir = "/path/to/models"

[clustering]
# Range of cluster counts to try; the count with the best
# silhouette score wins. k_max may not exceed the catalog size.
k_min = {k_min}
k_max = {k_max}
k_step = {k_step}

# Linkage: "ward", "average", "complete" or "single"
linkage = "{linkage}"

[search]
# Query cluster indexes in parallel
parallel = true

# Flag candidates whose score is within this distance of the best match
ambiguity_margin = 0.0

[logging]
# off, error, warn, info, debug or trace (RUST_LOG overrides)
level = "{level}"
"#,
            version = defaults.version,
            index_path = defaults.index_path.display(),
            model = defaults.embedding.model,
            batch_size = defaults.embedding.batch_size,
            hashing_dimension = defaults.embedding.hashing_dimension,
            k_min = defaults.clustering.k_min,
            k_max = defaults.clustering.k_max,
            k_step = defaults.clustering.k_step,
            linkage = defaults.clustering.linkage,
            level = defaults.logging.level,
        );

        std::fs::write(config_path, template)?;
        Ok(())
    }
}
