//! Runtime configuration.
//!
//! Loaded from TOML with every field optional, then overridden from the
//! environment. Defaults reproduce the production service.
//!
//! ```toml
//! output_dir = "/var/lib/handsign/out"
//!
//! [cache]
//! dir = "/var/cache/handsign"
//! expiration_secs = 86400
//!
//! [duplicates]
//! ratio_threshold = 95.0
//! granularity = "mean_of_splits"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dataset::DEFAULT_FEATURE_LEN;
use crate::duplicate_guard::DuplicatePolicy;
use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Where downloaded assets (bundle archives) live
    pub dir: PathBuf,
    /// Assets older than this are deleted and fetched again
    pub expiration_secs: u64,
    /// Blob-store folder assets are fetched from
    pub remote_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("cache_dir"),
            expiration_secs: 24 * 60 * 60,
            remote_prefix: "models".to_string(),
        }
    }
}

impl CacheConfig {
    pub fn expiration(&self) -> Duration {
        Duration::from_secs(self.expiration_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BundleConfig {
    /// Extracted base bundles, one directory per model code
    pub models_dir: PathBuf,
    pub weights_ext: String,
    pub compiled_ext: String,
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            models_dir: PathBuf::from("models"),
            weights_ext: "h5".to_string(),
            compiled_ext: "tflite".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    pub test_fraction: f64,
    pub seed: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            test_fraction: 0.2,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub epochs: u32,
    pub batch_size: u32,
    /// Early-stopping patience on validation loss
    pub patience: u32,
    pub learning_rate: f64,
    /// Calibration rows handed to the artifact compiler
    pub representative_samples: usize,
    pub feature_len: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 1000,
            batch_size: 32,
            patience: 10,
            learning_rate: 1e-4,
            representative_samples: 500,
            feature_len: DEFAULT_FEATURE_LEN,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublicationConfig {
    /// Blob-store folder artifacts are published under
    pub remote_folder: String,
    /// Background upload concurrency
    pub workers: usize,
}

impl Default for PublicationConfig {
    fn default() -> Self {
        Self {
            remote_folder: "models".to_string(),
            workers: 3,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandsignConfig {
    pub cache: CacheConfig,
    pub bundle: BundleConfig,
    pub split: SplitConfig,
    pub duplicates: DuplicatePolicy,
    pub training: TrainingConfig,
    pub publication: PublicationConfig,
    /// New bundles are written to `{output_dir}/{version_code}/`
    pub output_dir: PathBuf,
    /// Base URL of the HTTP blob store, when one is used
    pub blob_url: Option<String>,
}

impl Default for HandsignConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            bundle: BundleConfig::default(),
            split: SplitConfig::default(),
            duplicates: DuplicatePolicy::default(),
            training: TrainingConfig::default(),
            publication: PublicationConfig::default(),
            output_dir: PathBuf::from("models"),
            blob_url: None,
        }
    }
}

impl HandsignConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: HandsignConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Apply `HANDSIGN_*` overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key lookup (the environment in production).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup("HANDSIGN_CACHE_DIR") {
            self.cache.dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("HANDSIGN_MODELS_DIR") {
            self.bundle.models_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("HANDSIGN_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }
        if let Some(url) = lookup("HANDSIGN_BLOB_URL") {
            self.blob_url = Some(url);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let d = &self.duplicates;
        if !(0.0..=100.0).contains(&d.ratio_threshold) {
            return Err(ConfigError::Invalid(format!(
                "duplicates.ratio_threshold must be within [0, 100], got {}",
                d.ratio_threshold
            )));
        }
        if d.distance_threshold.is_nan() || d.distance_threshold < 0.0 {
            return Err(ConfigError::Invalid(
                "duplicates.distance_threshold must be non-negative".to_string(),
            ));
        }
        if !(self.split.test_fraction > 0.0 && self.split.test_fraction < 1.0) {
            return Err(ConfigError::Invalid(format!(
                "split.test_fraction must be within (0, 1), got {}",
                self.split.test_fraction
            )));
        }
        if self.training.feature_len == 0 {
            return Err(ConfigError::Invalid(
                "training.feature_len must be positive".to_string(),
            ));
        }
        if self.publication.workers == 0 {
            return Err(ConfigError::Invalid(
                "publication.workers must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
