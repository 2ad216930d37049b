//! Base-bundle resolution.
//!
//! A bundle for model code `C` is the directory `{models_dir}/C/` holding
//! `C_model_cnn.{ext}`, `C_train_hand_landmarks.npy` and
//! `C_test_hand_landmarks.npy`. When that triple is already present the
//! directory is returned without any network access. Otherwise the bundle
//! archive (`C.zip` unless a registry record names another) is resolved
//! through the asset cache, extracted into a temporary sibling directory,
//! checked, and renamed into place. A broken archive is evicted.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument, warn};

use super::archive::{extract_zip, ExtractionLimits};
use super::AssetCache;
use crate::config::BundleConfig;
use crate::error::{ArchiveError, UpdateError};
use crate::metrics::METRICS;
use crate::version::ArtifactNames;

/// Local files of an extracted base bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BaseBundle {
    pub model_code: String,
    pub dir: PathBuf,
    pub weights: PathBuf,
    pub train: PathBuf,
    pub test: PathBuf,
}

impl BaseBundle {
    fn expected(models_dir: &Path, model_code: &str, weights_ext: &str) -> Self {
        let dir = models_dir.join(model_code);
        // compiled ext is irrelevant for a base bundle
        let names = ArtifactNames::new(model_code, weights_ext, "bin");
        BaseBundle {
            model_code: model_code.to_string(),
            weights: dir.join(&names.weights),
            train: dir.join(&names.train),
            test: dir.join(&names.test),
            dir,
        }
    }

    fn is_complete(&self) -> bool {
        [&self.weights, &self.train, &self.test]
            .iter()
            .all(|p| p.is_file())
    }

    fn missing_in(&self, dir: &Path) -> Option<String> {
        [&self.weights, &self.train, &self.test]
            .iter()
            .filter_map(|p| p.file_name())
            .find(|name| !dir.join(name).is_file())
            .map(|name| name.to_string_lossy().into_owned())
    }
}

pub struct BundleFetcher {
    cache: Arc<AssetCache>,
    models_dir: PathBuf,
    weights_ext: String,
    limits: ExtractionLimits,
}

impl BundleFetcher {
    pub fn new(
        cache: Arc<AssetCache>,
        models_dir: impl Into<PathBuf>,
        weights_ext: impl Into<String>,
    ) -> Self {
        Self {
            cache,
            models_dir: models_dir.into(),
            weights_ext: weights_ext.into(),
            limits: ExtractionLimits::default(),
        }
    }

    pub fn from_config(config: &BundleConfig, cache: Arc<AssetCache>) -> Self {
        Self::new(cache, config.models_dir.clone(), config.weights_ext.clone())
    }

    pub fn with_limits(mut self, limits: ExtractionLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Resolve `model_code` to a directory holding its complete bundle,
    /// extracted from `{model_code}.zip` on a miss.
    pub async fn fetch(&self, model_code: &str) -> Result<BaseBundle, UpdateError> {
        self.fetch_archive(model_code, &ArtifactNames::bundle_archive(model_code))
            .await
    }

    /// Resolve `model_code`, extracting the named `archive` on a miss.
    ///
    /// An archive that fails extraction or verification is evicted from the
    /// asset cache, so the next call downloads it again.
    #[instrument(skip(self))]
    pub async fn fetch_archive(&self, model_code: &str, archive: &str) -> Result<BaseBundle, UpdateError> {
        validate_code(model_code)?;
        let bundle = BaseBundle::expected(&self.models_dir, model_code, &self.weights_ext);
        if bundle.is_complete() {
            info!(event = "bundle.hit", dir = %bundle.dir.display());
            return Ok(bundle);
        }

        info!(event = "bundle.miss", model_code = %model_code, archive = %archive);
        let zip_path = self
            .cache
            .resolve(archive)
            .await
            .map_err(|e| UpdateError::from_fetch(model_code, e))?;

        let models_dir = self.models_dir.clone();
        let target = bundle.clone();
        let limits = self.limits;
        let extracted =
            tokio::task::spawn_blocking(move || extract_into_place(&zip_path, &models_dir, &target, limits))
                .await
                .map_err(|e| UpdateError::Io(std::io::Error::other(e)))?;
        if let Err(err) = extracted {
            if matches!(err, UpdateError::Archive(_)) {
                warn!(event = "bundle.corrupt", archive = %archive, error = %err);
                self.evict_archive(archive);
            }
            return Err(err);
        }

        METRICS.inc_bundles_extracted();
        info!(event = "bundle.extracted", dir = %bundle.dir.display());
        Ok(bundle)
    }

    /// Forget an extracted bundle whose contents turned out unreadable:
    /// remove its directory and evict `archive` from the cache.
    pub fn discard(&self, bundle: &BaseBundle, archive: &str) {
        warn!(event = "bundle.discarded", dir = %bundle.dir.display());
        if let Err(e) = std::fs::remove_dir_all(&bundle.dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(dir = %bundle.dir.display(), error = %e, "failed to remove bundle directory");
            }
        }
        self.evict_archive(archive);
    }

    fn evict_archive(&self, archive: &str) {
        if let Err(e) = self.cache.evict(archive) {
            warn!(archive = %archive, error = %e, "failed to evict cached archive");
        }
    }
}

fn validate_code(model_code: &str) -> Result<(), UpdateError> {
    let ok = !model_code.is_empty()
        && model_code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        && !model_code.starts_with('.');
    if ok {
        Ok(())
    } else {
        Err(UpdateError::NotFound {
            model_code: model_code.to_string(),
        })
    }
}

fn extract_into_place(
    zip_path: &Path,
    models_dir: &Path,
    bundle: &BaseBundle,
    limits: ExtractionLimits,
) -> Result<(), UpdateError> {
    std::fs::create_dir_all(models_dir)?;
    let staging = tempfile::Builder::new()
        .prefix(&format!(".{}-", bundle.model_code))
        .tempdir_in(models_dir)?;
    extract_zip(zip_path, staging.path(), limits)?;

    if let Some(name) = bundle.missing_in(staging.path()) {
        return Err(ArchiveError::MissingEntry { name }.into());
    }

    if bundle.dir.exists() {
        warn!(dir = %bundle.dir.display(), "replacing incomplete bundle directory");
        std::fs::remove_dir_all(&bundle.dir)?;
    }
    let staged = staging.keep();
    if let Err(e) = std::fs::rename(&staged, &bundle.dir) {
        if let Err(cleanup) = std::fs::remove_dir_all(&staged) {
            warn!(dir = %staged.display(), error = %cleanup, "failed to remove staging directory");
        }
        return Err(e.into());
    }
    Ok(())
}
