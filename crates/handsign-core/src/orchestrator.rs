//! Update orchestration.
//!
//! One run moves linearly through [`UpdateStage`]:
//!
//! ```text
//! Start -> FetchBase -> IngestUpdate -> CheckDuplicates -> Merge
//!       -> BuildLabelSpace -> Train -> PersistArtifacts -> Publish -> Done
//! ```
//!
//! `CheckDuplicates` is the only branch point: a rejected update returns
//! `UpdateOutcome::DuplicateRejected` and nothing has been written. The
//! output directory is created at `Train` at the earliest. A failure before
//! the primary artifact is published removes that directory again; only a
//! published bundle is ever registered.
//!
//! A base model is usable only once it is registered: `FetchBase` looks the
//! code up in the [`ModelRegistry`] and fetches the archive its record
//! names. Bundles from outside the pipeline enter through
//! [`UpdateOrchestrator::import_base`].

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use handsign_store::{BlobStore, BundleRecord, ContentDigest, ModelRegistry, StorageError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn, Instrument};

use crate::cache::{AssetCache, BaseBundle, BundleFetcher};
use crate::config::HandsignConfig;
use crate::dataset::ingest::UpdateBatch;
use crate::dataset::{npy, split_train_test, Split};
use crate::duplicate_guard::DuplicateReport;
use crate::engine::{ArtifactCompiler, CompileJob, TrainingEngine, TrainingJob, TrainingParams};
use crate::error::{DatasetError, Result, UpdateError};
use crate::label_space::LabelSpace;
use crate::merge::merge_splits;
use crate::metrics::METRICS;
use crate::obs::{self, UpdateSpan};
use crate::publication::PublicationPipeline;
use crate::training::{class_weights, representative_samples};
use crate::version::{ArtifactNames, ArtifactPaths, VersionCode};
use crate::worker_pool::WorkerPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStage {
    Start,
    FetchBase,
    IngestUpdate,
    CheckDuplicates,
    Merge,
    BuildLabelSpace,
    Train,
    PersistArtifacts,
    Publish,
    Done,
}

impl UpdateStage {
    pub fn as_str(self) -> &'static str {
        match self {
            UpdateStage::Start => "start",
            UpdateStage::FetchBase => "fetch_base",
            UpdateStage::IngestUpdate => "ingest_update",
            UpdateStage::CheckDuplicates => "check_duplicates",
            UpdateStage::Merge => "merge",
            UpdateStage::BuildLabelSpace => "build_label_space",
            UpdateStage::Train => "train",
            UpdateStage::PersistArtifacts => "persist_artifacts",
            UpdateStage::Publish => "publish",
            UpdateStage::Done => "done",
        }
    }

    /// Whether a run in this stage may touch the filesystem or stores.
    pub fn writes_allowed(self) -> bool {
        self > UpdateStage::CheckDuplicates
    }
}

impl fmt::Display for UpdateStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub base_model: String,
    pub batch: UpdateBatch,
}

/// Result of a published run.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateReport {
    pub version_code: String,
    pub base_model: String,
    pub primary_url: String,
    pub label_space: LabelSpace,
    pub new_labels: Vec<String>,
    pub train_samples: usize,
    pub test_samples: usize,
    pub duplicates: DuplicateReport,
    pub artifacts: ArtifactPaths,
    pub stages: Vec<UpdateStage>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UpdateOutcome {
    Published(UpdateReport),
    DuplicateRejected(DuplicateReport),
}

/// What an update would do, computed without side effects.
#[derive(Debug, Clone, Serialize)]
pub struct UpdatePreview {
    pub base: BaseBundle,
    pub label_space: LabelSpace,
    pub duplicates: DuplicateReport,
    pub update_train: usize,
    pub update_test: usize,
}

struct StageLog {
    version_code: String,
    stages: Vec<UpdateStage>,
}

impl StageLog {
    fn new(version_code: &str) -> Self {
        Self {
            version_code: version_code.to_string(),
            stages: Vec::with_capacity(10),
        }
    }

    fn enter(&mut self, stage: UpdateStage) {
        debug_assert!(
            self.stages.last().map_or(true, |prev| *prev < stage),
            "stage {stage} entered out of order"
        );
        self.stages.push(stage);
        obs::emit_update_stage(&self.version_code, stage);
    }

    fn current(&self) -> UpdateStage {
        self.stages.last().copied().unwrap_or(UpdateStage::Start)
    }
}

struct LoadedBase {
    bundle: BaseBundle,
    splits: Split,
}

/// Sequences one update from base fetch to publication.
pub struct UpdateOrchestrator {
    config: HandsignConfig,
    fetcher: BundleFetcher,
    publication: PublicationPipeline,
    registry: Arc<dyn ModelRegistry>,
    engine: Arc<dyn TrainingEngine>,
    compiler: Arc<dyn ArtifactCompiler>,
}

impl UpdateOrchestrator {
    pub fn new(
        config: HandsignConfig,
        blob: Arc<dyn BlobStore>,
        registry: Arc<dyn ModelRegistry>,
        engine: Arc<dyn TrainingEngine>,
        compiler: Arc<dyn ArtifactCompiler>,
        pool: Arc<WorkerPool>,
    ) -> Self {
        let cache = Arc::new(AssetCache::from_config(&config.cache, Arc::clone(&blob)));
        let fetcher = BundleFetcher::from_config(&config.bundle, cache);
        let publication = PublicationPipeline::from_config(&config.publication, blob, pool);
        Self {
            config,
            fetcher,
            publication,
            registry,
            engine,
            compiler,
        }
    }

    pub fn config(&self) -> &HandsignConfig {
        &self.config
    }

    pub fn fetcher(&self) -> &BundleFetcher {
        &self.fetcher
    }

    /// Run the whole pipeline for `request`.
    pub async fn run(&self, request: UpdateRequest) -> Result<UpdateOutcome> {
        let version = VersionCode::generate();
        let started = Instant::now();
        let span = UpdateSpan::span(version.as_str(), &request.base_model);
        let result = self.run_stages(&version, request).instrument(span).await;

        let (success, num_classes) = match &result {
            Ok(UpdateOutcome::Published(report)) => (true, report.label_space.len()),
            Ok(UpdateOutcome::DuplicateRejected(_)) => (false, 0),
            Err(e) => {
                warn!(event = "update.failed", version_code = %version, error = %e);
                (false, 0)
            }
        };
        obs::emit_update_finished(
            version.as_str(),
            started.elapsed().as_millis() as u64,
            num_classes,
            success,
        );
        result
    }

    /// Fetch the base, split the batch, check duplicates and build the label
    /// space, without writing anything.
    pub async fn preview(&self, base_model: &str, batch: &UpdateBatch) -> Result<UpdatePreview> {
        let base = self.load_base(base_model).await?;
        let update = self.ingest(batch)?;
        let duplicates = self.check_duplicates("preview", &base.splits, &update);
        let label_space = build_label_space(&base.splits, &update);
        Ok(UpdatePreview {
            base: base.bundle,
            label_space,
            duplicates,
            update_train: update.train.len(),
            update_test: update.test.len(),
        })
    }

    /// Register a bundle that was not produced by an update run.
    ///
    /// `{model_code}.zip` must already be in the blob store. Its splits
    /// are read to derive the labels, and `compiled` is published as the
    /// bundle's primary artifact.
    #[instrument(skip(self, compiled), fields(compiled = %compiled.display()))]
    pub async fn import_base(&self, model_code: &str, compiled: &Path) -> Result<BundleRecord> {
        let registered = self
            .registry
            .get(model_code)
            .await
            .map_err(UpdateError::Registry)?;
        if registered.is_some() {
            return Err(UpdateError::Registry(StorageError::AlreadyExists {
                key: model_code.to_string(),
            }));
        }

        let archive = ArtifactNames::bundle_archive(model_code);
        let base = self.read_bundle(model_code, &archive).await?;
        let labels = LabelSpace::build(base.splits.train.labels(), base.splits.test.labels(), &[], &[]);

        let names = ArtifactNames::new(
            model_code,
            &self.config.bundle.weights_ext,
            &self.config.bundle.compiled_ext,
        );
        let staging = tempfile::tempdir()?;
        let staged = staging.path().join(&names.compiled);
        tokio::fs::copy(compiled, &staged).await?;
        let compiled_digest = ContentDigest::from_file(&staged).map_err(storage_to_update)?;
        let primary_url = self
            .publication
            .publish(&staged, Vec::new(), model_code)
            .await
            .map_err(storage_to_update)?;

        let record = BundleRecord {
            version_code: model_code.to_string(),
            base_model: None,
            archive_file: archive,
            weights_file: names.weights,
            compiled_file: names.compiled,
            train_file: names.train,
            test_file: names.test,
            primary_url,
            compiled_digest,
            labels: labels.labels().to_vec(),
            created_at: Utc::now(),
        };
        let record = self
            .registry
            .register(record)
            .await
            .map_err(UpdateError::Registry)?;
        info!(event = "base.imported", model_code = %model_code, labels = record.labels.len());
        Ok(record)
    }

    async fn run_stages(&self, version: &VersionCode, request: UpdateRequest) -> Result<UpdateOutcome> {
        let code = version.as_str();
        let mut log = StageLog::new(code);

        log.enter(UpdateStage::Start);
        obs::emit_update_started(code, &request.base_model, request.batch.landmarks.len());

        log.enter(UpdateStage::FetchBase);
        let base = self.load_base(&request.base_model).await?;

        log.enter(UpdateStage::IngestUpdate);
        let update = self.ingest(&request.batch)?;

        log.enter(UpdateStage::CheckDuplicates);
        let duplicates = self.check_duplicates(code, &base.splits, &update);
        if duplicates.rejected {
            METRICS.inc_updates_rejected();
            obs::emit_update_rejected(code, duplicates.decisive_ratio());
            return Ok(UpdateOutcome::DuplicateRejected(duplicates));
        }

        log.enter(UpdateStage::Merge);
        let merged = merge_splits(&base.splits, &update)?;

        log.enter(UpdateStage::BuildLabelSpace);
        let label_space = build_label_space(&base.splits, &update);
        debug!(classes = label_space.len(), new = ?label_space.new_labels(), "label space built");

        let names = ArtifactNames::new(
            code,
            &self.config.bundle.weights_ext,
            &self.config.bundle.compiled_ext,
        );
        let out_dir = self.config.output_dir.join(code);
        let paths = names.in_dir(&out_dir);

        let built = self
            .build_artifacts(&mut log, code, &base, merged, &label_space, &paths, &out_dir)
            .await;
        let (compiled_digest, train_samples, test_samples) = match built {
            Ok(v) => v,
            Err(e) => {
                discard_output(&out_dir);
                return Err(e);
            }
        };

        log.enter(UpdateStage::Publish);
        let secondaries = vec![paths.weights.clone(), paths.train.clone(), paths.test.clone()];
        let primary_url = match self.publication.publish(&paths.compiled, secondaries, code).await {
            Ok(url) => url,
            Err(e) => {
                discard_output(&out_dir);
                return Err(storage_to_update(e));
            }
        };

        let record = BundleRecord {
            version_code: code.to_string(),
            base_model: Some(request.base_model.clone()),
            archive_file: ArtifactNames::bundle_archive(code),
            weights_file: names.weights.clone(),
            compiled_file: names.compiled.clone(),
            train_file: names.train.clone(),
            test_file: names.test.clone(),
            primary_url: primary_url.clone(),
            compiled_digest,
            labels: label_space.labels().to_vec(),
            created_at: Utc::now(),
        };
        self.registry
            .register(record)
            .await
            .map_err(UpdateError::Registry)?;

        log.enter(UpdateStage::Done);
        METRICS.inc_updates_published();

        Ok(UpdateOutcome::Published(UpdateReport {
            version_code: code.to_string(),
            base_model: request.base_model,
            primary_url,
            new_labels: label_space.new_labels().to_vec(),
            label_space,
            train_samples,
            test_samples,
            duplicates,
            artifacts: paths,
            stages: log.stages,
        }))
    }

    /// Train, persist the combined splits and compile. Returns the compiled
    /// artifact digest and the combined split sizes.
    #[allow(clippy::too_many_arguments)]
    async fn build_artifacts(
        &self,
        log: &mut StageLog,
        code: &str,
        base: &LoadedBase,
        merged: Split,
        label_space: &LabelSpace,
        paths: &ArtifactPaths,
        out_dir: &Path,
    ) -> Result<(ContentDigest, usize, usize)> {
        log.enter(UpdateStage::Train);
        debug_assert!(log.current().writes_allowed());
        tokio::fs::create_dir_all(out_dir).await?;

        let encoded = label_space.encode(merged.train.labels())?;
        let job = TrainingJob {
            version_code: code.to_string(),
            base_weights: base.bundle.weights.clone(),
            class_weights: class_weights(&encoded, label_space.len()),
            train: merged.train,
            test: merged.test,
            label_space: label_space.clone(),
            params: TrainingParams::from(&self.config.training),
            output_weights: paths.weights.clone(),
        };
        let weights = self.engine.train(&job).await.map_err(UpdateError::Training)?;

        log.enter(UpdateStage::PersistArtifacts);
        npy::write_split(&paths.train, &job.train)?;
        npy::write_split(&paths.test, &job.test)?;

        let compile = CompileJob {
            version_code: code.to_string(),
            weights,
            representative: representative_samples(
                &job.train,
                self.config.training.representative_samples,
                self.config.split.seed,
            ),
            output: paths.compiled.clone(),
        };
        let compiled = self
            .compiler
            .compile(&compile)
            .await
            .map_err(UpdateError::Compile)?;
        let digest = ContentDigest::from_file(&compiled).map_err(storage_to_update)?;
        Ok((digest, job.train.len(), job.test.len()))
    }

    /// Resolve `base_model` through the registry, then fetch and read the
    /// bundle its record names.
    async fn load_base(&self, base_model: &str) -> Result<LoadedBase> {
        let record = match self.registry.get(base_model).await {
            Ok(Some(record)) => record,
            Ok(None) | Err(StorageError::InvalidKey { .. }) => {
                debug!(base_model = %base_model, "base model is not registered");
                return Err(UpdateError::NotFound {
                    model_code: base_model.to_string(),
                });
            }
            Err(e) => return Err(UpdateError::Registry(e)),
        };
        self.read_bundle(base_model, &record.archive_file).await
    }

    async fn read_bundle(&self, model_code: &str, archive: &str) -> Result<LoadedBase> {
        let bundle = self
            .fetcher
            .fetch_archive(model_code, archive)
            .await
            .map_err(|e| unusable_base(model_code, e))?;
        match read_base_splits(&bundle, self.config.training.feature_len) {
            Ok(splits) => Ok(LoadedBase { bundle, splits }),
            Err(e) => {
                if matches!(e, DatasetError::Format { .. }) {
                    self.fetcher.discard(&bundle, archive);
                }
                Err(unusable_base(model_code, e.into()))
            }
        }
    }

    fn ingest(&self, batch: &UpdateBatch) -> Result<Split> {
        let dataset = batch
            .to_dataset(self.config.training.feature_len)
            .map_err(|e| UpdateError::InvalidUpdate(e.to_string()))?;
        split_train_test(&dataset, self.config.split.test_fraction, self.config.split.seed).map_err(
            |e| match e {
                DatasetError::TooSmall { .. } => {
                    UpdateError::InvalidUpdate("update batch too small".to_string())
                }
                other => UpdateError::InvalidUpdate(other.to_string()),
            },
        )
    }

    fn check_duplicates(&self, version_code: &str, base: &Split, update: &Split) -> DuplicateReport {
        let report = self
            .config
            .duplicates
            .check(&base.train, &base.test, &update.train, &update.test);
        obs::emit_duplicates_checked(
            version_code,
            report.train.ratio,
            report.test.ratio,
            report.rejected,
        );
        report
    }
}

fn build_label_space(base: &Split, update: &Split) -> LabelSpace {
    LabelSpace::build(
        base.train.labels(),
        base.test.labels(),
        update.train.labels(),
        update.test.labels(),
    )
}

fn read_base_splits(bundle: &BaseBundle, feature_len: usize) -> std::result::Result<Split, DatasetError> {
    let train = npy::read_split(&bundle.train)?;
    let test = npy::read_split(&bundle.test)?;
    train.ensure_feature_len(feature_len)?;
    test.ensure_feature_len(feature_len)?;
    Ok(Split { train, test })
}

/// A base bundle that is missing or unreadable is reported as not found.
fn unusable_base(base_model: &str, err: UpdateError) -> UpdateError {
    match err {
        UpdateError::Archive(_) | UpdateError::Dataset(_) => {
            warn!(base_model = %base_model, error = %err, "base bundle is unusable");
            UpdateError::NotFound {
                model_code: base_model.to_string(),
            }
        }
        other => other,
    }
}

fn storage_to_update(err: StorageError) -> UpdateError {
    match err {
        StorageError::Io(e) => UpdateError::Io(e),
        other => UpdateError::Transient(other),
    }
}

fn discard_output(dir: &Path) {
    if let Err(e) = std::fs::remove_dir_all(dir) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(dir = %dir.display(), error = %e, "failed to remove partial output");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_are_ordered_and_gate_writes() {
        assert!(UpdateStage::Start < UpdateStage::FetchBase);
        assert!(UpdateStage::Publish < UpdateStage::Done);
        assert!(!UpdateStage::CheckDuplicates.writes_allowed());
        assert!(UpdateStage::Merge.writes_allowed());
        assert_eq!(UpdateStage::BuildLabelSpace.to_string(), "build_label_space");
    }

    #[test]
    fn stage_log_records_in_order() {
        let mut log = StageLog::new("v");
        assert_eq!(log.current(), UpdateStage::Start);
        log.enter(UpdateStage::Start);
        log.enter(UpdateStage::FetchBase);
        assert_eq!(log.current(), UpdateStage::FetchBase);
        assert_eq!(log.stages.len(), 2);
    }
}
