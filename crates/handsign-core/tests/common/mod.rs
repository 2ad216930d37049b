//! Shared fixtures for handsign-core integration tests.
#![allow(dead_code)]

use std::io::{Cursor, Write};
use std::sync::Arc;

use handsign_core::dataset::ingest::{LandmarkRow, UpdateBatch};
use handsign_core::dataset::npy;
use handsign_core::engine::fakes::{FakeArtifactCompiler, FakeTrainingEngine};
use handsign_core::version::ArtifactNames;
use chrono::Utc;
use handsign_core::{Dataset, HandsignConfig, LabelSpace, UpdateOrchestrator, WorkerPool};
use handsign_store::fakes::{MemoryBlobStore, MemoryModelRegistry};
use handsign_store::{BundleRecord, ContentDigest, ModelRegistry};
use tempfile::TempDir;

pub const FEATURE_LEN: usize = 3;

/// `n` distinct rows around `offset`, at least 0.1 apart.
pub fn gesture_rows(offset: f32, start: usize, n: usize) -> Vec<Vec<f32>> {
    (start..start + n)
        .map(|i| vec![offset + i as f32 * 0.1, offset, offset])
        .collect()
}

pub fn dataset(groups: &[(&str, Vec<Vec<f32>>)]) -> Dataset {
    let mut d = Dataset::new(FEATURE_LEN).unwrap();
    for (label, rows) in groups {
        for row in rows {
            d.push(row, label).unwrap();
        }
    }
    d
}

pub fn batch(gesture: &str, rows: Vec<Vec<f32>>) -> UpdateBatch {
    UpdateBatch {
        gesture: gesture.to_string(),
        landmarks: rows.into_iter().map(LandmarkRow::Flat).collect(),
    }
}

/// Zip bytes of a bundle as published: flat weights and both splits.
pub fn bundle_zip(code: &str, train: &Dataset, test: &Dataset) -> Vec<u8> {
    bundle_zip_from(code, npy::encode(train), npy::encode(test))
}

/// Zip bytes of a bundle with the given split file contents.
pub fn bundle_zip_from(code: &str, train: Vec<u8>, test: Vec<u8>) -> Vec<u8> {
    let names = ArtifactNames::new(code, "h5", "tflite");
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);
    let entries = [
        (names.weights, b"base weights".to_vec()),
        (names.train, train),
        (names.test, test),
    ];
    for (name, data) in entries {
        zip.start_file(name, options).unwrap();
        zip.write_all(&data).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

/// `np.save(path, np.column_stack((X, y)))` output for `dataset`: a 2-D
/// `'<U32'` array with the label in the last column.
pub fn string_matrix_npy(dataset: &Dataset) -> Vec<u8> {
    const WIDTH: usize = 32;
    let dict = format!(
        "{{'descr': '<U{WIDTH}', 'fortran_order': False, 'shape': ({}, {}), }}",
        dataset.len(),
        dataset.feature_len() + 1
    );
    let padding = (64 - (10 + dict.len() + 1) % 64) % 64;
    let mut out = Vec::new();
    out.extend_from_slice(npy::MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&((dict.len() + padding + 1) as u16).to_le_bytes());
    out.extend_from_slice(dict.as_bytes());
    out.extend(std::iter::repeat(b' ').take(padding));
    out.push(b'\n');
    for (row, label) in dataset.iter() {
        let cells = row.iter().map(|v| v.to_string()).chain([label.to_string()]);
        for cell in cells {
            let units: Vec<u32> = cell.chars().map(|c| c as u32).collect();
            for unit in units.into_iter().chain(std::iter::repeat(0)).take(WIDTH) {
                out.extend_from_slice(&unit.to_le_bytes());
            }
        }
    }
    out
}

/// Base model with gestures A and B: 8 train and 2 test rows each.
pub fn ab_base() -> (Dataset, Dataset) {
    let train = dataset(&[("A", gesture_rows(0.0, 0, 8)), ("B", gesture_rows(10.0, 0, 8))]);
    let test = dataset(&[("A", gesture_rows(0.0, 8, 2)), ("B", gesture_rows(10.0, 8, 2))]);
    (train, test)
}

pub struct Harness {
    pub root: TempDir,
    pub config: HandsignConfig,
    pub blob: Arc<MemoryBlobStore>,
    pub registry: Arc<MemoryModelRegistry>,
    pub engine: Arc<FakeTrainingEngine>,
    pub compiler: Arc<FakeArtifactCompiler>,
    pub pool: Arc<WorkerPool>,
}

impl Harness {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let mut config = HandsignConfig::default();
        config.cache.dir = root.path().join("cache");
        config.bundle.models_dir = root.path().join("models");
        config.output_dir = root.path().join("out");
        config.training.feature_len = FEATURE_LEN;
        config.training.representative_samples = 5;
        Self {
            root,
            config,
            blob: Arc::new(MemoryBlobStore::new()),
            registry: Arc::new(MemoryModelRegistry::new()),
            engine: Arc::new(FakeTrainingEngine::new()),
            compiler: Arc::new(FakeArtifactCompiler::new()),
            pool: Arc::new(WorkerPool::new(2)),
        }
    }

    /// Publish a base bundle under `models/{code}.zip` and register it.
    pub async fn seed_base(&self, code: &str, train: &Dataset, test: &Dataset) {
        self.blob
            .insert(format!("models/{code}.zip"), bundle_zip(code, train, test));
        let labels = LabelSpace::build(train.labels(), test.labels(), &[], &[]);
        self.register_base(code, labels.labels().to_vec()).await;
    }

    /// Register `code` as a base whose archive is `{code}.zip`.
    pub async fn register_base(&self, code: &str, labels: Vec<String>) {
        let names = ArtifactNames::new(code, "h5", "tflite");
        let record = BundleRecord {
            version_code: code.to_string(),
            base_model: None,
            archive_file: ArtifactNames::bundle_archive(code),
            primary_url: format!("mem://models/{}", names.compiled),
            weights_file: names.weights,
            compiled_file: names.compiled,
            train_file: names.train,
            test_file: names.test,
            compiled_digest: ContentDigest::from_bytes(code.as_bytes()),
            labels,
            created_at: Utc::now(),
        };
        self.registry.register(record).await.unwrap();
    }

    pub fn orchestrator(&self) -> UpdateOrchestrator {
        UpdateOrchestrator::new(
            self.config.clone(),
            self.blob.clone(),
            self.registry.clone(),
            self.engine.clone(),
            self.compiler.clone(),
            self.pool.clone(),
        )
    }

    /// Entries under the output directory, empty when it does not exist.
    pub fn output_entries(&self) -> Vec<String> {
        match std::fs::read_dir(&self.config.output_dir) {
            Ok(entries) => entries
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}
