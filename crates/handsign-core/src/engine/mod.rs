//! Training engine and artifact compiler seams.
//!
//! The classifier is trained and converted by external tooling. The core
//! prepares everything those tools need (merged splits, label map, class
//! weights, calibration rows) and only checks that the expected output
//! files appear.

pub mod fakes;
pub mod process;

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::TrainingConfig;
use crate::dataset::Dataset;
use crate::error::EngineError;
use crate::label_space::LabelSpace;

pub use process::{ProcessArtifactCompiler, ProcessCommand, ProcessTrainingEngine};

/// Hyper-parameters for transfer training.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingParams {
    pub epochs: u32,
    pub batch_size: u32,
    pub patience: u32,
    pub learning_rate: f64,
    pub restore_best_weights: bool,
}

impl From<&TrainingConfig> for TrainingParams {
    fn from(config: &TrainingConfig) -> Self {
        Self {
            epochs: config.epochs,
            batch_size: config.batch_size,
            patience: config.patience,
            learning_rate: config.learning_rate,
            restore_best_weights: true,
        }
    }
}

/// Everything needed to train the updated classifier.
///
/// The engine reuses the frozen feature-extractor prefix of `base_weights`
/// and fits a new head with `label_space.len()` outputs.
#[derive(Debug, Clone)]
pub struct TrainingJob {
    pub version_code: String,
    pub base_weights: PathBuf,
    pub train: Dataset,
    pub test: Dataset,
    pub label_space: LabelSpace,
    /// Indexed by class index
    pub class_weights: Vec<f32>,
    pub params: TrainingParams,
    /// Where the trained weights must be written
    pub output_weights: PathBuf,
}

impl TrainingJob {
    pub fn num_classes(&self) -> usize {
        self.label_space.len()
    }

    pub fn class_weight_map(&self) -> BTreeMap<usize, f32> {
        self.class_weights.iter().copied().enumerate().collect()
    }
}

/// Everything needed to compile trained weights into the inference format.
#[derive(Debug, Clone)]
pub struct CompileJob {
    pub version_code: String,
    pub weights: PathBuf,
    /// Calibration rows for quantization
    pub representative: Dataset,
    /// Where the compiled artifact must be written
    pub output: PathBuf,
}

#[async_trait]
pub trait TrainingEngine: Send + Sync {
    /// Train and write weights to `job.output_weights`; returns that path.
    async fn train(&self, job: &TrainingJob) -> Result<PathBuf, EngineError>;
}

#[async_trait]
pub trait ArtifactCompiler: Send + Sync {
    /// Compile and write the artifact to `job.output`; returns that path.
    async fn compile(&self, job: &CompileJob) -> Result<PathBuf, EngineError>;
}
