//! In-memory engine fakes (testing only)
//!
//! `FakeTrainingEngine` and `FakeArtifactCompiler` write small placeholder
//! files, record the jobs they were given and can be told to fail.

use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{ArtifactCompiler, CompileJob, TrainingEngine, TrainingJob};
use crate::error::EngineError;

/// What a fake engine saw for one call.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedTraining {
    pub version_code: String,
    pub num_classes: usize,
    pub train_len: usize,
    pub test_len: usize,
    pub class_weights: Vec<f32>,
    pub labels: Vec<String>,
}

#[derive(Debug, Default)]
pub struct FakeTrainingEngine {
    jobs: Mutex<Vec<RecordedTraining>>,
    failure: Mutex<Option<String>>,
}

impl FakeTrainingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every subsequent call with `message`.
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.failure.lock().unwrap() = Some(message.into());
    }

    pub fn calls(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    pub fn last_job(&self) -> Option<RecordedTraining> {
        self.jobs.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl TrainingEngine for FakeTrainingEngine {
    async fn train(&self, job: &TrainingJob) -> Result<PathBuf, EngineError> {
        self.jobs.lock().unwrap().push(RecordedTraining {
            version_code: job.version_code.clone(),
            num_classes: job.num_classes(),
            train_len: job.train.len(),
            test_len: job.test.len(),
            class_weights: job.class_weights.clone(),
            labels: job.label_space.labels().to_vec(),
        });
        let failure = self.failure.lock().unwrap().clone();
        if let Some(message) = failure {
            return Err(EngineError::Failed(message));
        }
        let body = format!("weights classes={}", job.num_classes());
        tokio::fs::write(&job.output_weights, body).await?;
        Ok(job.output_weights.clone())
    }
}

#[derive(Debug, Default)]
pub struct FakeArtifactCompiler {
    representative_counts: Mutex<Vec<usize>>,
    failure: Mutex<Option<String>>,
}

impl FakeArtifactCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_with(&self, message: impl Into<String>) {
        *self.failure.lock().unwrap() = Some(message.into());
    }

    pub fn calls(&self) -> usize {
        self.representative_counts.lock().unwrap().len()
    }

    /// Calibration row counts, one per call.
    pub fn representative_counts(&self) -> Vec<usize> {
        self.representative_counts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArtifactCompiler for FakeArtifactCompiler {
    async fn compile(&self, job: &CompileJob) -> Result<PathBuf, EngineError> {
        self.representative_counts
            .lock()
            .unwrap()
            .push(job.representative.len());
        let failure = self.failure.lock().unwrap().clone();
        if let Some(message) = failure {
            return Err(EngineError::Failed(message));
        }
        let weights = tokio::fs::read(&job.weights).await?;
        let mut body = b"tflite:".to_vec();
        body.extend_from_slice(&weights);
        tokio::fs::write(&job.output, body).await?;
        Ok(job.output.clone())
    }
}
