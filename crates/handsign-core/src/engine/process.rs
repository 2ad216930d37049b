//! Engines backed by an external command.
//!
//! The job is written to a scratch directory as `.npy` splits plus a
//! `manifest.json`; the command is run with the manifest path appended as
//! its last argument and must write the file named in the manifest.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info, instrument};

use super::{ArtifactCompiler, CompileJob, TrainingEngine, TrainingJob, TrainingParams};
use crate::dataset::npy;
use crate::error::EngineError;

const STDERR_TAIL_BYTES: usize = 4096;

/// Command line of an external tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// 0 disables the timeout
    #[serde(default)]
    pub timeout_secs: u64,
}

impl ProcessCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout_secs: 0,
        }
    }

    /// Split a shell-like command line on whitespace.
    pub fn parse(line: &str) -> Result<Self, EngineError> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or(EngineError::EmptyCommand)?;
        Ok(Self {
            program,
            args: parts.collect(),
            timeout_secs: 0,
        })
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Run with `manifest` as the final argument.
    async fn run(&self, manifest: &Path) -> Result<(), EngineError> {
        if self.program.is_empty() {
            return Err(EngineError::EmptyCommand);
        }
        let start = Instant::now();
        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(manifest)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| EngineError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let output = if self.timeout_secs > 0 {
            tokio::time::timeout(
                Duration::from_secs(self.timeout_secs),
                child.wait_with_output(),
            )
            .await
            .map_err(|_| EngineError::Timeout {
                program: self.program.clone(),
                secs: self.timeout_secs,
            })??
        } else {
            child.wait_with_output().await?
        };

        debug!(
            program = %self.program,
            duration_ms = start.elapsed().as_millis() as u64,
            status = ?output.status.code(),
            "engine command exited"
        );
        if !output.status.success() {
            return Err(EngineError::CommandFailed {
                program: self.program.clone(),
                status: output.status.code(),
                stderr: stderr_tail(&output.stderr),
            });
        }
        Ok(())
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let start = stderr.len().saturating_sub(STDERR_TAIL_BYTES);
    String::from_utf8_lossy(&stderr[start..]).trim().to_string()
}

fn ensure_output(path: &Path) -> Result<PathBuf, EngineError> {
    if path.is_file() {
        Ok(path.to_path_buf())
    } else {
        Err(EngineError::MissingOutput {
            path: path.to_path_buf(),
        })
    }
}

fn write_manifest<T: Serialize>(dir: &Path, manifest: &T) -> Result<PathBuf, EngineError> {
    let path = dir.join("manifest.json");
    std::fs::write(&path, serde_json::to_vec_pretty(manifest)?)?;
    Ok(path)
}

/// Manifest handed to the training command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingManifest {
    pub version_code: String,
    pub base_weights: PathBuf,
    pub train_split: PathBuf,
    pub test_split: PathBuf,
    pub output_weights: PathBuf,
    pub feature_len: usize,
    pub num_classes: usize,
    pub label_to_index: BTreeMap<String, usize>,
    pub class_weights: BTreeMap<usize, f32>,
    pub params: TrainingParams,
}

/// Manifest handed to the compile command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileManifest {
    pub version_code: String,
    pub weights: PathBuf,
    pub representative: PathBuf,
    pub representative_count: usize,
    pub output: PathBuf,
}

pub struct ProcessTrainingEngine {
    command: ProcessCommand,
}

impl ProcessTrainingEngine {
    pub fn new(command: ProcessCommand) -> Self {
        Self { command }
    }
}

#[async_trait]
impl TrainingEngine for ProcessTrainingEngine {
    #[instrument(skip(self, job), fields(version_code = %job.version_code, program = %self.command.program))]
    async fn train(&self, job: &TrainingJob) -> Result<PathBuf, EngineError> {
        let scratch = tempfile::tempdir()?;
        let train_split = scratch.path().join("train.npy");
        let test_split = scratch.path().join("test.npy");
        npy::write_split(&train_split, &job.train)?;
        npy::write_split(&test_split, &job.test)?;

        let manifest = TrainingManifest {
            version_code: job.version_code.clone(),
            base_weights: job.base_weights.clone(),
            train_split,
            test_split,
            output_weights: job.output_weights.clone(),
            feature_len: job.train.feature_len(),
            num_classes: job.num_classes(),
            label_to_index: job.label_space.label_to_index().clone(),
            class_weights: job.class_weight_map(),
            params: job.params.clone(),
        };
        let manifest_path = write_manifest(scratch.path(), &manifest)?;

        info!(train = job.train.len(), test = job.test.len(), "starting training command");
        self.command.run(&manifest_path).await?;
        ensure_output(&job.output_weights)
    }
}

pub struct ProcessArtifactCompiler {
    command: ProcessCommand,
}

impl ProcessArtifactCompiler {
    pub fn new(command: ProcessCommand) -> Self {
        Self { command }
    }
}

#[async_trait]
impl ArtifactCompiler for ProcessArtifactCompiler {
    #[instrument(skip(self, job), fields(version_code = %job.version_code, program = %self.command.program))]
    async fn compile(&self, job: &CompileJob) -> Result<PathBuf, EngineError> {
        let scratch = tempfile::tempdir()?;
        let representative = scratch.path().join("representative.npy");
        npy::write_split(&representative, &job.representative)?;

        let manifest = CompileManifest {
            version_code: job.version_code.clone(),
            weights: job.weights.clone(),
            representative,
            representative_count: job.representative.len(),
            output: job.output.clone(),
        };
        let manifest_path = write_manifest(scratch.path(), &manifest)?;

        self.command.run(&manifest_path).await?;
        ensure_output(&job.output)
    }
}
