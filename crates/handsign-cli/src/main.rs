//! Handsign - incremental gesture-model updates
//!
//! The `handsign` command extends a published hand-landmark classifier with
//! newly captured samples.
//!
//! ## Commands
//!
//! - `update`: run a full update and publish the new bundle
//! - `fetch`: resolve a base bundle into the local models directory
//! - `labels`: print the label map an update would produce
//! - `check`: run only the duplicate guard
//! - `import`: register an existing bundle as a base model
//! - `show` / `list`: query the model registry

mod input;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use handsign_core::duplicate_guard::SplitCheck;
use handsign_core::engine::{ArtifactCompiler, TrainingEngine};
use handsign_core::metrics::METRICS;
use handsign_core::{
    HandsignConfig, ProcessArtifactCompiler, ProcessCommand, ProcessTrainingEngine,
    UpdateOrchestrator, UpdateOutcome, UpdateRequest, WorkerPool,
};
use handsign_store::{
    BlobStore, FsBlobStore, FsModelRegistry, HttpBlobConfig, HttpBlobStore, ModelRegistry,
    SurrealModelRegistry,
};
use serde::Serialize;
use tracing::{info, Level};

const REJECTED_MESSAGE: &str =
    "update rejected: too similar to existing gestures, choose a different gesture";

#[derive(Parser)]
#[command(name = "handsign")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Incremental updates for hand-gesture classifiers", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// TOML configuration file
    #[arg(short, long, global = true, env = "HANDSIGN_CONFIG")]
    config: Option<PathBuf>,

    #[command(flatten)]
    stores: StoreArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct StoreArgs {
    /// Directory used as blob store when no blob URL is configured
    #[arg(long, global = true, env = "HANDSIGN_BLOB_DIR", default_value = "blobs")]
    blob_dir: PathBuf,

    /// HTTP blob store endpoint (overrides the config file)
    #[arg(long, global = true)]
    blob_url: Option<String>,

    /// Registry: a directory, `mem://`, or a SurrealDB address (`ws://...`)
    #[arg(long, global = true, env = "HANDSIGN_REGISTRY", default_value = "registry")]
    registry: String,

    /// Local model bundle directory (overrides the config file)
    #[arg(long, global = true)]
    models_dir: Option<PathBuf>,

    /// Output directory for new bundles (overrides the config file)
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Train and publish a new model from a base model and one new gesture
    Update {
        /// Model code of the base bundle
        #[arg(short, long)]
        base: String,

        /// Gesture name (overrides the one in the landmarks file)
        #[arg(short, long)]
        gesture: Option<String>,

        /// Landmarks file (JSON or CSV)
        #[arg(short, long)]
        landmarks: PathBuf,

        /// Training command; the job manifest path is appended
        #[arg(long, env = "HANDSIGN_TRAIN_CMD")]
        train_cmd: Option<String>,

        /// Compile command; the job manifest path is appended
        #[arg(long, env = "HANDSIGN_COMPILE_CMD")]
        compile_cmd: Option<String>,

        /// Seconds before an engine command is killed (0 = never)
        #[arg(long, env = "HANDSIGN_ENGINE_TIMEOUT", default_value = "0")]
        engine_timeout: u64,
    },

    /// Resolve and extract a base bundle
    Fetch {
        #[arg(short, long)]
        base: String,
    },

    /// Print the label map an update would produce
    Labels {
        #[arg(short, long)]
        base: String,

        /// Landmarks file (JSON or CSV)
        #[arg(short, long)]
        update: PathBuf,

        #[arg(short, long)]
        gesture: Option<String>,
    },

    /// Run the duplicate guard against a base model
    Check {
        #[arg(short, long)]
        base: String,

        /// Landmarks file (JSON or CSV)
        #[arg(short, long)]
        landmarks: PathBuf,

        #[arg(short, long)]
        gesture: Option<String>,
    },

    /// Register an existing bundle so it can serve as a base model
    Import {
        /// Model code; `{code}.zip` must already be in the blob store
        #[arg(long)]
        code: String,

        /// Compiled inference artifact of the bundle
        #[arg(long)]
        compiled: PathBuf,
    },

    /// Show a registered bundle
    Show {
        /// Version code
        code: String,
    },

    /// List registered bundles, newest first
    List,
}

#[derive(Serialize)]
struct UpdateResponse<'a> {
    new_model_code: &'a str,
    new_tflite_model_url: &'a str,
    new_labels: &'a [String],
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    handsign_core::telemetry::init_tracing(cli.json, level);

    let config = load_config(&cli)?;
    let pool = Arc::new(WorkerPool::new(config.publication.workers));
    let result = run(cli, config, Arc::clone(&pool)).await;

    if pool.pending() > 0 {
        info!(pending = pool.pending(), "waiting for background uploads");
    }
    pool.drain().await;
    METRICS.flush();
    result
}

fn load_config(cli: &Cli) -> Result<HandsignConfig> {
    let mut config = match &cli.config {
        Some(path) => HandsignConfig::from_toml_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => HandsignConfig::default(),
    };
    config.apply_env();
    if let Some(url) = &cli.stores.blob_url {
        config.blob_url = Some(url.clone());
    }
    if let Some(dir) = &cli.stores.models_dir {
        config.bundle.models_dir = dir.clone();
    }
    if let Some(dir) = &cli.stores.output_dir {
        config.output_dir = dir.clone();
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

async fn run(cli: Cli, config: HandsignConfig, pool: Arc<WorkerPool>) -> Result<ExitCode> {
    let registry = open_registry(&cli.stores.registry).await?;
    match cli.command {
        Commands::Update {
            base,
            gesture,
            landmarks,
            train_cmd,
            compile_cmd,
            engine_timeout,
        } => {
            let engine = training_engine(train_cmd.as_deref(), engine_timeout)?;
            let compiler = artifact_compiler(compile_cmd.as_deref(), engine_timeout)?;
            let blob = open_blob_store(&config, &cli.stores.blob_dir)?;
            let batch = input::load_batch(
                &landmarks,
                gesture.as_deref(),
                config.training.feature_len,
            )?;
            let orchestrator =
                UpdateOrchestrator::new(config, blob, registry, engine, compiler, pool);
            cmd_update(&orchestrator, UpdateRequest { base_model: base, batch }).await
        }
        Commands::Fetch { base } => {
            let orchestrator = read_only_orchestrator(config, &cli.stores.blob_dir, registry, pool)?;
            let bundle = orchestrator.fetcher().fetch(&base).await?;
            println!("{}", bundle.dir.display());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Labels {
            base,
            update,
            gesture,
        } => {
            let feature_len = config.training.feature_len;
            let orchestrator = read_only_orchestrator(config, &cli.stores.blob_dir, registry, pool)?;
            let batch = input::load_batch(&update, gesture.as_deref(), feature_len)?;
            let preview = orchestrator.preview(&base, &batch).await?;
            for (index, label) in preview.label_space.labels().iter().enumerate() {
                let marker = if preview.label_space.new_labels().contains(label) {
                    "  (new)"
                } else {
                    ""
                };
                println!("{index:>3}  {label}{marker}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Check {
            base,
            landmarks,
            gesture,
        } => {
            let feature_len = config.training.feature_len;
            let orchestrator = read_only_orchestrator(config, &cli.stores.blob_dir, registry, pool)?;
            let batch = input::load_batch(&landmarks, gesture.as_deref(), feature_len)?;
            let preview = orchestrator.preview(&base, &batch).await?;
            let report = &preview.duplicates;
            println!("train: {}", describe_split(&report.train));
            println!("test:  {}", describe_split(&report.test));
            if report.rejected {
                println!("{REJECTED_MESSAGE}");
                Ok(ExitCode::from(2))
            } else {
                println!("accepted");
                Ok(ExitCode::SUCCESS)
            }
        }
        Commands::Import { code, compiled } => {
            let orchestrator = read_only_orchestrator(config, &cli.stores.blob_dir, registry, pool)?;
            let record = orchestrator
                .import_base(&code, &compiled)
                .await
                .with_context(|| format!("failed to import {code}"))?;
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Show { code } => {
            let Some(record) = registry.get(&code).await? else {
                bail!("no bundle registered as {code}");
            };
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::List => {
            let records = registry.list().await?;
            if records.is_empty() {
                println!("No bundles registered.");
            }
            for record in records {
                println!(
                    "{}  base={}  labels={}  {}",
                    record.version_code,
                    record.base_model.as_deref().unwrap_or("-"),
                    record.labels.len(),
                    record.created_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn cmd_update(orchestrator: &UpdateOrchestrator, request: UpdateRequest) -> Result<ExitCode> {
    match orchestrator.run(request).await? {
        UpdateOutcome::Published(report) => {
            let response = UpdateResponse {
                new_model_code: &report.version_code,
                new_tflite_model_url: &report.primary_url,
                new_labels: &report.new_labels,
            };
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(ExitCode::SUCCESS)
        }
        UpdateOutcome::DuplicateRejected(report) => {
            info!(ratio = report.decisive_ratio(), "update rejected");
            println!("{REJECTED_MESSAGE}");
            Ok(ExitCode::from(2))
        }
    }
}

fn describe_split(check: &SplitCheck) -> String {
    format!("{:.1}% ({}/{})", check.ratio, check.matches, check.total)
}

/// An orchestrator for commands that never train or publish.
fn read_only_orchestrator(
    config: HandsignConfig,
    blob_dir: &Path,
    registry: Arc<dyn ModelRegistry>,
    pool: Arc<WorkerPool>,
) -> Result<UpdateOrchestrator> {
    let blob = open_blob_store(&config, blob_dir)?;
    let unused = ProcessCommand::new("false");
    Ok(UpdateOrchestrator::new(
        config,
        blob,
        registry,
        Arc::new(ProcessTrainingEngine::new(unused.clone())),
        Arc::new(ProcessArtifactCompiler::new(unused)),
        pool,
    ))
}

fn open_blob_store(config: &HandsignConfig, blob_dir: &Path) -> Result<Arc<dyn BlobStore>> {
    match &config.blob_url {
        Some(url) => {
            let mut http = HttpBlobConfig::from_env();
            http.base_url = url.clone();
            Ok(Arc::new(
                HttpBlobStore::new(http).context("failed to create HTTP blob store")?,
            ))
        }
        None => Ok(Arc::new(FsBlobStore::new(blob_dir).with_context(|| {
            format!("failed to open blob directory {}", blob_dir.display())
        })?)),
    }
}

async fn open_registry(endpoint: &str) -> Result<Arc<dyn ModelRegistry>> {
    if !endpoint.contains("://") {
        let registry = FsModelRegistry::new(endpoint)
            .with_context(|| format!("failed to open registry directory {endpoint}"))?;
        return Ok(Arc::new(registry));
    }
    let registry = if endpoint == "mem://" {
        SurrealModelRegistry::in_memory().await
    } else {
        SurrealModelRegistry::connect(endpoint, "handsign", "registry").await
    };
    Ok(Arc::new(registry.context("failed to open model registry")?))
}

fn engine_command(line: Option<&str>, what: &str, timeout: u64) -> Result<ProcessCommand> {
    let Some(line) = line else {
        bail!("no {what} command configured");
    };
    Ok(ProcessCommand::parse(line)
        .with_context(|| format!("invalid {what} command"))?
        .with_timeout(timeout))
}

fn training_engine(line: Option<&str>, timeout: u64) -> Result<Arc<dyn TrainingEngine>> {
    let command = engine_command(line, "training (--train-cmd)", timeout)?;
    Ok(Arc::new(ProcessTrainingEngine::new(command)))
}

fn artifact_compiler(line: Option<&str>, timeout: u64) -> Result<Arc<dyn ArtifactCompiler>> {
    let command = engine_command(line, "compile (--compile-cmd)", timeout)?;
    Ok(Arc::new(ProcessArtifactCompiler::new(command)))
}
