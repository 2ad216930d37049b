//! Handsign Core Library
//!
//! Incremental updates of a hand-gesture classifier. A run takes a published
//! base bundle and one batch of newly captured landmark samples, rejects the
//! batch when it is too close to what the base already knows, and otherwise
//! merges the data, rebuilds the label space, trains, compiles and publishes
//! a new bundle under a fresh version code.
//!
//! ## Key Components
//!
//! - `orchestrator`: the stage machine driving one run
//! - `duplicate_guard`, `label_space`, `merge`: pure data rules
//! - `cache`: expiring local cache of remote bundle archives
//! - `engine`: external training/compilation seams
//! - `publication`, `worker_pool`: foreground primary upload, background rest

pub mod cache;
pub mod config;
pub mod dataset;
pub mod duplicate_guard;
pub mod engine;
pub mod error;
pub mod label_space;
pub mod merge;
pub mod metrics;
pub mod obs;
pub mod orchestrator;
pub mod publication;
pub mod telemetry;
pub mod training;
pub mod version;
pub mod worker_pool;

pub use cache::{AssetCache, BaseBundle, BundleFetcher, CacheStatus};
pub use config::HandsignConfig;
pub use dataset::ingest::UpdateBatch;
pub use dataset::{split_train_test, Dataset, Split};
pub use duplicate_guard::{DuplicateGranularity, DuplicatePolicy, DuplicateReport};
pub use engine::{
    ArtifactCompiler, ProcessArtifactCompiler, ProcessCommand, ProcessTrainingEngine,
    TrainingEngine,
};
pub use error::{ConfigError, DatasetError, EngineError, Result, UpdateError};
pub use label_space::LabelSpace;
pub use orchestrator::{
    UpdateOrchestrator, UpdateOutcome, UpdatePreview, UpdateReport, UpdateRequest, UpdateStage,
};
pub use publication::PublicationPipeline;
pub use version::VersionCode;
pub use worker_pool::WorkerPool;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
