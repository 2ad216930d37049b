//! Error taxonomy for handsign-core.

use std::path::PathBuf;

use handsign_store::StorageError;

/// Errors produced while reading, writing or validating landmark datasets.
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("invalid split file {}: {reason}", path.display())]
    Format { path: PathBuf, reason: String },

    #[error("feature length mismatch: expected {expected}, got {actual}")]
    FeatureLength { expected: usize, actual: usize },

    #[error("feature length must be positive")]
    ZeroFeatureLength,

    #[error("empty label at row {row}")]
    EmptyLabel { row: usize },

    #[error("unknown label: {label}")]
    UnknownLabel { label: String },

    #[error("dataset is empty")]
    Empty,

    #[error("dataset of {len} sample(s) is too small to split with test fraction {test_fraction}")]
    TooSmall { len: usize, test_fraction: f64 },

    #[error("csv error at line {line}: {reason}")]
    Csv { line: usize, reason: String },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors produced while packing or extracting bundle archives.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("archive rejected: {0}")]
    Limit(String),

    #[error("archive is missing expected entry {name}")]
    MissingEntry { name: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors produced by training engines and artifact compilers.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{program} exited with {status:?}: {stderr}")]
    CommandFailed {
        program: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {secs} seconds")]
    Timeout { program: String, secs: u64 },

    #[error("expected output was not produced: {}", path.display())]
    MissingOutput { path: PathBuf },

    #[error("engine command is empty")]
    EmptyCommand,

    #[error("engine failure: {0}")]
    Failed(String),

    #[error("dataset error: {0}")]
    Dataset(#[from] DatasetError),

    #[error("manifest error: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that abort an update run.
///
/// A duplicate rejection is not an error; see `UpdateOutcome`.
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error("base model not found: {model_code}")]
    NotFound { model_code: String },

    #[error("transient storage failure: {0}")]
    Transient(#[source] StorageError),

    #[error("training failed: {0}")]
    Training(#[source] EngineError),

    #[error("artifact compilation failed: {0}")]
    Compile(#[source] EngineError),

    #[error("invalid update: {0}")]
    InvalidUpdate(String),

    #[error("dataset error: {0}")]
    Dataset(#[from] DatasetError),

    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("registry error: {0}")]
    Registry(#[source] StorageError),
}

impl UpdateError {
    /// Map a blob-store failure while resolving `model_code`.
    pub fn from_fetch(model_code: &str, err: StorageError) -> Self {
        match err {
            StorageError::NotFound { .. } => UpdateError::NotFound {
                model_code: model_code.to_string(),
            },
            StorageError::Io(e) => UpdateError::Io(e),
            other => UpdateError::Transient(other),
        }
    }

    /// Whether the caller may reasonably retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, UpdateError::Transient(_))
    }
}

/// Errors produced while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Result type for update runs.
pub type Result<T> = std::result::Result<T, UpdateError>;
