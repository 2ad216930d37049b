//! Storage trait definitions for handsign
//!
//! These traits define the external collaborators of an update run:
//! - `BlobStore`: key -> bytes object storage with public URLs after upload
//! - `ModelRegistry`: metadata store holding one record per produced bundle
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// ContentDigest
// ---------------------------------------------------------------------------

/// SHA-256 of a published artifact, as 64 lowercase hex characters.
///
/// Deserialization goes through `TryFrom<String>`, so a registry record
/// can never carry a malformed digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentDigest(String);

impl ContentDigest {
    pub fn from_bytes(data: &[u8]) -> Self {
        Self::finish(Sha256::new_with_prefix(data))
    }

    /// Digest a file without loading it into memory.
    pub fn from_file(path: &Path) -> StorageResult<Self> {
        let mut hasher = Sha256::new();
        std::io::copy(&mut std::fs::File::open(path)?, &mut hasher)?;
        Ok(Self::finish(hasher))
    }

    fn finish(hasher: Sha256) -> Self {
        ContentDigest(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 characters, for log lines and listings.
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = StorageError;

    fn try_from(raw: String) -> StorageResult<Self> {
        let valid = raw.len() == 64 && raw.bytes().all(|b| b.is_ascii_hexdigit());
        if !valid {
            return Err(StorageError::InvalidDigest { digest: raw });
        }
        Ok(ContentDigest(raw.to_ascii_lowercase()))
    }
}

impl From<ContentDigest> for String {
    fn from(digest: ContentDigest) -> Self {
        digest.0
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// BlobStore: remote object storage
// ---------------------------------------------------------------------------

/// Remote object store used for base-bundle download and artifact upload.
///
/// Guarantees:
/// - `download_to` either writes the complete object to `dest` or fails;
///   a missing object is `StorageError::NotFound`.
/// - `upload_from` returns only after the object is durably stored and
///   publicly readable, yielding its public URL.
/// - Retries for transient failures happen inside the implementation;
///   callers see `StorageError::Transient` once the budget is spent.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Download object `key` into the file at `dest`, replacing it.
    async fn download_to(&self, key: &str, dest: &Path) -> StorageResult<()>;

    /// Upload the file at `src` under `key` and return its public URL.
    async fn upload_from(&self, key: &str, src: &Path) -> StorageResult<String>;

    /// Check whether `key` exists without downloading it.
    async fn exists(&self, key: &str) -> StorageResult<bool>;
}

// ---------------------------------------------------------------------------
// ModelRegistry: bundle metadata
// ---------------------------------------------------------------------------

/// Metadata for one produced model bundle.
///
/// Written once after the primary artifact is published; never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleRecord {
    /// Generated version code shared by all four artifacts
    pub version_code: String,
    /// Model code of the base bundle this one was derived from
    pub base_model: Option<String>,
    /// Archive under the models folder holding the weights and both splits
    pub archive_file: String,
    /// Trained weights entry inside `archive_file`
    pub weights_file: String,
    /// Compiled inference artifact filename, published at `primary_url`
    pub compiled_file: String,
    /// Combined train split entry inside `archive_file`
    pub train_file: String,
    /// Combined test split entry inside `archive_file`
    pub test_file: String,
    /// Public URL of the compiled artifact
    pub primary_url: String,
    /// SHA-256 of the compiled artifact
    pub compiled_digest: ContentDigest,
    /// Label names ordered by class index
    pub labels: Vec<String>,
    /// When this record was registered
    pub created_at: DateTime<Utc>,
}

/// Model metadata registry.
///
/// Semantics:
/// - `register` is insert-only; an existing `version_code` is rejected with
///   `StorageError::AlreadyExists`.
/// - `list` returns records newest first.
#[async_trait]
pub trait ModelRegistry: Send + Sync {
    /// Register a fully written bundle.
    async fn register(&self, record: BundleRecord) -> StorageResult<BundleRecord>;

    /// Look up a bundle by version code.
    async fn get(&self, version_code: &str) -> StorageResult<Option<BundleRecord>>;

    /// All registered bundles, newest first.
    async fn list(&self) -> StorageResult<Vec<BundleRecord>>;
}
