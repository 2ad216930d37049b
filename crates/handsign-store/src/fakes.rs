//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryBlobStore` and `MemoryModelRegistry` that satisfy the
//! trait contracts without any external dependencies. The blob store
//! counts downloads per key and can be told to fail selected uploads.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// MemoryBlobStore
// ---------------------------------------------------------------------------

/// In-memory object store backed by a `HashMap<key, bytes>`.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    downloads: Mutex<HashMap<String, usize>>,
    uploads: Mutex<Vec<String>>,
    failing_suffixes: Mutex<HashSet<String>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object.
    pub fn insert(&self, key: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.objects.lock().unwrap().insert(key.into(), data.into());
    }

    /// Current bytes stored under `key`.
    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    /// Number of successful downloads of `key`.
    pub fn download_count(&self, key: &str) -> usize {
        self.downloads.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    /// Total successful downloads across all keys.
    pub fn total_downloads(&self) -> usize {
        self.downloads.lock().unwrap().values().sum()
    }

    /// Keys uploaded so far, in upload order.
    pub fn uploaded_keys(&self) -> Vec<String> {
        self.uploads.lock().unwrap().clone()
    }

    /// Make every upload whose key ends with `suffix` fail as transient.
    pub fn fail_uploads_ending_with(&self, suffix: impl Into<String>) {
        self.failing_suffixes.lock().unwrap().insert(suffix.into());
    }

    pub fn public_url(key: &str) -> String {
        format!("mem://{key}")
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn download_to(&self, key: &str, dest: &Path) -> StorageResult<()> {
        let data = self
            .object(key)
            .ok_or_else(|| StorageError::NotFound {
                key: key.to_string(),
            })?;
        tokio::fs::write(dest, &data).await?;
        *self
            .downloads
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_insert(0) += 1;
        Ok(())
    }

    async fn upload_from(&self, key: &str, src: &Path) -> StorageResult<String> {
        let failing = self
            .failing_suffixes
            .lock()
            .unwrap()
            .iter()
            .any(|suffix| key.ends_with(suffix.as_str()));
        if failing {
            return Err(StorageError::Transient {
                key: key.to_string(),
                attempts: 1,
                reason: "injected upload failure".to_string(),
            });
        }
        let data = tokio::fs::read(src).await?;
        self.insert(key, data);
        self.uploads.lock().unwrap().push(key.to_string());
        Ok(Self::public_url(key))
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.objects.lock().unwrap().contains_key(key))
    }
}

// ---------------------------------------------------------------------------
// MemoryModelRegistry
// ---------------------------------------------------------------------------

/// In-memory registry backed by an append-only `Vec<BundleRecord>`.
#[derive(Debug, Default)]
pub struct MemoryModelRegistry {
    records: Mutex<Vec<BundleRecord>>,
}

impl MemoryModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ModelRegistry for MemoryModelRegistry {
    async fn register(&self, record: BundleRecord) -> StorageResult<BundleRecord> {
        let mut records = self.records.lock().unwrap();
        if records
            .iter()
            .any(|r| r.version_code == record.version_code)
        {
            return Err(StorageError::AlreadyExists {
                key: record.version_code,
            });
        }
        records.push(record.clone());
        Ok(record)
    }

    async fn get(&self, version_code: &str) -> StorageResult<Option<BundleRecord>> {
        let records = self.records.lock().unwrap();
        Ok(records
            .iter()
            .find(|r| r.version_code == version_code)
            .cloned())
    }

    async fn list(&self) -> StorageResult<Vec<BundleRecord>> {
        let records = self.records.lock().unwrap();
        let mut out = records.clone();
        // Insertion order breaks created_at ties.
        out.reverse();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }
}
