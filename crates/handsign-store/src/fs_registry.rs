//! Directory-backed model registry.
//!
//! One JSON document per bundle at `<root>/<version_code>.json`. Records
//! are written through a temp file and linked into place without
//! replacing an existing one, so two runs can never register the same
//! version code.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tracing::{debug, instrument};

use crate::error::StorageError;
use crate::storage_traits::{BundleRecord, ModelRegistry, StorageResult};

#[derive(Debug, Clone)]
pub struct FsModelRegistry {
    root: PathBuf,
}

impl FsModelRegistry {
    /// Open the registry at `root`, creating the directory if needed.
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, version_code: &str) -> StorageResult<PathBuf> {
        let valid = !version_code.is_empty()
            && !version_code.starts_with('.')
            && version_code
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
        if !valid {
            return Err(StorageError::InvalidKey {
                key: version_code.to_string(),
            });
        }
        Ok(self.root.join(format!("{version_code}.json")))
    }
}

fn link_new(root: &Path, path: &Path, json: &[u8], version_code: String) -> StorageResult<()> {
    let mut tmp = NamedTempFile::new_in(root)?;
    tmp.write_all(json)?;
    tmp.as_file().sync_all()?;
    tmp.persist_noclobber(path).map_err(|e| {
        if e.error.kind() == io::ErrorKind::AlreadyExists {
            StorageError::AlreadyExists { key: version_code }
        } else {
            StorageError::Io(e.error)
        }
    })?;
    Ok(())
}

#[async_trait]
impl ModelRegistry for FsModelRegistry {
    #[instrument(skip(self, record), fields(version_code = %record.version_code))]
    async fn register(&self, record: BundleRecord) -> StorageResult<BundleRecord> {
        let path = self.record_path(&record.version_code)?;
        let json = serde_json::to_vec_pretty(&record)?;
        let root = self.root.clone();
        let code = record.version_code.clone();
        tokio::task::spawn_blocking(move || link_new(&root, &path, &json, code))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))??;
        debug!("bundle record written");
        Ok(record)
    }

    async fn get(&self, version_code: &str) -> StorageResult<Option<BundleRecord>> {
        let path = self.record_path(version_code)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> StorageResult<Vec<BundleRecord>> {
        let mut records: Vec<BundleRecord> = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            records.push(serde_json::from_slice(&bytes)?);
        }
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }
}
