//! Two-phase artifact publication.
//!
//! The primary (compiled) artifact is uploaded before `publish` returns.
//! The secondary artifacts are packed into `{version_code}.zip` and
//! uploaded as `{folder}/{version_code}.zip` on the worker pool, which is
//! the same archive `BundleFetcher` resolves when the new model is later
//! used as a base. Secondary failures are logged and counted only.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use handsign_store::{BlobStore, StorageError, StorageResult};
use tracing::{info, instrument};

use crate::cache::archive::pack_zip;
use crate::config::PublicationConfig;
use crate::error::ArchiveError;
use crate::obs;
use crate::version::ArtifactNames;
use crate::worker_pool::WorkerPool;

/// Why a background upload failed.
#[derive(Debug, thiserror::Error)]
pub enum SecondaryUploadError {
    #[error("packing {archive}: {source}")]
    Pack {
        archive: String,
        #[source]
        source: ArchiveError,
    },

    #[error("uploading {key}: {source}")]
    Upload {
        key: String,
        #[source]
        source: StorageError,
    },
}

pub struct PublicationPipeline {
    store: Arc<dyn BlobStore>,
    folder: String,
    pool: Arc<WorkerPool>,
}

impl PublicationPipeline {
    pub fn new(store: Arc<dyn BlobStore>, folder: impl Into<String>, pool: Arc<WorkerPool>) -> Self {
        Self {
            store,
            folder: folder.into(),
            pool,
        }
    }

    pub fn from_config(
        config: &PublicationConfig,
        store: Arc<dyn BlobStore>,
        pool: Arc<WorkerPool>,
    ) -> Self {
        Self::new(store, config.remote_folder.clone(), pool)
    }

    /// Blob key for a published file name.
    pub fn key_for(&self, file_name: &str) -> String {
        let folder = self.folder.trim_matches('/');
        if folder.is_empty() {
            file_name.to_string()
        } else {
            format!("{folder}/{file_name}")
        }
    }

    /// Upload `primary` now and queue `secondaries`; returns the primary's URL.
    #[instrument(skip(self, secondaries), fields(primary = %primary.display()))]
    pub async fn publish(
        &self,
        primary: &Path,
        secondaries: Vec<PathBuf>,
        version_code: &str,
    ) -> StorageResult<String> {
        let file_name = primary
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StorageError::InvalidKey {
                key: primary.display().to_string(),
            })?;
        let key = self.key_for(file_name);
        let url = self.store.upload_from(&key, primary).await?;
        obs::emit_publish_primary(version_code, &key, &url);

        if !secondaries.is_empty() {
            let archive = ArtifactNames::bundle_archive(version_code);
            let archive_key = self.key_for(&archive);
            let store = Arc::clone(&self.store);
            let code = version_code.to_string();
            self.pool.spawn(format!("upload {archive_key}"), async move {
                let result = upload_bundle(store, &archive, &archive_key, secondaries).await;
                match &result {
                    Ok(url) => info!(event = "publish.secondary", version_code = %code, url = %url),
                    Err(e) => obs::emit_publish_secondary_failed(&code, e),
                }
                result.map(|_| ())
            });
        }
        Ok(url)
    }
}

async fn upload_bundle(
    store: Arc<dyn BlobStore>,
    archive: &str,
    key: &str,
    files: Vec<PathBuf>,
) -> Result<String, SecondaryUploadError> {
    let staging = tempfile::tempdir().map_err(|e| SecondaryUploadError::Pack {
        archive: archive.to_string(),
        source: ArchiveError::Io(e),
    })?;
    let zip_path = staging.path().join(archive);
    let target = zip_path.clone();
    let packed = tokio::task::spawn_blocking(move || pack_zip(&target, &files))
        .await
        .map_err(|e| ArchiveError::Io(std::io::Error::other(e)))
        .and_then(|r| r);
    packed.map_err(|source| SecondaryUploadError::Pack {
        archive: archive.to_string(),
        source,
    })?;

    store
        .upload_from(key, &zip_path)
        .await
        .map_err(|source| SecondaryUploadError::Upload {
            key: key.to_string(),
            source,
        })
}
