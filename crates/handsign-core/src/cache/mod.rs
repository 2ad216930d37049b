//! Local asset cache in front of the blob store.
//!
//! A cached asset is a file `{dir}/{name}` downloaded from
//! `{remote_prefix}/{name}`. Files older than the expiration window are
//! deleted and fetched again, never served. Concurrent resolves of the
//! same name are not deduplicated; callers that need at most one fetch per
//! name must serialize.

pub mod archive;
pub mod bundle;

use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use handsign_store::{BlobStore, StorageError, StorageResult};
use tracing::{debug, info, instrument};

use crate::config::CacheConfig;
use crate::metrics::METRICS;

pub use bundle::{BaseBundle, BundleFetcher};

/// Freshness of a cached file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Fresh,
    Expired,
    Missing,
}

pub struct AssetCache {
    dir: PathBuf,
    remote_prefix: String,
    expiration: Duration,
    store: Arc<dyn BlobStore>,
}

impl AssetCache {
    pub fn new(
        dir: impl Into<PathBuf>,
        remote_prefix: impl Into<String>,
        expiration: Duration,
        store: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            dir: dir.into(),
            remote_prefix: remote_prefix.into(),
            expiration,
            store,
        }
    }

    pub fn from_config(config: &CacheConfig, store: Arc<dyn BlobStore>) -> Self {
        Self::new(
            config.dir.clone(),
            config.remote_prefix.clone(),
            config.expiration(),
            store,
        )
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn expiration(&self) -> Duration {
        self.expiration
    }

    /// Local path an asset is cached at.
    pub fn local_path(&self, name: &str) -> StorageResult<PathBuf> {
        validate_name(name)?;
        Ok(self.dir.join(name))
    }

    /// Blob-store key an asset is fetched from.
    pub fn remote_key(&self, name: &str) -> String {
        let prefix = self.remote_prefix.trim_matches('/');
        if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{prefix}/{name}")
        }
    }

    /// Inspect the cached copy of `name` without touching it.
    pub fn status(&self, name: &str) -> StorageResult<CacheStatus> {
        let path = self.local_path(name)?;
        Ok(status_of(&path, self.expiration)?)
    }

    /// Drop the cached copy of `name` so the next `resolve` downloads it.
    pub fn evict(&self, name: &str) -> StorageResult<()> {
        let path = self.local_path(name)?;
        remove_if_present(&path)?;
        info!(event = "cache.evicted", name = %name);
        Ok(())
    }

    /// Return a local path to a fresh copy of `name`, downloading on miss.
    ///
    /// Blob-store failures are returned unchanged.
    #[instrument(skip(self), fields(dir = %self.dir.display()))]
    pub async fn resolve(&self, name: &str) -> StorageResult<PathBuf> {
        let path = self.local_path(name)?;
        match status_of(&path, self.expiration)? {
            CacheStatus::Fresh => {
                METRICS.inc_cache_hits();
                debug!(event = "cache.hit", name = %name);
                return Ok(path);
            }
            CacheStatus::Expired => {
                info!(event = "cache.expired", name = %name);
                remove_if_present(&path)?;
            }
            CacheStatus::Missing => {}
        }

        METRICS.inc_cache_misses();
        info!(event = "cache.miss", name = %name);
        tokio::fs::create_dir_all(&self.dir).await?;
        let key = self.remote_key(name);
        self.store.download_to(&key, &path).await?;
        Ok(path)
    }
}

fn validate_name(name: &str) -> StorageResult<()> {
    let mut components = Path::new(name).components();
    let single_normal =
        matches!(components.next(), Some(Component::Normal(_))) && components.next().is_none();
    if !single_normal {
        return Err(StorageError::InvalidKey {
            key: name.to_string(),
        });
    }
    Ok(())
}

fn status_of(path: &Path, expiration: Duration) -> io::Result<CacheStatus> {
    let meta = match std::fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(CacheStatus::Missing),
        Err(e) => return Err(e),
    };
    if !meta.is_file() {
        return Ok(CacheStatus::Missing);
    }
    // mtime in the future counts as age zero
    let age = SystemTime::now()
        .duration_since(meta.modified()?)
        .unwrap_or(Duration::ZERO);
    if age > expiration {
        Ok(CacheStatus::Expired)
    } else {
        Ok(CacheStatus::Fresh)
    }
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
