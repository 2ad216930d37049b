use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::StorageError;
use crate::storage_traits::{BlobStore, StorageResult};

/// Filesystem-backed blob store.
///
/// Layout: `<root>/<key>`, where `key` is a relative, `/`-separated path
/// such as `models/1718000000_ab12cd34.zip`. Public URLs are `file://` URLs.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Create a new `FsBlobStore` rooted at `root`. Creates `root` if needed.
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> StorageResult<PathBuf> {
        let rel = Path::new(key);
        let safe = !key.is_empty()
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(StorageError::InvalidKey {
                key: key.to_string(),
            });
        }
        Ok(self.root.join(rel))
    }
}

/// Temp file in `dest`'s directory, created if needed.
fn temp_beside(dest: &Path) -> io::Result<NamedTempFile> {
    let dir = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    NamedTempFile::new_in(dir)
}

/// Copy `src` to `dest` through a temp file in `dest`'s directory, then rename.
fn copy_atomic(src: &Path, dest: &Path) -> io::Result<()> {
    let mut input = fs::File::open(src)?;
    let mut tmp = temp_beside(dest)?;
    io::copy(&mut input, &mut tmp)?;
    tmp.persist(dest).map_err(|e| e.error)?;
    Ok(())
}

/// Write `data` to `dest` so readers see either the old file or all of `data`.
pub(crate) fn write_atomic(dest: &Path, data: &[u8]) -> io::Result<()> {
    let mut tmp = temp_beside(dest)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| e.error)?;
    Ok(())
}

fn map_missing(err: io::Error, key: &str) -> StorageError {
    if err.kind() == io::ErrorKind::NotFound {
        StorageError::NotFound {
            key: key.to_string(),
        }
    } else {
        StorageError::Io(err)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn download_to(&self, key: &str, dest: &Path) -> StorageResult<()> {
        let src = self.object_path(key)?;
        let dest = dest.to_path_buf();
        let owned_key = key.to_string();
        tokio::task::spawn_blocking(move || copy_atomic(&src, &dest))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?
            .map_err(|e| map_missing(e, &owned_key))?;
        debug!(key = %key, "fs blob downloaded");
        Ok(())
    }

    async fn upload_from(&self, key: &str, src: &Path) -> StorageResult<String> {
        let dest = self.object_path(key)?;
        let src = src.to_path_buf();
        let target = dest.clone();
        tokio::task::spawn_blocking(move || copy_atomic(&src, &target))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))??;
        debug!(key = %key, "fs blob uploaded");
        Ok(format!("file://{}", dest.display()))
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.object_path(key)?;
        Ok(path.is_file())
    }
}
