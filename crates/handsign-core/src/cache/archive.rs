//! Bundle archives: flat zip files holding a model's weights and splits.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::ArchiveError;

const MAX_ZIP_ENTRIES: usize = 64;
const MAX_ZIP_ENTRY_UNCOMPRESSED_BYTES: u64 = 1024 * 1024 * 1024;
const MAX_ZIP_TOTAL_UNCOMPRESSED_BYTES: u64 = 2 * 1024 * 1024 * 1024;
const MAX_ZIP_COMPRESSION_RATIO: u64 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionLimits {
    pub max_entries: usize,
    pub max_entry_uncompressed_bytes: u64,
    pub max_total_uncompressed_bytes: u64,
    pub max_compression_ratio: u64,
}

impl Default for ExtractionLimits {
    fn default() -> Self {
        Self {
            max_entries: MAX_ZIP_ENTRIES,
            max_entry_uncompressed_bytes: MAX_ZIP_ENTRY_UNCOMPRESSED_BYTES,
            max_total_uncompressed_bytes: MAX_ZIP_TOTAL_UNCOMPRESSED_BYTES,
            max_compression_ratio: MAX_ZIP_COMPRESSION_RATIO,
        }
    }
}

/// Extract `zip_path` into `dest_dir` and return the written files.
///
/// Entries whose names would escape `dest_dir` are skipped.
pub fn extract_zip(
    zip_path: &Path,
    dest_dir: &Path,
    limits: ExtractionLimits,
) -> Result<Vec<PathBuf>, ArchiveError> {
    let file = File::open(zip_path)?;
    let mut archive = zip::ZipArchive::new(file)?;
    let entry_count = archive.len();
    if entry_count > limits.max_entries {
        return Err(ArchiveError::Limit(format!(
            "archive has {entry_count} entries, limit is {}",
            limits.max_entries
        )));
    }

    let mut written = Vec::with_capacity(entry_count);
    let mut total_uncompressed: u64 = 0;
    for i in 0..entry_count {
        let mut entry = archive.by_index(i)?;
        let uncompressed_size = entry.size();
        if uncompressed_size > limits.max_entry_uncompressed_bytes {
            return Err(ArchiveError::Limit(format!(
                "entry '{}' is too large ({uncompressed_size} bytes, limit {})",
                entry.name(),
                limits.max_entry_uncompressed_bytes
            )));
        }
        if uncompressed_size > 0 {
            let compressed_size = entry.compressed_size();
            if compressed_size == 0
                || uncompressed_size > compressed_size.saturating_mul(limits.max_compression_ratio)
            {
                return Err(ArchiveError::Limit(format!(
                    "entry '{}' exceeds compression ratio limit",
                    entry.name()
                )));
            }
        }
        total_uncompressed = total_uncompressed
            .checked_add(uncompressed_size)
            .ok_or_else(|| ArchiveError::Limit("archive size overflow".to_string()))?;
        if total_uncompressed > limits.max_total_uncompressed_bytes {
            return Err(ArchiveError::Limit(format!(
                "extracted size {total_uncompressed} exceeds limit {}",
                limits.max_total_uncompressed_bytes
            )));
        }

        let outpath = match entry.enclosed_name() {
            Some(path) => dest_dir.join(path),
            None => continue,
        };
        if entry.is_dir() {
            std::fs::create_dir_all(&outpath)?;
            continue;
        }
        if let Some(parent) = outpath.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut outfile = File::create(&outpath)?;
        std::io::copy(&mut entry, &mut outfile)?;
        written.push(outpath);
    }
    Ok(written)
}

/// Write a flat archive of `files` (stored under their file names) to `dest`.
///
/// The archive is assembled in a temp file next to `dest` and renamed.
pub fn pack_zip(dest: &Path, files: &[PathBuf]) -> Result<(), ArchiveError> {
    let dir = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let tmp = NamedTempFile::new_in(dir)?;
    let mut zip = zip::ZipWriter::new(tmp);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);
    for path in files {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ArchiveError::MissingEntry {
                name: path.display().to_string(),
            })?;
        zip.start_file(name, options)?;
        let mut input = File::open(path)?;
        std::io::copy(&mut input, &mut zip)?;
    }
    let mut tmp = zip.finish()?;
    tmp.flush()?;
    tmp.persist(dest).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        for (name, data) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn pack_then_extract_flat_files() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("m_model_cnn.h5");
        let b = dir.path().join("m_train_hand_landmarks.npy");
        std::fs::write(&a, b"weights").unwrap();
        std::fs::write(&b, b"train").unwrap();

        let zip_path = dir.path().join("out").join("m.zip");
        pack_zip(&zip_path, &[a, b]).unwrap();

        let dest = dir.path().join("extracted");
        let written = extract_zip(&zip_path, &dest, ExtractionLimits::default()).unwrap();
        assert_eq!(written.len(), 2);
        assert_eq!(std::fs::read(dest.join("m_model_cnn.h5")).unwrap(), b"weights");
        assert_eq!(
            std::fs::read(dest.join("m_train_hand_landmarks.npy")).unwrap(),
            b"train"
        );
    }

    #[test]
    fn escaping_entries_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("evil.zip");
        write_zip(&zip_path, &[("../escape.txt", b"x"), ("ok.txt", b"y")]);

        let dest = dir.path().join("dest");
        let written = extract_zip(&zip_path, &dest, ExtractionLimits::default()).unwrap();
        assert_eq!(written, vec![dest.join("ok.txt")]);
        assert!(!dir.path().join("escape.txt").exists());
    }

    #[test]
    fn entry_count_limit_is_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("many.zip");
        write_zip(&zip_path, &[("a", b"1"), ("b", b"2"), ("c", b"3")]);
        let limits = ExtractionLimits {
            max_entries: 2,
            ..ExtractionLimits::default()
        };
        let err = extract_zip(&zip_path, &dir.path().join("d"), limits).unwrap_err();
        assert!(matches!(err, ArchiveError::Limit(_)));
    }

    #[test]
    fn garbage_is_a_zip_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.zip");
        std::fs::write(&path, b"not a zip").unwrap();
        let err = extract_zip(&path, &dir.path().join("d"), ExtractionLimits::default())
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Zip(_)));
    }
}
