//! Asset-cache expiry and base-bundle resolution.

mod common;

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use common::*;
use handsign_core::cache::archive::ExtractionLimits;
use handsign_core::error::ArchiveError;
use handsign_core::{AssetCache, BundleFetcher, CacheStatus, UpdateError};
use handsign_store::fakes::MemoryBlobStore;

fn cache(dir: &std::path::Path, store: Arc<MemoryBlobStore>) -> Arc<AssetCache> {
    Arc::new(AssetCache::new(
        dir,
        "models",
        Duration::from_secs(24 * 60 * 60),
        store,
    ))
}

fn age(path: &std::path::Path, by: Duration) {
    let file = std::fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() - by).unwrap();
}

#[tokio::test]
async fn fresh_asset_is_served_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryBlobStore::new());
    store.insert("models/asset.bin", b"v1".to_vec());
    let cache = cache(dir.path(), store.clone());

    assert_eq!(cache.status("asset.bin").unwrap(), CacheStatus::Missing);
    let path = cache.resolve("asset.bin").await.unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), b"v1");

    store.insert("models/asset.bin", b"v2".to_vec());
    let again = cache.resolve("asset.bin").await.unwrap();
    assert_eq!(again, path);
    assert_eq!(std::fs::read(&again).unwrap(), b"v1");
    assert_eq!(store.download_count("models/asset.bin"), 1);
}

#[tokio::test]
async fn expired_asset_is_fetched_again() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryBlobStore::new());
    store.insert("models/asset.bin", b"v1".to_vec());
    let cache = cache(dir.path(), store.clone());

    let path = cache.resolve("asset.bin").await.unwrap();
    store.insert("models/asset.bin", b"v2".to_vec());

    // just inside the window
    age(&path, Duration::from_secs(23 * 60 * 60));
    assert_eq!(cache.status("asset.bin").unwrap(), CacheStatus::Fresh);

    age(&path, Duration::from_secs(25 * 60 * 60));
    assert_eq!(cache.status("asset.bin").unwrap(), CacheStatus::Expired);
    let refreshed = cache.resolve("asset.bin").await.unwrap();
    assert_eq!(std::fs::read(&refreshed).unwrap(), b"v2");
    assert_eq!(store.download_count("models/asset.bin"), 2);

    let mtime = std::fs::metadata(&refreshed).unwrap().modified().unwrap();
    assert!(SystemTime::now().duration_since(mtime).unwrap() < Duration::from_secs(60 * 60));
}

#[tokio::test]
async fn missing_remote_asset_leaves_nothing_cached() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryBlobStore::new());
    let cache = cache(dir.path(), store);

    let err = cache.resolve("absent.bin").await.unwrap_err();
    assert!(err.is_not_found(), "got {err:?}");
    assert_eq!(cache.status("absent.bin").unwrap(), CacheStatus::Missing);
}

#[tokio::test]
async fn names_must_stay_inside_the_cache() {
    let dir = tempfile::tempdir().unwrap();
    let cache = cache(dir.path(), Arc::new(MemoryBlobStore::new()));
    for name in ["../escape.zip", "a/b.zip", ""] {
        assert!(cache.resolve(name).await.is_err(), "{name:?} accepted");
    }
}

#[tokio::test]
async fn bundle_is_downloaded_and_extracted_once() {
    let root = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryBlobStore::new());
    let (train, test) = ab_base();
    store.insert("models/base.zip", bundle_zip("base", &train, &test));

    let models = root.path().join("models");
    let fetcher = BundleFetcher::new(cache(&root.path().join("cache"), store.clone()), &models, "h5");
    let first = fetcher.fetch("base").await.unwrap();
    assert_eq!(first.dir, models.join("base"));
    assert!(first.weights.ends_with("base_model_cnn.h5"));
    assert!(first.train.is_file() && first.test.is_file());
    let loaded = handsign_core::dataset::npy::read_split(&first.train).unwrap();
    assert_eq!(loaded, train);

    let second = fetcher.fetch("base").await.unwrap();
    assert_eq!(first, second);
    assert_eq!(store.download_count("models/base.zip"), 1);

    // a partially deleted bundle is re-extracted from the still-fresh cache
    std::fs::remove_file(&first.test).unwrap();
    let third = fetcher.fetch("base").await.unwrap();
    assert!(third.test.is_file());
    assert_eq!(store.download_count("models/base.zip"), 1);

    let leftovers: Vec<_> = std::fs::read_dir(&models)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(leftovers, vec!["base"]);
}

#[tokio::test]
async fn archive_without_splits_is_rejected() {
    let root = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryBlobStore::new());
    let (train, _) = ab_base();
    let empty = handsign_core::Dataset::new(FEATURE_LEN).unwrap();
    // test split entry exists but under the wrong code
    let zip = bundle_zip("other", &train, &empty);
    store.insert("models/base.zip", zip);

    let assets = cache(&root.path().join("cache"), store);
    let fetcher = BundleFetcher::new(assets.clone(), root.path().join("models"), "h5");
    let err = fetcher.fetch("base").await.unwrap_err();
    assert!(
        matches!(err, UpdateError::Archive(ArchiveError::MissingEntry { .. })),
        "got {err:?}"
    );
    assert!(!root.path().join("models").join("base").exists());
    assert_eq!(assets.status("base.zip").unwrap(), CacheStatus::Missing);
}

#[tokio::test]
async fn broken_archive_is_evicted_and_fetched_again() {
    let root = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryBlobStore::new());
    store.insert("models/base.zip", b"not a zip at all".to_vec());

    let models = root.path().join("models");
    let assets = cache(&root.path().join("cache"), store.clone());
    let fetcher = BundleFetcher::new(assets.clone(), &models, "h5");
    let err = fetcher.fetch("base").await.unwrap_err();
    assert!(matches!(err, UpdateError::Archive(ArchiveError::Zip(_))), "got {err:?}");
    assert_eq!(assets.status("base.zip").unwrap(), CacheStatus::Missing);

    let (train, test) = ab_base();
    store.insert("models/base.zip", bundle_zip("base", &train, &test));
    let bundle = fetcher.fetch("base").await.unwrap();
    assert!(bundle.train.is_file());
    assert_eq!(store.download_count("models/base.zip"), 2);

    // no staging directories survive the failed attempt
    let entries: Vec<_> = std::fs::read_dir(&models)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(entries, vec!["base"]);
}

#[tokio::test]
async fn oversized_archive_hits_limits() {
    let root = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryBlobStore::new());
    let (train, test) = ab_base();
    store.insert("models/base.zip", bundle_zip("base", &train, &test));

    let limits = ExtractionLimits {
        max_entries: 2,
        ..ExtractionLimits::default()
    };
    let fetcher = BundleFetcher::new(
        cache(&root.path().join("cache"), store),
        root.path().join("models"),
        "h5",
    )
    .with_limits(limits);
    let err = fetcher.fetch("base").await.unwrap_err();
    assert!(matches!(err, UpdateError::Archive(ArchiveError::Limit(_))), "got {err:?}");
}

#[tokio::test]
async fn invalid_model_code_is_not_found() {
    let root = tempfile::tempdir().unwrap();
    let fetcher = BundleFetcher::new(
        cache(&root.path().join("cache"), Arc::new(MemoryBlobStore::new())),
        root.path().join("models"),
        "h5",
    );
    for code in ["../etc", ".hidden", ""] {
        let err = fetcher.fetch(code).await.unwrap_err();
        assert!(matches!(err, UpdateError::NotFound { .. }), "{code:?}: {err:?}");
    }
}
