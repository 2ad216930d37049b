//! Handsign-Store: external collaborators of an update run
//!
//! This crate provides the persistence layer for handsign. It hides the
//! remote object store and the model metadata store behind async traits so
//! the orchestration core never touches a concrete backend.
//!
//! ## Layer 0 - Data/Persistence
//!
//! ## Key Components
//!
//! - `BlobStore`: key -> bytes object storage with public URLs
//!   (`FsBlobStore`, `HttpBlobStore`)
//! - `ModelRegistry`: one `BundleRecord` per published bundle
//!   (`FsModelRegistry`, `SurrealModelRegistry`)
//! - `fakes`: in-memory implementations for tests

mod error;
pub mod fakes;
pub mod fs_blob;
pub mod fs_registry;
pub mod http_blob;
pub mod storage_traits;
pub mod surreal_registry;

pub use error::StorageError;
pub use fs_blob::FsBlobStore;
pub use fs_registry::FsModelRegistry;
pub use http_blob::{HttpBlobConfig, HttpBlobStore};
pub use storage_traits::{BlobStore, BundleRecord, ContentDigest, ModelRegistry, StorageResult};
pub use surreal_registry::SurrealModelRegistry;
