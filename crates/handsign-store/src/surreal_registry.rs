//! SurrealDB-backed model registry.
//!
//! Supports both local (in-memory) and remote (WebSocket) connections via
//! the `any` engine. Bundles live in the `bundles` table with a unique
//! index on `version_code`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use surrealdb::engine::any::Any;
use surrealdb::sql::Datetime as SurrealDatetime;
use surrealdb::Surreal;
use tracing::{debug, info, instrument};

use crate::error::StorageError;
use crate::storage_traits::{BundleRecord, ContentDigest, ModelRegistry, StorageResult};

const SCHEMA: &str = r#"
    DEFINE TABLE bundles SCHEMALESS;
    DEFINE INDEX idx_bundle_version ON bundles FIELDS version_code UNIQUE;
"#;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DbBundleRecord {
    version_code: String,
    base_model: Option<String>,
    archive_file: String,
    weights_file: String,
    compiled_file: String,
    train_file: String,
    test_file: String,
    primary_url: String,
    compiled_digest: ContentDigest,
    labels: Vec<String>,
    created_at: SurrealDatetime,
}

impl DbBundleRecord {
    fn from_record(record: BundleRecord) -> Self {
        DbBundleRecord {
            version_code: record.version_code,
            base_model: record.base_model,
            archive_file: record.archive_file,
            weights_file: record.weights_file,
            compiled_file: record.compiled_file,
            train_file: record.train_file,
            test_file: record.test_file,
            primary_url: record.primary_url,
            compiled_digest: record.compiled_digest,
            labels: record.labels,
            created_at: SurrealDatetime::from(record.created_at),
        }
    }

    fn into_record(self) -> BundleRecord {
        BundleRecord {
            version_code: self.version_code,
            base_model: self.base_model,
            archive_file: self.archive_file,
            weights_file: self.weights_file,
            compiled_file: self.compiled_file,
            train_file: self.train_file,
            test_file: self.test_file,
            primary_url: self.primary_url,
            compiled_digest: self.compiled_digest,
            labels: self.labels,
            created_at: DateTime::<Utc>::from(self.created_at),
        }
    }
}

/// `ModelRegistry` stored in SurrealDB.
#[derive(Clone)]
pub struct SurrealModelRegistry {
    db: Surreal<Any>,
}

impl SurrealModelRegistry {
    /// Connect to an in-memory database and set up the schema.
    pub async fn in_memory() -> StorageResult<Self> {
        Self::connect("mem://", "handsign", "main").await
    }

    /// Connect to `endpoint` (`mem://`, `ws://host:port`, `wss://...`).
    #[instrument(skip(namespace, database))]
    pub async fn connect(endpoint: &str, namespace: &str, database: &str) -> StorageResult<Self> {
        info!("Connecting model registry to SurrealDB");

        let db = surrealdb::engine::any::connect(endpoint)
            .await
            .map_err(|e| StorageError::Backend(format!("failed to connect to {endpoint}: {e}")))?;
        db.use_ns(namespace).use_db(database).await?;

        let registry = SurrealModelRegistry { db };
        registry.init_schema().await?;
        Ok(registry)
    }

    async fn init_schema(&self) -> StorageResult<()> {
        debug!("Initializing bundle registry schema");
        self.db.query(SCHEMA).await?.check()?;
        Ok(())
    }
}

#[async_trait]
impl ModelRegistry for SurrealModelRegistry {
    #[instrument(skip(self, record), fields(version_code = %record.version_code))]
    async fn register(&self, record: BundleRecord) -> StorageResult<BundleRecord> {
        if self.get(&record.version_code).await?.is_some() {
            return Err(StorageError::AlreadyExists {
                key: record.version_code,
            });
        }

        let created: Option<DbBundleRecord> = self
            .db
            .create("bundles")
            .content(DbBundleRecord::from_record(record))
            .await?;

        created
            .map(DbBundleRecord::into_record)
            .ok_or_else(|| StorageError::Backend("failed to create bundle record".to_string()))
    }

    #[instrument(skip(self))]
    async fn get(&self, version_code: &str) -> StorageResult<Option<BundleRecord>> {
        let code = version_code.to_string();
        let mut result = self
            .db
            .query("SELECT * FROM bundles WHERE version_code = $code LIMIT 1")
            .bind(("code", code))
            .await?;

        let records: Vec<DbBundleRecord> = result.take(0)?;
        Ok(records.into_iter().next().map(DbBundleRecord::into_record))
    }

    async fn list(&self) -> StorageResult<Vec<BundleRecord>> {
        let mut result = self
            .db
            .query("SELECT * FROM bundles ORDER BY created_at DESC")
            .await?;

        let records: Vec<DbBundleRecord> = result.take(0)?;
        Ok(records.into_iter().map(DbBundleRecord::into_record).collect())
    }
}
