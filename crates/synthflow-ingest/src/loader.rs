//! Bulk load of object batches into the warehouse

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde_json::Value;
use sqlx::PgPool;
use tracing::{debug, info, instrument, warn};

use crate::error::{IngestError, Result};
use crate::fhir;
use crate::remote::with_timeout;
use crate::storage::{ObjectStore, StoredObject};

/// Objects fetched concurrently while assembling a batch
const FETCH_CONCURRENCY: usize = 8;

/// One document as handed to the warehouse
#[derive(Debug, Clone, PartialEq)]
pub struct BundleDocument {
    pub file_key: String,
    pub payload: Value,
    pub source_last_modified: Option<DateTime<Utc>>,
    pub record_count: i32,
}

impl BundleDocument {
    pub fn from_object(object: &StoredObject) -> serde_json::Result<Self> {
        let payload: Value = serde_json::from_slice(&object.data)?;
        Ok(Self {
            file_key: object.meta.key.clone(),
            record_count: fhir::record_count(&payload),
            payload,
            source_last_modified: object.meta.last_modified,
        })
    }
}

#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Insert every document whose `file_key` is not already present, in one
    /// statement. Returns the number of rows inserted.
    ///
    /// Fails with [`IngestError::Rejected`] when the warehouse refuses the
    /// content of a document; nothing from the call is stored then.
    async fn insert_documents(&self, documents: &[BundleDocument]) -> Result<u64>;

    async fn row_count(&self) -> Result<i64>;
}

pub struct PgWarehouse {
    pool: PgPool,
}

impl PgWarehouse {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Warehouse for PgWarehouse {
    #[instrument(skip(self, documents), fields(count = documents.len()))]
    async fn insert_documents(&self, documents: &[BundleDocument]) -> Result<u64> {
        let mut keys = Vec::with_capacity(documents.len());
        let mut payloads = Vec::with_capacity(documents.len());
        let mut modified = Vec::with_capacity(documents.len());
        let mut counts = Vec::with_capacity(documents.len());

        for doc in documents {
            keys.push(doc.file_key.clone());
            payloads.push(serde_json::to_string(&doc.payload)?);
            modified.push(doc.source_last_modified);
            counts.push(doc.record_count);
        }

        let result = sqlx::query(
            r#"
            INSERT INTO fhir_bundles (file_key, bundle_data, source_last_modified, record_count)
            SELECT batch.file_key, batch.bundle_data::jsonb, batch.source_last_modified, batch.record_count
            FROM UNNEST($1::text[], $2::text[], $3::timestamptz[], $4::int4[])
                AS batch(file_key, bundle_data, source_last_modified, record_count)
            ON CONFLICT (file_key) DO NOTHING
            "#,
        )
        .bind(&keys)
        .bind(&payloads)
        .bind(&modified)
        .bind(&counts)
        .execute(&self.pool)
        .await
        .map_err(classify_insert_error)?;

        Ok(result.rows_affected())
    }

    async fn row_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM fhir_bundles")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

/// SQLSTATE classes 22 (data exception) and 23 (integrity constraint)
/// blame the rows themselves; anything else is a warehouse failure.
fn classify_insert_error(error: sqlx::Error) -> IngestError {
    if let sqlx::Error::Database(db) = &error {
        let code = db.code();
        if code.as_deref().is_some_and(|c| c.starts_with("22") || c.starts_with("23")) {
            return IngestError::Rejected(db.message().to_string());
        }
    }
    IngestError::Database(error)
}

/// Warehouse table held in process memory
#[derive(Debug, Default)]
pub struct InMemoryWarehouse {
    rows: Mutex<BTreeMap<String, BundleDocument>>,
    calls: AtomicUsize,
    fail_inserts: AtomicBool,
    rejected_keys: Mutex<BTreeSet<String>>,
}

impl InMemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total calls of any kind
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    /// Refuse any insert that carries `file_key`, the way Postgres refuses a
    /// payload it cannot store
    pub fn reject_key(&self, file_key: impl Into<String>) {
        self.rejected_keys
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(file_key.into());
    }

    pub fn document(&self, file_key: &str) -> Option<BundleDocument> {
        self.lock().get(file_key).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, BundleDocument>> {
        self.rows.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Warehouse for InMemoryWarehouse {
    async fn insert_documents(&self, documents: &[BundleDocument]) -> Result<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(IngestError::Database(sqlx::Error::PoolTimedOut));
        }
        {
            let rejected = self.rejected_keys.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(doc) = documents.iter().find(|doc| rejected.contains(&doc.file_key)) {
                return Err(IngestError::Rejected(format!("invalid payload in {}", doc.file_key)));
            }
        }

        let mut rows = self.lock();
        let mut inserted = 0;
        for doc in documents {
            if !rows.contains_key(&doc.file_key) {
                rows.insert(doc.file_key.clone(), doc.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn row_count(&self) -> Result<i64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.lock().len() as i64)
    }
}

/// Per-batch load result
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadOutcome {
    /// Documents handed to the warehouse
    pub files_loaded: usize,
    /// Objects whose payload did not parse or that the warehouse rejected
    pub files_skipped: usize,
    /// New rows; documents already present are not reloaded
    pub rows_inserted: u64,
    /// Table size after the load, `None` when nothing was sent
    pub total_rows_after: Option<i64>,
}

pub struct BatchLoader {
    store: Arc<dyn ObjectStore>,
    warehouse: Arc<dyn Warehouse>,
    timeout: Duration,
}

impl BatchLoader {
    pub fn new(store: Arc<dyn ObjectStore>, warehouse: Arc<dyn Warehouse>, timeout: Duration) -> Self {
        Self {
            store,
            warehouse,
            timeout,
        }
    }

    /// Load `candidate_keys` with one bulk insert.
    ///
    /// Unparsable payloads are skipped and counted. When the warehouse
    /// rejects the bulk insert for its content, the documents are inserted
    /// one at a time and the rejected ones are skipped and counted too. A
    /// failed fetch or any other insert failure fails the whole batch.
    #[instrument(skip(self, candidate_keys), fields(candidates = candidate_keys.len()))]
    pub async fn load_batch(&self, candidate_keys: &[String]) -> Result<LoadOutcome> {
        if candidate_keys.is_empty() {
            debug!("Empty batch; nothing to load");
            return Ok(LoadOutcome::default());
        }

        let fetched: Vec<Result<StoredObject>> = stream::iter(candidate_keys.to_vec())
            .map(|key| async move {
                with_timeout(format!("get {}", key), self.timeout, self.store.get(&key)).await
            })
            .buffered(FETCH_CONCURRENCY)
            .collect()
            .await;

        let mut outcome = LoadOutcome::default();
        let mut documents = Vec::with_capacity(candidate_keys.len());

        for object in fetched {
            let object = object?;
            match BundleDocument::from_object(&object) {
                Ok(doc) => documents.push(doc),
                Err(e) => {
                    warn!(key = %object.meta.key, error = %e, "Skipping object with unparsable payload");
                    outcome.files_skipped += 1;
                },
            }
        }

        if documents.is_empty() {
            warn!(skipped = outcome.files_skipped, "No loadable documents in batch");
            return Ok(outcome);
        }

        match with_timeout(
            format!("insert {} documents", documents.len()),
            self.timeout,
            self.warehouse.insert_documents(&documents),
        )
        .await
        {
            Ok(inserted) => {
                outcome.rows_inserted = inserted;
                outcome.files_loaded = documents.len();
            },
            Err(IngestError::Rejected(reason)) => {
                warn!(%reason, "Bulk insert rejected; inserting documents one at a time");
                self.insert_each(&documents, &mut outcome).await?;
            },
            Err(e) => return Err(e),
        }

        outcome.total_rows_after = Some(
            with_timeout("count warehouse rows", self.timeout, self.warehouse.row_count()).await?,
        );

        info!(
            loaded = outcome.files_loaded,
            skipped = outcome.files_skipped,
            inserted = outcome.rows_inserted,
            total = ?outcome.total_rows_after,
            "Batch loaded"
        );

        Ok(outcome)
    }

    async fn insert_each(&self, documents: &[BundleDocument], outcome: &mut LoadOutcome) -> Result<()> {
        for doc in documents {
            let inserted = with_timeout(
                format!("insert {}", doc.file_key),
                self.timeout,
                self.warehouse.insert_documents(std::slice::from_ref(doc)),
            )
            .await;

            match inserted {
                Ok(rows) => {
                    outcome.rows_inserted += rows;
                    outcome.files_loaded += 1;
                },
                Err(IngestError::Rejected(reason)) => {
                    warn!(key = %doc.file_key, %reason, "✗ Warehouse rejected document; skipping");
                    outcome.files_skipped += 1;
                },
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}
