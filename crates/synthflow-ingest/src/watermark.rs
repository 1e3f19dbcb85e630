//! Persisted load watermark
//!
//! The watermark is an append-only history in `load_watermark`; the row with
//! the greatest `load_id` is current. Rows are never updated or deleted, so
//! the table doubles as a log of every load cycle.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, instrument, warn};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Watermark {
    #[sqlx(rename = "load_id")]
    pub id: i64,
    pub last_processed_key: String,
    pub last_processed_time: DateTime<Utc>,
    pub files_processed: i64,
    pub recorded_at: DateTime<Utc>,
}

#[async_trait]
pub trait WatermarkStore: Send + Sync {
    /// Most recent watermark, `None` on first run or when the latest row is malformed
    async fn read_latest(&self) -> Result<Option<Watermark>>;

    /// Record a new watermark stamped with the current time
    async fn append(&self, last_key: &str, files_processed: i64) -> Result<Watermark>;
}

fn usable(watermark: Watermark) -> Option<Watermark> {
    if watermark.last_processed_key.is_empty() {
        warn!(load_id = watermark.id, "Latest watermark has an empty key; ignoring it");
        return None;
    }
    Some(watermark)
}

pub struct PgWatermarkStore {
    pool: PgPool,
}

impl PgWatermarkStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Full history, newest first
    pub async fn history(&self, limit: i64) -> Result<Vec<Watermark>> {
        let rows = sqlx::query_as::<_, Watermark>(
            r#"
            SELECT load_id, last_processed_key, last_processed_time, files_processed, recorded_at
            FROM load_watermark
            WHERE last_processed_key IS NOT NULL
            ORDER BY load_id DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

#[async_trait]
impl WatermarkStore for PgWatermarkStore {
    #[instrument(skip(self))]
    async fn read_latest(&self) -> Result<Option<Watermark>> {
        let row = sqlx::query_as::<_, Watermark>(
            r#"
            SELECT load_id, last_processed_key, last_processed_time, files_processed, recorded_at
            FROM load_watermark
            ORDER BY load_id DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await;

        match row {
            Ok(row) => Ok(row.and_then(usable)),
            Err(e @ (sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_))) => {
                warn!(error = %e, "Latest watermark row is malformed; treating as absent");
                Ok(None)
            },
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self))]
    async fn append(&self, last_key: &str, files_processed: i64) -> Result<Watermark> {
        let watermark = sqlx::query_as::<_, Watermark>(
            r#"
            INSERT INTO load_watermark (last_processed_key, last_processed_time, files_processed)
            VALUES ($1, $2, $3)
            RETURNING load_id, last_processed_key, last_processed_time, files_processed, recorded_at
            "#,
        )
        .bind(last_key)
        .bind(Utc::now())
        .bind(files_processed)
        .fetch_one(&self.pool)
        .await?;

        debug!(load_id = watermark.id, "Watermark advanced");

        Ok(watermark)
    }
}

/// Watermark history held in process memory
#[derive(Debug, Default)]
pub struct InMemoryWatermarkStore {
    rows: Mutex<Vec<Watermark>>,
}

impl InMemoryWatermarkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store starting from an existing watermark
    pub fn starting_at(last_key: &str) -> Self {
        let store = Self::default();
        store.push(last_key, 0);
        store
    }

    pub fn history(&self) -> Vec<Watermark> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Watermark>> {
        self.rows.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push(&self, last_key: &str, files_processed: i64) -> Watermark {
        let mut rows = self.lock();
        let now = Utc::now();
        let watermark = Watermark {
            id: rows.len() as i64 + 1,
            last_processed_key: last_key.to_string(),
            last_processed_time: now,
            files_processed,
            recorded_at: now,
        };
        rows.push(watermark.clone());
        watermark
    }
}

#[async_trait]
impl WatermarkStore for InMemoryWatermarkStore {
    async fn read_latest(&self) -> Result<Option<Watermark>> {
        Ok(self.lock().last().cloned().and_then(usable))
    }

    async fn append(&self, last_key: &str, files_processed: i64) -> Result<Watermark> {
        Ok(self.push(last_key, files_processed))
    }
}
