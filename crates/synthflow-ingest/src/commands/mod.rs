//! CLI command implementations
//!
//! Each subcommand has its own module with a `run` function. [`Pipeline`]
//! builds the components they share from one [`PipelineConfig`].

pub mod daemon;
pub mod generate;
pub mod load;
pub mod migrate;
pub mod status;
pub mod sweep;
pub mod transform;
pub mod upload;
pub mod watermark;

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::PipelineConfig;
use crate::cycle::IngestionCycle;
use crate::db;
use crate::error::Result;
use crate::generator::{GenerationCycle, SyntheaGenerator};
use crate::lister::IncrementalLister;
use crate::loader::{BatchLoader, PgWarehouse};
use crate::staging::lifecycle::LifecycleTracker;
use crate::staging::RecordStore;
use crate::storage::{ObjectStore, S3Storage};
use crate::transform::Transformer;
use crate::upload::{RemoteUploader, UploadCycle};
use crate::watermark::PgWatermarkStore;

/// Component factory over a loaded configuration
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self::new(PipelineConfig::load()?))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn record_store(&self) -> RecordStore {
        RecordStore::new(
            self.config.staging.bundle_dir.clone(),
            self.config.staging.expected_file_count,
        )
    }

    pub fn tracker(&self) -> LifecycleTracker {
        LifecycleTracker::new(self.record_store())
    }

    pub async fn object_store(&self) -> Result<Arc<dyn ObjectStore>> {
        Ok(Arc::new(S3Storage::new(&self.config.storage).await?))
    }

    pub async fn pool(&self) -> Result<PgPool> {
        db::connect(&self.config.database).await
    }

    pub fn generation_cycle(&self) -> GenerationCycle {
        GenerationCycle::new(
            SyntheaGenerator::new(self.config.generator.clone()),
            self.tracker(),
            self.config.retention(),
        )
    }

    pub fn upload_cycle(&self, store: Arc<dyn ObjectStore>) -> UploadCycle {
        let uploader = RemoteUploader::new(store, &self.config.storage, self.config.remote_timeout());
        UploadCycle::new(self.tracker(), uploader)
            .validate_before_upload(self.config.staging.validate_before_upload)
    }

    /// Ingestion cycle over the entity prefix; `batch_cap` overrides the configured cap
    pub fn ingestion_cycle(
        &self,
        store: Arc<dyn ObjectStore>,
        pool: PgPool,
        batch_cap: Option<usize>,
    ) -> IngestionCycle {
        let timeout = self.config.remote_timeout();
        IngestionCycle::new(
            Arc::new(PgWatermarkStore::new(pool.clone())),
            IncrementalLister::new(store.clone(), timeout),
            BatchLoader::new(store, Arc::new(PgWarehouse::new(pool)), timeout),
            self.config.storage.entity_prefix(),
            batch_cap.unwrap_or(self.config.load.batch_cap),
            timeout,
        )
    }

    pub fn transformer(&self) -> Transformer {
        Transformer::new(self.config.transform.clone())
    }
}

/// Human-readable byte count
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}
