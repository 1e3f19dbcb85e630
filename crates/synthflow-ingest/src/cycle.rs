//! One incremental ingestion cycle
//!
//! ```text
//! READ_WATERMARK → LIST_CANDIDATES ─┬─ none ──────────────────────────────→ END
//!                                   └─ some → LOAD_BATCH → ADVANCE_WATERMARK → END
//! ```
//!
//! A failed load leaves the watermark where it was, so the same batch is
//! offered again on the next cycle.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument};

use crate::error::Result;
use crate::lister::IncrementalLister;
use crate::loader::{BatchLoader, LoadOutcome};
use crate::remote::with_timeout;
use crate::watermark::{Watermark, WatermarkStore};

/// Keys selected for one cycle, ascending
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadBatch {
    pub candidate_keys: Vec<String>,
    pub max_size: usize,
}

impl LoadBatch {
    /// The lister stopped at the cap, so more objects may be waiting
    pub fn is_full(&self) -> bool {
        self.candidate_keys.len() >= self.max_size
    }

    /// Greatest key of the batch; the next watermark value
    pub fn last_key(&self) -> Option<&str> {
        self.candidate_keys.last().map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing past the watermark; it is left untouched
    NoCandidates { watermark: Option<Watermark> },
    Loaded {
        batch_size: usize,
        load: LoadOutcome,
        watermark: Watermark,
    },
}

pub struct IngestionCycle {
    watermarks: Arc<dyn WatermarkStore>,
    lister: IncrementalLister,
    loader: BatchLoader,
    prefix: String,
    batch_cap: usize,
    timeout: Duration,
}

impl IngestionCycle {
    pub fn new(
        watermarks: Arc<dyn WatermarkStore>,
        lister: IncrementalLister,
        loader: BatchLoader,
        prefix: impl Into<String>,
        batch_cap: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            watermarks,
            lister,
            loader,
            prefix: prefix.into(),
            batch_cap,
            timeout,
        }
    }

    #[instrument(skip(self), fields(prefix = %self.prefix, batch_cap = self.batch_cap))]
    pub async fn run(&self) -> Result<CycleOutcome> {
        let current = with_timeout(
            "read watermark",
            self.timeout,
            self.watermarks.read_latest(),
        )
        .await?;

        match &current {
            Some(w) => info!(last_key = %w.last_processed_key, load_id = w.id, "Current watermark"),
            None => info!("No watermark recorded; loading from the beginning"),
        }

        let batch = LoadBatch {
            candidate_keys: self
                .lister
                .list_new(&self.prefix, current.as_ref(), self.batch_cap)
                .await?,
            max_size: self.batch_cap,
        };

        let Some(next_key) = batch.last_key() else {
            info!("No new objects to load");
            return Ok(CycleOutcome::NoCandidates { watermark: current });
        };

        info!(candidates = batch.candidate_keys.len(), full = batch.is_full(), "Loading batch");
        let load = self.loader.load_batch(&batch.candidate_keys).await?;

        let watermark = with_timeout(
            "append watermark",
            self.timeout,
            self.watermarks.append(next_key, load.files_loaded as i64),
        )
        .await?;

        info!(
            last_key = %watermark.last_processed_key,
            files_loaded = load.files_loaded,
            files_skipped = load.files_skipped,
            "✓ Ingestion cycle completed"
        );

        Ok(CycleOutcome::Loaded {
            batch_size: batch.candidate_keys.len(),
            load,
            watermark,
        })
    }
}
