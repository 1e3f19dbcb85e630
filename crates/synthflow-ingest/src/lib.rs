//! Synthflow ingestion engine
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Moves generated record bundles from a local staging area into object
//! storage and from there, incrementally, into a warehouse table.
//!
//! - **Staging**: [`staging::RecordStore`] and [`staging::lifecycle::LifecycleTracker`]
//!   track which entities are new, uploaded or expired
//! - **Upload**: [`upload::RemoteUploader`] writes every file of an entity to the bucket
//! - **Load**: [`lister::IncrementalLister`], [`loader::BatchLoader`] and
//!   [`watermark::WatermarkStore`] form the [`cycle::IngestionCycle`]
//! - **Orchestration**: the generator, the dbt transformer and the
//!   [`scheduler::Scheduler`] that runs every stage on its own interval

pub mod commands;
pub mod config;
pub mod cycle;
pub mod db;
pub mod error;
pub mod fhir;
pub mod generator;
pub mod lister;
pub mod loader;
pub mod process;
pub mod remote;
pub mod scheduler;
pub mod staging;
pub mod storage;
pub mod transform;
pub mod upload;
pub mod watermark;

pub use config::PipelineConfig;
pub use cycle::{CycleOutcome, IngestionCycle};
pub use error::{IngestError, Result};
pub use staging::lifecycle::LifecycleTracker;
pub use staging::RecordStore;
pub use storage::{ObjectStore, S3Storage};
pub use watermark::{Watermark, WatermarkStore};

use clap::{Parser, Subcommand};

/// Synthflow - synthetic patient records from generator to warehouse
#[derive(Parser, Debug)]
#[command(name = "synthflow")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print the full command reference as Markdown
    #[arg(long, hide = true)]
    pub markdown_help: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate one patient, stage it and sweep expired entities
    Generate,

    /// Upload every staged entity without an upload marker
    Upload {
        /// Parse each file as JSON before uploading it
        #[arg(long)]
        validate: bool,
    },

    /// Delete staged entities older than the retention window
    Sweep {
        /// Retention window in hours (default: RETENTION_HOURS)
        #[arg(long)]
        retention_hours: Option<u64>,
    },

    /// Load the next batch of new objects into the warehouse
    Load {
        /// Maximum objects per batch (default: LOAD_BATCH_CAP)
        #[arg(long)]
        batch_cap: Option<usize>,

        /// Keep running cycles until nothing new is left
        #[arg(long)]
        drain: bool,
    },

    /// Show the load watermark and its recent history
    Watermark {
        /// Number of history rows to show
        #[arg(long, default_value_t = 10)]
        history: i64,

        /// Check that the watermark key still exists in the bucket
        #[arg(long)]
        verify: bool,
    },

    /// Run the dbt transformation steps
    Transform,

    /// Apply database migrations
    Migrate,

    /// Show staged entities and their upload state
    Status,

    /// Run every stage on its schedule until interrupted
    Run,
}
