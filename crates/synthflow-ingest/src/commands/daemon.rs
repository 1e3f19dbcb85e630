//! `synthflow run` command implementation
//!
//! Applies migrations, then runs generate, upload, load and transform on
//! their configured intervals until Ctrl+C or SIGTERM.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use super::Pipeline;
use crate::db;
use crate::scheduler::{shutdown_signal, RetryPolicy, Scheduler};

pub async fn run(pipeline: &Pipeline) -> anyhow::Result<()> {
    let config = pipeline.config();
    let schedule = &config.schedule;

    let store = pipeline.object_store().await?;
    let pool = pipeline.pool().await?;
    db::migrate(&pool).await?;

    let mut scheduler = Scheduler::new(RetryPolicy::new(
        schedule.retries,
        Duration::from_secs(schedule.retry_delay_secs),
    ));

    let generation = Arc::new(pipeline.generation_cycle());
    scheduler.add_job(
        "generate",
        Duration::from_secs(schedule.generate_interval_secs),
        move || {
            let cycle = generation.clone();
            async move { cycle.run().await.map(|_| ()) }
        },
    );

    let upload = Arc::new(pipeline.upload_cycle(store.clone()));
    scheduler.add_job(
        "upload",
        Duration::from_secs(schedule.upload_interval_secs),
        move || {
            let cycle = upload.clone();
            async move { cycle.run().await.map(|_| ()) }
        },
    );

    let ingestion = Arc::new(pipeline.ingestion_cycle(store, pool, None));
    scheduler.add_job(
        "load",
        Duration::from_secs(schedule.load_interval_secs),
        move || {
            let cycle = ingestion.clone();
            async move { cycle.run().await.map(|_| ()) }
        },
    );

    let transformer = Arc::new(pipeline.transformer());
    scheduler.add_job(
        "transform",
        Duration::from_secs(schedule.transform_interval_secs),
        move || {
            let transformer = transformer.clone();
            async move { transformer.run().await.into_result().map(|_| ()) }
        },
    );

    info!(
        staging_dir = %config.staging.bundle_dir.display(),
        bucket = %config.storage.bucket,
        "Starting pipeline scheduler"
    );

    scheduler.run_until(shutdown_signal()).await;

    Ok(())
}
