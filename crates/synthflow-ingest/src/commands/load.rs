//! `synthflow load` command implementation
//!
//! Runs one ingestion cycle, or cycles until nothing new is left with `--drain`.

use colored::Colorize;

use super::Pipeline;
use crate::cycle::CycleOutcome;

pub async fn run(pipeline: &Pipeline, batch_cap: Option<usize>, drain: bool) -> anyhow::Result<()> {
    if batch_cap == Some(0) {
        anyhow::bail!("--batch-cap must be greater than 0");
    }

    let store = pipeline.object_store().await?;
    let pool = pipeline.pool().await?;
    let cycle = pipeline.ingestion_cycle(store, pool, batch_cap);

    let mut cycles = 0usize;
    let mut files_loaded = 0usize;
    loop {
        match cycle.run().await? {
            CycleOutcome::NoCandidates { watermark } => {
                if cycles == 0 {
                    match watermark {
                        Some(w) => println!("No new objects after {}", w.last_processed_key),
                        None => println!("No objects to load."),
                    }
                }
                break;
            },
            CycleOutcome::Loaded {
                batch_size,
                load,
                watermark,
            } => {
                cycles += 1;
                files_loaded += load.files_loaded;
                println!(
                    "{} Batch {}: {} loaded, {} skipped of {}",
                    "✓".green(),
                    cycles,
                    load.files_loaded,
                    load.files_skipped,
                    batch_size
                );
                println!("  Watermark: {}", watermark.last_processed_key);
                if let Some(total) = load.total_rows_after {
                    println!("  Rows in warehouse: {}", total);
                }
                if !drain {
                    break;
                }
            },
        }
    }

    if drain && cycles > 1 {
        println!("Loaded {} files in {} batches", files_loaded, cycles);
    }

    Ok(())
}
