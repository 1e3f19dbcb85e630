//! `synthflow watermark` command implementation

use colored::Colorize;

use super::Pipeline;
use crate::error::IngestError;
use crate::remote::with_timeout;
use crate::watermark::{PgWatermarkStore, WatermarkStore};

pub async fn run(pipeline: &Pipeline, history: i64, verify: bool) -> anyhow::Result<()> {
    let watermarks = PgWatermarkStore::new(pipeline.pool().await?);

    let Some(current) = watermarks.read_latest().await? else {
        println!("No watermark recorded yet.");
        println!("Run 'synthflow load' to start loading.");
        return Ok(());
    };

    println!("{}", "Current Watermark:".cyan().bold());
    println!("  Load id:   {}", current.id);
    println!("  Last key:  {}", current.last_processed_key);
    println!("  Processed: {} files", current.files_processed);
    println!("  Recorded:  {}", current.recorded_at);

    if verify {
        let store = pipeline.object_store().await?;
        let head = with_timeout(
            "head watermark object",
            pipeline.config().remote_timeout(),
            store.head(&current.last_processed_key),
        )
        .await;
        match head {
            Ok(object) => println!(
                "  {} Object present ({})",
                "✓".green(),
                super::format_bytes(object.size_bytes.max(0) as u64)
            ),
            Err(IngestError::ObjectNotFound(_)) => {
                println!("  {} Object no longer exists in {}", "✗".red(), store.location())
            },
            Err(e) => return Err(e.into()),
        }
    }

    if history > 0 {
        println!();
        println!("{}", "History:".cyan().bold());
        for row in watermarks.history(history).await? {
            println!(
                "  #{:<6} {}  {:>5} files  {}",
                row.id, row.recorded_at, row.files_processed, row.last_processed_key
            );
        }
    }

    Ok(())
}
