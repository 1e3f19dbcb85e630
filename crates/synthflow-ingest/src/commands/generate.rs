//! `synthflow generate` command implementation
//!
//! One generation cycle: run the generator, stage its output, sweep.

use colored::Colorize;

use super::Pipeline;

pub async fn run(pipeline: &Pipeline) -> anyhow::Result<()> {
    let report = pipeline.generation_cycle().run().await?;

    if let Some(entity_id) = &report.entity_id {
        println!("{} Staged {}", "✓".green(), entity_id);
    }
    if report.sweep.deleted_entities > 0 {
        println!(
            "  Swept {} expired entit{} ({} files)",
            report.sweep.deleted_entities,
            if report.sweep.deleted_entities == 1 { "y" } else { "ies" },
            report.sweep.deleted_files
        );
    }

    Ok(())
}
