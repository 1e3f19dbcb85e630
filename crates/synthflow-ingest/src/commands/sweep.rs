//! `synthflow sweep` command implementation

use std::time::Duration;

use colored::Colorize;

use super::Pipeline;

pub async fn run(pipeline: &Pipeline, retention_hours: Option<u64>) -> anyhow::Result<()> {
    let retention = match retention_hours {
        Some(0) => anyhow::bail!("--retention-hours must be greater than 0"),
        Some(hours) => Duration::from_secs(hours * 3600),
        None => pipeline.config().retention(),
    };

    let report = pipeline.tracker().sweep_expired(retention)?;

    println!(
        "{} Removed {} entities ({} files)",
        "✓".green(),
        report.deleted_entities,
        report.deleted_files
    );
    if report.errors > 0 {
        println!("  {} entities could not be removed", report.errors.to_string().red());
    }

    Ok(())
}
