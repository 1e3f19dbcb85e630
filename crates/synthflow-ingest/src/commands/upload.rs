//! `synthflow upload` command implementation

use colored::Colorize;

use super::Pipeline;

pub async fn run(pipeline: &Pipeline, validate: bool) -> anyhow::Result<()> {
    let store = pipeline.object_store().await?;
    let mut cycle = pipeline.upload_cycle(store);
    if validate {
        cycle = cycle.validate_before_upload(true);
    }

    let report = cycle.run().await?;

    if report.entities_found == 0 {
        println!("No new entities to upload.");
        return Ok(());
    }

    println!("{}", "Upload Summary:".cyan().bold());
    println!("  Found:    {}", report.entities_found);
    println!("  Uploaded: {} ({} files)", report.entities_uploaded, report.files_uploaded);
    if report.entities_invalid > 0 {
        println!("  Invalid:  {}", report.entities_invalid.to_string().yellow());
    }
    if report.entities_failed > 0 {
        println!(
            "  Failed:   {} ({} files)",
            report.entities_failed.to_string().red(),
            report.files_failed
        );
        anyhow::bail!("{} entities failed to upload", report.entities_failed);
    }

    Ok(())
}
