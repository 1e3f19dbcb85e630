//! `synthflow status` command implementation
//!
//! Shows staged entities and whether each has been uploaded.

use colored::Colorize;

use super::{format_bytes, Pipeline};

pub async fn run(pipeline: &Pipeline) -> anyhow::Result<()> {
    let store = pipeline.record_store();
    let entities = store.entities()?;

    if entities.is_empty() {
        println!("No staged entities found.");
        println!("Run 'synthflow generate' to create one.");
        return Ok(());
    }

    println!("{}", "Staged Entities:".cyan().bold());
    println!();

    let mut uploaded = 0usize;
    let mut total_size = 0u64;
    for entity in &entities {
        total_size += entity.total_size();
        let state = match &entity.marker {
            Some(marker) => {
                uploaded += 1;
                format!("uploaded {}", marker.uploaded_at).green()
            },
            None => "pending".yellow(),
        };
        println!("{}", entity.entity_id.green());
        println!("  Files: {}", entity.files.len());
        println!("  Size:  {}", format_bytes(entity.total_size()));
        println!("  State: {}", state);
        println!();
    }

    println!("{}", "Summary:".cyan().bold());
    println!("  Total entities: {}", entities.len());
    println!("  Uploaded:       {}", uploaded);
    println!("  Pending:        {}", entities.len() - uploaded);
    println!("  Total size:     {}", format_bytes(total_size));
    println!("  Staging dir:    {}", store.root().display());

    Ok(())
}
