//! `synthflow migrate` command implementation

use colored::Colorize;

use super::Pipeline;
use crate::db;

pub async fn run(pipeline: &Pipeline) -> anyhow::Result<()> {
    let pool = pipeline.pool().await?;
    db::migrate(&pool).await?;
    println!("{} Database schema is up to date", "✓".green());
    Ok(())
}
