//! Build automation tasks for Synthflow
//!
//! - Generating the CLI reference from the clap definitions

use clap::Parser;
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Build automation tasks for Synthflow", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Parser)]
enum Command {
    /// Generate the CLI reference in Markdown
    GenerateCliDocs {
        /// Output directory for generated documentation
        #[arg(short, long, default_value = "docs")]
        output_dir: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::GenerateCliDocs { output_dir } => generate_cli_docs(&output_dir)?,
    }

    Ok(())
}

fn generate_cli_docs(output_dir: &str) -> anyhow::Result<()> {
    println!("Generating CLI documentation...");

    let markdown = clap_markdown::help_markdown::<synthflow_ingest::Cli>();

    let content = format!(
        r#"# Synthflow CLI Reference

Generated from the CLI source code on {}.

## Overview

`synthflow` moves synthetic patient bundles from the generator into the
warehouse: stage locally, upload to object storage, load incrementally
behind a watermark, then run the dbt transformations.

## Quick Start

```bash
# Create the warehouse tables
synthflow migrate

# Generate and stage one patient
synthflow generate

# Upload staged entities and load them
synthflow upload
synthflow load --drain

# Or run every stage on its schedule
synthflow run
```

## Commands

{}

## Environment Variables

- `BUNDLE_STORAGE_DIR` - Local staging directory
- `RETENTION_HOURS` - Age after which staged entities are deleted
- `S3_ENDPOINT`, `S3_BUCKET`, `S3_ACCESS_KEY`, `S3_SECRET_KEY` - Object storage
- `DATABASE_URL` - Warehouse connection string
- `LOAD_BATCH_CAP` - Maximum objects per load batch
- `LOG_LEVEL`, `LOG_OUTPUT`, `LOG_FORMAT` - Logging

---

*To update, run `cargo xtask generate-cli-docs`.*
"#,
        chrono::Utc::now().format("%Y-%m-%d"),
        markdown
    );

    let output_path = PathBuf::from(output_dir);
    fs::create_dir_all(&output_path)?;

    let file_path = output_path.join("cli-reference.md");
    fs::write(&file_path, content)?;

    println!("✅ Generated CLI documentation at: {}", file_path.display());

    Ok(())
}
