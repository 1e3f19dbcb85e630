//! Synthflow CLI - Main entry point

use clap::Parser;
use std::process::ExitCode;
use synthflow_common::logging::{init_logging, LogConfig, LogLevel, LogOutput, LoggingGuard};
use synthflow_ingest::commands::{self, Pipeline};
use synthflow_ingest::{Cli, Commands};
use tracing::error;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.markdown_help {
        println!("{}", clap_markdown::help_markdown::<Cli>());
        return ExitCode::SUCCESS;
    }

    let Some(command) = &cli.command else {
        eprintln!("Error: A subcommand is required");
        eprintln!();
        eprintln!("For more information, try '--help'.");
        return ExitCode::from(2);
    };

    // The scheduler is long-running and logs progress; one-shot commands print
    // their own summary and only need warnings
    let level = match (cli.verbose, command) {
        (true, _) => LogLevel::Debug,
        (false, Commands::Run) => LogLevel::Info,
        (false, _) => LogLevel::Warn,
    };
    let log_config = LogConfig::builder()
        .level(level)
        .output(LogOutput::Console)
        .log_file_prefix("synthflow")
        .build();

    // Environment variables take precedence
    let log_config = log_config.merge_env().unwrap_or_else(|e| {
        eprintln!("Ignoring invalid logging environment: {}", e);
        LogConfig::builder()
            .level(level)
            .log_file_prefix("synthflow")
            .build()
    });

    let guard = init_logging(&log_config).ok();
    let result = execute_command(command).await;
    ExitCode::from(finish(result, guard))
}

/// Report the command result, then flush buffered file output
fn finish(result: anyhow::Result<()>, guard: Option<LoggingGuard>) -> u8 {
    let code = match result {
        Ok(()) => 0,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {:#}", e);
            1
        },
    };
    drop(guard);
    code
}

async fn execute_command(command: &Commands) -> anyhow::Result<()> {
    let pipeline = Pipeline::from_env()?;

    match command {
        Commands::Generate => commands::generate::run(&pipeline).await,
        Commands::Upload { validate } => commands::upload::run(&pipeline, *validate).await,
        Commands::Sweep { retention_hours } => {
            commands::sweep::run(&pipeline, *retention_hours).await
        },
        Commands::Load { batch_cap, drain } => {
            commands::load::run(&pipeline, *batch_cap, *drain).await
        },
        Commands::Watermark { history, verify } => {
            commands::watermark::run(&pipeline, *history, *verify).await
        },
        Commands::Transform => commands::transform::run(&pipeline).await,
        Commands::Migrate => commands::migrate::run(&pipeline).await,
        Commands::Status => commands::status::run(&pipeline).await,
        Commands::Run => commands::daemon::run(&pipeline).await,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_failed_command_reaches_log_file() {
        let temp = TempDir::new().unwrap();
        let config = LogConfig::builder()
            .level(LogLevel::Info)
            .output(LogOutput::File)
            .log_dir(temp.path())
            .log_file_prefix("synthflow")
            .build();
        let guard = init_logging(&config).unwrap();

        let code = finish(Err(anyhow::anyhow!("warehouse unreachable")), Some(guard));
        assert_eq!(code, 1);

        let logged: String = std::fs::read_dir(temp.path())
            .unwrap()
            .map(|entry| std::fs::read_to_string(entry.unwrap().path()).unwrap())
            .collect();
        assert!(logged.contains("Command failed"));
        assert!(logged.contains("warehouse unreachable"));
    }
}
