//! Bounded execution of external tools

use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::error::{IngestError, Result};

/// Longest stderr excerpt carried in an error
const STDERR_EXCERPT: usize = 2000;

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Run `program` with `args` in `cwd`, killing it once `limit` elapses
pub async fn run<I, S>(program: &str, args: I, cwd: &Path, limit: Duration) -> Result<CommandOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(program, cwd = %cwd.display(), "Spawning external process");

    let output = match tokio::time::timeout(limit, command.output()).await {
        Ok(output) => output.map_err(|e| IngestError::Process {
            program: program.to_string(),
            message: format!("failed to execute: {}", e),
        })?,
        Err(_) => {
            return Err(IngestError::Timeout {
                operation: program.to_string(),
                limit,
            })
        },
    };

    Ok(CommandOutput {
        success: output.status.success(),
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Like [`run`], but a non-zero exit becomes [`IngestError::Process`] carrying stderr
pub async fn run_checked<I, S>(
    program: &str,
    args: I,
    cwd: &Path,
    limit: Duration,
) -> Result<CommandOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run(program, args, cwd, limit).await?;
    if output.success {
        return Ok(output);
    }

    let stderr = output.stderr.trim();
    let excerpt: String = stderr.chars().take(STDERR_EXCERPT).collect();
    Err(IngestError::Process {
        program: program.to_string(),
        message: match output.code {
            Some(code) => format!("exit code {}: {}", code, excerpt),
            None => format!("terminated by signal: {}", excerpt),
        },
    })
}
