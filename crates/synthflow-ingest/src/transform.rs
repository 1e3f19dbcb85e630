//! dbt transformation stage
//!
//! The models themselves are opaque; only each step's exit status and the
//! `target/run_results.json` summary are consumed.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{error, info, warn};

use crate::config::TransformConfig;
use crate::error::{IngestError, Result};
use crate::process;

const RUN_RESULTS: &str = "target/run_results.json";

/// One dbt invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbtStep {
    pub name: &'static str,
    pub args: &'static [&'static str],
    /// Summarise `run_results.json` after the step
    pub summarize: bool,
    /// Run even when an earlier step failed
    pub always_run: bool,
}

impl DbtStep {
    const fn new(name: &'static str, args: &'static [&'static str], summarize: bool) -> Self {
        Self {
            name,
            args,
            summarize,
            always_run: false,
        }
    }
}

pub const DBT_STEPS: [DbtStep; 8] = [
    DbtStep::new("version", &["--version"], false),
    DbtStep::new("deps", &["deps"], false),
    DbtStep::new("debug", &["debug"], false),
    DbtStep::new("run_staging", &["run", "--select", "tag:staging"], true),
    DbtStep::new("run_intermediate", &["run", "--select", "tag:intermediate"], true),
    DbtStep::new("run_marts", &["run", "--select", "tag:marts"], true),
    DbtStep::new("test", &["test"], true),
    DbtStep {
        name: "docs_generate",
        args: &["docs", "generate"],
        summarize: false,
        always_run: true,
    },
];

#[derive(Debug, Deserialize)]
struct RunResultsFile {
    #[serde(default)]
    results: Vec<NodeResult>,
}

#[derive(Debug, Deserialize)]
struct NodeResult {
    unique_id: Option<String>,
    status: Option<String>,
    message: Option<String>,
}

/// Counts from one `run_results.json`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    /// `(unique_id, message)` of every failed node
    pub failures: Vec<(String, String)>,
}

impl RunSummary {
    pub fn parse(raw: &str) -> serde_json::Result<Self> {
        let file: RunResultsFile = serde_json::from_str(raw)?;
        let mut summary = RunSummary {
            total: file.results.len(),
            ..RunSummary::default()
        };

        for node in file.results {
            match node.status.as_deref() {
                Some("success" | "pass") => summary.successful += 1,
                Some("error" | "fail") => {
                    summary.failed += 1;
                    summary.failures.push((
                        node.unique_id.unwrap_or_else(|| "unknown".to_string()),
                        node.message.unwrap_or_else(|| "No error message".to_string()),
                    ));
                },
                Some("skipped") => summary.skipped += 1,
                _ => {},
            }
        }

        Ok(summary)
    }

    /// Summary of the results file under `project_dir`; absent or unreadable files are logged
    pub fn load(project_dir: &Path) -> Option<Self> {
        let path = project_dir.join(RUN_RESULTS);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "No run results found");
                return None;
            },
        };
        match Self::parse(&raw) {
            Ok(summary) => Some(summary),
            Err(e) => {
                error!(path = %path.display(), error = %e, "Error parsing dbt results");
                None
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    Succeeded,
    Failed(String),
    /// Not run because an earlier step failed
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub step: &'static str,
    pub status: StepStatus,
    pub summary: Option<RunSummary>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformReport {
    pub steps: Vec<StepOutcome>,
}

impl TransformReport {
    pub fn first_failure(&self) -> Option<&StepOutcome> {
        self.steps
            .iter()
            .find(|s| matches!(s.status, StepStatus::Failed(_)))
    }

    pub fn is_success(&self) -> bool {
        self.first_failure().is_none()
    }

    /// The report, or the first failed step as an error
    pub fn into_result(self) -> Result<Self> {
        match self.first_failure() {
            Some(StepOutcome {
                step,
                status: StepStatus::Failed(message),
                ..
            }) => Err(IngestError::Process {
                program: format!("dbt {}", step),
                message: message.clone(),
            }),
            _ => Ok(self),
        }
    }
}

pub struct Transformer {
    config: TransformConfig,
    steps: Vec<DbtStep>,
}

impl Transformer {
    pub fn new(config: TransformConfig) -> Self {
        Self::with_steps(config, DBT_STEPS.to_vec())
    }

    pub fn with_steps(config: TransformConfig, steps: Vec<DbtStep>) -> Self {
        Self { config, steps }
    }

    pub fn project_dir(&self) -> &PathBuf {
        &self.config.project_dir
    }

    /// Run every step in order. The first failure skips the remaining steps
    /// except those marked `always_run`.
    pub async fn run(&self) -> TransformReport {
        let mut report = TransformReport::default();
        let mut failed = false;

        for step in &self.steps {
            if failed && !step.always_run {
                report.steps.push(StepOutcome {
                    step: step.name,
                    status: StepStatus::Skipped,
                    summary: None,
                });
                continue;
            }

            let outcome = self.run_step(step).await;
            if matches!(outcome.status, StepStatus::Failed(_)) {
                failed = true;
            }
            report.steps.push(outcome);
        }

        info!(
            steps = report.steps.len(),
            success = report.is_success(),
            "Transformation run completed"
        );

        report
    }

    async fn run_step(&self, step: &DbtStep) -> StepOutcome {
        info!(step = step.name, "Running dbt step");

        if step.summarize {
            // dbt may exit before writing results; never report a previous run's file
            let _ = fs::remove_file(self.config.project_dir.join(RUN_RESULTS));
        }

        let mut args: Vec<String> = step.args.iter().map(|a| a.to_string()).collect();
        if step.name != "version" {
            args.push("--profiles-dir".to_string());
            args.push(self.config.profiles_dir.display().to_string());
        }

        let status = match process::run(
            &self.config.dbt_bin,
            &args,
            &self.config.project_dir,
            Duration::from_secs(self.config.timeout_secs),
        )
        .await
        {
            Ok(output) if output.success => StepStatus::Succeeded,
            Ok(output) => StepStatus::Failed(format!(
                "exit code {:?}: {}",
                output.code,
                last_lines(&output.stdout, &output.stderr)
            )),
            Err(e) => StepStatus::Failed(e.to_string()),
        };

        let summary = if step.summarize {
            RunSummary::load(&self.config.project_dir)
        } else {
            None
        };

        if let Some(s) = &summary {
            info!(
                step = step.name,
                total = s.total,
                successful = s.successful,
                failed = s.failed,
                skipped = s.skipped,
                "dbt step summary"
            );
            for (node, message) in &s.failures {
                error!(step = step.name, node = %node, message = %message, "✗ Failed node");
            }
        }

        match &status {
            StepStatus::Succeeded => info!(step = step.name, "✓ dbt step succeeded"),
            StepStatus::Failed(message) => error!(step = step.name, error = %message, "✗ dbt step failed"),
            StepStatus::Skipped => {},
        }

        StepOutcome {
            step: step.name,
            status,
            summary,
        }
    }
}

/// Tail of the process output; dbt reports errors on stdout
fn last_lines(stdout: &str, stderr: &str) -> String {
    let source = if stderr.trim().is_empty() { stdout } else { stderr };
    let lines: Vec<&str> = source.trim().lines().collect();
    lines[lines.len().saturating_sub(10)..].join("\n")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const RESULTS: &str = r#"{
        "metadata": {"dbt_version": "1.8.0"},
        "results": [
            {"unique_id": "model.fhir.stg_patients", "status": "success"},
            {"unique_id": "model.fhir.stg_encounters", "status": "error", "message": "relation does not exist"},
            {"unique_id": "model.fhir.int_visits", "status": "skipped"},
            {"unique_id": "test.fhir.not_null_id", "status": "pass"},
            {"unique_id": "test.fhir.unique_id", "status": "fail", "message": "Got 2 results"}
        ]
    }"#;

    fn config(temp: &TempDir, dbt_bin: &str) -> TransformConfig {
        TransformConfig {
            dbt_bin: dbt_bin.to_string(),
            project_dir: temp.path().to_path_buf(),
            profiles_dir: temp.path().to_path_buf(),
            timeout_secs: 10,
        }
    }

    #[test]
    fn test_parse_run_results() {
        let summary = RunSummary::parse(RESULTS).unwrap();
        assert_eq!(summary.total, 5);
        assert_eq!(summary.successful, 2);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(
            summary.failures[0],
            (
                "model.fhir.stg_encounters".to_string(),
                "relation does not exist".to_string()
            )
        );
    }

    #[test]
    fn test_missing_or_bad_results_yield_no_summary() {
        let temp = TempDir::new().unwrap();
        assert!(RunSummary::load(temp.path()).is_none());

        fs::create_dir_all(temp.path().join("target")).unwrap();
        fs::write(temp.path().join(RUN_RESULTS), "{").unwrap();
        assert!(RunSummary::load(temp.path()).is_none());
    }

    #[test]
    fn test_docs_step_always_runs() {
        assert_eq!(DBT_STEPS.len(), 8);
        let docs = DBT_STEPS[DBT_STEPS.len() - 1];
        assert_eq!(docs.args, &["docs", "generate"]);
        assert!(docs.always_run);
        assert!(DBT_STEPS[..DBT_STEPS.len() - 1].iter().all(|s| !s.always_run));
    }

    #[test]
    fn test_last_lines_prefers_stderr() {
        assert_eq!(last_lines("a\nb", ""), "a\nb");
        assert_eq!(last_lines("a", "boom"), "boom");
        let long: String = (0..20).map(|n| format!("{}\n", n)).collect();
        assert_eq!(last_lines(&long, "").lines().count(), 10);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failure_skips_rest_but_not_docs() {
        let temp = TempDir::new().unwrap();
        let steps = vec![
            DbtStep::new("first", &["-c", "exit 0"], false),
            DbtStep::new("second", &["-c", "echo broken >&2; exit 1"], false),
            DbtStep::new("third", &["-c", "exit 0"], false),
            DbtStep {
                name: "docs",
                args: &["-c", "exit 0"],
                summarize: false,
                always_run: true,
            },
        ];
        let transformer = Transformer::with_steps(config(&temp, "sh"), steps);

        let report = transformer.run().await;

        let statuses: Vec<_> = report.steps.iter().map(|s| s.status.clone()).collect();
        assert_eq!(statuses[0], StepStatus::Succeeded);
        assert!(matches!(&statuses[1], StepStatus::Failed(m) if m.contains("broken")));
        assert_eq!(statuses[2], StepStatus::Skipped);
        assert_eq!(statuses[3], StepStatus::Succeeded);
        assert!(!report.is_success());
        assert!(matches!(
            report.into_result(),
            Err(IngestError::Process { program, .. }) if program == "dbt second"
        ));
    }
}
