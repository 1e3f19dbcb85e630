//! `synthflow transform` command implementation

use colored::Colorize;

use super::Pipeline;
use crate::transform::StepStatus;

pub async fn run(pipeline: &Pipeline) -> anyhow::Result<()> {
    let report = pipeline.transformer().run().await;

    for step in &report.steps {
        let mark = match &step.status {
            StepStatus::Succeeded => "✓".green(),
            StepStatus::Failed(_) => "✗".red(),
            StepStatus::Skipped => "-".dimmed(),
        };
        match &step.summary {
            Some(s) => println!(
                "{} {:<18} {} ok, {} failed, {} skipped",
                mark, step.step, s.successful, s.failed, s.skipped
            ),
            None => println!("{} {}", mark, step.step),
        }
    }

    report.into_result()?;
    Ok(())
}
