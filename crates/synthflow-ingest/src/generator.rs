//! Synthetic record generation and staging
//!
//! Synthea writes one patient bundle plus hospital and practitioner
//! information files per run. The generation cycle turns that output into a
//! staged entity and then sweeps expired entities.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, instrument, warn};

use crate::config::GeneratorConfig;
use crate::error::{IngestError, Result};
use crate::fhir;
use crate::process;
use crate::staging::{Entity, LifecycleTracker, SweepReport};

/// Output subdirectories searched in order
const OUTPUT_SUBDIRS: [&str; 2] = ["fhir_r4", "fhir"];

/// Name prefixes of the auxiliary files written next to each patient bundle
const AUXILIARY_PREFIXES: [&str; 2] = ["hospitalInformation", "practitionerInformation"];

const ENTITY_TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%3fZ";

/// Files produced by one generator run
#[derive(Debug, Clone)]
pub struct GeneratedOutput {
    pub source_dir: PathBuf,
    /// Every `.json` file, sorted by name
    pub files: Vec<PathBuf>,
    pub primary: PathBuf,
}

/// The patient bundle: the first file that is neither hospital nor practitioner information
pub fn classify_primary(files: &[PathBuf]) -> Option<&PathBuf> {
    files.iter().find(|path| {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| !AUXILIARY_PREFIXES.iter().any(|p| name.starts_with(p)))
    })
}

/// Entity id for a primary bundle named `{First}_{Last}_{patient_id}.json`.
///
/// The UTC generation time leads the id so object keys sort by generation
/// order: `{timestamp}_{patient_id}_{First}_{Last}`. Stems that do not split
/// into three parts become `{timestamp}_{stem}`.
pub fn entity_id_for(primary_stem: &str, generated_at: DateTime<Utc>) -> String {
    let timestamp = generated_at.format(ENTITY_TIMESTAMP_FORMAT);
    let parts: Vec<&str> = primary_stem.split('_').collect();

    if parts.len() >= 3 {
        let patient_id = parts[2..].join("_");
        format!("{}_{}_{}_{}", timestamp, patient_id, parts[0], parts[1])
    } else {
        warn!(stem = primary_stem, "Unexpected bundle file name pattern");
        format!("{}_{}", timestamp, primary_stem)
    }
}

pub struct SyntheaGenerator {
    config: GeneratorConfig,
}

impl SyntheaGenerator {
    pub fn new(config: GeneratorConfig) -> Self {
        Self { config }
    }

    /// Run Synthea once with `seed`, replacing any previous output
    #[instrument(skip(self), fields(population = self.config.population))]
    pub async fn generate(&self, seed: i64) -> Result<()> {
        let output_dir = &self.config.output_dir;
        if output_dir.exists() {
            debug!(dir = %output_dir.display(), "Cleaning previous generator output");
            fs::remove_dir_all(output_dir)?;
        }
        fs::create_dir_all(output_dir)?;

        let workdir = output_dir.parent().unwrap_or(output_dir.as_path());
        let args = [
            "-jar".to_string(),
            self.config.jar_path.display().to_string(),
            "--exporter.fhir.use_us_core_ig".to_string(),
            "true".to_string(),
            "-p".to_string(),
            self.config.population.to_string(),
            "-s".to_string(),
            seed.to_string(),
        ];

        info!(seed, "Starting Synthea generation");
        let output = process::run_checked(
            &self.config.java_bin,
            &args,
            workdir,
            Duration::from_secs(self.config.timeout_secs),
        )
        .await?;
        debug!(stdout = %output.stdout.chars().take(500).collect::<String>(), "Synthea finished");

        Ok(())
    }

    /// Locate the `.json` files of the last run
    pub fn collect_outputs(&self) -> Result<GeneratedOutput> {
        collect_outputs(&self.config.output_dir)
    }
}

pub fn collect_outputs(output_dir: &Path) -> Result<GeneratedOutput> {
    for subdir in OUTPUT_SUBDIRS {
        let search_dir = output_dir.join(subdir);
        if !search_dir.is_dir() {
            continue;
        }

        let mut files: Vec<PathBuf> = fs::read_dir(&search_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && path.extension().is_some_and(|e| e == "json"))
            .collect();
        if files.is_empty() {
            continue;
        }
        files.sort();

        let primary = classify_primary(&files).cloned().ok_or_else(|| {
            IngestError::GeneratorOutput(format!(
                "no patient bundle among {} files in {}",
                files.len(),
                search_dir.display()
            ))
        })?;

        info!(dir = %search_dir.display(), count = files.len(), "Found generator output");
        return Ok(GeneratedOutput {
            source_dir: search_dir,
            files,
            primary,
        });
    }

    Err(IngestError::GeneratorOutput(format!(
        "no FHIR files found in {}",
        output_dir.display()
    )))
}

/// Result of one generation cycle
#[derive(Debug, Clone, Default)]
pub struct GenerationReport {
    pub entity_id: Option<String>,
    pub sweep: SweepReport,
}

/// generate → stage → sweep → summary
pub struct GenerationCycle {
    generator: SyntheaGenerator,
    tracker: LifecycleTracker,
    retention: Duration,
}

impl GenerationCycle {
    pub fn new(generator: SyntheaGenerator, tracker: LifecycleTracker, retention: Duration) -> Self {
        Self {
            generator,
            tracker,
            retention,
        }
    }

    /// The retention sweep runs even when generation or staging fails; the
    /// first of those failures is returned afterwards.
    pub async fn run(&self) -> Result<GenerationReport> {
        let generated_at = Utc::now();
        let staged = self.generate_and_stage(generated_at).await;

        let sweep = match self.tracker.sweep_expired(self.retention) {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "Retention sweep failed");
                SweepReport {
                    errors: 1,
                    ..SweepReport::default()
                }
            },
        };

        let entity = staged?;
        log_summary(&entity);

        Ok(GenerationReport {
            entity_id: Some(entity.entity_id),
            sweep,
        })
    }

    async fn generate_and_stage(&self, generated_at: DateTime<Utc>) -> Result<Entity> {
        self.generator.generate(generated_at.timestamp_millis()).await?;
        let output = self.generator.collect_outputs()?;
        stage_output(&self.tracker, &output, generated_at)
    }
}

/// Copy a run's files into a new staged entity
pub fn stage_output(
    tracker: &LifecycleTracker,
    output: &GeneratedOutput,
    generated_at: DateTime<Utc>,
) -> Result<Entity> {
    let stem = output
        .primary
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| {
            IngestError::GeneratorOutput(format!("unusable file name {}", output.primary.display()))
        })?;
    let entity_id = entity_id_for(stem, generated_at);

    let entity = tracker.store().stage(&entity_id, &output.files)?;
    info!(entity_id = %entity.entity_id, files = entity.files.len(), "Staged generated entity");
    Ok(entity)
}

/// Log the patient headline of a staged entity; problems are logged, never raised
fn log_summary(entity: &Entity) {
    let paths: Vec<PathBuf> = entity.files.iter().map(|f| f.path.clone()).collect();
    let Some(primary) = classify_primary(&paths) else {
        warn!(entity_id = %entity.entity_id, "No patient bundle to summarise");
        return;
    };

    let summary = fs::read(primary)
        .map_err(|e| e.to_string())
        .and_then(|raw| serde_json::from_slice(&raw).map_err(|e| e.to_string()))
        .map(|bundle: serde_json::Value| fhir::patient_summary(&bundle, entity.total_size()));

    match summary {
        Ok(Some(s)) => info!(
            entity_id = %entity.entity_id,
            patient_id = %s.patient_id,
            name = s.name.as_deref().unwrap_or("unknown"),
            gender = s.gender.as_deref().unwrap_or("unknown"),
            birth_date = s.birth_date.as_deref().unwrap_or("unknown"),
            resources = s.resource_count,
            size_kb = %format!("{:.2}", s.size_bytes as f64 / 1024.0),
            "Patient generation summary"
        ),
        Ok(None) => warn!(entity_id = %entity.entity_id, "Bundle has no Patient resource"),
        Err(e) => error!(entity_id = %entity.entity_id, error = %e, "Error generating summary"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::staging::RecordStore;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap() + chrono::Duration::milliseconds(678)
    }

    fn write_output(dir: &Path, names: &[&str]) {
        fs::create_dir_all(dir).unwrap();
        for name in names {
            fs::write(dir.join(name), r#"{"resourceType":"Bundle","entry":[]}"#).unwrap();
        }
    }

    #[test]
    fn test_entity_id_from_bundle_stem() {
        assert_eq!(
            entity_id_for("Justin359_Roob72_b5ceadaf-3f35-da2f", at()),
            "20260102T030405678Z_b5ceadaf-3f35-da2f_Justin359_Roob72"
        );
        assert_eq!(
            entity_id_for("Ana_Diaz_id_with_underscores", at()),
            "20260102T030405678Z_id_with_underscores_Ana_Diaz"
        );
        assert_eq!(entity_id_for("odd", at()), "20260102T030405678Z_odd");
    }

    #[test]
    fn test_entity_ids_sort_by_generation_time() {
        let earlier = entity_id_for("Zed_Zulu_zzz", at());
        let later = entity_id_for("Abe_Alpha_aaa", at() + chrono::Duration::seconds(1));
        assert!(earlier < later);
    }

    #[test]
    fn test_classify_skips_auxiliary_files() {
        let files = vec![
            PathBuf::from("out/Ana_Diaz_1.json"),
            PathBuf::from("out/hospitalInformation1.json"),
            PathBuf::from("out/practitionerInformation1.json"),
        ];
        assert_eq!(classify_primary(&files), Some(&files[0]));
        assert_eq!(classify_primary(&files[1..]), None);
    }

    #[test]
    fn test_collect_prefers_fhir_r4() {
        let temp = TempDir::new().unwrap();
        write_output(&temp.path().join("fhir"), &["Old_Run_0.json"]);
        write_output(
            &temp.path().join("fhir_r4"),
            &["hospitalInformation9.json", "Ana_Diaz_1.json", "practitionerInformation9.json"],
        );

        let output = collect_outputs(temp.path()).unwrap();
        assert!(output.source_dir.ends_with("fhir_r4"));
        assert_eq!(output.files.len(), 3);
        assert!(output.primary.ends_with("Ana_Diaz_1.json"));
    }

    #[test]
    fn test_collect_falls_back_to_fhir() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("fhir_r4")).unwrap();
        write_output(&temp.path().join("fhir"), &["Ana_Diaz_1.json"]);

        let output = collect_outputs(temp.path()).unwrap();
        assert!(output.source_dir.ends_with("fhir"));
    }

    #[test]
    fn test_collect_without_output_fails() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            collect_outputs(temp.path()),
            Err(IngestError::GeneratorOutput(_))
        ));

        write_output(&temp.path().join("fhir"), &["hospitalInformation1.json"]);
        assert!(matches!(
            collect_outputs(temp.path()),
            Err(IngestError::GeneratorOutput(_))
        ));
    }

    #[test]
    fn test_stage_output_creates_entity() {
        let temp = TempDir::new().unwrap();
        let out = temp.path().join("synthea");
        write_output(
            &out.join("fhir_r4"),
            &["Ana_Diaz_a1b2.json", "hospitalInformation9.json", "practitionerInformation9.json"],
        );
        let tracker = LifecycleTracker::new(RecordStore::new(temp.path().join("bundles"), 3));

        let output = collect_outputs(&out).unwrap();
        let entity = stage_output(&tracker, &output, at()).unwrap();

        assert_eq!(entity.entity_id, "20260102T030405678Z_a1b2_Ana_Diaz");
        assert_eq!(entity.files.len(), 3);
        assert_eq!(
            tracker.scan_for_new().unwrap().into_iter().collect::<Vec<_>>(),
            vec![entity.entity_id]
        );
    }

    #[tokio::test]
    async fn test_cycle_sweeps_even_when_generation_fails() {
        let temp = TempDir::new().unwrap();
        let bundles = temp.path().join("bundles");
        crate::staging::tests::seed_entity(&bundles, "old", &[("a.json", Duration::from_secs(48 * 3600))]);

        let generator = SyntheaGenerator::new(GeneratorConfig {
            java_bin: "synthflow-no-such-java".to_string(),
            jar_path: temp.path().join("missing.jar"),
            output_dir: temp.path().join("synthea").join("output"),
            population: 1,
            timeout_secs: 5,
        });
        let tracker = LifecycleTracker::new(RecordStore::new(&bundles, 3));
        let cycle = GenerationCycle::new(generator, tracker, Duration::from_secs(24 * 3600));

        assert!(cycle.run().await.is_err());
        assert!(!bundles.join("old").exists());
    }
}
