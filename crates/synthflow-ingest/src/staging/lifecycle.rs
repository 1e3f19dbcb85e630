//! Upload-state and retention tracking for staged entities

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::{RecordStore, UploadMarker, UploadedFile};
use crate::error::{IngestError, Result};

/// Result of marking a set of entities as uploaded
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkOutcome {
    pub marked: Vec<String>,
    /// `(entity_id, error)` for every marker that could not be written
    pub failed: Vec<(String, String)>,
}

impl MarkOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Result of one retention sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub deleted_entities: usize,
    pub deleted_files: usize,
    pub errors: usize,
}

#[derive(Debug, Clone)]
pub struct LifecycleTracker {
    store: RecordStore,
}

impl LifecycleTracker {
    pub fn new(store: RecordStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Entities with at least one data file and no readable upload marker
    pub fn scan_for_new(&self) -> Result<BTreeSet<String>> {
        let mut new_entities = BTreeSet::new();

        for entity_id in self.store.entity_ids()? {
            let entity = match self.store.entity(&entity_id) {
                Ok(entity) => entity,
                Err(e) => {
                    warn!(entity_id = %entity_id, error = %e, "Skipping unreadable entity");
                    continue;
                },
            };
            if entity.files.is_empty() || entity.is_uploaded() {
                continue;
            }
            new_entities.insert(entity_id);
        }

        debug!(count = new_entities.len(), "Scanned staging area for new entities");
        Ok(new_entities)
    }

    /// Write one marker per entity, listing the files as they are on disk.
    /// Failures are collected per entity; an entity whose marker fails is
    /// uploaded again on the next cycle.
    pub fn mark_uploaded(&self, entity_ids: &[String], destination: &str) -> MarkOutcome {
        let mut outcome = MarkOutcome::default();

        for entity_id in entity_ids {
            let result = self
                .store
                .describe_files(entity_id)
                .and_then(|files| self.record_upload(entity_id, destination, files));

            match result {
                Ok(()) => outcome.marked.push(entity_id.clone()),
                Err(e) => {
                    warn!(entity_id = %entity_id, error = %e, "Failed to mark entity as uploaded");
                    outcome.failed.push((entity_id.clone(), e.to_string()));
                },
            }
        }

        outcome
    }

    /// Write the marker of one entity with the files exactly as they were sent
    pub fn record_upload(&self, entity_id: &str, destination: &str, files: Vec<UploadedFile>) -> Result<()> {
        let marker = UploadMarker {
            uploaded_at: Utc::now(),
            destination: destination.to_string(),
            files,
        };
        self.store.write_marker(entity_id, &marker)
    }

    /// Delete every entity with a data file older than `retention`
    pub fn sweep_expired(&self, retention: Duration) -> Result<SweepReport> {
        let retention = chrono::Duration::from_std(retention)
            .map_err(|e| IngestError::Config(format!("retention out of range: {}", e)))?;
        self.sweep_expired_before(Utc::now() - retention)
    }

    /// Delete every entity with a data file last modified before `cutoff`.
    ///
    /// One old file is enough to expire the whole entity, marker included,
    /// whether or not it was uploaded. An entity without data files is aged
    /// by its directory's modification time.
    pub fn sweep_expired_before(&self, cutoff: DateTime<Utc>) -> Result<SweepReport> {
        let entity_ids = self.store.entity_ids()?;
        Ok(self.sweep_entities(&entity_ids, cutoff))
    }

    /// A failure on one entity is counted and the sweep moves on
    fn sweep_entities(&self, entity_ids: &[String], cutoff: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        for entity_id in entity_ids {
            match self.sweep_entity(entity_id, cutoff) {
                Ok(Some(files)) => {
                    report.deleted_entities += 1;
                    report.deleted_files += files;
                },
                Ok(None) => {},
                Err(e) => {
                    warn!(entity_id = %entity_id, error = %e, "Failed to sweep entity");
                    report.errors += 1;
                },
            }
        }

        if report.deleted_entities > 0 || report.errors > 0 {
            info!(
                deleted_entities = report.deleted_entities,
                deleted_files = report.deleted_files,
                errors = report.errors,
                cutoff = %cutoff,
                "Retention sweep finished"
            );
        } else {
            debug!(cutoff = %cutoff, "Retention sweep found nothing to delete");
        }

        report
    }

    fn sweep_entity(&self, entity_id: &str, cutoff: DateTime<Utc>) -> Result<Option<usize>> {
        let entity = self.store.entity(entity_id)?;

        let expired = if entity.files.is_empty() {
            let modified = std::fs::metadata(&entity.directory)?.modified()?;
            DateTime::<Utc>::from(modified) < cutoff
        } else {
            entity.files.iter().any(|f| f.last_modified < cutoff)
        };

        if !expired {
            return Ok(None);
        }

        debug!(entity_id = %entity_id, uploaded = entity.is_uploaded(), "Entity expired");
        self.store.remove(entity_id).map(Some)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::staging::tests::seed_entity;
    use crate::staging::MARKER_FILE;
    use tempfile::TempDir;

    const HOUR: Duration = Duration::from_secs(3600);

    fn tracker(temp: &TempDir) -> LifecycleTracker {
        LifecycleTracker::new(RecordStore::new(temp.path(), 3))
    }

    #[test]
    fn test_scan_excludes_marked_entities() {
        let temp = TempDir::new().unwrap();
        seed_entity(temp.path(), "e1", &[("a.json", HOUR)]);
        seed_entity(temp.path(), "e2", &[("a.json", HOUR)]);
        let tracker = tracker(&temp);

        let found = tracker.scan_for_new().unwrap();
        assert_eq!(found.into_iter().collect::<Vec<_>>(), vec!["e1", "e2"]);

        let outcome = tracker.mark_uploaded(&["e1".to_string()], "s3://bucket/raw/patients");
        assert_eq!(outcome.marked, vec!["e1"]);
        assert!(outcome.is_complete());

        let found = tracker.scan_for_new().unwrap();
        assert_eq!(found.into_iter().collect::<Vec<_>>(), vec!["e2"]);
    }

    #[test]
    fn test_scan_skips_entities_without_data_files() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("empty")).unwrap();
        assert!(tracker(&temp).scan_for_new().unwrap().is_empty());
    }

    #[test]
    fn test_marker_records_files() {
        let temp = TempDir::new().unwrap();
        seed_entity(temp.path(), "e1", &[("a.json", HOUR), ("b.json", HOUR)]);
        let tracker = tracker(&temp);

        tracker.mark_uploaded(&["e1".to_string()], "s3://bucket/raw/patients");

        let marker = tracker.store().read_marker("e1").unwrap().unwrap();
        assert_eq!(marker.destination, "s3://bucket/raw/patients");
        let names: Vec<_> = marker.files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a.json", "b.json"]);
        assert!(marker.files.iter().all(|f| f.sha256.len() == 64));
    }

    #[test]
    fn test_mark_collects_failures() {
        let temp = TempDir::new().unwrap();
        seed_entity(temp.path(), "e1", &[("a.json", HOUR)]);

        let outcome = tracker(&temp).mark_uploaded(
            &["e1".to_string(), "gone".to_string()],
            "s3://bucket/raw/patients",
        );
        assert_eq!(outcome.marked, vec!["e1"]);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].0, "gone");
        assert!(!outcome.is_complete());
    }

    #[test]
    fn test_one_old_file_expires_whole_entity() {
        let temp = TempDir::new().unwrap();
        seed_entity(temp.path(), "mixed", &[("a.json", 25 * HOUR), ("b.json", HOUR)]);
        std::fs::write(temp.path().join("mixed").join(MARKER_FILE), "{}").unwrap();
        seed_entity(temp.path(), "fresh", &[("a.json", HOUR), ("b.json", HOUR)]);

        let report = tracker(&temp).sweep_expired(24 * HOUR).unwrap();

        assert_eq!(report.deleted_entities, 1);
        assert_eq!(report.deleted_files, 2);
        assert_eq!(report.errors, 0);
        assert!(!temp.path().join("mixed").exists());
        assert!(temp.path().join("fresh").exists());
    }

    #[test]
    fn test_sweep_ignores_upload_state() {
        let temp = TempDir::new().unwrap();
        seed_entity(temp.path(), "never_uploaded", &[("a.json", 48 * HOUR)]);

        let report = tracker(&temp).sweep_expired(24 * HOUR).unwrap();
        assert_eq!(report.deleted_entities, 1);
    }

    #[test]
    fn test_sweep_of_missing_root_is_empty() {
        let temp = TempDir::new().unwrap();
        let tracker = LifecycleTracker::new(RecordStore::new(temp.path().join("absent"), 3));
        assert_eq!(tracker.sweep_expired(HOUR).unwrap(), SweepReport::default());
    }

    #[test]
    fn test_sweep_isolates_failing_entity() {
        let temp = TempDir::new().unwrap();
        seed_entity(temp.path(), "old", &[("a.json", 48 * HOUR), ("b.json", 48 * HOUR)]);
        seed_entity(temp.path(), "fresh", &[("a.json", HOUR)]);
        let tracker = tracker(&temp);

        // "vanished" was listed but removed by someone else before its turn
        let ids = vec!["vanished".to_string(), "old".to_string(), "fresh".to_string()];
        let report = tracker.sweep_entities(&ids, Utc::now() - chrono::Duration::hours(24));

        assert_eq!(report.errors, 1);
        assert_eq!(report.deleted_entities, 1);
        assert_eq!(report.deleted_files, 2);
        assert!(!temp.path().join("old").exists());
        assert!(temp.path().join("fresh").exists());
    }

    #[test]
    fn test_sweep_skips_stray_files_in_root() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("notes.txt"), "not an entity").unwrap();
        seed_entity(temp.path(), "old", &[("a.json", 48 * HOUR)]);

        let report = tracker(&temp).sweep_expired(24 * HOUR).unwrap();

        assert_eq!(report.deleted_entities, 1);
        assert_eq!(report.errors, 0);
        assert!(temp.path().join("notes.txt").exists());
    }
}
