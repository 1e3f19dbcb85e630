//! Transfer of staged entities to object storage

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, error, info, instrument, warn};

use crate::error::Result;
use crate::remote::with_timeout;
use synthflow_common::checksum;

use crate::staging::{Entity, FileRef, LifecycleTracker, UploadedFile};
use crate::storage::{config::StorageConfig, ObjectStore};

const JSON_CONTENT_TYPE: &str = "application/json";

/// Object key for one staged file: `{prefix}/{entity_group}/{entity_id}/{file_name}`
pub fn object_key(prefix: &str, entity_group: &str, entity_id: &str, file_name: &str) -> String {
    format!(
        "{}/{}/{}/{}",
        prefix.trim_matches('/'),
        entity_group.trim_matches('/'),
        entity_id,
        file_name
    )
}

/// Per-entity upload result
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadOutcome {
    pub entity_id: String,
    pub files_uploaded: usize,
    /// Names of the files that could not be written
    pub failed_files: Vec<String>,
    /// Keys written
    pub uploaded: Vec<String>,
    /// Size and checksum of the bytes behind each written key
    pub files: Vec<UploadedFile>,
}

impl UploadOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed_files.is_empty()
    }
}

pub struct RemoteUploader {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    entity_group: String,
    timeout: Duration,
}

impl RemoteUploader {
    pub fn new(store: Arc<dyn ObjectStore>, config: &StorageConfig, timeout: Duration) -> Self {
        Self {
            store,
            prefix: config.prefix.clone(),
            entity_group: config.entity_group.clone(),
            timeout,
        }
    }

    pub fn object_key(&self, entity_id: &str, file_name: &str) -> String {
        object_key(&self.prefix, &self.entity_group, entity_id, file_name)
    }

    /// Where uploads land, e.g. "s3://bucket/raw/patients"
    pub fn destination(&self) -> String {
        format!(
            "{}/{}/{}",
            self.store.location(),
            self.prefix.trim_matches('/'),
            self.entity_group.trim_matches('/')
        )
    }

    /// Write every file of `entity`, overwriting existing objects.
    ///
    /// Files are sent concurrently; each failure (timeouts included) is
    /// recorded against its file name and never aborts the others.
    #[instrument(skip(self, entity), fields(entity_id = %entity.entity_id, files = entity.files.len()))]
    pub async fn upload(&self, entity: &Entity) -> UploadOutcome {
        let results = join_all(
            entity
                .files
                .iter()
                .map(|file| self.upload_file(&entity.entity_id, file)),
        )
        .await;

        let mut outcome = UploadOutcome {
            entity_id: entity.entity_id.clone(),
            ..UploadOutcome::default()
        };

        for (file, result) in entity.files.iter().zip(results) {
            match result {
                Ok((key, sent)) => {
                    outcome.files_uploaded += 1;
                    outcome.uploaded.push(key);
                    outcome.files.push(sent);
                },
                Err(e) => {
                    warn!(file = %file.name, error = %e, "File upload failed");
                    outcome.failed_files.push(file.name.clone());
                },
            }
        }

        debug!(
            uploaded = outcome.files_uploaded,
            failed = outcome.failed_files.len(),
            "Entity upload finished"
        );

        outcome
    }

    async fn upload_file(&self, entity_id: &str, file: &FileRef) -> Result<(String, UploadedFile)> {
        let key = self.object_key(entity_id, &file.name);
        let data = tokio::fs::read(&file.path).await?;
        let sent = UploadedFile {
            name: file.name.clone(),
            size_bytes: data.len() as u64,
            sha256: checksum::sha256_bytes(&data),
        };

        with_timeout(
            format!("put {}", key),
            self.timeout,
            self.store.put(&key, data, Some(JSON_CONTENT_TYPE)),
        )
        .await?;

        Ok((key, sent))
    }
}

/// Counters for one upload cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReport {
    pub entities_found: usize,
    pub entities_uploaded: usize,
    pub entities_failed: usize,
    pub entities_invalid: usize,
    pub files_uploaded: usize,
    pub files_failed: usize,
}

/// scan → validate → upload → mark
pub struct UploadCycle {
    tracker: LifecycleTracker,
    uploader: RemoteUploader,
    validate_before_upload: bool,
}

impl UploadCycle {
    pub fn new(tracker: LifecycleTracker, uploader: RemoteUploader) -> Self {
        Self {
            tracker,
            uploader,
            validate_before_upload: false,
        }
    }

    /// Parse every file as JSON before uploading; entities that fail are skipped
    pub fn validate_before_upload(mut self, enabled: bool) -> Self {
        self.validate_before_upload = enabled;
        self
    }

    pub async fn run(&self) -> Result<UploadReport> {
        let new_entities = self.tracker.scan_for_new()?;
        let mut report = UploadReport {
            entities_found: new_entities.len(),
            ..UploadReport::default()
        };

        if new_entities.is_empty() {
            info!("No new entities to upload");
            return Ok(report);
        }

        info!(count = new_entities.len(), "Uploading new entities");
        let destination = self.uploader.destination();

        for entity_id in &new_entities {
            let entity = match self.tracker.store().entity(entity_id) {
                Ok(entity) => entity,
                Err(e) => {
                    error!(entity_id = %entity_id, error = %e, "Cannot load staged entity");
                    report.entities_failed += 1;
                    continue;
                },
            };

            if self.validate_before_upload {
                if let Err(reason) = validate_entity(&entity).await {
                    warn!(entity_id = %entity_id, reason = %reason, "Entity failed validation; not uploading");
                    report.entities_invalid += 1;
                    continue;
                }
            }

            let outcome = self.uploader.upload(&entity).await;
            report.files_uploaded += outcome.files_uploaded;
            report.files_failed += outcome.failed_files.len();

            if !outcome.is_complete() {
                error!(
                    entity_id = %entity_id,
                    failed_files = ?outcome.failed_files,
                    "✗ Entity upload incomplete; it will be retried next cycle"
                );
                report.entities_failed += 1;
                continue;
            }

            match self.tracker.record_upload(entity_id, &destination, outcome.files) {
                Ok(()) => {
                    info!(entity_id = %entity_id, files = outcome.files_uploaded, "✓ Entity uploaded");
                    report.entities_uploaded += 1;
                },
                Err(e) => {
                    warn!(entity_id = %entity_id, error = %e, "Failed to mark entity as uploaded");
                    report.entities_failed += 1;
                },
            }
        }

        info!(
            found = report.entities_found,
            uploaded = report.entities_uploaded,
            failed = report.entities_failed,
            invalid = report.entities_invalid,
            "Upload cycle completed"
        );

        Ok(report)
    }
}

async fn validate_entity(entity: &Entity) -> std::result::Result<(), String> {
    if entity.files.is_empty() {
        return Err("no data files".to_string());
    }
    for file in &entity.files {
        let raw = tokio::fs::read(&file.path)
            .await
            .map_err(|e| format!("{}: {}", file.name, e))?;
        serde_json::from_slice::<serde_json::Value>(&raw)
            .map_err(|e| format!("{}: {}", file.name, e))?;
    }
    Ok(())
}
