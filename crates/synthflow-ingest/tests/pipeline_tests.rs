//! End-to-end pipeline tests against in-memory remotes
//!
//! Stage entities on disk, upload them to an in-memory bucket, then load
//! them incrementally into an in-memory warehouse. No external services
//! are needed.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use synthflow_ingest::cycle::{CycleOutcome, IngestionCycle};
use synthflow_ingest::lister::IncrementalLister;
use synthflow_ingest::loader::{BatchLoader, InMemoryWarehouse, Warehouse};
use synthflow_ingest::staging::{LifecycleTracker, RecordStore};
use synthflow_ingest::storage::config::StorageConfig;
use synthflow_ingest::storage::{InMemoryObjectStore, ObjectStore};
use synthflow_ingest::upload::{RemoteUploader, UploadCycle};
use synthflow_ingest::watermark::{InMemoryWatermarkStore, WatermarkStore};
use tempfile::TempDir;

const TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Test Helpers
// ============================================================================

fn write_entity(root: &Path, entity_id: &str, patient_id: &str) {
    let dir = root.join(entity_id);
    fs::create_dir_all(&dir).unwrap();

    let bundle = json!({
        "resourceType": "Bundle",
        "entry": [
            {"resource": {"resourceType": "Patient", "id": patient_id}},
            {"resource": {"resourceType": "Encounter", "id": "enc-1"}}
        ]
    });
    fs::write(dir.join(format!("Ana_Diaz_{}.json", patient_id)), bundle.to_string()).unwrap();
    fs::write(
        dir.join("hospitalInformation1.json"),
        json!({"resourceType": "Bundle", "entry": []}).to_string(),
    )
    .unwrap();
}

struct Harness {
    _staging: TempDir,
    tracker: LifecycleTracker,
    bucket: Arc<InMemoryObjectStore>,
    warehouse: Arc<InMemoryWarehouse>,
    watermarks: Arc<InMemoryWatermarkStore>,
    storage: StorageConfig,
}

impl Harness {
    fn new() -> Self {
        let staging = TempDir::new().unwrap();
        let tracker = LifecycleTracker::new(RecordStore::new(staging.path(), 2));
        Self {
            _staging: staging,
            tracker,
            bucket: Arc::new(InMemoryObjectStore::new("synthea-fhir-data-dump")),
            warehouse: Arc::new(InMemoryWarehouse::new()),
            watermarks: Arc::new(InMemoryWatermarkStore::new()),
            storage: StorageConfig::default(),
        }
    }

    fn root(&self) -> &Path {
        self.tracker.store().root()
    }

    fn upload_cycle(&self) -> UploadCycle {
        let uploader = RemoteUploader::new(self.bucket.clone(), &self.storage, TIMEOUT);
        UploadCycle::new(self.tracker.clone(), uploader)
    }

    fn ingestion_cycle(&self, batch_cap: usize) -> IngestionCycle {
        let store: Arc<dyn ObjectStore> = self.bucket.clone();
        IngestionCycle::new(
            self.watermarks.clone(),
            IncrementalLister::new(store.clone(), TIMEOUT),
            BatchLoader::new(store, self.warehouse.clone(), TIMEOUT),
            self.storage.entity_prefix(),
            batch_cap,
            TIMEOUT,
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_staged_entities_reach_the_warehouse() {
    let harness = Harness::new();
    write_entity(harness.root(), "20260101T000000000Z_p1_Ana_Diaz", "p1");
    write_entity(harness.root(), "20260101T010000000Z_p2_Ana_Diaz", "p2");

    let upload = harness.upload_cycle().run().await.unwrap();
    assert_eq!(upload.entities_found, 2);
    assert_eq!(upload.entities_uploaded, 2);
    assert_eq!(upload.files_uploaded, 4);
    assert!(harness.bucket.contains(
        "raw/patients/20260101T000000000Z_p1_Ana_Diaz/Ana_Diaz_p1.json"
    ));

    // Marked entities are not picked up again
    assert!(harness.tracker.scan_for_new().unwrap().is_empty());

    let outcome = harness.ingestion_cycle(100).run().await.unwrap();
    let CycleOutcome::Loaded {
        batch_size,
        load,
        watermark,
    } = outcome
    else {
        panic!("expected a loaded batch");
    };
    assert_eq!(batch_size, 4);
    assert_eq!(load.files_loaded, 4);
    assert_eq!(load.total_rows_after, Some(4));
    assert_eq!(
        watermark.last_processed_key,
        "raw/patients/20260101T010000000Z_p2_Ana_Diaz/hospitalInformation1.json"
    );

    let patient = harness
        .warehouse
        .document("raw/patients/20260101T010000000Z_p2_Ana_Diaz/Ana_Diaz_p2.json")
        .unwrap();
    assert_eq!(patient.record_count, 2);
    assert_eq!(patient.payload["entry"][0]["resource"]["id"], "p2");

    // Nothing new until another entity is uploaded
    assert!(matches!(
        harness.ingestion_cycle(100).run().await.unwrap(),
        CycleOutcome::NoCandidates { watermark: Some(_) }
    ));
}

#[tokio::test]
async fn test_later_entities_load_past_the_watermark() {
    let harness = Harness::new();
    write_entity(harness.root(), "20260101T000000000Z_p1_Ana_Diaz", "p1");
    harness.upload_cycle().run().await.unwrap();
    harness.ingestion_cycle(100).run().await.unwrap();

    write_entity(harness.root(), "20260102T000000000Z_p3_Ana_Diaz", "p3");
    let upload = harness.upload_cycle().run().await.unwrap();
    assert_eq!(upload.entities_found, 1);

    let outcome = harness.ingestion_cycle(100).run().await.unwrap();
    assert!(matches!(
        outcome,
        CycleOutcome::Loaded { batch_size: 2, .. }
    ));
    assert_eq!(harness.warehouse.row_count().await.unwrap(), 4);
    assert_eq!(harness.watermarks.history().len(), 2);
}

#[tokio::test]
async fn test_small_batches_drain_in_key_order() {
    let harness = Harness::new();
    for (n, patient) in ["p1", "p2", "p3"].iter().enumerate() {
        write_entity(
            harness.root(),
            &format!("2026010{}T000000000Z_{}_Ana_Diaz", n + 1, patient),
            patient,
        );
    }
    harness.upload_cycle().run().await.unwrap();

    let cycle = harness.ingestion_cycle(4);
    let mut batches = Vec::new();
    loop {
        match cycle.run().await.unwrap() {
            CycleOutcome::Loaded { batch_size, .. } => batches.push(batch_size),
            CycleOutcome::NoCandidates { .. } => break,
        }
    }

    assert_eq!(batches, vec![4, 2]);
    assert_eq!(harness.warehouse.row_count().await.unwrap(), 6);

    let latest = harness.watermarks.read_latest().await.unwrap().unwrap();
    assert_eq!(
        latest.last_processed_key,
        "raw/patients/20260103T000000000Z_p3_Ana_Diaz/hospitalInformation1.json"
    );
}

#[tokio::test]
async fn test_failed_file_keeps_entity_pending() {
    let harness = Harness::new();
    write_entity(harness.root(), "20260101T000000000Z_p1_Ana_Diaz", "p1");
    harness
        .bucket
        .fail_key("raw/patients/20260101T000000000Z_p1_Ana_Diaz/hospitalInformation1.json");

    let report = harness.upload_cycle().run().await.unwrap();
    assert_eq!(report.entities_failed, 1);
    assert_eq!(report.files_failed, 1);

    let pending = harness.tracker.scan_for_new().unwrap();
    assert!(pending.contains("20260101T000000000Z_p1_Ana_Diaz"));
}
