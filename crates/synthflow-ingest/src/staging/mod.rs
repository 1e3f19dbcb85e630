//! Local staging area
//!
//! The staging root holds one directory per generated entity:
//!
//! ```text
//! bundles/
//! ├── 20260101T120000123Z_a1b2_Ana_Diaz/
//! │   ├── Ana_Diaz_a1b2.json
//! │   ├── hospitalInformation1767268800123.json
//! │   ├── practitionerInformation1767268800123.json
//! │   └── .uploaded
//! └── ...
//! ```
//!
//! Only `.json` files count as entity files. `.uploaded` is the lifecycle
//! marker written once every file has reached object storage.

pub mod lifecycle;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use synthflow_common::checksum;
use tracing::{debug, warn};

use crate::error::{IngestError, Result};

pub use lifecycle::{LifecycleTracker, MarkOutcome, SweepReport};

pub const MARKER_FILE: &str = ".uploaded";
pub const ENTITY_FILE_EXTENSION: &str = "json";

/// One staged data file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    pub name: String,
    pub path: PathBuf,
    pub last_modified: DateTime<Utc>,
    pub size_bytes: u64,
}

/// Contents of the `.uploaded` marker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadMarker {
    pub uploaded_at: DateTime<Utc>,
    pub destination: String,
    #[serde(default)]
    pub files: Vec<UploadedFile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub name: String,
    pub size_bytes: u64,
    pub sha256: String,
}

/// A staged entity as found on disk
#[derive(Debug, Clone)]
pub struct Entity {
    pub entity_id: String,
    pub directory: PathBuf,
    /// Sorted by file name
    pub files: Vec<FileRef>,
    /// Earliest file modification time, `None` for an empty directory
    pub created_at: Option<DateTime<Utc>>,
    pub marker: Option<UploadMarker>,
}

impl Entity {
    pub fn is_uploaded(&self) -> bool {
        self.marker.is_some()
    }

    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size_bytes).sum()
    }
}

/// Filesystem-backed store of staged entities
#[derive(Debug, Clone)]
pub struct RecordStore {
    root: PathBuf,
    expected_file_count: usize,
}

impl RecordStore {
    pub fn new(root: impl Into<PathBuf>, expected_file_count: usize) -> Self {
        Self {
            root: root.into(),
            expected_file_count,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn expected_file_count(&self) -> usize {
        self.expected_file_count
    }

    pub fn entity_dir(&self, entity_id: &str) -> Result<PathBuf> {
        validate_entity_id(entity_id)?;
        Ok(self.root.join(entity_id))
    }

    /// Sorted ids of every entity directory; a missing root yields none
    pub fn entity_ids(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(root = %self.root.display(), "Staging root does not exist");
                return Ok(Vec::new());
            },
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(root = %self.root.display(), error = %e, "Skipping unreadable staging entry");
                    continue;
                },
            };
            match entry.file_type() {
                Ok(file_type) if file_type.is_dir() => {},
                Ok(_) => continue,
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "Skipping staging entry of unknown type");
                    continue;
                },
            }
            if let Some(name) = entry.file_name().to_str() {
                if validate_entity_id(name).is_ok() {
                    ids.push(name.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub fn entities(&self) -> Result<Vec<Entity>> {
        self.entity_ids()?
            .iter()
            .map(|id| self.entity(id))
            .collect()
    }

    pub fn entity(&self, entity_id: &str) -> Result<Entity> {
        let directory = self.entity_dir(entity_id)?;
        if !directory.is_dir() {
            return Err(IngestError::EntityNotFound(entity_id.to_string()));
        }

        let files = self.files(entity_id)?;
        let created_at = files.iter().map(|f| f.last_modified).min();
        let marker = self.read_marker(entity_id)?;

        Ok(Entity {
            entity_id: entity_id.to_string(),
            directory,
            files,
            created_at,
            marker,
        })
    }

    /// `.json` files of one entity, sorted by name
    pub fn files(&self, entity_id: &str) -> Result<Vec<FileRef>> {
        let directory = self.entity_dir(entity_id)?;
        let mut files = Vec::new();

        for entry in fs::read_dir(&directory)? {
            let entry = entry?;
            let path = entry.path();
            if !is_entity_file(&path) {
                continue;
            }
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            files.push(FileRef {
                name: entry.file_name().to_string_lossy().into_owned(),
                path,
                last_modified: DateTime::<Utc>::from(metadata.modified()?),
                size_bytes: metadata.len(),
            });
        }

        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    /// The entity's marker; an unreadable or malformed marker counts as absent
    pub fn read_marker(&self, entity_id: &str) -> Result<Option<UploadMarker>> {
        let path = self.entity_dir(entity_id)?.join(MARKER_FILE);

        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                warn!(entity_id = %entity_id, error = %e, "Cannot read upload marker; treating entity as not uploaded");
                return Ok(None);
            },
        };

        match serde_json::from_slice::<UploadMarker>(&raw) {
            Ok(marker) => Ok(Some(marker)),
            Err(e) => {
                warn!(entity_id = %entity_id, error = %e, "Malformed upload marker; treating entity as not uploaded");
                Ok(None)
            },
        }
    }

    /// Write the marker through a temporary file so readers never see a partial marker
    pub fn write_marker(&self, entity_id: &str, marker: &UploadMarker) -> Result<()> {
        let directory = self.entity_dir(entity_id)?;
        if !directory.is_dir() {
            return Err(IngestError::EntityNotFound(entity_id.to_string()));
        }

        let tmp = directory.join(format!("{}.tmp", MARKER_FILE));
        fs::write(&tmp, serde_json::to_vec_pretty(marker)?)?;
        fs::rename(&tmp, directory.join(MARKER_FILE))?;

        debug!(entity_id = %entity_id, destination = %marker.destination, "Wrote upload marker");
        Ok(())
    }

    pub fn clear_marker(&self, entity_id: &str) -> Result<()> {
        match fs::remove_file(self.entity_dir(entity_id)?.join(MARKER_FILE)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete the entity directory, marker included. Returns the number of
    /// entity files removed.
    pub fn remove(&self, entity_id: &str) -> Result<usize> {
        let directory = self.entity_dir(entity_id)?;
        let file_count = self.files(entity_id).map(|f| f.len()).unwrap_or(0);
        fs::remove_dir_all(&directory)?;
        debug!(entity_id = %entity_id, file_count, "Removed staged entity");
        Ok(file_count)
    }

    /// Copy `sources` into a new entity directory, verifying each copy by checksum
    pub fn stage(&self, entity_id: &str, sources: &[PathBuf]) -> Result<Entity> {
        let directory = self.entity_dir(entity_id)?;
        fs::create_dir_all(&directory)?;

        for source in sources {
            let name = source.file_name().ok_or_else(|| {
                IngestError::GeneratorOutput(format!("{} has no file name", source.display()))
            })?;
            let target = directory.join(name);
            let expected = checksum::sha256_file(source)?;
            fs::copy(source, &target)?;
            checksum::verify_sha256_file(&target, &expected)?;
        }

        let entity = self.entity(entity_id)?;
        if entity.files.len() != self.expected_file_count {
            warn!(
                entity_id = %entity_id,
                expected = self.expected_file_count,
                actual = entity.files.len(),
                "Unexpected number of files staged for entity"
            );
        }

        Ok(entity)
    }

    /// Checksums of the entity's current files, for the upload marker
    pub fn describe_files(&self, entity_id: &str) -> Result<Vec<UploadedFile>> {
        self.files(entity_id)?
            .into_iter()
            .map(|file| {
                Ok(UploadedFile {
                    sha256: checksum::sha256_file(&file.path)?,
                    name: file.name,
                    size_bytes: file.size_bytes,
                })
            })
            .collect()
    }
}

fn is_entity_file(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(ENTITY_FILE_EXTENSION)
}

fn validate_entity_id(entity_id: &str) -> Result<()> {
    if entity_id.is_empty()
        || entity_id.starts_with('.')
        || entity_id.contains(['/', '\\'])
        || entity_id.contains("..")
    {
        return Err(IngestError::InvalidEntityId(entity_id.to_string()));
    }
    Ok(())
}
