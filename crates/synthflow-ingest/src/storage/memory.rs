//! In-process object store used by tests and dry runs

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{ObjectStore, RemoteObject, StoredObject};
use crate::error::{IngestError, Result};

#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    bucket: String,
    objects: Mutex<BTreeMap<String, StoredObject>>,
    failing_keys: Mutex<HashSet<String>>,
    puts: AtomicUsize,
    gets: AtomicUsize,
}

impl InMemoryObjectStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            ..Self::default()
        }
    }

    /// Seed an object with an explicit modification time
    pub fn insert(&self, key: impl Into<String>, data: Vec<u8>, last_modified: DateTime<Utc>) {
        let key = key.into();
        let object = StoredObject {
            meta: RemoteObject {
                key: key.clone(),
                last_modified: Some(last_modified),
                size_bytes: data.len() as i64,
            },
            data,
        };
        self.lock_objects().insert(key, object);
    }

    /// Make every put or get against `key` fail with a storage error
    pub fn fail_key(&self, key: impl Into<String>) {
        self.lock_failing().insert(key.into());
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock_objects().keys().cloned().collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock_objects().contains_key(key)
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    fn lock_objects(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, StoredObject>> {
        self.objects.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_failing(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.failing_keys.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_failure(&self, op: &str, key: &str) -> Result<()> {
        if self.lock_failing().contains(key) {
            return Err(IngestError::storage(format!("injected {} failure for {}", op, key)));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    fn location(&self) -> String {
        format!("memory://{}", self.bucket)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<RemoteObject>> {
        Ok(self
            .lock_objects()
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(_, object)| object.meta.clone())
            .collect())
    }

    async fn put(&self, key: &str, data: Vec<u8>, _content_type: Option<&str>) -> Result<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.check_failure("put", key)?;
        self.insert(key, data, Utc::now());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<StoredObject> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.check_failure("get", key)?;
        self.lock_objects()
            .get(key)
            .cloned()
            .ok_or_else(|| IngestError::ObjectNotFound(key.to_string()))
    }

    async fn head(&self, key: &str) -> Result<RemoteObject> {
        self.lock_objects()
            .get(key)
            .map(|object| object.meta.clone())
            .ok_or_else(|| IngestError::ObjectNotFound(key.to_string()))
    }
}
