//! Object storage access
//!
//! [`ObjectStore`] is the seam between the ingestion engine and the remote
//! bucket. [`S3Storage`] talks to S3 or any S3-compatible service (MinIO),
//! [`memory::InMemoryObjectStore`] backs tests and local dry runs.

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    config::Region, error::DisplayErrorContext, primitives::ByteStream, Client,
};
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};

use crate::error::{IngestError, Result};

pub mod config;
pub mod memory;

pub use memory::InMemoryObjectStore;

/// Listing entry for one stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    pub key: String,
    pub last_modified: Option<DateTime<Utc>>,
    pub size_bytes: i64,
}

/// Object body together with its metadata
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub meta: RemoteObject,
    pub data: Vec<u8>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Descriptor of where objects end up, e.g. "s3://bucket"
    fn location(&self) -> String;

    /// Every object whose key starts with `prefix`, in no particular order
    async fn list(&self, prefix: &str) -> Result<Vec<RemoteObject>>;

    /// Write `data` under `key`, replacing any existing object
    async fn put(&self, key: &str, data: Vec<u8>, content_type: Option<&str>) -> Result<()>;

    async fn get(&self, key: &str) -> Result<StoredObject>;

    /// Metadata only; [`IngestError::ObjectNotFound`] when absent
    async fn head(&self, key: &str) -> Result<RemoteObject>;
}

#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
}

impl S3Storage {
    pub async fn new(config: &config::StorageConfig) -> Result<Self> {
        debug!(bucket = %config.bucket, endpoint = ?config.endpoint, "Initializing S3 storage");

        let region = Region::new(config.region.clone());

        let mut builder = match (&config.access_key, &config.secret_key) {
            (Some(access_key), Some(secret_key)) => aws_sdk_s3::Config::builder()
                .credentials_provider(Credentials::new(
                    access_key,
                    secret_key,
                    None,
                    None,
                    "synthflow-storage",
                ))
                .region(region),
            _ => {
                let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
                    .region(region)
                    .load()
                    .await;
                aws_sdk_s3::config::Builder::from(&shared)
            },
        };

        builder = builder.force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(builder.build());

        info!(bucket = %config.bucket, "Storage client initialized");

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl ObjectStore for S3Storage {
    fn location(&self) -> String {
        format!("s3://{}", self.bucket)
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn list(&self, prefix: &str) -> Result<Vec<RemoteObject>> {
        let mut objects = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| {
                    IngestError::storage(format!(
                        "Failed to list s3://{}/{}: {}",
                        self.bucket,
                        prefix,
                        DisplayErrorContext(e)
                    ))
                })?;

            objects.extend(response.contents().iter().filter_map(|obj| {
                obj.key().map(|key| RemoteObject {
                    key: key.to_string(),
                    last_modified: obj.last_modified().and_then(to_chrono),
                    size_bytes: obj.size().unwrap_or(0),
                })
            }));

            match response.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }

        debug!(count = objects.len(), "Listed objects");

        Ok(objects)
    }

    #[instrument(skip(self, data), fields(bucket = %self.bucket, size = data.len()))]
    async fn put(&self, key: &str, data: Vec<u8>, content_type: Option<&str>) -> Result<()> {
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data));

        if let Some(ct) = content_type {
            request = request.content_type(ct);
        }

        request.send().await.map_err(|e| {
            IngestError::storage(format!(
                "Failed to upload s3://{}/{}: {}",
                self.bucket,
                key,
                DisplayErrorContext(e)
            ))
        })?;

        debug!("Uploaded object");

        Ok(())
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn get(&self, key: &str) -> Result<StoredObject> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    IngestError::ObjectNotFound(key.to_string())
                } else {
                    IngestError::storage(format!(
                        "Failed to download s3://{}/{}: {}",
                        self.bucket,
                        key,
                        DisplayErrorContext(e)
                    ))
                }
            })?;

        let last_modified = response.last_modified().and_then(to_chrono);

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| IngestError::storage(format!("Failed to read body of {}: {}", key, e)))?
            .into_bytes()
            .to_vec();

        Ok(StoredObject {
            meta: RemoteObject {
                key: key.to_string(),
                last_modified,
                size_bytes: data.len() as i64,
            },
            data,
        })
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn head(&self, key: &str) -> Result<RemoteObject> {
        let response = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_not_found()) {
                    IngestError::ObjectNotFound(key.to_string())
                } else {
                    IngestError::storage(format!(
                        "Failed to stat s3://{}/{}: {}",
                        self.bucket,
                        key,
                        DisplayErrorContext(e)
                    ))
                }
            })?;

        Ok(RemoteObject {
            key: key.to_string(),
            last_modified: response.last_modified().and_then(to_chrono),
            size_bytes: response.content_length().unwrap_or(0),
        })
    }
}

fn to_chrono(dt: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(dt.secs(), dt.subsec_nanos())
}
