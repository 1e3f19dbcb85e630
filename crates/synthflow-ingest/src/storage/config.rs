use serde::{Deserialize, Serialize};
use std::env;

pub const DEFAULT_S3_REGION: &str = "us-east-1";
pub const DEFAULT_S3_BUCKET: &str = "synthea-fhir-data-dump";
pub const DEFAULT_S3_PREFIX: &str = "raw";
pub const DEFAULT_ENTITY_GROUP: &str = "patients";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub endpoint: Option<String>,
    pub region: String,
    pub bucket: String,
    /// Static credentials; when absent the default AWS provider chain is used
    pub access_key: Option<String>,
    #[serde(skip_serializing)]
    pub secret_key: Option<String>,
    pub path_style: bool,
    /// Leading key segment, e.g. "raw"
    pub prefix: String,
    /// Second key segment grouping entities, e.g. "patients"
    pub entity_group: String,
}

impl StorageConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            endpoint: env::var("S3_ENDPOINT").ok().filter(|v| !v.is_empty()),
            region: env::var("S3_REGION")
                .or_else(|_| env::var("AWS_REGION"))
                .unwrap_or_else(|_| DEFAULT_S3_REGION.to_string()),
            bucket: env::var("S3_BUCKET")
                .or_else(|_| env::var("AWS_S3_BUCKET"))
                .unwrap_or_else(|_| DEFAULT_S3_BUCKET.to_string()),
            access_key: env::var("S3_ACCESS_KEY")
                .or_else(|_| env::var("AWS_ACCESS_KEY_ID"))
                .ok(),
            secret_key: env::var("S3_SECRET_KEY")
                .or_else(|_| env::var("AWS_SECRET_ACCESS_KEY"))
                .ok(),
            path_style: env::var("S3_PATH_STYLE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
            prefix: env::var("S3_PREFIX")
                .or_else(|_| env::var("AWS_S3_PREFIX"))
                .unwrap_or_else(|_| DEFAULT_S3_PREFIX.to_string()),
            entity_group: env::var("S3_ENTITY_GROUP")
                .unwrap_or_else(|_| DEFAULT_ENTITY_GROUP.to_string()),
        })
    }

    pub fn for_minio(endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            bucket: bucket.into(),
            access_key: Some("minioadmin".to_string()),
            secret_key: Some("minioadmin".to_string()),
            path_style: true,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bucket.is_empty() {
            anyhow::bail!("S3 bucket cannot be empty");
        }
        if self.access_key.is_some() != self.secret_key.is_some() {
            anyhow::bail!("S3 access key and secret key must be set together");
        }
        if self.prefix.trim_matches('/').is_empty() || self.entity_group.trim_matches('/').is_empty() {
            anyhow::bail!("S3 prefix and entity group cannot be empty");
        }
        Ok(())
    }

    /// Listing prefix covering every entity, with a trailing slash: "raw/patients/"
    pub fn entity_prefix(&self) -> String {
        format!(
            "{}/{}/",
            self.prefix.trim_matches('/'),
            self.entity_group.trim_matches('/')
        )
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: DEFAULT_S3_REGION.to_string(),
            bucket: DEFAULT_S3_BUCKET.to_string(),
            access_key: None,
            secret_key: None,
            path_style: false,
            prefix: DEFAULT_S3_PREFIX.to_string(),
            entity_group: DEFAULT_ENTITY_GROUP.to_string(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_for_minio() {
        let config = StorageConfig::for_minio("http://localhost:9000", "test-bucket");
        assert_eq!(config.endpoint, Some("http://localhost:9000".to_string()));
        assert_eq!(config.bucket, "test-bucket");
        assert!(config.path_style);
        assert_eq!(config.access_key.as_deref(), Some("minioadmin"));
        config.validate().unwrap();
    }

    #[test]
    fn test_entity_prefix_trims_slashes() {
        let config = StorageConfig {
            prefix: "/raw/".to_string(),
            ..StorageConfig::default()
        };
        assert_eq!(config.entity_prefix(), "raw/patients/");
    }

    #[test]
    fn test_validate_requires_credential_pair() {
        let config = StorageConfig {
            access_key: Some("key".to_string()),
            ..StorageConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
