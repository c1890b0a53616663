use crate::config::S3Config;
use anyhow::Result;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Builder as S3ConfigBuilder, Credentials};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use aws_sdk_s3::Client as S3Client;
use aws_types::region::Region;
use parking_lot::RwLock;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info, instrument};

/// Errors returned by object store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Object store request failed: {0}")]
    Request(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Failed to read object body: {0}")]
    Body(String),
}

/// Outcome of the startup bucket check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketStatus {
    Existing,
    Created,
}

/// Write-mostly object store holding the backed-up envelopes
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Make sure the destination bucket exists, creating it if needed
    async fn ensure_bucket(&self) -> Result<BucketStatus, StoreError>;

    /// Store `body` under `key`, replacing any existing object
    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StoreError>;

    /// Fetch the full body of an object
    async fn get_object(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Check if an object exists
    async fn object_exists(&self, key: &str) -> Result<bool, StoreError>;
}

/// S3 / MinIO backed object store
pub struct S3ObjectStore {
    client: S3Client,
    bucket: String,
    region: String,
}

impl S3ObjectStore {
    /// Create a new S3 client for the configured bucket
    pub async fn new(config: &S3Config) -> Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        // Static keys take precedence over the default provider chain
        if let (Some(ref access_key), Some(ref secret_key)) =
            (&config.access_key, &config.secret_key)
        {
            s3_config_builder = s3_config_builder.credentials_provider(Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "backup-service",
            ));
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            endpoint = config.endpoint_url.as_deref().unwrap_or("aws"),
            "S3 object store initialized"
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            region: config.region.clone(),
        })
    }

    /// Get the bucket name
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn create_bucket(&self) -> Result<BucketStatus, StoreError> {
        let mut request = self.client.create_bucket().bucket(&self.bucket);

        // us-east-1 rejects an explicit location constraint
        if self.region != "us-east-1" {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }

        match request.send().await {
            Ok(_) => {
                info!(bucket = %self.bucket, "Created bucket");
                Ok(BucketStatus::Created)
            }
            Err(e) => {
                let raced = e
                    .as_service_error()
                    .map(|e| e.is_bucket_already_owned_by_you() || e.is_bucket_already_exists())
                    .unwrap_or(false);
                if raced {
                    Ok(BucketStatus::Existing)
                } else {
                    Err(StoreError::Request(DisplayErrorContext(e).to_string()))
                }
            }
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn ensure_bucket(&self) -> Result<BucketStatus, StoreError> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => {
                debug!("Bucket already exists");
                Ok(BucketStatus::Existing)
            }
            Err(e) => {
                if e.as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false)
                {
                    self.create_bucket().await
                } else {
                    Err(StoreError::Request(DisplayErrorContext(e).to_string()))
                }
            }
        }
    }

    #[instrument(skip(self, body), fields(size_bytes = body.len()))]
    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StoreError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StoreError::Request(DisplayErrorContext(e).to_string()))?;

        debug!("Object written");
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error()
                    .map(|e| e.is_no_such_key())
                    .unwrap_or(false)
                {
                    StoreError::NotFound(key.to_string())
                } else {
                    StoreError::Request(DisplayErrorContext(e).to_string())
                }
            })?;

        let body = response
            .body
            .collect()
            .await
            .map_err(|e| StoreError::Body(e.to_string()))?;

        Ok(body.into_bytes().to_vec())
    }

    async fn object_exists(&self, key: &str) -> Result<bool, StoreError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false)
                {
                    Ok(false)
                } else {
                    Err(StoreError::Request(DisplayErrorContext(e).to_string()))
                }
            }
        }
    }
}

/// Object held by [`MemoryObjectStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub content_type: String,
}

/// In-process object store, used by tests
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    bucket_created: RwLock<bool>,
    objects: RwLock<HashMap<String, StoredObject>>,
    puts: RwLock<u64>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a stored object with its content type
    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects.read().get(key).cloned()
    }

    /// All keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of `put_object` calls served, including overwrites
    pub fn put_count(&self) -> u64 {
        *self.puts.read()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn ensure_bucket(&self) -> Result<BucketStatus, StoreError> {
        let mut created = self.bucket_created.write();
        if *created {
            Ok(BucketStatus::Existing)
        } else {
            *created = true;
            Ok(BucketStatus::Created)
        }
    }

    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StoreError> {
        self.objects.write().insert(
            key.to_string(),
            StoredObject {
                body,
                content_type: content_type.to_string(),
            },
        );
        *self.puts.write() += 1;
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.objects
            .read()
            .get(key)
            .map(|object| object.body.clone())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn object_exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.objects.read().contains_key(key))
    }
}
