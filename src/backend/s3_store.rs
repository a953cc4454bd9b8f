//! S3-compatible object backend
//!
//! Adapts any `object_store` client (AWS S3, R2, MinIO, ...) to the
//! `ObjectBackend` interface. The client is bound to one bucket when it is
//! built, so requests naming another bucket are rejected. Keys are used
//! verbatim; a key `object_store` cannot hold byte-for-byte (leading `/`,
//! `.` or `..` segments) is refused rather than rewritten.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use log::{debug, info};
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::{Attribute, Attributes, ObjectStore, ObjectStoreExt, PutOptions, PutPayload};

use crate::backend::{ByteStream, ObjectBackend};
use crate::config::S3Settings;
use crate::error::{BackendError, StoreError};
use crate::key::RemoteKey;

/// Object backend over an `object_store` client
pub struct S3ObjectBackend {
    bucket: String,
    inner: Arc<dyn ObjectStore>,
}

impl S3ObjectBackend {
    /// Wrap an already configured client serving `bucket`
    pub fn new(bucket: impl Into<String>, inner: Arc<dyn ObjectStore>) -> Self {
        Self {
            bucket: bucket.into(),
            inner,
        }
    }

    /// Build an S3 client for `bucket`.
    ///
    /// Standard `AWS_*` environment variables are read first; explicit
    /// settings take precedence over them.
    pub fn from_settings(bucket: &str, settings: &S3Settings) -> Result<Self, StoreError> {
        if bucket.trim().is_empty() {
            return Err(StoreError::Configuration(
                "A valid bucket name is required for the S3 backend".to_string(),
            ));
        }

        let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);

        if let Some(region) = settings.region.as_deref() {
            builder = builder.with_region(region);
        }
        if let Some(endpoint) = settings.endpoint.as_deref() {
            if url::Url::parse(endpoint).is_err() {
                return Err(StoreError::Configuration(format!(
                    "Invalid S3 endpoint URL: {}",
                    endpoint
                )));
            }
            builder = builder.with_endpoint(endpoint);
        }
        if let Some(key) = settings.access_key_id.as_deref() {
            if key.is_empty() {
                return Err(StoreError::Configuration(
                    "S3 access key id cannot be empty".to_string(),
                ));
            }
            builder = builder.with_access_key_id(key);
        }
        if let Some(secret) = settings.secret_access_key.as_deref() {
            if secret.is_empty() {
                return Err(StoreError::Configuration(
                    "S3 secret access key cannot be empty".to_string(),
                ));
            }
            builder = builder.with_secret_access_key(secret);
        }
        if settings.allow_http {
            builder = builder.with_allow_http(true);
        }

        let client = builder
            .build()
            .map_err(|e| StoreError::Configuration(format!("Failed to build S3 client: {}", e)))?;

        info!("Created S3 backend for bucket {}", bucket);
        Ok(Self::new(bucket, Arc::new(client)))
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn location(&self, bucket: &str, key: &RemoteKey) -> Result<ObjectPath, BackendError> {
        if bucket != self.bucket {
            return Err(BackendError::Other(format!(
                "S3 client is bound to bucket '{}', not '{}'",
                self.bucket, bucket
            )));
        }
        let path = ObjectPath::parse(key.as_str()).map_err(|e| {
            BackendError::Other(format!("key '{}' is not a valid object path: {}", key, e))
        })?;
        if path.as_ref() != key.as_str() {
            return Err(BackendError::Other(format!(
                "key '{}' would be stored as '{}'",
                key, path
            )));
        }
        Ok(path)
    }
}

fn map_error(err: object_store::Error, key: &RemoteKey) -> BackendError {
    match err {
        object_store::Error::NotFound { .. } => BackendError::NotFound(key.to_string()),
        other => BackendError::Other(other.to_string()),
    }
}

#[async_trait]
impl ObjectBackend for S3ObjectBackend {
    fn name(&self) -> &'static str {
        "s3"
    }

    async fn probe_exists(&self, bucket: &str, key: &RemoteKey) -> Result<bool, BackendError> {
        let path = self.location(bucket, key)?;
        match self.inner.head(&path).await {
            Ok(meta) => {
                debug!("HEAD {} -> {} bytes", path, meta.size);
                Ok(true)
            }
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(BackendError::Other(e.to_string())),
        }
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &RemoteKey,
        body: ByteStream,
        content_type: &str,
    ) -> Result<(), BackendError> {
        let path = self.location(bucket, key)?;

        // Buffered in memory and sent as one PUT, so the object is replaced
        // in a single step. Chunks are kept as-is, not concatenated.
        let chunks: Vec<Bytes> = body.try_collect().await?;
        let payload = PutPayload::from_iter(chunks);

        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, content_type.to_string().into());
        let options = PutOptions {
            attributes,
            ..Default::default()
        };

        self.inner
            .put_opts(&path, payload, options)
            .await
            .map_err(|e| map_error(e, key))?;
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &RemoteKey) -> Result<ByteStream, BackendError> {
        let path = self.location(bucket, key)?;
        let result = self.inner.get(&path).await.map_err(|e| map_error(e, key))?;
        Ok(result.into_stream().map_err(io::Error::other).boxed())
    }

    async fn delete_object(&self, bucket: &str, key: &RemoteKey) -> Result<(), BackendError> {
        let path = self.location(bucket, key)?;
        // S3 DELETE succeeds on missing keys
        self.inner.head(&path).await.map_err(|e| map_error(e, key))?;
        self.inner.delete(&path).await.map_err(|e| map_error(e, key))
    }
}
