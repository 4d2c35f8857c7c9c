//! S3-compatible object storage backend.
//!
//! [`S3Backend`] implements the [`StorageBackend`] trait using the `object_store`
//! crate, supporting any S3-compatible endpoint: AWS S3, MinIO, Ceph, etc.
//! Each regional bucket used by the region placement policy is one backend.

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use tracing::{debug, instrument};

use relocate_core::error::RelocateError;
use relocate_core::storage::StorageBackend;
use relocate_core::Result;

/// A [`StorageBackend`] backed by any S3-compatible object storage.
///
/// Configured from a URI like `s3://bucket/prefix?region=eu-central-1`.
/// Listing pages through the bucket via the `object_store` stream, so
/// callers always see the complete key set.
pub struct S3Backend {
    name: String,
    store: Box<dyn ObjectStore>,
    prefix: String,
}

impl S3Backend {
    /// Create a new `S3Backend` from an S3 URI.
    ///
    /// # URI Format
    ///
    /// `s3://bucket/prefix?region=us-east-2&endpoint=http://minio:9000`
    ///
    /// Environment variables `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`,
    /// and `AWS_REGION` are used as fallbacks for credentials and region.
    pub fn new(name: impl Into<String>, uri: &str) -> Result<Self> {
        let name = name.into();
        let (bucket, prefix) = parse_s3_uri(uri)?;

        let mut builder = AmazonS3Builder::from_env().with_bucket_name(&bucket);

        if let Some(region) = extract_query_param(uri, "region") {
            builder = builder.with_region(&region);
        }

        // MinIO and other S3-compatible services
        if let Some(endpoint) = extract_query_param(uri, "endpoint") {
            builder = builder.with_endpoint(&endpoint).with_allow_http(true);
        }

        let store = builder.build().map_err(|e| {
            RelocateError::storage(format!("Failed to create S3 client for {uri}"), e)
        })?;

        debug!(backend = %name, bucket = %bucket, prefix = %prefix, "S3Backend initialised");

        Ok(Self {
            name,
            store: Box::new(store),
            prefix,
        })
    }

    /// Build the full object path from a key.
    fn full_path(&self, key: &str) -> ObjectPath {
        if self.prefix.is_empty() {
            ObjectPath::from(key)
        } else {
            ObjectPath::from(format!("{}/{}", self.prefix, key))
        }
    }

    /// Strip the backend prefix so keys are relative to the backend root.
    fn relative_key(&self, location: &ObjectPath) -> String {
        let full_key = location.to_string();
        if self.prefix.is_empty() {
            return full_key;
        }
        full_key
            .strip_prefix(&format!("{}/", self.prefix))
            .map(str::to_string)
            .unwrap_or(full_key)
    }
}

#[async_trait]
impl StorageBackend for S3Backend {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self), fields(backend = %self.name))]
    async fn list(&self) -> Result<Vec<String>> {
        let root = if self.prefix.is_empty() {
            None
        } else {
            Some(ObjectPath::from(self.prefix.as_str()))
        };

        let mut results = Vec::new();
        let mut stream = self.store.list(root.as_ref());

        while let Some(meta) = stream
            .try_next()
            .await
            .map_err(|e| RelocateError::storage(format!("S3 list failed for {}", self.name), e))?
        {
            results.push(self.relative_key(&meta.location));
        }

        results.sort();
        debug!("Listed {} keys", results.len());
        Ok(results)
    }

    #[instrument(skip(self), fields(backend = %self.name, key = %key))]
    async fn get(&self, key: &str) -> Result<Bytes> {
        let path = self.full_path(key);
        let result = self.store.get(&path).await.map_err(|e| match e {
            object_store::Error::NotFound { .. } => RelocateError::NotFound {
                key: key.to_string(),
            },
            other => RelocateError::storage(format!("S3 get failed for {key}"), other),
        })?;
        let bytes = result
            .bytes()
            .await
            .map_err(|e| RelocateError::storage(format!("S3 get bytes failed for {key}"), e))?;
        Ok(bytes)
    }

    #[instrument(skip(self, data), fields(backend = %self.name, key = %key, size = data.len()))]
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        let path = self.full_path(key);
        self.store
            .put(&path, PutPayload::from(data))
            .await
            .map_err(|e| RelocateError::storage(format!("S3 put failed for {key}"), e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = %self.name, key = %key))]
    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.full_path(key);
        // S3 delete is idempotent, a missing key is not an error
        self.store
            .delete(&path)
            .await
            .map_err(|e| RelocateError::storage(format!("S3 delete failed for {key}"), e))?;
        Ok(())
    }
}

/// Parse an S3 URI into (bucket, prefix).
///
/// `s3://bucket/prefix/path` → `("bucket", "prefix/path")`
/// `s3://bucket` → `("bucket", "")`
fn parse_s3_uri(uri: &str) -> Result<(String, String)> {
    let stripped = uri
        .strip_prefix("s3://")
        .ok_or_else(|| RelocateError::Config {
            message: format!("S3 URI must start with 's3://': {uri}"),
        })?;

    let path_part = stripped.split('?').next().unwrap_or(stripped);

    let mut parts = path_part.splitn(2, '/');
    let bucket = parts.next().unwrap_or("").to_string();
    let prefix = parts.next().unwrap_or("").trim_end_matches('/').to_string();

    if bucket.is_empty() {
        return Err(RelocateError::Config {
            message: format!("S3 URI must include a bucket name: {uri}"),
        });
    }

    Ok((bucket, prefix))
}

/// Extract a query parameter value from a URI.
fn extract_query_param(uri: &str, param: &str) -> Option<String> {
    let query = uri.split('?').nth(1)?;
    for pair in query.split('&') {
        let mut kv = pair.splitn(2, '=');
        if kv.next()? == param {
            return kv.next().map(|v| v.to_string());
        }
    }
    None
}
