//! S3 Blob Store Implementation
//!
//! Provides an S3-compatible blob store for production use.
//! Uses the `object_store` crate from the Arrow ecosystem.
//!
//! Blob attributes map onto S3 object attributes: the content type onto
//! `Content-Type` and each metadata entry onto `x-amz-meta-<name>`.

use super::blob_store::{
    BlobAttributes, BlobStore, BulkDeleteResult, ListResult, ObjectMeta, PutResult, StoredBlob,
    DEFAULT_LIST_PAGE_SIZE,
};
use super::config::S3Config;
use futures::{StreamExt, TryStreamExt};
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::{Attribute, AttributeValue, Attributes, ObjectStore as ObjectStoreTrait, PutOptions};
use std::borrow::Cow;
use std::future::Future;
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::pin::Pin;
use std::sync::Arc;

/// S3 blob store for production deployments
#[derive(Clone)]
pub struct S3BlobStore {
    store: Arc<dyn ObjectStoreTrait>,
    prefix: String,
}

impl S3BlobStore {
    /// Create a new S3 blob store
    ///
    /// Credentials come from the environment:
    /// - AWS_ACCESS_KEY_ID
    /// - AWS_SECRET_ACCESS_KEY
    pub async fn new(bucket: &str, config: &S3Config) -> IoResult<Self> {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(bucket)
            .with_region(&config.region);

        // Use custom endpoint for S3-compatible services (MinIO)
        if let Some(endpoint) = &config.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }

        builder = builder.with_access_key_id(std::env::var("AWS_ACCESS_KEY_ID").unwrap_or_default());
        builder = builder
            .with_secret_access_key(std::env::var("AWS_SECRET_ACCESS_KEY").unwrap_or_default());

        let store = builder.build().map_err(|e| {
            IoError::new(
                ErrorKind::InvalidInput,
                format!("Failed to create S3 store: {}", e),
            )
        })?;

        Ok(S3BlobStore {
            store: Arc::new(store),
            prefix: config.prefix.clone(),
        })
    }

    /// Create from an existing object store (for testing)
    pub fn from_store(store: Arc<dyn ObjectStoreTrait>, prefix: String) -> Self {
        S3BlobStore { store, prefix }
    }

    /// Get the full path with prefix
    fn full_path(&self, key: &str) -> ObjectPath {
        if self.prefix.is_empty() {
            ObjectPath::from(key)
        } else {
            ObjectPath::from(format!("{}/{}", self.prefix, key))
        }
    }

    /// Strip prefix from path
    fn strip_prefix(&self, path: &ObjectPath) -> String {
        let path_str = path.to_string();
        if self.prefix.is_empty() {
            path_str
        } else {
            let prefix_with_slash = format!("{}/", self.prefix);
            path_str
                .strip_prefix(&prefix_with_slash)
                .unwrap_or(&path_str)
                .to_string()
        }
    }

    fn to_attributes(attributes: &BlobAttributes) -> Attributes {
        let mut out = Attributes::new();
        if let Some(content_type) = &attributes.content_type {
            out.insert(Attribute::ContentType, AttributeValue::from(content_type.clone()));
        }
        for (name, value) in &attributes.metadata {
            out.insert(
                Attribute::Metadata(Cow::Owned(name.clone())),
                AttributeValue::from(value.clone()),
            );
        }
        out
    }

    fn from_attributes(attributes: &Attributes) -> BlobAttributes {
        let mut out = BlobAttributes::default();
        for (attribute, value) in attributes.iter() {
            let value: &str = value.as_ref();
            match attribute {
                Attribute::ContentType => out.content_type = Some(value.to_string()),
                Attribute::Metadata(name) => {
                    out.metadata.insert(name.to_string(), value.to_string());
                }
                _ => {}
            }
        }
        out
    }

    /// Convert object_store errors to IoError
    fn map_error(err: object_store::Error) -> IoError {
        match &err {
            object_store::Error::NotFound { .. } => {
                IoError::new(ErrorKind::NotFound, err.to_string())
            }
            object_store::Error::AlreadyExists { .. } => {
                IoError::new(ErrorKind::AlreadyExists, err.to_string())
            }
            object_store::Error::Precondition { .. } => {
                IoError::new(ErrorKind::InvalidInput, err.to_string())
            }
            _ => IoError::new(ErrorKind::Other, err.to_string()),
        }
    }
}

impl std::fmt::Debug for S3BlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3BlobStore")
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl BlobStore for S3BlobStore {
    fn put<'a>(
        &'a self,
        key: &'a str,
        data: &'a [u8],
        attributes: &'a BlobAttributes,
    ) -> Pin<Box<dyn Future<Output = IoResult<PutResult>> + Send + 'a>> {
        Box::pin(async move {
            let path = self.full_path(key);
            let opts = PutOptions {
                attributes: Self::to_attributes(attributes),
                ..PutOptions::default()
            };
            let result = self
                .store
                .put_opts(&path, bytes::Bytes::copy_from_slice(data).into(), opts)
                .await
                .map_err(Self::map_error)?;
            Ok(PutResult {
                etag: result.e_tag,
            })
        })
    }

    fn get<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<StoredBlob>> + Send + 'a>> {
        Box::pin(async move {
            let path = self.full_path(key);
            let result = self.store.get(&path).await.map_err(Self::map_error)?;
            let attributes = Self::from_attributes(&result.attributes);
            let etag = result.meta.e_tag.clone();
            let data = result.bytes().await.map_err(Self::map_error)?;
            Ok(StoredBlob {
                key: key.to_string(),
                data: data.to_vec(),
                attributes,
                etag,
            })
        })
    }

    fn exists<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<bool>> + Send + 'a>> {
        Box::pin(async move {
            let path = self.full_path(key);
            match self.store.head(&path).await {
                Ok(_) => Ok(true),
                Err(object_store::Error::NotFound { .. }) => Ok(false),
                Err(e) => Err(Self::map_error(e)),
            }
        })
    }

    fn delete<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<()>> + Send + 'a>> {
        Box::pin(async move {
            let path = self.full_path(key);
            // S3 delete is idempotent - ignore not found errors
            match self.store.delete(&path).await {
                Ok(()) => Ok(()),
                Err(object_store::Error::NotFound { .. }) => Ok(()),
                Err(e) => Err(Self::map_error(e)),
            }
        })
    }

    fn bulk_delete<'a>(
        &'a self,
        keys: &'a [String],
    ) -> Pin<Box<dyn Future<Output = IoResult<BulkDeleteResult>> + Send + 'a>> {
        Box::pin(async move {
            let locations = futures::stream::iter(
                keys.iter()
                    .map(|k| Ok::<_, object_store::Error>(self.full_path(k)))
                    .collect::<Vec<_>>(),
            )
            .boxed();

            // One DeleteObjects request per 1000 keys; results come back in
            // request order
            let outcomes: Vec<_> = self.store.delete_stream(locations).collect().await;

            let mut result = BulkDeleteResult::default();
            for (key, outcome) in keys.iter().zip(outcomes) {
                match outcome {
                    Ok(_) | Err(object_store::Error::NotFound { .. }) => {
                        result.deleted.push(key.clone())
                    }
                    Err(e) => result.failed.push((key.clone(), e.to_string())),
                }
            }
            Ok(result)
        })
    }

    fn list<'a>(
        &'a self,
        prefix: &'a str,
        continuation_token: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = IoResult<ListResult>> + Send + 'a>> {
        Box::pin(async move {
            let full_prefix = self.full_path(prefix);

            // The token is the last key of the previous page; S3 resumes
            // strictly after it
            let stream = match continuation_token {
                Some(after) => self
                    .store
                    .list_with_offset(Some(&full_prefix), &self.full_path(after)),
                None => self.store.list(Some(&full_prefix)),
            };

            let page: Vec<_> = stream
                .take(DEFAULT_LIST_PAGE_SIZE + 1)
                .try_collect()
                .await
                .map_err(Self::map_error)?;

            let mut objects: Vec<ObjectMeta> = page
                .into_iter()
                .map(|meta| ObjectMeta {
                    key: self.strip_prefix(&meta.location),
                    size_bytes: meta.size as u64,
                    created_at_ms: meta
                        .last_modified
                        .timestamp_millis()
                        .try_into()
                        .unwrap_or(0),
                    etag: meta.e_tag,
                })
                .filter(|o| o.key.starts_with(prefix))
                .collect();

            let continuation_token = if objects.len() > DEFAULT_LIST_PAGE_SIZE {
                objects.truncate(DEFAULT_LIST_PAGE_SIZE);
                objects.last().map(|o| o.key.clone())
            } else {
                None
            };

            Ok(ListResult {
                objects,
                continuation_token,
            })
        })
    }
}
