//! Blob Store Abstraction
//!
//! Trait-based abstraction over the object store holding archived events
//! and deletion-queue entries.
//!
//! Implementations:
//! - `InMemoryBlobStore`: For unit tests and DST
//! - `LocalFsBlobStore`: For development and local testing
//! - `S3BlobStore`: For production (feature-gated)
//! - `SimulatedBlobStore`: Fault-injecting wrapper for DST
//!
//! Every method returns `std::io::Result`; `ErrorKind::NotFound` is the
//! not-found signal callers match on.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

/// Default number of keys returned per list page
pub const DEFAULT_LIST_PAGE_SIZE: usize = 1000;

/// Directory under a `LocalFsBlobStore` root holding attribute sidecars
const LOCAL_ATTRS_DIR: &str = ".attrs";

/// Content type and user metadata stored alongside a blob
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobAttributes {
    pub content_type: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl BlobAttributes {
    pub fn with_content_type(content_type: &str) -> Self {
        BlobAttributes {
            content_type: Some(content_type.to_string()),
            metadata: BTreeMap::new(),
        }
    }

    pub fn insert_metadata(&mut self, key: &str, value: &str) {
        self.metadata.insert(key.to_string(), value.to_string());
    }

    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}

/// A blob read back from the store
#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub key: String,
    pub data: Vec<u8>,
    pub attributes: BlobAttributes,
    /// Store-assigned content checksum, if the backend provides one
    pub etag: Option<String>,
}

/// Result of a put
#[derive(Debug, Clone, Default)]
pub struct PutResult {
    pub etag: Option<String>,
}

/// Metadata for a listed object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// Object key (path)
    pub key: String,
    /// Size in bytes
    pub size_bytes: u64,
    /// Creation timestamp (Unix ms)
    pub created_at_ms: u64,
    /// ETag or content hash (optional)
    pub etag: Option<String>,
}

/// Result of a list operation
#[derive(Debug, Clone, Default)]
pub struct ListResult {
    /// Objects matching the prefix
    pub objects: Vec<ObjectMeta>,
    /// Continuation token for pagination (if more results exist)
    pub continuation_token: Option<String>,
}

/// Result of a multi-object delete
#[derive(Debug, Clone, Default)]
pub struct BulkDeleteResult {
    pub deleted: Vec<String>,
    /// Keys the store refused to delete, with the reason
    pub failed: Vec<(String, String)>,
}

impl BulkDeleteResult {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Blob store abstraction trait
///
/// Assumes strong read-after-write consistency per key; listings may lag
/// behind writes.
pub trait BlobStore: Send + Sync + 'static {
    /// Put a blob (create or overwrite)
    fn put<'a>(
        &'a self,
        key: &'a str,
        data: &'a [u8],
        attributes: &'a BlobAttributes,
    ) -> Pin<Box<dyn Future<Output = IoResult<PutResult>> + Send + 'a>>;

    /// Get a blob's contents and attributes
    fn get<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<StoredBlob>> + Send + 'a>>;

    /// Check if a blob exists
    fn exists<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<bool>> + Send + 'a>>;

    /// Delete a blob. Deleting a missing key is not an error.
    fn delete<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<()>> + Send + 'a>>;

    /// Delete many blobs in one request. Per-key rejections are reported in
    /// the result; `Err` means the request as a whole failed.
    fn bulk_delete<'a>(
        &'a self,
        keys: &'a [String],
    ) -> Pin<Box<dyn Future<Output = IoResult<BulkDeleteResult>> + Send + 'a>>;

    /// List one page of blobs with a prefix, in key order
    fn list<'a>(
        &'a self,
        prefix: &'a str,
        continuation_token: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = IoResult<ListResult>> + Send + 'a>>;
}

fn not_found(key: &str) -> IoError {
    IoError::new(ErrorKind::NotFound, format!("Key not found: {}", key))
}

fn crc_etag(data: &[u8]) -> String {
    format!("{:08x}", crc32fast::hash(data))
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ============================================================================
// InMemoryBlobStore - For tests and DST
// ============================================================================

/// In-memory blob store for unit tests and deterministic simulation
#[derive(Debug)]
pub struct InMemoryBlobStore {
    data: Arc<RwLock<BTreeMap<String, StoredObject>>>,
    page_size: usize,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    attributes: BlobAttributes,
    created_at_ms: u64,
    etag: String,
}

impl InMemoryBlobStore {
    /// Create a new in-memory blob store
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_LIST_PAGE_SIZE)
    }

    /// Create a store whose listings return at most `page_size` keys per call
    pub fn with_page_size(page_size: usize) -> Self {
        InMemoryBlobStore {
            data: Arc::new(RwLock::new(BTreeMap::new())),
            page_size: page_size.max(1),
        }
    }

    /// Get the number of stored objects (for testing)
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Check if empty (for testing)
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Snapshot of every stored key (for testing)
    pub fn keys(&self) -> Vec<String> {
        self.data.read().keys().cloned().collect()
    }
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for InMemoryBlobStore {
    fn clone(&self) -> Self {
        InMemoryBlobStore {
            data: Arc::clone(&self.data),
            page_size: self.page_size,
        }
    }
}

impl BlobStore for InMemoryBlobStore {
    fn put<'a>(
        &'a self,
        key: &'a str,
        data: &'a [u8],
        attributes: &'a BlobAttributes,
    ) -> Pin<Box<dyn Future<Output = IoResult<PutResult>> + Send + 'a>> {
        Box::pin(async move {
            let etag = crc_etag(data);
            let obj = StoredObject {
                data: data.to_vec(),
                attributes: attributes.clone(),
                created_at_ms: now_ms(),
                etag: etag.clone(),
            };
            self.data.write().insert(key.to_string(), obj);
            Ok(PutResult { etag: Some(etag) })
        })
    }

    fn get<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<StoredBlob>> + Send + 'a>> {
        Box::pin(async move {
            self.data
                .read()
                .get(key)
                .map(|obj| StoredBlob {
                    key: key.to_string(),
                    data: obj.data.clone(),
                    attributes: obj.attributes.clone(),
                    etag: Some(obj.etag.clone()),
                })
                .ok_or_else(|| not_found(key))
        })
    }

    fn exists<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<bool>> + Send + 'a>> {
        Box::pin(async move { Ok(self.data.read().contains_key(key)) })
    }

    fn delete<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<()>> + Send + 'a>> {
        Box::pin(async move {
            self.data.write().remove(key);
            Ok(())
        })
    }

    fn bulk_delete<'a>(
        &'a self,
        keys: &'a [String],
    ) -> Pin<Box<dyn Future<Output = IoResult<BulkDeleteResult>> + Send + 'a>> {
        Box::pin(async move {
            let mut data = self.data.write();
            for key in keys {
                data.remove(key);
            }
            // Like S3 DeleteObjects, absent keys count as deleted
            Ok(BulkDeleteResult {
                deleted: keys.to_vec(),
                failed: Vec::new(),
            })
        })
    }

    fn list<'a>(
        &'a self,
        prefix: &'a str,
        continuation_token: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = IoResult<ListResult>> + Send + 'a>> {
        Box::pin(async move {
            let data = self.data.read();
            let start = match continuation_token {
                Some(after) => Bound::Excluded(after),
                None => Bound::Included(prefix),
            };

            let mut objects: Vec<ObjectMeta> = data
                .range::<str, _>((start, Bound::Unbounded))
                .take_while(|(k, _)| k.starts_with(prefix))
                .take(self.page_size + 1)
                .map(|(k, v)| ObjectMeta {
                    key: k.clone(),
                    size_bytes: v.data.len() as u64,
                    created_at_ms: v.created_at_ms,
                    etag: Some(v.etag.clone()),
                })
                .collect();

            let continuation_token = if objects.len() > self.page_size {
                objects.truncate(self.page_size);
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

// ============================================================================
// LocalFsBlobStore - For development
// ============================================================================

/// Local filesystem blob store for development and testing
///
/// Payloads live at `<base>/<key>`; attributes live in JSON sidecars at
/// `<base>/.attrs/<key>.json` and never show up in listings.
#[derive(Debug, Clone)]
pub struct LocalFsBlobStore {
    base_path: PathBuf,
}

impl LocalFsBlobStore {
    /// Create a new local filesystem blob store
    pub fn new(base_path: PathBuf) -> Self {
        LocalFsBlobStore { base_path }
    }

    /// Get the full path for a key
    fn full_path(&self, key: &str) -> PathBuf {
        self.base_path.join(key)
    }

    fn attrs_path(&self, key: &str) -> PathBuf {
        self.base_path
            .join(LOCAL_ATTRS_DIR)
            .join(format!("{}.json", key))
    }

    /// Ensure parent directories exist
    fn ensure_parent(path: &Path) -> IoResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    async fn remove_if_present(path: &Path) -> IoResult<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()), // Already deleted
            Err(e) => Err(e),
        }
    }

    /// Get the base path (for testing)
    pub fn base_path(&self) -> &PathBuf {
        &self.base_path
    }

    fn walk_dir(
        dir: &Path,
        base: &Path,
        prefix: &str,
        objects: &mut Vec<ObjectMeta>,
    ) -> IoResult<()> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();

            if path.is_dir() {
                if dir == base && entry.file_name() == LOCAL_ATTRS_DIR {
                    continue;
                }
                Self::walk_dir(&path, base, prefix, objects)?;
            } else if path.is_file() {
                let Ok(relative) = path.strip_prefix(base) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");

                if key.starts_with(prefix) {
                    let metadata = std::fs::metadata(&path)?;
                    objects.push(ObjectMeta {
                        key,
                        size_bytes: metadata.len(),
                        created_at_ms: metadata
                            .created()
                            .ok()
                            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                            .map(|d| d.as_millis() as u64)
                            .unwrap_or(0),
                        etag: None,
                    });
                }
            }
        }
        Ok(())
    }
}

impl BlobStore for LocalFsBlobStore {
    fn put<'a>(
        &'a self,
        key: &'a str,
        data: &'a [u8],
        attributes: &'a BlobAttributes,
    ) -> Pin<Box<dyn Future<Output = IoResult<PutResult>> + Send + 'a>> {
        Box::pin(async move {
            let path = self.full_path(key);
            let attrs_path = self.attrs_path(key);
            Self::ensure_parent(&path)?;
            Self::ensure_parent(&attrs_path)?;

            let attrs_json = serde_json::to_vec(attributes)
                .map_err(|e| IoError::new(ErrorKind::InvalidData, e))?;
            tokio::fs::write(&path, data).await?;
            tokio::fs::write(&attrs_path, attrs_json).await?;

            Ok(PutResult {
                etag: Some(crc_etag(data)),
            })
        })
    }

    fn get<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<StoredBlob>> + Send + 'a>> {
        Box::pin(async move {
            let data = tokio::fs::read(self.full_path(key)).await?;
            let attributes = match tokio::fs::read(self.attrs_path(key)).await {
                Ok(raw) => serde_json::from_slice(&raw)
                    .map_err(|e| IoError::new(ErrorKind::InvalidData, e))?,
                Err(e) if e.kind() == ErrorKind::NotFound => BlobAttributes::default(),
                Err(e) => return Err(e),
            };
            Ok(StoredBlob {
                key: key.to_string(),
                etag: Some(crc_etag(&data)),
                data,
                attributes,
            })
        })
    }

    fn exists<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<bool>> + Send + 'a>> {
        Box::pin(async move { Ok(self.full_path(key).is_file()) })
    }

    fn delete<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<()>> + Send + 'a>> {
        Box::pin(async move {
            Self::remove_if_present(&self.full_path(key)).await?;
            Self::remove_if_present(&self.attrs_path(key)).await
        })
    }

    fn bulk_delete<'a>(
        &'a self,
        keys: &'a [String],
    ) -> Pin<Box<dyn Future<Output = IoResult<BulkDeleteResult>> + Send + 'a>> {
        Box::pin(async move {
            let mut result = BulkDeleteResult::default();
            for key in keys {
                match self.delete(key).await {
                    Ok(()) => result.deleted.push(key.clone()),
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
            let base = self.base_path.clone();
            let prefix_path = if prefix.is_empty() {
                base.clone()
            } else {
                base.join(prefix)
            };

            // Get the directory to search
            let search_dir = if prefix_path.is_dir() {
                prefix_path.clone()
            } else {
                prefix_path.parent().unwrap_or(&base).to_path_buf()
            };

            if !search_dir.exists() {
                return Ok(ListResult::default());
            }

            let mut objects = Vec::new();
            Self::walk_dir(&search_dir, &base, prefix, &mut objects)?;
            objects.sort_by(|a, b| a.key.cmp(&b.key));

            if let Some(after) = continuation_token {
                objects.retain(|o| o.key.as_str() > after);
            }

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

/// Drop duplicate keys from a listing page, keeping first occurrence order
pub(crate) fn dedup_keys(objects: Vec<ObjectMeta>) -> Vec<String> {
    let mut seen = HashSet::with_capacity(objects.len());
    objects
        .into_iter()
        .filter_map(|o| seen.insert(o.key.clone()).then_some(o.key))
        .collect()
}
