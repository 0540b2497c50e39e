//! The object-store seam behind the asset cache.
//!
//! The cache never performs read-modify-write on a key: objects are written
//! whole and overwritten whole, so the store only needs atomic per-object
//! get/put plus a cursor-paged listing for the eviction sweep.

mod filesystem;
mod memory;

pub use filesystem::FilesystemStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use time::OffsetDateTime;

/// A stored object: raw bytes plus the metadata the sweep and the serving
/// path need.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub bytes: Bytes,
    /// Declared content type at fetch time; empty when the origin sent none.
    pub content_type: String,
    pub uploaded_at: OffsetDateTime,
}

/// One listing entry: enough to age an object without reading its bytes.
#[derive(Debug, Clone)]
pub struct ObjectEntry {
    pub key: String,
    pub uploaded: OffsetDateTime,
}

/// A page of the key listing. `cursor` is opaque to callers; `None` means
/// the listing is exhausted.
#[derive(Debug, Clone)]
pub struct ObjectPage {
    pub entries: Vec<ObjectEntry>,
    pub cursor: Option<String>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid object key")]
    InvalidKey,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("metadata for `{key}` could not be decoded: {message}")]
    Metadata { key: String, message: String },
}

impl StoreError {
    pub fn metadata(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Metadata {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// Persistent object store keyed by the request path with its leading
/// separator stripped.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read an object. `Ok(None)` is a miss.
    async fn get(&self, key: &str) -> Result<Option<StoredObject>, StoreError>;

    /// Persist an object, overwriting any previous value wholesale.
    async fn put(&self, key: &str, object: StoredObject) -> Result<(), StoreError>;

    /// List keys with their upload timestamps, one page per call. Pass the
    /// cursor from the previous page to continue; start with `None`.
    async fn list(&self, cursor: Option<&str>) -> Result<ObjectPage, StoreError>;

    /// Delete a batch of keys. Missing keys are not an error, so the sweep
    /// stays idempotent and safe to run concurrently with itself.
    async fn delete_many(&self, keys: &[String]) -> Result<(), StoreError>;
}
