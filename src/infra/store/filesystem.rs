//! Filesystem-backed object store.
//!
//! Bytes live under `objects/`, metadata as JSON sidecars under `meta/`.
//! Writes land bytes first and metadata last, so a key only becomes visible
//! to the listing once both halves exist.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::fs;

use super::{ObjectEntry, ObjectPage, ObjectStore, StoreError, StoredObject};

const OBJECTS_DIR: &str = "objects";
const META_DIR: &str = "meta";
const META_SUFFIX: &str = ".json";
const PAGE_SIZE: usize = 500;

#[derive(Debug, Serialize, Deserialize)]
struct ObjectMetadata {
    content_type: String,
    uploaded_at: i64,
}

#[derive(Debug)]
pub struct FilesystemStore {
    objects_root: PathBuf,
    meta_root: PathBuf,
}

impl FilesystemStore {
    /// Initialise a store rooted at the provided directory, creating it if
    /// necessary.
    pub fn new(root: PathBuf) -> Result<Self, std::io::Error> {
        let objects_root = root.join(OBJECTS_DIR);
        let meta_root = root.join(META_DIR);
        std::fs::create_dir_all(&objects_root)?;
        std::fs::create_dir_all(&meta_root)?;
        Ok(Self {
            objects_root,
            meta_root,
        })
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        resolve(&self.objects_root, key)
    }

    fn meta_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        resolve(&self.meta_root, &format!("{key}{META_SUFFIX}"))
    }

    async fn read_metadata(&self, key: &str) -> Result<Option<ObjectMetadata>, StoreError> {
        let path = self.meta_path(key)?;
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StoreError::Io(err)),
        };
        let metadata: ObjectMetadata = serde_json::from_slice(&raw)
            .map_err(|err| StoreError::metadata(key, err.to_string()))?;
        Ok(Some(metadata))
    }

    /// Walk the metadata tree and return every key, lexicographically sorted.
    async fn collect_keys(&self) -> Result<Vec<String>, StoreError> {
        let mut pending = vec![self.meta_root.clone()];
        let mut keys = Vec::new();

        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                let path = entry.path();
                if file_type.is_dir() {
                    pending.push(path);
                } else if let Some(key) = self.key_from_meta_path(&path) {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    fn key_from_meta_path(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.meta_root).ok()?;
        let relative = relative.to_str()?;
        let key = relative.strip_suffix(META_SUFFIX)?;
        (!key.is_empty()).then(|| key.replace(std::path::MAIN_SEPARATOR, "/"))
    }
}

/// Resolve a key below the given root, refusing absolute keys and parent
/// traversal.
fn resolve(root: &Path, key: &str) -> Result<PathBuf, StoreError> {
    if key.is_empty() {
        return Err(StoreError::InvalidKey);
    }
    let relative = Path::new(key);
    if relative.is_absolute()
        || relative
            .components()
            .any(|component| matches!(component, Component::ParentDir | Component::Prefix(_)))
    {
        return Err(StoreError::InvalidKey);
    }
    Ok(root.join(relative))
}

#[async_trait]
impl ObjectStore for FilesystemStore {
    async fn get(&self, key: &str) -> Result<Option<StoredObject>, StoreError> {
        let Some(metadata) = self.read_metadata(key).await? else {
            return Ok(None);
        };
        let data = match fs::read(self.object_path(key)?).await {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StoreError::Io(err)),
        };
        let uploaded_at = OffsetDateTime::from_unix_timestamp(metadata.uploaded_at)
            .map_err(|err| StoreError::metadata(key, err.to_string()))?;
        Ok(Some(StoredObject {
            bytes: Bytes::from(data),
            content_type: metadata.content_type,
            uploaded_at,
        }))
    }

    async fn put(&self, key: &str, object: StoredObject) -> Result<(), StoreError> {
        let object_path = self.object_path(key)?;
        let meta_path = self.meta_path(key)?;

        if let Some(parent) = object_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        if let Some(parent) = meta_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        fs::write(&object_path, &object.bytes).await?;

        let metadata = ObjectMetadata {
            content_type: object.content_type,
            uploaded_at: object.uploaded_at.unix_timestamp(),
        };
        let raw = serde_json::to_vec(&metadata)
            .map_err(|err| StoreError::metadata(key, err.to_string()))?;
        fs::write(&meta_path, raw).await?;
        Ok(())
    }

    async fn list(&self, cursor: Option<&str>) -> Result<ObjectPage, StoreError> {
        let keys = self.collect_keys().await?;
        let page: Vec<String> = keys
            .into_iter()
            .filter(|key| cursor.is_none_or(|cursor| key.as_str() > cursor))
            .take(PAGE_SIZE)
            .collect();

        let cursor = (page.len() == PAGE_SIZE)
            .then(|| page.last().cloned())
            .flatten();

        let mut entries = Vec::with_capacity(page.len());
        for key in page {
            if let Some(metadata) = self.read_metadata(&key).await? {
                let uploaded = OffsetDateTime::from_unix_timestamp(metadata.uploaded_at)
                    .map_err(|err| StoreError::metadata(&key, err.to_string()))?;
                entries.push(ObjectEntry { key, uploaded });
            }
        }

        Ok(ObjectPage { entries, cursor })
    }

    async fn delete_many(&self, keys: &[String]) -> Result<(), StoreError> {
        for key in keys {
            remove_if_present(self.meta_path(key)?).await?;
            remove_if_present(self.object_path(key)?).await?;
        }
        Ok(())
    }
}

async fn remove_if_present(path: PathBuf) -> Result<(), StoreError> {
    match fs::remove_file(&path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(StoreError::Io(err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(payload: &str, content_type: &str) -> StoredObject {
        StoredObject {
            bytes: Bytes::from(payload.to_string()),
            content_type: content_type.to_string(),
            uploaded_at: OffsetDateTime::now_utc(),
        }
    }

    #[tokio::test]
    async fn round_trips_bytes_and_metadata() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FilesystemStore::new(dir.path().to_path_buf()).expect("store");

        store
            .put("avatar.png", object("not-a-real-png", "image/png"))
            .await
            .expect("put");

        let stored = store.get("avatar.png").await.expect("get").expect("hit");
        assert_eq!(stored.bytes, Bytes::from_static(b"not-a-real-png"));
        assert_eq!(stored.content_type, "image/png");
    }

    #[tokio::test]
    async fn nested_keys_create_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FilesystemStore::new(dir.path().to_path_buf()).expect("store");

        store
            .put("_next/static/chunk.js", object("console.log(1)", "text/javascript"))
            .await
            .expect("put");

        let page = store.list(None).await.expect("list");
        assert_eq!(page.entries.len(), 1);
        assert_eq!(page.entries[0].key, "_next/static/chunk.js");
        assert!(page.cursor.is_none());
    }

    #[tokio::test]
    async fn traversal_keys_are_refused() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FilesystemStore::new(dir.path().to_path_buf()).expect("store");

        assert!(matches!(
            store.get("../outside").await,
            Err(StoreError::InvalidKey)
        ));
        assert!(matches!(
            store.put("/absolute", object("x", "")).await,
            Err(StoreError::InvalidKey)
        ));
    }

    #[tokio::test]
    async fn delete_many_removes_both_halves() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FilesystemStore::new(dir.path().to_path_buf()).expect("store");

        store.put("a.css", object("body{}", "text/css")).await.expect("put");
        store
            .delete_many(&["a.css".to_string(), "missing.css".to_string()])
            .await
            .expect("delete");

        assert!(store.get("a.css").await.expect("get").is_none());
        assert!(store.list(None).await.expect("list").entries.is_empty());
    }
}
