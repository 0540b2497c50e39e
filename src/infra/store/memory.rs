//! In-memory object store used by tests and single-process deployments.

use async_trait::async_trait;
use dashmap::DashMap;

use super::{ObjectEntry, ObjectPage, ObjectStore, StoreError, StoredObject};

const DEFAULT_PAGE_SIZE: usize = 500;

/// A concurrent map standing in for a real object store. Listing pages are
/// served from a lexicographic key snapshot, with the last key of each page
/// as the continuation cursor.
#[derive(Debug)]
pub struct MemoryStore {
    objects: DashMap<String, StoredObject>,
    page_size: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            objects: DashMap::new(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Shrink the listing page size, so tests can exercise multi-page sweeps
    /// without thousands of objects.
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            objects: DashMap::new(),
            page_size: page_size.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<StoredObject>, StoreError> {
        if key.is_empty() {
            return Err(StoreError::InvalidKey);
        }
        Ok(self.objects.get(key).map(|entry| entry.value().clone()))
    }

    async fn put(&self, key: &str, object: StoredObject) -> Result<(), StoreError> {
        if key.is_empty() {
            return Err(StoreError::InvalidKey);
        }
        self.objects.insert(key.to_string(), object);
        Ok(())
    }

    async fn list(&self, cursor: Option<&str>) -> Result<ObjectPage, StoreError> {
        let mut keys: Vec<String> = self
            .objects
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();

        let page: Vec<String> = keys
            .into_iter()
            .filter(|key| cursor.is_none_or(|cursor| key.as_str() > cursor))
            .take(self.page_size)
            .collect();

        let cursor = (page.len() == self.page_size)
            .then(|| page.last().cloned())
            .flatten();

        let entries = page
            .into_iter()
            .filter_map(|key| {
                self.objects.get(&key).map(|entry| ObjectEntry {
                    uploaded: entry.value().uploaded_at,
                    key,
                })
            })
            .collect();

        Ok(ObjectPage { entries, cursor })
    }

    async fn delete_many(&self, keys: &[String]) -> Result<(), StoreError> {
        for key in keys {
            self.objects.remove(key);
        }
        Ok(())
    }
}
