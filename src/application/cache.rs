//! The read-through/write-through object cache for static resources.
//!
//! All state lives in the external object store; this service only derives
//! keys, degrades read failures to misses, and runs the TTL eviction sweep.
//! Caching is an optimization: persistence failures are logged and
//! swallowed, never surfaced to the client.

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::infra::{
    store::{ObjectStore, StoreError, StoredObject},
    upstream::{FetchError, FetchedResponse, OriginFetcher, OriginRequest},
};

const SOURCE: &str = "application::cache";

/// Derive the store key from a request path: the leading separator is
/// stripped, nothing else changes.
pub fn cache_key(path: &str) -> &str {
    path.strip_prefix('/').unwrap_or(path)
}

pub struct ObjectCache {
    store: Arc<dyn ObjectStore>,
    fetcher: Arc<dyn OriginFetcher>,
    retention: Duration,
}

impl ObjectCache {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        fetcher: Arc<dyn OriginFetcher>,
        retention: Duration,
    ) -> Self {
        Self {
            store,
            fetcher,
            retention,
        }
    }

    /// Configured retention period for entries, used by both sweep entry
    /// points.
    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Look up the object cached for this path. Store failures degrade to a
    /// miss so the caller falls through to an origin fetch.
    pub async fn try_serve(&self, path: &str) -> Option<StoredObject> {
        let key = cache_key(path);
        match self.store.get(key).await {
            Ok(Some(object)) => {
                metrics::counter!("specchio_cache_hit_total").increment(1);
                Some(object)
            }
            Ok(None) => {
                metrics::counter!("specchio_cache_miss_total").increment(1);
                None
            }
            Err(err) => {
                warn!(
                    target = SOURCE,
                    key,
                    error = %err,
                    "cache read failed; treating as miss"
                );
                metrics::counter!("specchio_cache_miss_total").increment(1);
                None
            }
        }
    }

    /// Fetch a static resource from its origin and persist it on success.
    ///
    /// The fetched response is always returned: a persistence failure only
    /// costs the next request a cache miss, and an unsuccessful origin
    /// response passes through uncached.
    pub async fn fetch_and_store(
        &self,
        path: &str,
        origin_url: url::Url,
    ) -> Result<FetchedResponse, FetchError> {
        let fetched = self.fetcher.fetch(OriginRequest::get(origin_url)).await?;
        if !fetched.is_success() {
            return Ok(fetched);
        }

        let key = cache_key(path);
        let object = StoredObject {
            bytes: fetched.bytes.clone(),
            content_type: fetched.content_type.clone().unwrap_or_default(),
            uploaded_at: OffsetDateTime::now_utc(),
        };
        match self.store.put(key, object).await {
            Ok(()) => {
                metrics::counter!("specchio_cache_store_total").increment(1);
                debug!(target = SOURCE, key, "cached origin response");
            }
            Err(err) => {
                warn!(
                    target = SOURCE,
                    key,
                    error = %err,
                    "cache write failed; serving the fetched response uncached"
                );
            }
        }
        Ok(fetched)
    }

    /// Delete every object older than `retention`, draining the store's
    /// paged listing and issuing one batched delete per page.
    ///
    /// Safe to run concurrently with reads and with itself: deletes are
    /// idempotent and a reader racing a delete simply misses next time.
    pub async fn sweep_expired(&self, retention: Duration) -> Result<u64, StoreError> {
        let now = OffsetDateTime::now_utc();
        let retention =
            time::Duration::try_from(retention).unwrap_or(time::Duration::MAX);

        let mut cursor: Option<String> = None;
        let mut evicted: u64 = 0;

        loop {
            let page = self.store.list(cursor.as_deref()).await?;
            let expired: Vec<String> = page
                .entries
                .iter()
                .filter(|entry| !entry.key.is_empty() && now - entry.uploaded > retention)
                .map(|entry| entry.key.clone())
                .collect();

            if !expired.is_empty() {
                match self.store.delete_many(&expired).await {
                    Ok(()) => {
                        evicted += expired.len() as u64;
                        metrics::counter!("specchio_cache_evicted_total")
                            .increment(expired.len() as u64);
                    }
                    Err(err) => {
                        warn!(
                            target = SOURCE,
                            batch = expired.len(),
                            error = %err,
                            "eviction delete failed; batch retained until next sweep"
                        );
                    }
                }
            }

            match page.cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        Ok(evicted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_strips_exactly_one_leading_separator() {
        assert_eq!(cache_key("/favicon.ico"), "favicon.ico");
        assert_eq!(cache_key("/_next/static/chunk.js"), "_next/static/chunk.js");
        assert_eq!(cache_key("already-bare"), "already-bare");
    }
}
