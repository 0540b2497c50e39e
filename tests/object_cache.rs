//! Object-cache behavior against the in-memory store: read-through writes,
//! failure degradation, and the paged TTL eviction sweep.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use bytes::Bytes;
use time::OffsetDateTime;
use url::Url;

use specchio::application::cache::{ObjectCache, cache_key};
use specchio::infra::store::{MemoryStore, ObjectStore, StoredObject};
use specchio::infra::upstream::{FetchError, FetchedResponse, OriginFetcher, OriginRequest};

const RETENTION: Duration = Duration::from_secs(3 * 24 * 60 * 60);

/// Fetcher returning one canned response for every URL.
struct CannedOrigin {
    response: FetchedResponse,
    fetches: AtomicUsize,
}

impl CannedOrigin {
    fn new(status: StatusCode, content_type: Option<&str>, body: &[u8]) -> Self {
        Self {
            response: FetchedResponse {
                status,
                content_type: content_type.map(str::to_owned),
                bytes: Bytes::copy_from_slice(body),
            },
            fetches: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl OriginFetcher for CannedOrigin {
    async fn fetch(&self, _request: OriginRequest) -> Result<FetchedResponse, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.response.clone())
    }
}

fn cache_over(store: Arc<MemoryStore>, origin: Arc<CannedOrigin>) -> ObjectCache {
    ObjectCache::new(store, origin, RETENTION)
}

fn aged_object(payload: &str, age: time::Duration) -> StoredObject {
    StoredObject {
        bytes: Bytes::from(payload.to_string()),
        content_type: "text/plain".to_string(),
        uploaded_at: OffsetDateTime::now_utc() - age,
    }
}

fn origin_url(path: &str) -> Url {
    Url::parse("https://bento.me")
        .expect("origin")
        .join(path)
        .expect("join")
}

#[tokio::test]
async fn fetch_and_store_round_trips_the_origin_bytes() {
    let store = Arc::new(MemoryStore::new());
    let origin = Arc::new(CannedOrigin::new(
        StatusCode::OK,
        Some("font/woff2"),
        b"woff2-payload",
    ));
    let cache = cache_over(store.clone(), origin);

    let fetched = cache
        .fetch_and_store("/F.woff2", origin_url("/F.woff2"))
        .await
        .expect("fetch");
    assert_eq!(fetched.bytes, Bytes::from_static(b"woff2-payload"));

    let served = cache.try_serve("/F.woff2").await.expect("cache hit");
    assert_eq!(served.bytes, fetched.bytes);
    assert_eq!(served.content_type, "font/woff2");
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn unsuccessful_fetches_are_returned_but_never_stored() {
    let store = Arc::new(MemoryStore::new());
    let origin = Arc::new(CannedOrigin::new(
        StatusCode::BAD_GATEWAY,
        None,
        b"upstream down",
    ));
    let cache = cache_over(store.clone(), origin.clone());

    let fetched = cache
        .fetch_and_store("/logo.svg", origin_url("/logo.svg"))
        .await
        .expect("fetch");

    assert_eq!(fetched.status, StatusCode::BAD_GATEWAY);
    assert_eq!(fetched.bytes, Bytes::from_static(b"upstream down"));
    assert!(store.is_empty());
    assert_eq!(origin.fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn read_failures_degrade_to_a_miss() {
    let store = Arc::new(MemoryStore::new());
    let origin = Arc::new(CannedOrigin::new(StatusCode::OK, None, b""));
    let cache = cache_over(store, origin);

    // "/" derives the empty key, which the store refuses; the cache must
    // swallow that and report a miss.
    assert!(cache.try_serve("/").await.is_none());
}

#[tokio::test]
async fn sweep_drops_expired_objects_and_keeps_fresh_ones() {
    let store = Arc::new(MemoryStore::new());
    let origin = Arc::new(CannedOrigin::new(StatusCode::OK, None, b""));
    let cache = cache_over(store.clone(), origin);

    store
        .put("stale.css", aged_object("old", time::Duration::days(4)))
        .await
        .expect("put");
    store
        .put("fresh.css", aged_object("new", time::Duration::hours(1)))
        .await
        .expect("put");

    let evicted = cache.sweep_expired(RETENTION).await.expect("sweep");

    assert_eq!(evicted, 1);
    assert!(store.get("stale.css").await.expect("get").is_none());
    assert!(store.get("fresh.css").await.expect("get").is_some());
}

#[tokio::test]
async fn sweep_drains_multi_page_listings() {
    let store = Arc::new(MemoryStore::with_page_size(2));
    let origin = Arc::new(CannedOrigin::new(StatusCode::OK, None, b""));
    let cache = cache_over(store.clone(), origin);

    for index in 0..5 {
        store
            .put(
                &format!("asset-{index}.js"),
                aged_object("expired", time::Duration::days(10)),
            )
            .await
            .expect("put");
    }
    store
        .put("keep.js", aged_object("fresh", time::Duration::minutes(5)))
        .await
        .expect("put");

    let evicted = cache.sweep_expired(RETENTION).await.expect("sweep");

    assert_eq!(evicted, 5);
    assert_eq!(store.len(), 1);
    assert!(store.get("keep.js").await.expect("get").is_some());
}

#[tokio::test]
async fn sweep_is_idempotent() {
    let store = Arc::new(MemoryStore::new());
    let origin = Arc::new(CannedOrigin::new(StatusCode::OK, None, b""));
    let cache = cache_over(store.clone(), origin);

    store
        .put("stale.png", aged_object("old", time::Duration::days(30)))
        .await
        .expect("put");

    assert_eq!(cache.sweep_expired(RETENTION).await.expect("sweep"), 1);
    assert_eq!(cache.sweep_expired(RETENTION).await.expect("sweep"), 0);
}

#[tokio::test]
async fn keys_derive_deterministically_from_paths() {
    let store = Arc::new(MemoryStore::new());
    let origin = Arc::new(CannedOrigin::new(
        StatusCode::OK,
        Some("text/css"),
        b"body{}",
    ));
    let cache = cache_over(store.clone(), origin);

    cache
        .fetch_and_store("/styles/site.css", origin_url("/styles/site.css"))
        .await
        .expect("fetch");

    assert_eq!(cache_key("/styles/site.css"), "styles/site.css");
    assert!(
        store
            .get("styles/site.css")
            .await
            .expect("get")
            .is_some()
    );
}
