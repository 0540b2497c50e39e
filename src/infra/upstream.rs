//! Outbound HTTP: the origin-fetch seam and its reqwest adapter.

use async_trait::async_trait;
use axum::http::{Method, StatusCode};
use bytes::Bytes;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Header pair forwarded on every origin fetch, matching what the mirror
/// itself emits.
const FORWARDED_HEADERS: [(&str, &str); 2] = [
    ("Access-Control-Allow-Origin", "*"),
    ("Access-Control-Allow-Methods", "GET,HEAD,POST,OPTIONS"),
];

/// A request to an upstream origin.
#[derive(Debug, Clone)]
pub struct OriginRequest {
    pub method: Method,
    pub url: Url,
    pub body: Option<Bytes>,
}

impl OriginRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            body: None,
        }
    }
}

/// A fully-buffered upstream response.
#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

impl FetchedResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("origin request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// The outbound fetch seam. Handlers and the cache depend on this trait so
/// tests can substitute a stub origin.
#[async_trait]
pub trait OriginFetcher: Send + Sync {
    async fn fetch(&self, request: OriginRequest) -> Result<FetchedResponse, FetchError>;
}

/// reqwest-backed fetcher used in production.
#[derive(Debug, Clone)]
pub struct HttpOriginFetcher {
    client: reqwest::Client,
}

impl HttpOriginFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl OriginFetcher for HttpOriginFetcher {
    async fn fetch(&self, request: OriginRequest) -> Result<FetchedResponse, FetchError> {
        metrics::counter!("specchio_origin_fetch_total").increment(1);

        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .unwrap_or(reqwest::Method::GET);
        let mut builder = self.client.request(method, request.url.clone());
        for (name, value) in FORWARDED_HEADERS {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = StatusCode::from_u16(response.status().as_u16())
            .unwrap_or(StatusCode::BAD_GATEWAY);
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(ToOwned::to_owned);
        let bytes = response.bytes().await?;

        debug!(
            target = "specchio::upstream",
            url = %request.url,
            status = status.as_u16(),
            bytes = bytes.len(),
            "origin fetch completed"
        );

        Ok(FetchedResponse {
            status,
            content_type,
            bytes,
        })
    }
}
