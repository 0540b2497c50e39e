//! The per-request dispatcher: classify, serve from cache or resolve and
//! fetch, transform, respond.

use std::sync::Arc;

use axum::http::{Method, StatusCode};
use bytes::Bytes;

use crate::{
    application::{
        cache::ObjectCache,
        error::ProxyError,
        transform,
    },
    domain::{
        origin::OriginResolver,
        rewrite::RuleSet,
        routes::{self, SESSION_PROBE_PATH},
    },
    infra::upstream::{FetchedResponse, OriginFetcher, OriginRequest},
};

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// The response handed back to the HTTP layer.
#[derive(Debug, Clone)]
pub struct ProxyResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: Bytes,
}

pub struct MirrorService {
    origin: OriginResolver,
    rules: RuleSet,
    fetcher: Arc<dyn OriginFetcher>,
    cache: Arc<ObjectCache>,
}

impl MirrorService {
    pub fn new(
        origin: OriginResolver,
        rules: RuleSet,
        fetcher: Arc<dyn OriginFetcher>,
        cache: Arc<ObjectCache>,
    ) -> Self {
        Self {
            origin,
            rules,
            fetcher,
            cache,
        }
    }

    /// Handle one mirrored request.
    ///
    /// State walk per request: classified (reject early), then either the
    /// static-resource cache path or the general proxy path; every branch
    /// ends in exactly one response.
    pub async fn handle(
        &self,
        method: &Method,
        path: &str,
        referer: Option<&str>,
        body: Bytes,
    ) -> Result<ProxyResponse, ProxyError> {
        if !routes::is_allowed(path, method) {
            return Err(ProxyError::NotAllowed);
        }

        if path == SESSION_PROBE_PATH {
            return Ok(session_probe_response());
        }

        if routes::is_static_resource(path) {
            return self.serve_static(path, referer).await;
        }

        self.proxy_through(method, path, referer, body).await
    }

    /// Static resources: cache first, then fetch-and-store on a miss.
    async fn serve_static(
        &self,
        path: &str,
        referer: Option<&str>,
    ) -> Result<ProxyResponse, ProxyError> {
        if let Some(object) = self.cache.try_serve(path).await {
            let content_type = if object.content_type.is_empty() {
                content_type_for_path(path)
            } else {
                object.content_type.clone()
            };
            let body =
                transform::transform(&object.bytes, Some(content_type.as_str()), &self.rules)?;
            return Ok(ProxyResponse {
                status: StatusCode::OK,
                content_type: Some(content_type),
                body: body.into_bytes(),
            });
        }

        let origin_url = self
            .origin
            .resolve(path, referer)
            .ok_or(ProxyError::OriginDenied)?;
        let fetched = self.cache.fetch_and_store(path, origin_url).await?;
        self.respond_from_origin(fetched)
    }

    /// General proxying for allowed, non-static paths.
    async fn proxy_through(
        &self,
        method: &Method,
        path: &str,
        referer: Option<&str>,
        body: Bytes,
    ) -> Result<ProxyResponse, ProxyError> {
        let origin_url = self
            .origin
            .resolve(path, referer)
            .ok_or(ProxyError::OriginDenied)?;

        let request = OriginRequest {
            method: method.clone(),
            url: origin_url,
            body: (!body.is_empty()).then_some(body),
        };
        let fetched = self.fetcher.fetch(request).await?;
        self.respond_from_origin(fetched)
    }

    /// Unsuccessful origin responses pass through unmodified; successful
    /// ones are transformed per their declared content type, with the origin
    /// content type propagated.
    fn respond_from_origin(
        &self,
        fetched: FetchedResponse,
    ) -> Result<ProxyResponse, ProxyError> {
        if !fetched.is_success() {
            return Ok(ProxyResponse {
                status: fetched.status,
                content_type: fetched.content_type,
                body: fetched.bytes,
            });
        }

        let transformed =
            transform::transform(&fetched.bytes, fetched.content_type.as_deref(), &self.rules)?;
        Ok(ProxyResponse {
            status: fetched.status,
            content_type: fetched.content_type,
            body: transformed.into_bytes(),
        })
    }
}

fn content_type_for_path(path: &str) -> String {
    mime_guess::from_path(path)
        .first_raw()
        .unwrap_or(FALLBACK_CONTENT_TYPE)
        .to_string()
}

/// The upstream session endpoint is answered locally: the mirror has no
/// session, and relaying the probe would hand visitor traffic to the
/// upstream auth service.
fn session_probe_response() -> ProxyResponse {
    let body = serde_json::json!({
        "status": 401,
        "code": "UNKNOWN_ERROR",
        "message": "Unauthorized",
    });
    ProxyResponse {
        status: StatusCode::UNAUTHORIZED,
        content_type: Some("application/json".to_string()),
        body: Bytes::from(body.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_fallback_uses_the_extension() {
        assert!(content_type_for_path("/favicon.ico").starts_with("image/"));
        assert_eq!(content_type_for_path("/avatar.png"), "image/png");
        assert_eq!(content_type_for_path("/weird"), FALLBACK_CONTENT_TYPE);
    }

    #[test]
    fn session_probe_is_a_fixed_401() {
        let response = session_probe_response();
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        let body: serde_json::Value =
            serde_json::from_slice(&response.body).expect("json body");
        assert_eq!(body["code"], "UNKNOWN_ERROR");
        assert_eq!(body["status"], 401);
    }
}
