use std::sync::Arc;

use axum::{
    Router,
    extract::{Request, State},
    http::{
        HeaderValue, StatusCode,
        header::{CONTENT_TYPE, REFERER},
    },
    middleware as axum_middleware,
    response::{IntoResponse, Response},
    routing::post,
};
use tracing::{error, info};

use crate::{
    application::{
        cache::ObjectCache,
        error::{ErrorReport, ProxyError},
        proxy::{MirrorService, ProxyResponse},
    },
    domain::routes::CLEANUP_PATH,
};

use super::middleware::{inject_cors_headers, log_responses, set_request_context};

/// Upstream pages are small; anything beyond this on an inbound body is not
/// a request this mirror serves.
const BODY_LIMIT_BYTES: usize = 2 * 1024 * 1024;

const CLEANUP_COMPLETED_BODY: &str = "Cleanup completed";

#[derive(Clone)]
pub struct ProxyState {
    pub mirror: Arc<MirrorService>,
    pub cache: Arc<ObjectCache>,
}

pub fn build_router(state: ProxyState) -> Router {
    Router::new()
        .route(CLEANUP_PATH, post(trigger_cleanup).fallback(reject))
        .fallback(dispatch)
        .with_state(state)
        .layer(axum_middleware::from_fn(inject_cors_headers))
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}

/// Manual entry point for the eviction sweep. The response is fixed
/// whatever the sweep found; listing failures are logged and the next
/// sweep picks the work back up.
async fn trigger_cleanup(State(state): State<ProxyState>) -> Response {
    const SOURCE: &str = "infra::http::trigger_cleanup";

    let retention = state.cache.retention();
    match state.cache.sweep_expired(retention).await {
        Ok(evicted) => {
            info!(target = SOURCE, evicted, "manual cleanup completed");
        }
        Err(err) => {
            error!(target = SOURCE, error = %err, "manual cleanup failed");
        }
    }
    (StatusCode::OK, CLEANUP_COMPLETED_BODY).into_response()
}

/// Non-POST requests to the cleanup path fall under the same policy as any
/// other disallowed pair.
async fn reject() -> Response {
    ProxyError::NotAllowed.into_response()
}

/// Everything except the cleanup trigger flows through here.
async fn dispatch(State(state): State<ProxyState>, request: Request) -> Response {
    const SOURCE: &str = "infra::http::dispatch";

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let referer = request
        .headers()
        .get(REFERER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    let body = match axum::body::to_bytes(request.into_body(), BODY_LIMIT_BYTES).await {
        Ok(body) => body,
        Err(err) => {
            let mut response =
                (StatusCode::BAD_REQUEST, "Request could not be processed").into_response();
            ErrorReport::from_message(SOURCE, StatusCode::BAD_REQUEST, err.to_string())
                .attach(&mut response);
            return response;
        }
    };

    match state
        .mirror
        .handle(&method, &path, referer.as_deref(), body)
        .await
    {
        Ok(proxied) => into_http_response(proxied),
        Err(err) => err.into_response(),
    }
}

fn into_http_response(proxied: ProxyResponse) -> Response {
    let ProxyResponse {
        status,
        content_type,
        body,
    } = proxied;

    let mut response = (status, body).into_response();
    match content_type.and_then(|value| HeaderValue::from_str(&value).ok()) {
        Some(value) => {
            response.headers_mut().insert(CONTENT_TYPE, value);
        }
        None => {
            // The origin declared nothing; do not invent a type.
            response.headers_mut().remove(CONTENT_TYPE);
        }
    }
    response
}
