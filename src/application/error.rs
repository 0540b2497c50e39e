use std::error::Error as StdError;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{
    application::transform::TransformError, infra::error::InfraError,
    infra::upstream::FetchError,
};

/// Diagnostic chain attached to error responses as an extension, consumed by
/// the response-logging middleware.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

/// Failure modes of a single proxied request.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The method/path pair is outside the allowlist.
    #[error("path is not allowed")]
    NotAllowed,
    /// A restricted prefix was requested without a trusted referer, or no
    /// upstream mapping exists.
    #[error("origin resolution refused the request")]
    OriginDenied,
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Transform(#[from] TransformError),
}

impl ProxyError {
    fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::NotAllowed | ProxyError::OriginDenied => StatusCode::FORBIDDEN,
            ProxyError::Fetch(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Transform(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn presentation_message(&self) -> &'static str {
        match self {
            ProxyError::NotAllowed => "Forbidden",
            ProxyError::OriginDenied => "Unauthorized access",
            ProxyError::Fetch(_) => "Bad gateway",
            ProxyError::Transform(_) => "Unexpected error occurred",
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.presentation_message();
        let report = ErrorReport::from_error("application::error::ProxyError", status, &self);
        let mut response = (status, message).into_response();
        report.attach(&mut response);
        response
    }
}

/// Top-level application error, surfaced by the binary entry points.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}
