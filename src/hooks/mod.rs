//! Post-response hooks run by the reverse proxy
//!
//! A hook sees the upstream response after it has been buffered and before it
//! is written to the caller. Hooks are grouped into an immutable [`HookChain`];
//! JSON-flavored hooks are wrapped by [`JsonBodyAdapter`], which takes care of
//! decompression, decoding and `Content-Length` framing.

mod chain;
mod encoding;
mod json;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use std::fmt::Debug;

use crate::json::{JsonDocument, PathError};
use crate::target::LookupError;

pub use chain::HookChain;
pub use encoding::normalize_content_encoding;
pub use json::{JsonBodyAdapter, JsonStage};

/// Upstream response as seen by hooks
#[derive(Debug, Clone)]
pub struct ProxiedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Largest body a hook may expand this response to
    pub body_limit: usize,
}

impl ProxiedResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
            body_limit: usize::MAX,
        }
    }

    pub fn with_body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }

    /// Replace the body and set `Content-Length` to match it
    pub fn replace_body(&mut self, body: impl Into<Bytes>) {
        let body = body.into();
        self.headers
            .insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
        self.body = body;
    }

    /// Header value as a string, if present and valid ASCII
    pub fn header_str(&self, name: header::HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

impl IntoResponse for ProxiedResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("failed to decompress gzip body: {0}")]
    Decompress(#[source] std::io::Error),

    #[error("decompressed body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("failed to decode JSON body: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("failed to encode JSON body: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("upstream response violates the expected contract: {0}")]
    Contract(#[source] PathError),

    #[error(transparent)]
    Path(#[from] PathError),

    #[error(transparent)]
    Lookup(#[from] LookupError),
}

/// What happens to the response when a stage fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Stop the chain and do not deliver the response
    AbortChain,
    /// Log, skip the rest of this hook, and forward the body as it stands
    ForwardUnmodified,
}

/// A step inside a hook with a declared failure policy
pub trait Stage: Debug + Copy {
    fn policy(&self) -> FailurePolicy;
}

/// Apply `stage`'s failure policy to `result`
///
/// `Ok(Some(v))` on success, `Ok(None)` when the failure is tolerated and the
/// hook should stop without further changes, `Err` when the chain must abort.
pub fn settle<S: Stage, T>(stage: S, result: Result<T, HookError>) -> Result<Option<T>, HookError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) => match stage.policy() {
            FailurePolicy::AbortChain => Err(e),
            FailurePolicy::ForwardUnmodified => {
                tracing::warn!(stage = ?stage, error = %e, "Hook stage failed, continuing without it");
                Ok(None)
            }
        },
    }
}

/// A transform applied to a proxied response
#[async_trait]
pub trait ResponseHook: Send + Sync {
    /// Unique identifier for the hook
    fn name(&self) -> &str;

    /// Human-readable description
    fn description(&self) -> &str;

    async fn apply(&self, response: &mut ProxiedResponse) -> Result<(), HookError>;
}

/// A transform applied to the decoded JSON body of a proxied response
///
/// Register through [`HookChain::register_json`]; the adapter re-encodes the
/// document after `apply` returns.
#[async_trait]
pub trait JsonHook: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    async fn apply(
        &self,
        response: &mut ProxiedResponse,
        document: &mut JsonDocument,
    ) -> Result<(), HookError>;
}
