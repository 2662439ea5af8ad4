//! Request forwarding and response hook dispatch

use axum::{
    body::{to_bytes, Body},
    http::{header, HeaderMap, HeaderName, Request, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use tracing::Instrument;
use uuid::Uuid;

use crate::hooks::{HookChain, ProxiedResponse};

pub const X_REQUEST_ID: &str = "x-request-id";
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Single-backend reverse proxy with a post-response hook chain
///
/// Responses are streamed straight through when the chain is empty and
/// buffered for the hooks otherwise.
#[derive(Clone)]
pub struct ReverseProxy {
    client: reqwest::Client,
    backend_url: String,
    max_body_bytes: usize,
    chain: HookChain,
}

impl ReverseProxy {
    pub fn new(client: reqwest::Client, backend_url: impl Into<String>, max_body_bytes: usize) -> Self {
        Self {
            client,
            backend_url: backend_url.into(),
            max_body_bytes,
            chain: HookChain::new(),
        }
    }

    /// Same backend and client, different hooks
    pub fn with_chain(&self, chain: HookChain) -> Self {
        Self {
            chain,
            ..self.clone()
        }
    }

    pub fn chain(&self) -> &HookChain {
        &self.chain
    }

    pub fn backend_url(&self) -> &str {
        &self.backend_url
    }

    /// Forward `req` upstream and run the hook chain on the response
    pub async fn handle(&self, req: Request<Body>, client_addr: Option<SocketAddr>) -> Response {
        let request_id = req
            .headers()
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let span = tracing::info_span!(
            "proxy_request",
            request_id = %request_id,
            method = %req.method(),
            path = %req.uri().path(),
        );

        self.forward(req, client_addr, request_id)
            .instrument(span)
            .await
    }

    async fn forward(
        &self,
        req: Request<Body>,
        client_addr: Option<SocketAddr>,
        request_id: String,
    ) -> Response {
        let (parts, body) = req.into_parts();

        let body_bytes = match to_bytes(body, self.max_body_bytes).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read request body");
                return (
                    StatusCode::BAD_REQUEST,
                    format!("Failed to read request body: {}", e),
                )
                    .into_response();
            }
        };

        let backend_url = upstream_url(&self.backend_url, &parts.uri);
        tracing::debug!(
            backend_url = %backend_url,
            hooks = self.chain.len(),
            "Forwarding request"
        );

        let mut backend_req = self.client.request(parts.method.clone(), &backend_url);

        // Copy headers (skip the ones set explicitly or owned by the connection)
        for (name, value) in parts.headers.iter() {
            if name == header::HOST
                || name == header::CONTENT_LENGTH
                || name.as_str() == X_FORWARDED_FOR
                || is_hop_by_hop(name)
            {
                continue;
            }
            backend_req = backend_req.header(name, value);
        }
        if !parts.headers.contains_key(X_REQUEST_ID) {
            backend_req = backend_req.header(X_REQUEST_ID, &request_id);
        }
        if let Some(addr) = client_addr {
            backend_req = backend_req.header(X_FORWARDED_FOR, forwarded_for(&parts.headers, addr));
        }

        let backend_response = match backend_req.body(body_bytes).send().await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::error!(error = %e, "Failed to connect to backend");
                return (
                    StatusCode::BAD_GATEWAY,
                    format!("Failed to connect to backend: {}", e),
                )
                    .into_response();
            }
        };

        let status = backend_response.status();
        let headers = response_headers(backend_response.headers());
        tracing::debug!(
            status = %status,
            headers = ?headers,
            "Received response from backend"
        );

        if self.chain.is_empty() {
            let mut response = Response::new(Body::from_stream(backend_response.bytes_stream()));
            *response.status_mut() = status;
            *response.headers_mut() = headers;
            return response;
        }

        let body = match read_body_limited(backend_response, self.max_body_bytes).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read backend response");
                return (
                    StatusCode::BAD_GATEWAY,
                    format!("Failed to read backend response: {}", e),
                )
                    .into_response();
            }
        };

        let mut proxied =
            ProxiedResponse::new(status, headers, body).with_body_limit(self.max_body_bytes);
        if let Err(e) = self.chain.dispatch(&mut proxied).await {
            return (
                StatusCode::BAD_GATEWAY,
                format!("Failed to rewrite backend response: {}", e),
            )
                .into_response();
        }
        proxied.into_response()
    }
}

#[derive(Debug, thiserror::Error)]
enum BodyReadError {
    #[error("response body exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

/// Buffer an upstream body, refusing anything larger than `limit`
async fn read_body_limited(
    mut response: reqwest::Response,
    limit: usize,
) -> Result<Bytes, BodyReadError> {
    if response
        .content_length()
        .is_some_and(|len| len > limit as u64)
    {
        return Err(BodyReadError::TooLarge { limit });
    }

    let mut body = BytesMut::new();
    while let Some(chunk) = response.chunk().await? {
        if body.len() + chunk.len() > limit {
            return Err(BodyReadError::TooLarge { limit });
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body.freeze())
}

/// Backend URL for `uri`, keeping the query string as-is
fn upstream_url(base: &str, uri: &Uri) -> String {
    match uri.query() {
        Some(q) => format!("{}{}?{}", base, uri.path(), q),
        None => format!("{}{}", base, uri.path()),
    }
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "proxy-connection"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// `X-Forwarded-For` value with the client appended to any earlier hops
fn forwarded_for(headers: &HeaderMap, client: SocketAddr) -> String {
    let client_ip = client.ip().to_string();
    let prior: Vec<&str> = headers
        .get_all(X_FORWARDED_FOR)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    if prior.is_empty() {
        client_ip
    } else {
        format!("{}, {}", prior.join(", "), client_ip)
    }
}

fn response_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(upstream.len());
    for (name, value) in upstream {
        if !is_hop_by_hop(name) {
            headers.append(name.clone(), value.clone());
        }
    }
    headers
}
