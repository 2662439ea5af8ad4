//! Route table and server lifecycle

use axum::{
    extract::{ConnectInfo, Path, Request, State},
    response::Response,
    routing::{any, put},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

use super::handler::ReverseProxy;
use crate::config::{AppConfig, ConfigError};
use crate::rewrite::attachment_chain;
use crate::target::TargetDirectory;

pub const HEALTH_ROUTE: &str = "/healthz";
pub const ATTACHMENT_ROUTE: &str = "/v3/:project_id/attachments/:attachment_id";

/// Shared state for the proxy
#[derive(Clone)]
pub struct ProxyState {
    pub config: Arc<AppConfig>,
    /// Everything not intercepted, streamed through untouched
    pub passthrough: ReverseProxy,
    /// Attachment updates, rewritten for local attach
    pub attachments: ReverseProxy,
}

impl ProxyState {
    pub fn new(config: AppConfig, directory: Arc<dyn TargetDirectory>) -> Result<Self, ServerError> {
        let http_client = build_http_client(&config)?;
        let passthrough = ReverseProxy::new(
            http_client,
            config.backend.base_url()?,
            config.server.max_body_bytes,
        );
        let attachments = passthrough.with_chain(attachment_chain(passthrough.chain(), directory));

        Ok(Self {
            config: Arc::new(config),
            passthrough,
            attachments,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Build the backend HTTP client
///
/// Redirects and content decoding are left to the caller.
fn build_http_client(config: &AppConfig) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.backend.timeout_seconds))
        .pool_max_idle_per_host(10)
        .redirect(reqwest::redirect::Policy::none())
        .build()
}

pub fn build_router(state: ProxyState) -> Router {
    Router::new()
        .route(HEALTH_ROUTE, any(health_handler))
        .route(
            ATTACHMENT_ROUTE,
            put(attachment_handler).fallback(passthrough_handler),
        )
        .fallback(passthrough_handler)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the proxy server until SIGINT or SIGTERM
pub async fn run_server(
    config: AppConfig,
    directory: Arc<dyn TargetDirectory>,
) -> Result<(), ServerError> {
    config.validate()?;
    let addr = config.server.listen_address()?;

    let state = ProxyState::new(config, directory)?;
    let backend_url = state.passthrough.backend_url().to_string();
    tracing::info!(
        hooks = ?state.attachments.chain().hook_names(),
        "Attachment hooks registered"
    );

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;

    tracing::info!("iscsi-local-proxy listening on {}", addr);
    tracing::info!("Proxying to {}", backend_url);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(ServerError::Serve)?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received, draining connections");
}

/// Health check endpoint, answered locally
async fn health_handler() -> &'static str {
    "ok"
}

async fn attachment_handler(
    State(state): State<ProxyState>,
    Path((project_id, attachment_id)): Path<(String, String)>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    req: Request,
) -> Response {
    tracing::debug!(
        project_id = %project_id,
        attachment_id = %attachment_id,
        "Intercepting attachment update"
    );
    state
        .attachments
        .handle(req, connect_info.map(|ConnectInfo(addr)| addr))
        .await
}

async fn passthrough_handler(
    State(state): State<ProxyState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    req: Request,
) -> Response {
    state
        .passthrough
        .handle(req, connect_info.map(|ConnectInfo(addr)| addr))
        .await
}
