//! HTTP proxy server

mod handler;
pub mod server;

pub use handler::{ReverseProxy, X_FORWARDED_FOR, X_REQUEST_ID};
pub use server::{build_router, run_server, ProxyState, ServerError};
