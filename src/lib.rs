//! iscsi-local-proxy: HTTP reverse proxy for the Cinder block storage API
//!
//! Features:
//! - Transparent pass-through of every Cinder API call
//! - Attachment updates rewritten from iSCSI to local block devices
//! - Backing store lookup through the local target daemon (`tgtadm`)

pub mod config;
pub mod hooks;
pub mod json;
pub mod proxy;
pub mod rewrite;
pub mod target;

pub use config::AppConfig;
pub use hooks::HookChain;
pub use proxy::run_server;
