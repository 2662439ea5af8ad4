mod loader;

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use url::Url;

pub use loader::load_config;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub target_directory: TargetDirectoryConfig,
}

/// Proxy listener configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Largest request or response body buffered by the proxy
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    28776
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl ServerConfig {
    pub fn listen_address(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| ConfigError::Validation(format!("invalid listen address: {e}")))
    }
}

/// Upstream Cinder API configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Backend address, either a full URL or a bare `host:port`
    #[serde(default = "default_backend_url")]
    pub url: String,
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

fn default_backend_url() -> String {
    "localhost:8776".to_string()
}

fn default_timeout() -> u64 {
    60
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: default_backend_url(),
            timeout_seconds: default_timeout(),
        }
    }
}

impl BackendConfig {
    /// Parse the backend address, defaulting to `http://` when no scheme is given
    pub fn parsed_url(&self) -> Result<Url, ConfigError> {
        let raw = self.url.trim();
        let with_scheme = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("http://{raw}")
        };

        let url = Url::parse(&with_scheme)
            .map_err(|e| ConfigError::Validation(format!("invalid backend url {raw:?}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Validation(format!(
                "unsupported backend scheme {:?}",
                url.scheme()
            )));
        }
        if url.host_str().map(str::is_empty).unwrap_or(true) {
            return Err(ConfigError::Validation(format!(
                "backend url {raw:?} has no host"
            )));
        }
        Ok(url)
    }

    /// Returns the base URL with trailing slash stripped
    pub fn base_url(&self) -> Result<String, ConfigError> {
        Ok(self.parsed_url()?.as_str().trim_end_matches('/').to_string())
    }
}

/// External target daemon query configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TargetDirectoryConfig {
    #[serde(default = "default_program")]
    pub program: String,
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    #[serde(default = "default_lookup_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

fn default_program() -> String {
    "tgtadm".to_string()
}

fn default_args() -> Vec<String> {
    ["--mode", "target", "--op", "show"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_lookup_timeout() -> u64 {
    10
}

fn default_max_concurrent() -> usize {
    4
}

impl Default for TargetDirectoryConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
            timeout_seconds: default_lookup_timeout(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        load_config(path)
    }

    /// Load configuration, falling back to built-in defaults
    ///
    /// An explicit path must exist. Without one, the default locations are
    /// tried and defaults are used when none of them exists.
    pub fn load_or_default(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        match config_path {
            Some(path) => Self::from_file(path),
            None => {
                let default_paths = ["config.yaml", "config.yml", "./config/config.yaml"];
                for p in default_paths {
                    let path = Path::new(p);
                    if path.exists() {
                        return Self::from_file(path);
                    }
                }
                Ok(Self::default())
            }
        }
    }

    /// Check values that would otherwise only fail at startup
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.backend.parsed_url()?;
        self.server.listen_address()?;

        if self.backend.timeout_seconds == 0 {
            return Err(ConfigError::Validation(
                "backend.timeout_seconds must be at least 1".to_string(),
            ));
        }
        if self.target_directory.program.trim().is_empty() {
            return Err(ConfigError::Validation(
                "target_directory.program must not be empty".to_string(),
            ));
        }
        if self.target_directory.timeout_seconds == 0 {
            return Err(ConfigError::Validation(
                "target_directory.timeout_seconds must be at least 1".to_string(),
            ));
        }
        if self.target_directory.max_concurrent == 0 {
            return Err(ConfigError::Validation(
                "target_directory.max_concurrent must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}
