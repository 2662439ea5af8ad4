//! iscsi-local-proxy: HTTP reverse proxy for the Cinder API
//!
//! Sits in front of cinder-api on a storage node and provides:
//! - Transparent pass-through of every Cinder API call
//! - Attachment responses rewritten from iSCSI to local block devices

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;

use iscsi_local_proxy::{
    config::AppConfig,
    hooks::HookChain,
    proxy::server::ATTACHMENT_ROUTE,
    rewrite::attachment_chain,
    run_server,
    target::{TargetDirectory, TgtadmDirectory},
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

#[derive(Parser)]
#[command(name = "iscsi-local-proxy")]
#[command(version = "0.1.0")]
#[command(about = "HTTP reverse proxy for the Cinder API that attaches iSCSI volumes locally")]
#[command(long_about = "
iscsi-local-proxy runs next to cinder-api on a node that also hosts the iSCSI
target daemon. Every request is forwarded to Cinder unchanged, except that
attachment updates are rewritten so the consumer opens the volume's backing
store directly instead of logging into the target.

Example usage:
  iscsi-local-proxy --backend cinder-api:8776
  iscsi-local-proxy run --config config.yaml --port 28776
  iscsi-local-proxy lookup 8a3d0c7e-1111-4c1a-9d1b-6b7a7c0f0001
")]
struct Cli {
    /// Path to config file (defaults to ./config.yaml when present)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Set logging level (trace, debug, info, warn, error)
    #[arg(long, global = true, value_name = "LEVEL")]
    log_level: Option<LogLevel>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Override backend address (e.g., "cinder-api:8776" or "https://cinder.example.com:8776")
    #[arg(short, long, global = true, value_name = "ADDR")]
    backend: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the proxy server (default)
    Run {
        /// Override listen port
        #[arg(short, long)]
        port: Option<u16>,
        /// Override listen host
        #[arg(long)]
        host: Option<String>,
    },

    /// Validate configuration and print the effective settings
    CheckConfig,

    /// List the hooks applied to attachment responses
    ListHooks,

    /// Query the target daemon for a volume's backing store
    Lookup {
        /// Cinder volume id
        volume_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.log_level, cli.log_json);

    let config = load_config(cli.config, cli.backend)?;

    match cli.command.unwrap_or(Commands::Run {
        port: None,
        host: None,
    }) {
        Commands::Run { port, host } => {
            run_proxy(config, port, host).await?;
        }
        Commands::CheckConfig => {
            check_config(&config)?;
        }
        Commands::ListHooks => {
            list_hooks(&config);
        }
        Commands::Lookup { volume_id } => {
            lookup(&config, &volume_id).await?;
        }
    }

    Ok(())
}

fn init_tracing(level: Option<LogLevel>, json: bool) {
    let filter = match level {
        Some(level) => tracing_subscriber::EnvFilter::new(level.to_string()),
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Load the config file (if any) and apply the global CLI overrides
fn load_config(path: Option<PathBuf>, backend: Option<String>) -> anyhow::Result<AppConfig> {
    let mut config = AppConfig::load_or_default(path.as_deref())
        .with_context(|| match &path {
            Some(p) => format!("loading configuration from {}", p.display()),
            None => "loading default configuration".to_string(),
        })?;

    match &path {
        Some(p) => tracing::debug!("Loaded configuration from {:?}", p),
        None => tracing::debug!("No --config given, using defaults or ./config.yaml"),
    }

    if let Some(url) = backend {
        config.backend.url = url;
    }
    Ok(config)
}

/// Run the proxy server
async fn run_proxy(
    mut config: AppConfig,
    port_override: Option<u16>,
    host_override: Option<String>,
) -> anyhow::Result<()> {
    if let Some(port) = port_override {
        config.server.port = port;
    }
    if let Some(host) = host_override {
        config.server.host = host;
    }
    config.validate().context("invalid configuration")?;

    let directory = Arc::new(TgtadmDirectory::from_config(&config.target_directory));
    tracing::info!(
        program = %config.target_directory.program,
        args = ?config.target_directory.args,
        timeout_seconds = config.target_directory.timeout_seconds,
        max_concurrent = config.target_directory.max_concurrent,
        "Target directory configured"
    );

    run_server(config, directory).await?;

    Ok(())
}

/// Validate configuration and print it
fn check_config(config: &AppConfig) -> anyhow::Result<()> {
    if let Err(e) = config.validate() {
        eprintln!("✗ Configuration error: {}", e);
        std::process::exit(1);
    }

    println!("✓ Configuration is valid\n");
    println!("Server:");
    println!("  Listen: {}", config.server.listen_address()?);
    println!("  Max body: {} bytes", config.server.max_body_bytes);
    println!("\nBackend:");
    println!("  URL: {}", config.backend.base_url()?);
    println!("  Timeout: {}s", config.backend.timeout_seconds);
    println!("\nTarget directory:");
    println!(
        "  Command: {} {}",
        config.target_directory.program,
        config.target_directory.args.join(" ")
    );
    println!("  Timeout: {}s", config.target_directory.timeout_seconds);
    println!("  Max concurrent: {}", config.target_directory.max_concurrent);
    Ok(())
}

/// List the hooks registered on the attachment route
fn list_hooks(config: &AppConfig) {
    let directory = Arc::new(TgtadmDirectory::from_config(&config.target_directory));
    let chain = attachment_chain(&HookChain::new(), directory);

    println!("Hooks on PUT {} (in order):\n", ATTACHMENT_ROUTE);
    for (i, hook) in chain.hooks().iter().enumerate() {
        println!("  {}. {:30} - {}", i + 1, hook.name(), hook.description());
    }
    println!("\nAll other routes are passed through unmodified.");
}

/// Look up a single volume through the target daemon
async fn lookup(config: &AppConfig, volume_id: &str) -> anyhow::Result<()> {
    let directory = TgtadmDirectory::from_config(&config.target_directory);

    let path = directory
        .lookup_backing_path(volume_id)
        .await
        .with_context(|| format!("querying {} for volume {}", directory.name(), volume_id))?;

    match path {
        Some(path) => {
            println!("{}", path);
            Ok(())
        }
        None => {
            eprintln!("✗ No backing store found for volume {}", volume_id);
            std::process::exit(1);
        }
    }
}
