//! Chatproxy: streaming chat-completion proxy

use chatproxy_core::{BindMode, ProxyConfig};
use chatproxy_gateway::start_gateway;
use clap::Parser;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(
    name = "chatproxy",
    version,
    about = "Streaming chat-completion proxy with token-budgeted context selection"
)]
struct Cli {
    /// TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[arg(short, long)]
    port: Option<u16>,
    /// `lan` or `loopback`
    #[arg(short, long)]
    bind: Option<String>,
    /// Chat completions endpoint to forward to
    #[arg(long)]
    upstream_url: Option<String>,
    /// Value sent in Access-Control-Allow-Origin
    #[arg(long)]
    allowed_origin: Option<String>,
    /// Serve without CORS headers or preflight handling
    #[arg(long)]
    no_cors: bool,
    /// Prompt used when a request carries none
    #[arg(long)]
    system_prompt: Option<String>,
    /// Also write logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn init_tracing(log_file: Option<&PathBuf>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "chatproxy=info,tower_http=info".into());

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."));
            let name = path
                .file_name()
                .map(|n| n.to_os_string())
                .unwrap_or_else(|| "chatproxy.log".into());
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
    guard
}

fn resolve_config(cli: &Cli) -> anyhow::Result<ProxyConfig> {
    let mut config = match &cli.config {
        Some(path) => ProxyConfig::load(path),
        None => ProxyConfig::default(),
    };
    config.apply_env();

    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(bind) = &cli.bind {
        config.server.bind = BindMode::parse(bind);
    }
    if let Some(url) = &cli.upstream_url {
        config.completion.upstream_url = url.clone();
    }
    if let Some(origin) = &cli.allowed_origin {
        config.cors.allowed_origin = origin.clone();
    }
    if cli.no_cors {
        config.cors.enabled = false;
    }
    if let Some(prompt) = &cli.system_prompt {
        config.completion.default_system_prompt = prompt.clone();
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.log_file.as_ref());

    let config = resolve_config(&cli)?;
    start_gateway(config).await
}
