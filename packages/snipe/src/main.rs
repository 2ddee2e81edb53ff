use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use snipe::config::{FileConfig, SnipeConfig, load_config};
use snipe::{AppState, LineReader};

#[derive(Parser)]
#[command(name = "snipe")]
#[command(about = "Relay lines typed on stdin to a browser tab over a WebSocket")]
struct Args {
    /// Address to listen on, e.g. ":9090" or "127.0.0.1:8080"
    #[arg(short, long)]
    addr: Option<String>,

    /// Path to the config file
    #[arg(short, long, default_value = "snipe.toml")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr; stdout carries the prompt
    let default_directive = if args.debug {
        "snipe=debug,tower_http=debug,info"
    } else {
        "snipe=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    let mut file_config: FileConfig = load_config(&args.config)
        .extract()
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;
    if let Some(addr) = args.addr {
        file_config.server.addr = addr;
    }
    let config = SnipeConfig::from_file(&file_config).context("Invalid configuration")?;

    let listener = snipe::bind(config.bind_addr).await?;
    info!(
        window_secs = config.liveness.window.as_secs(),
        "waiting for a browser on http://{}",
        listener.local_addr().unwrap_or(config.bind_addr)
    );

    let source = LineReader::stdio(config.relay.prompt.clone());
    let state = AppState::new(config, source);

    match snipe::serve(listener, state).await.context("Server error")? {
        Some(ended) => info!(
            session_id = %ended.session_id,
            reason = ended.reason.error_code(),
            "session ended: {}",
            ended.reason
        ),
        None => info!("server stopped without a session"),
    }

    Ok(())
}
