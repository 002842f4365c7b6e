use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;

use blobscope_config::ConfigStore;
use blobscope_logs::{IngestEngine, LogService};
use blobscope_storage::AzureConnector;

mod routes;

/// Blobscope - serve windowed views of NDJSON logs stored in Azure Blob Storage
#[derive(Parser, Debug)]
#[command(name = "blobscope")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding config.toml, its default snapshot and backups
    #[arg(long, default_value = "./config")]
    config_dir: PathBuf,

    /// Legacy KEY=value env file read once when no config exists yet
    #[arg(long, default_value = ".env")]
    env_file: PathBuf,

    /// Address to bind the HTTP server to
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// Port to listen on (overrides the configured port)
    #[arg(long)]
    port: Option<u16>,

    /// Blobs downloaded in parallel during a load
    #[arg(long, default_value = "8")]
    concurrency: usize,

    /// Skip the initial background load
    #[arg(long)]
    no_warmup: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = run(args).await;

    if let Err(e) = &result {
        tracing::error!("{:#}", e);
    }

    result
}

async fn run(args: Args) -> Result<()> {
    let store = Arc::new(ConfigStore::new(&args.config_dir));
    store
        .bootstrap_once(&args.env_file)
        .with_context(|| format!("failed to bootstrap config in {}", args.config_dir.display()))?;
    if store.needs_setup() {
        tracing::warn!(dir = %store.dir().display(), "no configuration yet, waiting for setup");
    }

    let connector = Arc::new(AzureConnector::new().context("failed to build HTTP client")?);
    let engine = IngestEngine::new(connector.clone()).with_concurrency(args.concurrency);
    let service = Arc::new(LogService::with_engine(store.clone(), connector, engine));

    if !args.no_warmup {
        let service = service.clone();
        tokio::spawn(async move { service.warm_up().await });
    }

    let port = args.port.unwrap_or_else(|| store.read().port);
    let addr: SocketAddr = format!("{}:{}", args.bind, port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", args.bind, port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "listening");

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutting down");
        }
        signal.cancel();
    });

    axum::serve(listener, routes::router(service))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("server error")?;

    Ok(())
}
