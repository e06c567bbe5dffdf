//! Server entry point.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use fdc3_broker::BrokerConfig;
use fdc3_broker::collaborators::Transport;
use fdc3_server::directory::InMemoryDirectory;
use fdc3_server::launcher::RecordingLauncher;
use fdc3_server::resolver::{HeadlessResolver, ResolvePolicy};
use fdc3_server::sessions::SessionRegistry;
use fdc3_server::transport::WsTransport;
use fdc3_server::{AppState, build_router};

/// FDC3 interop broker server.
#[derive(Debug, Parser)]
#[command(name = "fdc3-server", version, about)]
struct Args {
    /// Settings file (defaults to ~/.fdc3/settings.json).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Override the WebSocket port from settings.
    #[arg(long)]
    port: Option<u16>,

    /// Auto-resolve ambiguous intents to the first candidate instead of
    /// cancelling (demo/testing aid; a shell normally supplies the
    /// resolver UI).
    #[arg(long)]
    auto_resolve_first: bool,

    /// Emit logs as JSON.
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    if let Some(path) = &args.settings {
        fdc3_settings::reload_settings_from_path(path);
    }
    let settings = fdc3_settings::get_settings();
    let port = args.port.unwrap_or(settings.server.ws_port);

    let directory = Arc::new(InMemoryDirectory::new());
    directory.load_sources(&settings.directory.urls);
    info!(apps = directory.len(), "app directory ready");

    let policy = if args.auto_resolve_first {
        ResolvePolicy::First
    } else {
        ResolvePolicy::Cancel
    };
    let transport = Arc::new(WsTransport::new());
    let sessions = Arc::new(SessionRegistry::new(
        BrokerConfig::from(&settings.broker),
        directory,
        Arc::new(HeadlessResolver::new(policy)),
        Arc::new(RecordingLauncher::new()),
        Arc::clone(&transport) as Arc<dyn Transport>,
    ));

    let state = AppState {
        sessions,
        transport,
        metrics: fdc3_server::metrics::install_recorder(),
    };
    let app = build_router(state);

    let addr = format!("{}:{port}", settings.server.bind_addr);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "fdc3 server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    info!("shutdown complete");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
    }
}
