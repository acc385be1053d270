use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use backend_lib::{config::Settings, logging, ws_router, AppState};
use clap::Parser;
use tokio::net::TcpListener;

const SESSION_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Realtime collaborative whiteboard server
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Config file (TOML or JSON); defaults to ./whiteboard.toml when present
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Directory for the flat-file store
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn settings(self) -> anyhow::Result<Settings> {
        let mut settings = match &self.config {
            Some(path) => Settings::load_from(path)?,
            None => Settings::load()?,
        };
        if let Some(bind) = self.bind {
            settings.bind_addr = bind;
        }
        if let Some(data_dir) = self.data_dir {
            settings.data_dir = data_dir;
        }
        if let Some(level) = self.log_level {
            settings.log_level = level;
        }
        settings.validate()?;
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Cli::parse().settings()?;
    logging::init(&settings)?;

    let addr = settings.bind_addr;
    let state = AppState::from_settings(settings)?;
    let app = ws_router::create_router(state.clone());

    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server listening");

    let signalled = state.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            signalled.request_shutdown();
        })
        .await?;

    // WebSocket sessions close on their own tasks; give them time to leave
    // their rooms so the flush below covers their last writes.
    let drained = tokio::time::timeout(SESSION_DRAIN_TIMEOUT, async {
        while state.registry.room_count() > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    if drained.is_err() {
        tracing::warn!(
            rooms = state.registry.room_count(),
            "sessions still open at shutdown"
        );
    }

    state.registry.flush_all().await;
    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
