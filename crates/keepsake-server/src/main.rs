//! keepsake-server binary.
//!
//! Reads `config.toml` (or the path given with `--config`), opens the SQLite
//! store and the attachment directory, serves the JSON API over HTTP and
//! polls scheduled capsules in the background until Ctrl-C.

mod config;

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use clap::Parser;
use keepsake_api::{AppState, api_router};
use keepsake_store_sqlite::{FsAttachmentStore, SqliteStore};
use tokio::{net::TcpListener, sync::watch};
use tower_http::trace::TraceLayer;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::config::{ServerConfig, expand_tilde};

#[derive(Parser)]
#[command(author, version, about = "Keepsake memory and group server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let server_cfg = ServerConfig::load(&cli.config)?;

  let store_path = expand_tilde(&server_cfg.store_path);
  if let Some(parent) = store_path.parent() {
    tokio::fs::create_dir_all(parent)
      .await
      .with_context(|| format!("failed to create {parent:?}"))?;
  }
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  let attachments_dir = expand_tilde(&server_cfg.attachments_dir);
  let attachments = FsAttachmentStore::open(&attachments_dir)
    .await
    .with_context(|| format!("failed to open attachment directory {attachments_dir:?}"))?;

  let limits = server_cfg.limits();
  let state = AppState::new(Arc::new(store), Arc::new(attachments), limits);

  // Background capsule poller, stopped through the watch channel once the
  // HTTP server has drained.
  let (shutdown_tx, shutdown_rx) = watch::channel(false);
  let poller = tokio::spawn(Arc::clone(&state.scheduler).run(
    server_cfg.poll_interval(),
    limits.call_options(),
    shutdown_rx,
  ));

  let app = api_router(state).layer(TraceLayer::new_for_http());
  let address = server_cfg.address();

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

  shutdown_tx.send_replace(true);
  poller.await.context("capsule poller panicked")?;
  Ok(())
}

async fn shutdown_signal() {
  if let Err(error) = tokio::signal::ctrl_c().await {
    tracing::error!(%error, "cannot listen for Ctrl-C; running until killed");
    std::future::pending::<()>().await;
  }
  tracing::info!("shutdown requested");
}
