//! runtail - live Cloud Run log viewer backend.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use runtail_server::{Cli, RuntailServer};
use runtail_source::{CloudLoggingConfig, CloudLoggingSource, Credentials, TokenProvider};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine
    let dotenv = dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.log_json);
    if let Some(path) = dotenv {
        info!(path = %path.display(), "loaded environment file");
    }

    let config = cli.into_config()?;
    let bind_addr = config.bind_addr;

    let credentials = Credentials::from_key_path(config.key_path.as_deref())
        .context("loading credentials")?;
    info!(credentials = credentials.kind(), project = %config.project_id, "starting runtail");

    let http = reqwest::Client::builder()
        .user_agent(concat!("runtail/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("building http client")?;
    let tokens = Arc::new(TokenProvider::new(credentials, http.clone()));
    let source = CloudLoggingSource::new(
        CloudLoggingConfig::new(config.project_id.clone()).with_poll_interval(config.poll_interval),
        http,
        tokens,
    );

    let server = RuntailServer::new(config, Arc::new(source))?;
    info!("  WebSocket endpoint: ws://{}/ws", bind_addr);
    info!("  SSE endpoint:       http://{}/logs", bind_addr);

    server.serve_with_shutdown(bind_addr, shutdown_signal()).await?;
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received");
}
