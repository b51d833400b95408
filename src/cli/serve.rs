use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::install::{InstallSession, Installer, SimulatedInstaller};
use crate::server::{build_install_router, ServeState};

#[derive(Args, Clone, Debug)]
pub struct ServeArgs {
    /// Address to bind (default: server.host from the config)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind (default: server.port from the config)
    #[arg(long)]
    pub port: Option<u16>,

    /// Start the wizard right away instead of on the first page render
    #[arg(long)]
    pub auto_start: bool,
}

pub async fn cmd_serve(args: ServeArgs, mut config: Config) -> Result<()> {
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    let installer: Arc<dyn Installer> = Arc::new(SimulatedInstaller::new(&config.installer));
    let session = Arc::new(
        InstallSession::new(&config, installer).context("failed to build the install flow")?,
    );
    if args.auto_start {
        session.start_now();
    }

    let router = build_install_router().with_state(ServeState::new(Arc::clone(&session)));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind install server on {}", addr))?;
    info!(
        "Install wizard available at {}/install",
        config.server.base_url()
    );

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(?err, "failed to listen for ctrl-c");
            return;
        }
        info!("Shutting down install server");
        signal.cancel();
    });

    let served = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.cancelled_owned())
    .await
    .context("install server exited unexpectedly");

    session.shutdown();
    served
}
