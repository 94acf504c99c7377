mod config;
mod telemetry;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{Level, error, info, warn};

use kubegate_k8s::KubeClient;
use kubegate_server::{Gateway, GatewayServer, HeaderIdentityResolver, IdentityResolver, SHUTDOWN_TIMEOUT};

use crate::config::GatewayConfig;

/// Kubegate - Kubernetes resource tables, logs and an impersonating API proxy
#[derive(Parser, Debug)]
#[command(name = "kubegate")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file; defaults apply when it does not exist
    #[arg(long, short, default_value = "kubegate.toml")]
    config: PathBuf,

    /// Log level, overrides RUST_LOG
    #[arg(long)]
    log_level: Option<Level>,

    /// Address of the query API, overrides `api.listen`
    #[arg(long)]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = GatewayConfig::load(&args.config)?;
    let _telemetry = telemetry::init(&config.telemetry, args.log_level)?;

    let result = run(args, config).await;

    if let Err(e) = &result {
        error!(error = ?e, "Kubegate exited with an error");
    }

    result
}

async fn run(args: Args, mut config: GatewayConfig) -> Result<()> {
    if let Some(listen) = args.listen {
        config.api.listen = listen;
    }

    let client = KubeClient::connect(&config.cluster)
        .await
        .context("Failed to connect to the cluster")?;
    let identity: Arc<dyn IdentityResolver> = Arc::new(HeaderIdentityResolver::new(config.identity.clone()));
    let gateway = Gateway::new(client, identity);

    let shutdown = CancellationToken::new();

    let companion = config.server.enabled.then(|| {
        let server = GatewayServer::new(
            config.server.addr(),
            gateway.proxy().clone(),
            gateway.identity_resolver(),
        );
        tokio::spawn(run_companion(
            Arc::new(server),
            config.server.retry_interval(),
            shutdown.clone(),
        ))
    });

    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutting down");
                signal.cancel();
            }
            Err(e) => warn!(error = %e, "Failed to listen for ctrl-c"),
        }
    });

    let listener = TcpListener::bind(config.api.listen)
        .await
        .with_context(|| format!("Failed to bind query API on {}", config.api.listen))?;
    info!(addr = %config.api.listen, "Query API listening");

    let served = axum::serve(listener, kubegate_server::router(Arc::new(gateway)))
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await
        .context("Query API failed");

    shutdown.cancel();
    if let Some(task) = companion {
        task.await.context("Gateway server task panicked")?;
    }

    served
}

/// Keep the companion listener up until `shutdown` fires
async fn run_companion(server: Arc<GatewayServer>, retry_interval: Duration, shutdown: CancellationToken) {
    loop {
        if shutdown.is_cancelled() {
            return;
        }

        let start = server.start();
        tokio::pin!(start);

        let result = tokio::select! {
            biased;
            result = &mut start => result,
            _ = shutdown.cancelled() => {
                let (stopped, _) = tokio::join!(
                    server.stop(),
                    tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut start),
                );
                if let Err(e) = stopped {
                    warn!(error = %e, "Gateway server did not stop cleanly");
                }
                return;
            }
        };

        match result {
            Ok(()) => return,
            Err(e) => {
                warn!(error = %e, retry_in = ?retry_interval, "Gateway server failed, retrying");
                tokio::select! {
                    _ = tokio::time::sleep(retry_interval) => {}
                    _ = shutdown.cancelled() => return,
                }
            }
        }
    }
}
