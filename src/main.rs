use anyhow::Context;
use clap::Parser;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use upgrade_watcher::chain::ChainClient;
use upgrade_watcher::config::Config;
use upgrade_watcher::metrics::{server, Metrics};
use upgrade_watcher::monitor::ChainMonitor;
use upgrade_watcher::notifier::SlackNotifier;
use upgrade_watcher::store::UpgradeStore;

/// Alert on scheduled Cosmos SDK chain upgrades.
#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "UPGRADE_WATCHER_CONFIG", default_value = "config.toml")]
    config_file: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    let config = Config::load(&args.config_file)
        .with_context(|| format!("loading {}", args.config_file.display()))?;

    // Initialize logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    if config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .init();
    }

    info!(
        chains = config.chains.len(),
        "cosmos-upgrade-watcher v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    let store = Arc::new(
        UpgradeStore::open(&config.state_dir)
            .await
            .context("opening upgrade store")?,
    );
    let metrics = Arc::new(Metrics::new().context("registering metrics")?);
    let http = ChainClient::http_client(config.request_timeout())
        .context("building HTTP client")?;

    let shutdown = CancellationToken::new();

    // --- Metrics exporter ---
    let metrics_addr = config.metrics_addr();
    let metrics_server = {
        let metrics = metrics.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = server::serve(metrics, &metrics_addr, shutdown).await {
                error!(error = %e, addr = %metrics_addr, "metrics server failed");
            }
        })
    };

    // --- One watcher per chain ---
    let mut monitors = Vec::new();
    for chain in config.chain_configs() {
        let source = ChainClient::new(http.clone(), &chain);
        let notifier = SlackNotifier::new(http.clone(), chain.slack_webhook.clone());
        let monitor = ChainMonitor::new(chain, source, notifier, store.clone(), metrics.clone());
        monitors.push(monitor.start(shutdown.clone()));
    }

    shutdown_signal()
        .context("listening for shutdown signal")?
        .await;
    info!("shutting down...");
    shutdown.cancel();

    for result in futures::future::join_all(monitors).await {
        if let Err(e) = result {
            warn!(error = %e, "watcher task ended abnormally");
        }
    }
    if let Err(e) = metrics_server.await {
        warn!(error = %e, "metrics server task ended abnormally");
    }

    info!("stopped");
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix. Handlers are installed before this returns.
fn shutdown_signal() -> std::io::Result<impl Future<Output = ()>> {
    #[cfg(unix)]
    let mut terminate =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    Ok(async move {
        #[cfg(unix)]
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        };

        #[cfg(not(unix))]
        let _ = tokio::signal::ctrl_c().await;
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_sigterm_triggers_shutdown() {
        let signal = shutdown_signal().unwrap();

        let status = std::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        tokio::time::timeout(Duration::from_secs(5), signal)
            .await
            .expect("SIGTERM did not resolve the shutdown signal");
    }
}
