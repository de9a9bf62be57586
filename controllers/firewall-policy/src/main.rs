//! Firewall Policy Controller
//!
//! Watches Services and NetworkPolicies cluster-wide and assembles them
//! into a canonical set of firewall allow rules.
//!
//! Every change to either kind triggers a reconciliation pass that
//! re-fetches the complete state; bursts of changes are coalesced so at
//! most one pass runs at a time with at most one more queued.

mod backoff;
mod config;
mod controller;
mod error;
mod publisher;
mod reconciler;
mod trigger;
mod watcher;

#[cfg(test)]
mod test_utils;

use crate::config::Config;
use crate::error::ControllerError;
use crate::publisher::RuleSetUpdate;
use controller::Controller;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("A rustls crypto provider was already installed");
    }

    info!("Starting Firewall Policy Controller");

    let config = Config::from_env()?;

    info!("Configuration:");
    info!(
        "  Kubeconfig: {}",
        config
            .kubeconfig
            .as_ref()
            .map_or_else(|| "in-cluster / default".to_string(), |p| p.display().to_string())
    );
    info!("  Fetch timeout: {:?}", config.fetch_timeout);
    info!(
        "  Watch backoff: {}s - {}s",
        config.watch_backoff_min_secs, config.watch_backoff_max_secs
    );

    // Initialize and run controller
    let controller = Controller::new(config).await?;
    tokio::spawn(log_rule_set_updates(controller.publisher().subscribe()));
    tokio::spawn(shutdown_on_signal(controller.shutdown_token()));
    controller.run().await?;

    info!("Firewall Policy Controller exited");
    Ok(())
}

/// Emits every published rule set as canonical JSON at debug level.
async fn log_rule_set_updates(mut updates: broadcast::Receiver<RuleSetUpdate>) {
    loop {
        match updates.recv().await {
            Ok(update) => match update.rules.to_json() {
                Ok(json) => debug!(
                    "Rule set generation {} published at {}: {}",
                    update.generation,
                    update.published_at.to_rfc3339(),
                    json
                ),
                Err(e) => warn!("Could not serialize rule set generation {}: {}", update.generation, e),
            },
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                debug!("Rule set log skipped {} generations", missed);
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

/// Cancels `shutdown` on Ctrl-C or SIGTERM.
async fn shutdown_on_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Could not listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Could not listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl-C"),
        () = terminate => info!("Received SIGTERM"),
    }
    shutdown.cancel();
}
