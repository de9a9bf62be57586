//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the two resource
//! watchers to the reconciliation loop:
//!
//! - a Service watcher and a NetworkPolicy watcher, each in its own task,
//!   pulse a shared [`TriggerSignal`];
//! - a single loop waits on the signal and runs one pass at a time,
//!   publishing each successful rule set.
//!
//! A failed pass is logged and the previously published set stays in
//! place; the next change triggers a fresh attempt.

use crate::backoff::FibonacciBackoff;
use crate::config::Config;
use crate::error::ControllerError;
use crate::publisher::RuleSetPublisher;
use crate::reconciler::Reconciler;
use crate::trigger::{Trigger, TriggerSignal};
use crate::watcher::ResourceWatcher;
use cluster_client::{ClusterClientTrait, KubeClusterClient};
use firewall_rules::ResourceKind;
use futures::future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn};

/// Main controller for firewall rule assembly.
pub struct Controller {
    client: Arc<dyn ClusterClientTrait>,
    config: Config,
    signal: Arc<TriggerSignal>,
    reconciler: Arc<Reconciler>,
    publisher: Arc<RuleSetPublisher>,
    shutdown: CancellationToken,
}

impl Controller {
    /// Creates a controller connected to the cluster described by `config`.
    ///
    /// Fails if the API server cannot be reached.
    pub async fn new(config: Config) -> Result<Self, ControllerError> {
        info!("Initializing Firewall Policy Controller");

        let client = match &config.kubeconfig {
            Some(path) => KubeClusterClient::from_kubeconfig(path).await?,
            None => KubeClusterClient::try_default().await?,
        };

        info!("Validating API server connectivity...");
        let version = client.server_version().await.map_err(|e| {
            error!("Failed to reach the Kubernetes API server: {}", e);
            error!("Please ensure:");
            error!("  1. The controller runs in-cluster or FIREWALL_KUBECFG points to a kubeconfig");
            error!("  2. Its credentials may list and watch services and networkpolicies");
            ControllerError::Cluster(e)
        })?;
        info!("✅ Connected to Kubernetes API server {}", version);

        Ok(Self::with_client(Arc::new(client), config))
    }

    /// Creates a controller over an existing cluster client.
    pub fn with_client(client: Arc<dyn ClusterClientTrait>, config: Config) -> Self {
        let reconciler = Reconciler::new(client.clone(), config.fetch_timeout, info_span!("reconciler"));
        Self {
            client,
            config,
            signal: Arc::new(TriggerSignal::new()),
            reconciler: Arc::new(reconciler),
            publisher: Arc::new(RuleSetPublisher::default()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Rule set hand-off; stays usable after `run` returns.
    pub fn publisher(&self) -> Arc<RuleSetPublisher> {
        self.publisher.clone()
    }

    /// Cancelling this token stops the controller after any running pass.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    #[cfg(test)]
    pub fn signal(&self) -> Arc<TriggerSignal> {
        self.signal.clone()
    }

    #[cfg(test)]
    pub fn reconciler(&self) -> Arc<Reconciler> {
        self.reconciler.clone()
    }

    fn spawn_watcher(&self, kind: ResourceKind) -> JoinHandle<()> {
        let watcher = ResourceWatcher::new(
            kind,
            self.client.clone(),
            self.signal.clone(),
            FibonacciBackoff::new(self.config.watch_backoff_min_secs, self.config.watch_backoff_max_secs),
            info_span!("watcher", kind = %kind),
        );
        tokio::spawn(watcher.run(self.shutdown.clone()))
    }

    /// Runs watchers and the reconciliation loop until shutdown.
    pub async fn run(self) -> Result<(), ControllerError> {
        info!("Firewall Policy Controller running");

        let mut watchers: Vec<(ResourceKind, JoinHandle<()>)> = ResourceKind::ALL
            .into_iter()
            .map(|kind| (kind, self.spawn_watcher(kind)))
            .collect();

        let result = self.reconcile_loop(&mut watchers).await;

        self.shutdown.cancel();
        self.signal.close();
        for (kind, handle) in watchers {
            if let Err(e) = handle.await {
                warn!("{} watcher did not stop cleanly: {}", kind, e);
            }
        }

        info!(
            "Firewall Policy Controller stopped after {} passes ({} pulses, {} coalesced)",
            self.reconciler.passes(),
            self.signal.pulses(),
            self.signal.coalesced()
        );
        match self.publisher.latest() {
            Some(rules) => info!(
                "Last published rule set: generation {}, {} rules",
                self.publisher.generation(),
                rules.len()
            ),
            None => warn!("No rule set was published"),
        }
        result
    }

    async fn reconcile_loop(&self, watchers: &mut [(ResourceKind, JoinHandle<()>)]) -> Result<(), ControllerError> {
        let kinds: Vec<ResourceKind> = watchers.iter().map(|(kind, _)| *kind).collect();
        loop {
            let trigger = tokio::select! {
                () = self.shutdown.cancelled() => {
                    info!("Shutdown requested");
                    return Ok(());
                }
                (result, index, _) = future::select_all(watchers.iter_mut().map(|(_, handle)| handle)) => {
                    let kind = kinds[index];
                    return Err(match result {
                        Ok(()) => ControllerError::Watch(format!("{} watcher exited unexpectedly", kind)),
                        Err(e) => ControllerError::Watch(format!("{} watcher panicked: {}", kind, e)),
                    });
                }
                trigger = self.signal.wait() => trigger,
            };

            match trigger {
                Some(trigger) => self.reconcile_once(&trigger).await?,
                None => return Ok(()),
            }
        }
    }

    /// Runs one pass and publishes its result.
    ///
    /// Only an overlapping pass is fatal; any other failure is logged and
    /// leaves the published set untouched.
    pub(crate) async fn reconcile_once(&self, trigger: &Trigger) -> Result<(), ControllerError> {
        let kinds: Vec<String> = trigger.kinds.iter().map(ToString::to_string).collect();
        info!(
            "Reconciling firewall rules ({} change(s) from {})",
            trigger.pulses,
            kinds.join(", ")
        );

        match self.reconciler.fetch_and_assemble().await {
            Ok(rules) => {
                let update = self.publisher.publish(rules);
                if update.is_unchanged() {
                    info!(
                        "Firewall rules unchanged (generation {}, {} rules)",
                        update.generation,
                        update.rules.len()
                    );
                } else {
                    info!(
                        "New firewall rules (generation {}, {} rules, +{} -{}):\n{}",
                        update.generation,
                        update.rules.len(),
                        update.added,
                        update.removed,
                        update.rules.render()
                    );
                }
                Ok(())
            }
            Err(e @ ControllerError::Invariant(_)) => {
                error!("Reconciliation aborted: {}", e);
                Err(e)
            }
            Err(e) => {
                error!("Could not fetch cluster state to build firewall rules: {}", e);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
#[path = "controller_test.rs"]
mod controller_test;
