//! Reconciliation logic.
//!
//! A pass fetches the complete current set of Services and NetworkPolicies
//! (Services first) and assembles them into a fresh [`FirewallRuleSet`].
//! Any fetch failure aborts the pass; the caller keeps whatever it
//! published before.
//!
//! Passes must never overlap. The controller runs them from a single loop,
//! and [`Reconciler::fetch_and_assemble`] refuses re-entry, so a violation
//! surfaces as [`ControllerError::Invariant`] instead of two passes racing.

use crate::error::ControllerError;
use cluster_client::{ClusterClientTrait, ClusterError};
use firewall_rules::{FirewallRuleSet, assemble};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{Instrument, Span, debug};

/// Fetches cluster state and assembles rule sets.
pub struct Reconciler {
    client: Arc<dyn ClusterClientTrait>,
    fetch_timeout: Duration,
    span: Span,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    passes: AtomicU64,
}

impl Reconciler {
    /// Creates a reconciler. Its log output is recorded inside `span`.
    pub fn new(client: Arc<dyn ClusterClientTrait>, fetch_timeout: Duration, span: Span) -> Self {
        Self {
            client,
            fetch_timeout,
            span,
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            passes: AtomicU64::new(0),
        }
    }

    /// Runs one pass: fetch Services, fetch NetworkPolicies, assemble.
    pub async fn fetch_and_assemble(&self) -> Result<FirewallRuleSet, ControllerError> {
        let _guard = PassGuard::enter(&self.in_flight, &self.peak_in_flight)?;
        let pass = self.passes.fetch_add(1, Ordering::SeqCst) + 1;

        async {
            let services = self.fetch("services", self.client.list_services()).await?;
            let policies = self
                .fetch("network policies", self.client.list_network_policies())
                .await?;
            debug!(
                "Pass {}: assembling {} services and {} network policies",
                pass,
                services.len(),
                policies.len()
            );
            Ok::<_, ControllerError>(assemble(&services, &policies))
        }
        .instrument(self.span.clone())
        .await
    }

    async fn fetch<T, F>(&self, what: &str, request: F) -> Result<T, ControllerError>
    where
        F: Future<Output = Result<T, ClusterError>>,
    {
        match tokio::time::timeout(self.fetch_timeout, request).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ControllerError::Timeout(format!(
                "listing {} took longer than {:?}",
                what, self.fetch_timeout
            ))),
        }
    }

    /// Passes started so far, including failed ones
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::SeqCst)
    }

    /// Highest number of passes ever running at once
    #[cfg(test)]
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

/// Marks a pass as running for as long as it lives.
struct PassGuard<'a> {
    in_flight: &'a AtomicUsize,
}

impl<'a> PassGuard<'a> {
    fn enter(in_flight: &'a AtomicUsize, peak: &AtomicUsize) -> Result<Self, ControllerError> {
        let running = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(running, Ordering::SeqCst);
        if running > 1 {
            in_flight.fetch_sub(1, Ordering::SeqCst);
            return Err(ControllerError::Invariant(format!(
                "reconciliation pass started while {} other pass(es) were running",
                running - 1
            )));
        }
        Ok(Self { in_flight })
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
#[path = "reconciler_test.rs"]
mod reconciler_test;
