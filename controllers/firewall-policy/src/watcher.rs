//! Kubernetes resource watchers.
//!
//! One watcher runs per resource kind. A watcher does not look at object
//! contents: every notification (add, update, delete, relist) becomes a
//! pulse on the shared [`TriggerSignal`], and the reconciliation loop
//! re-fetches the full state.
//!
//! Watch failures never stop a watcher. A stream error is logged and the
//! stream is polled again after a backoff (the client re-lists, which
//! pulses again once the watch is re-established). A stream that ends is
//! re-subscribed after a backoff.

use crate::backoff::FibonacciBackoff;
use crate::trigger::TriggerSignal;
use cluster_client::ClusterClientTrait;
use firewall_rules::ResourceKind;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, info, warn};

/// Watches one resource kind and pulses the trigger on every change.
pub struct ResourceWatcher {
    kind: ResourceKind,
    client: Arc<dyn ClusterClientTrait>,
    signal: Arc<TriggerSignal>,
    backoff: FibonacciBackoff,
    span: Span,
}

impl ResourceWatcher {
    /// Creates a watcher. Its log output is recorded inside `span`.
    pub fn new(
        kind: ResourceKind,
        client: Arc<dyn ClusterClientTrait>,
        signal: Arc<TriggerSignal>,
        backoff: FibonacciBackoff,
        span: Span,
    ) -> Self {
        Self {
            kind,
            client,
            signal,
            backoff,
            span,
        }
    }

    /// Runs until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        let span = self.span.clone();
        self.watch_until_cancelled(&cancel).instrument(span).await;
    }

    async fn watch_until_cancelled(&mut self, cancel: &CancellationToken) {
        info!("Starting {} watcher", self.kind);

        loop {
            let mut stream = self.client.watch(self.kind);

            loop {
                let item = tokio::select! {
                    () = cancel.cancelled() => {
                        info!("{} watcher stopped", self.kind);
                        return;
                    }
                    item = stream.next() => item,
                };

                match item {
                    Some(Ok(event)) => {
                        self.backoff.reset();
                        if self.signal.pulse(self.kind) {
                            debug!("{} triggered reconciliation", event);
                        } else {
                            debug!("{} coalesced into pending reconciliation", event);
                        }
                    }
                    Some(Err(e)) => {
                        let delay = self.backoff.next_backoff();
                        warn!("{} watch error: {} (retrying in {:?})", self.kind, e, delay);
                        if !sleep_unless_cancelled(delay, cancel).await {
                            info!("{} watcher stopped", self.kind);
                            return;
                        }
                    }
                    None => {
                        let delay = self.backoff.next_backoff();
                        warn!("{} watch stream ended (re-subscribing in {:?})", self.kind, delay);
                        if !sleep_unless_cancelled(delay, cancel).await {
                            info!("{} watcher stopped", self.kind);
                            return;
                        }
                        break;
                    }
                }
            }
        }
    }
}

/// Sleeps for `delay`; returns false if cancelled first.
async fn sleep_unless_cancelled(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{next_trigger, no_trigger, wait_for_subscriptions};
    use cluster_client::{Change, ClusterError, MockClusterClient, WatchEvent};
    use std::collections::BTreeSet;

    fn spawn_watcher(
        kind: ResourceKind,
        mock: &MockClusterClient,
        signal: &Arc<TriggerSignal>,
        cancel: &CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let watcher = ResourceWatcher::new(
            kind,
            Arc::new(mock.clone()),
            signal.clone(),
            FibonacciBackoff::new(1, 8),
            tracing::info_span!("watcher", kind = %kind),
        );
        tokio::spawn(watcher.run(cancel.clone()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_event_pulses() {
        let mock = MockClusterClient::new();
        let signal = Arc::new(TriggerSignal::new());
        let cancel = CancellationToken::new();
        let handle = spawn_watcher(ResourceKind::Service, &mock, &signal, &cancel);
        wait_for_subscriptions(&mock, ResourceKind::Service, 1).await;

        for change in [Change::Listed, Change::Resynced, Change::Applied, Change::Deleted] {
            assert!(mock.emit(ResourceKind::Service, Ok(WatchEvent::new(ResourceKind::Service, change))));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;

        let trigger = next_trigger(&signal).await;
        assert_eq!(trigger.pulses, 4);
        assert_eq!(trigger.kinds, BTreeSet::from([ResourceKind::Service]));

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_error_does_not_stop_watcher() {
        let mock = MockClusterClient::new();
        let signal = Arc::new(TriggerSignal::new());
        let cancel = CancellationToken::new();
        let handle = spawn_watcher(ResourceKind::NetworkPolicy, &mock, &signal, &cancel);
        wait_for_subscriptions(&mock, ResourceKind::NetworkPolicy, 1).await;

        mock.emit(ResourceKind::NetworkPolicy, Err(ClusterError::Stream("connection reset".to_string())));
        no_trigger(&signal).await;

        mock.emit(
            ResourceKind::NetworkPolicy,
            Ok(WatchEvent::new(ResourceKind::NetworkPolicy, Change::Resynced)),
        );
        let trigger = next_trigger(&signal).await;
        assert_eq!(trigger.kinds, BTreeSet::from([ResourceKind::NetworkPolicy]));

        // Errors are retried on the same stream.
        assert_eq!(mock.subscriptions(ResourceKind::NetworkPolicy), 1);
        assert!(!handle.is_finished());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_ended_stream_is_resubscribed() {
        let mock = MockClusterClient::new();
        let signal = Arc::new(TriggerSignal::new());
        let cancel = CancellationToken::new();
        let handle = spawn_watcher(ResourceKind::Service, &mock, &signal, &cancel);
        wait_for_subscriptions(&mock, ResourceKind::Service, 1).await;

        mock.close_watch(ResourceKind::Service);
        wait_for_subscriptions(&mock, ResourceKind::Service, 2).await;

        // The new subscription re-lists; that must trigger a pass.
        mock.emit(ResourceKind::Service, Ok(WatchEvent::new(ResourceKind::Service, Change::Resynced)));
        let trigger = next_trigger(&signal).await;
        assert_eq!(trigger.pulses, 1);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let mock = MockClusterClient::new();
        let signal = Arc::new(TriggerSignal::new());
        let cancel = CancellationToken::new();
        let handle = spawn_watcher(ResourceKind::Service, &mock, &signal, &cancel);
        wait_for_subscriptions(&mock, ResourceKind::Service, 1).await;

        mock.emit(ResourceKind::Service, Err(ClusterError::Stream("gone".to_string())));
        tokio::task::yield_now().await;
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("watcher did not stop")
            .unwrap();
        assert_eq!(mock.subscriptions(ResourceKind::Service), 1);
    }
}
