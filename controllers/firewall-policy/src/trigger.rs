//! Coalescing reconciliation trigger.
//!
//! Watchers pulse the signal on every change; the reconciliation loop waits
//! on it. There is a single pending slot: pulses that arrive while a
//! trigger is already pending are merged into it, so any burst of changes
//! results in at most one queued pass on top of the one running. A pulse is
//! never lost: it either opens a pending trigger or joins one that has not
//! been taken yet.

use firewall_rules::ResourceKind;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// A pending request for one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    /// Kinds whose watchers pulsed since the last pass started
    pub kinds: BTreeSet<ResourceKind>,
    /// Number of pulses merged into this trigger
    pub pulses: u64,
}

#[derive(Debug, Default)]
struct Slot {
    pending: Option<Trigger>,
    closed: bool,
}

/// Single-slot trigger shared by the watchers and the reconciliation loop.
#[derive(Debug, Default)]
pub struct TriggerSignal {
    slot: Mutex<Slot>,
    notify: Notify,
    pulses: AtomicU64,
    coalesced: AtomicU64,
}

impl TriggerSignal {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Requests a pass on behalf of `kind`.
    ///
    /// Returns true when this pulse opened a new pending trigger and false
    /// when it was merged into one already pending (or the signal is closed).
    pub fn pulse(&self, kind: ResourceKind) -> bool {
        self.pulses.fetch_add(1, Ordering::Relaxed);

        let opened = {
            let mut slot = self.slot();
            if slot.closed {
                return false;
            }
            match slot.pending.as_mut() {
                Some(trigger) => {
                    trigger.kinds.insert(kind);
                    trigger.pulses += 1;
                    false
                }
                None => {
                    slot.pending = Some(Trigger {
                        kinds: BTreeSet::from([kind]),
                        pulses: 1,
                    });
                    true
                }
            }
        };

        if opened {
            self.notify.notify_one();
        } else {
            self.coalesced.fetch_add(1, Ordering::Relaxed);
        }
        opened
    }

    /// Waits for the next pending trigger and takes it.
    ///
    /// Returns `None` once the signal is closed and nothing is pending.
    pub async fn wait(&self) -> Option<Trigger> {
        loop {
            let notified = self.notify.notified();
            {
                let mut slot = self.slot();
                if let Some(trigger) = slot.pending.take() {
                    return Some(trigger);
                }
                if slot.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Stops accepting pulses and wakes the waiter.
    pub fn close(&self) {
        self.slot().closed = true;
        self.notify.notify_one();
    }

    /// Total pulses received
    pub fn pulses(&self) -> u64 {
        self.pulses.load(Ordering::Relaxed)
    }

    /// Pulses merged into an already pending trigger
    pub fn coalesced(&self) -> u64 {
        self.coalesced.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_burst_coalesces_into_one_trigger() {
        let signal = TriggerSignal::new();

        assert!(signal.pulse(ResourceKind::Service));
        for _ in 0..9 {
            assert!(!signal.pulse(ResourceKind::Service));
        }
        assert!(!signal.pulse(ResourceKind::NetworkPolicy));

        let trigger = signal.wait().await.unwrap();
        assert_eq!(trigger.pulses, 11);
        assert_eq!(
            trigger.kinds,
            BTreeSet::from([ResourceKind::Service, ResourceKind::NetworkPolicy])
        );
        assert_eq!(signal.pulses(), 11);
        assert_eq!(signal.coalesced(), 10);
    }

    #[tokio::test]
    async fn test_pulse_after_take_opens_new_trigger() {
        let signal = TriggerSignal::new();

        signal.pulse(ResourceKind::Service);
        let first = signal.wait().await.unwrap();
        assert_eq!(first.kinds, BTreeSet::from([ResourceKind::Service]));

        // A pass is now "running"; a change during it must queue exactly one more.
        assert!(signal.pulse(ResourceKind::NetworkPolicy));
        assert!(!signal.pulse(ResourceKind::NetworkPolicy));

        let second = signal.wait().await.unwrap();
        assert_eq!(second.kinds, BTreeSet::from([ResourceKind::NetworkPolicy]));
        assert_eq!(second.pulses, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_wakes_on_pulse_from_other_task() {
        let signal = Arc::new(TriggerSignal::new());

        let pulser = {
            let signal = signal.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                signal.pulse(ResourceKind::Service);
            })
        };

        let trigger = tokio::time::timeout(Duration::from_secs(1), signal.wait())
            .await
            .expect("waiter was not woken")
            .unwrap();
        assert_eq!(trigger.pulses, 1);
        pulser.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_blocks_without_pulse() {
        let signal = TriggerSignal::new();
        let result = tokio::time::timeout(Duration::from_secs(1), signal.wait()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_close_releases_waiter_after_pending_trigger() {
        let signal = TriggerSignal::new();

        signal.pulse(ResourceKind::Service);
        signal.close();
        assert!(!signal.pulse(ResourceKind::Service));

        assert!(signal.wait().await.is_some());
        assert!(signal.wait().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_wakes_blocked_waiter() {
        let signal = Arc::new(TriggerSignal::new());

        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.wait().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.close();

        assert!(waiter.await.unwrap().is_none());
    }
}
