//! Hand-off of assembled rule sets to downstream consumers.
//!
//! The latest successful rule set is always available by pull through
//! [`RuleSetPublisher::latest`]. Consumers that want to be told about new
//! sets subscribe to a broadcast of [`RuleSetUpdate`]s, one per successful
//! pass. A slow subscriber may miss intermediate updates but can always
//! catch up from `latest`.

use chrono::{DateTime, Utc};
use firewall_rules::FirewallRuleSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{broadcast, watch};
use tracing::debug;

/// Buffered updates per subscriber before it starts lagging
pub const UPDATE_CAPACITY: usize = 16;

/// Notification of one successful pass.
#[derive(Debug, Clone)]
pub struct RuleSetUpdate {
    /// 1 for the first published set, incremented on every publish
    pub generation: u64,
    pub rules: Arc<FirewallRuleSet>,
    /// Rules not present in the previous set
    pub added: usize,
    /// Rules of the previous set that are gone
    pub removed: usize,
    pub published_at: DateTime<Utc>,
}

impl RuleSetUpdate {
    /// True when the set equals the one it replaced.
    pub fn is_unchanged(&self) -> bool {
        self.added == 0 && self.removed == 0
    }
}

/// Holds the latest rule set and fans out updates.
#[derive(Debug)]
pub struct RuleSetPublisher {
    latest: watch::Sender<Option<Arc<FirewallRuleSet>>>,
    updates: broadcast::Sender<RuleSetUpdate>,
    generation: AtomicU64,
}

impl Default for RuleSetPublisher {
    fn default() -> Self {
        Self::new(UPDATE_CAPACITY)
    }
}

impl RuleSetPublisher {
    pub fn new(capacity: usize) -> Self {
        let (latest, _) = watch::channel(None);
        let (updates, _) = broadcast::channel(capacity.max(1));
        Self {
            latest,
            updates,
            generation: AtomicU64::new(0),
        }
    }

    /// Latest published rule set, `None` before the first successful pass.
    pub fn latest(&self) -> Option<Arc<FirewallRuleSet>> {
        self.latest.borrow().clone()
    }

    /// Number of sets published so far
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Receives one [`RuleSetUpdate`] per publish from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<RuleSetUpdate> {
        self.updates.subscribe()
    }

    /// Replaces the latest set and notifies subscribers.
    pub fn publish(&self, rules: FirewallRuleSet) -> RuleSetUpdate {
        let rules = Arc::new(rules);
        let previous = self.latest.send_replace(Some(rules.clone()));
        let diff = match previous {
            Some(previous) => rules.diff(&previous),
            None => rules.diff(&FirewallRuleSet::default()),
        };
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let update = RuleSetUpdate {
            generation,
            rules,
            added: diff.added.len(),
            removed: diff.removed.len(),
            published_at: Utc::now(),
        };
        if self.updates.send(update.clone()).is_err() {
            debug!("Rule set generation {} published with no subscribers", generation);
        }
        update
    }
}
