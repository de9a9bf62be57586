//! Watch notification types.

use firewall_rules::ResourceKind;
use std::fmt;

/// What a watch stream observed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Change {
    /// Object added or modified
    Applied,
    /// Object deleted
    Deleted,
    /// Object delivered while the watch (re)lists
    Listed,
    /// (Re)list finished; the stream is in sync again
    Resynced,
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Applied => f.write_str("applied"),
            Self::Deleted => f.write_str("deleted"),
            Self::Listed => f.write_str("listed"),
            Self::Resynced => f.write_str("resynced"),
        }
    }
}

/// Notification that some resource of `kind` changed.
///
/// Carries no object payload: consumers re-fetch the full state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WatchEvent {
    pub kind: ResourceKind,
    pub change: Change,
}

impl WatchEvent {
    /// Creates a notification.
    pub fn new(kind: ResourceKind, change: Change) -> Self {
        Self { kind, change }
    }
}

impl fmt::Display for WatchEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.change)
    }
}
