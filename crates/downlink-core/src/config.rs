// ── Per-view configuration ──

use serde::{Deserialize, Serialize};

/// Flags a view applies to its link when it opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownlinkConfig {
    /// Request a link on open and again after every reconnect.
    pub keep_linked: bool,
    /// Ask for a full state sync instead of a plain link.
    pub keep_synced: bool,
    /// Apply inbound deltas to the local mirror. When off, deltas are only
    /// forwarded to observers.
    pub stateful: bool,
}

impl Default for DownlinkConfig {
    fn default() -> Self {
        Self {
            keep_linked: true,
            keep_synced: false,
            stateful: true,
        }
    }
}

impl DownlinkConfig {
    pub fn keep_linked(mut self, keep_linked: bool) -> Self {
        self.keep_linked = keep_linked;
        self
    }

    pub fn keep_synced(mut self, keep_synced: bool) -> Self {
        self.keep_synced = keep_synced;
        self
    }

    pub fn stateful(mut self, stateful: bool) -> Self {
        self.stateful = stateful;
        self
    }
}
