// ── Link status word ──
//
// Independent lifecycle and flow-control flags packed into one word so every
// transition is a single compare-and-swap. Transitions here are pure: they
// take the observed status and return the next one (or `None` for a no-op);
// `LinkModel` retries them against the live atomic.

use std::fmt;
use std::ops::BitOr;

/// Snapshot of a link's status flags.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LinkStatus(u32);

/// The outbound frame selected by [`LinkStatus::pull_up`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpFrame {
    Unlink,
    Sync,
    Link,
    Command,
}

const NAMES: [(LinkStatus, &str); 12] = [
    (LinkStatus::OPENED, "OPENED"),
    (LinkStatus::LINKED, "LINKED"),
    (LinkStatus::LINK, "LINK"),
    (LinkStatus::LINKING, "LINKING"),
    (LinkStatus::SYNC, "SYNC"),
    (LinkStatus::SYNCING, "SYNCING"),
    (LinkStatus::UNLINK, "UNLINK"),
    (LinkStatus::UNLINKING, "UNLINKING"),
    (LinkStatus::FEEDING_DOWN, "FEEDING_DOWN"),
    (LinkStatus::PULLING_DOWN, "PULLING_DOWN"),
    (LinkStatus::CUED_UP, "CUED_UP"),
    (LinkStatus::FEEDING_UP, "FEEDING_UP"),
];

impl LinkStatus {
    pub const CLOSED: Self = Self(0);
    pub const OPENED: Self = Self(1 << 0);
    pub const LINKED: Self = Self(1 << 1);
    pub const LINK: Self = Self(1 << 2);
    pub const LINKING: Self = Self(1 << 3);
    pub const SYNC: Self = Self(1 << 4);
    pub const SYNCING: Self = Self(1 << 5);
    pub const UNLINK: Self = Self(1 << 6);
    pub const UNLINKING: Self = Self(1 << 7);
    pub const FEEDING_DOWN: Self = Self(1 << 8);
    pub const PULLING_DOWN: Self = Self(1 << 9);
    pub const CUED_UP: Self = Self(1 << 10);
    pub const FEEDING_UP: Self = Self(1 << 11);

    /// Request bits; at most one is ever set.
    pub const REQUESTS: Self = Self(Self::LINK.0 | Self::SYNC.0 | Self::UNLINK.0);

    const LINK_STATE: Self = Self(
        Self::LINKED.0
            | Self::LINK.0
            | Self::LINKING.0
            | Self::SYNC.0
            | Self::SYNCING.0
            | Self::UNLINK.0
            | Self::UNLINKING.0,
    );

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Number of request bits set. The state machine keeps this at most 1.
    pub const fn request_count(self) -> u32 {
        (self.0 & Self::REQUESTS.0).count_ones()
    }

    /// Linked and no longer waiting for the Linked response.
    pub const fn is_linked(self) -> bool {
        self.contains(Self::LINKED) && !self.intersects(Self::LINKING)
    }

    /// Linked and the initial state sync has completed.
    pub const fn is_synced(self) -> bool {
        self.is_linked() && !self.intersects(Self::SYNCING)
    }

    // ── Lifecycle transitions ────────────────────────────────────────

    pub const fn open(self) -> Option<Self> {
        if self.contains(Self::OPENED) {
            None
        } else {
            Some(self.with(Self::OPENED))
        }
    }

    /// Request a link. No-op unless opened and not already linked.
    pub const fn link(self) -> Option<Self> {
        if !self.contains(Self::OPENED) || self.contains(Self::LINKED) {
            return None;
        }
        Some(
            self.with(Self::LINK)
                .with(Self::LINKING)
                .with(Self::LINKED)
                .with(Self::FEEDING_UP),
        )
    }

    /// Request a link with full state resync.
    pub const fn sync(self) -> Option<Self> {
        if !self.contains(Self::OPENED) || self.contains(Self::LINKED) {
            return None;
        }
        Some(
            self.with(Self::SYNC)
                .with(Self::SYNCING)
                .with(Self::LINKING)
                .with(Self::LINKED)
                .with(Self::FEEDING_UP),
        )
    }

    /// Cancel an unsent Link/Sync request, or queue an Unlink request.
    pub const fn unlink(self) -> Option<Self> {
        if self.intersects(Self::LINK) || self.intersects(Self::SYNC) {
            return Some(self.without(Self::LINK_STATE));
        }
        if self.contains(Self::LINKED) && !self.contains(Self::UNLINKING) {
            return Some(
                self.with(Self::UNLINK)
                    .with(Self::UNLINKING)
                    .with(Self::FEEDING_UP),
            );
        }
        None
    }

    /// Linked response received.
    pub const fn did_link(self) -> Self {
        self.without(Self::LINKING)
    }

    /// Synced response received; implies the link is established.
    pub const fn did_sync(self) -> Self {
        self.without(Self::SYNCING).without(Self::LINKING)
    }

    /// Unlinked response received: no link flag survives it.
    pub const fn did_unlink(self) -> Self {
        self.without(Self::LINK_STATE)
    }

    /// Transport lost. Only the open flag and queued commands survive.
    pub const fn did_disconnect(self) -> Self {
        Self(self.0 & (Self::OPENED.0 | Self::CUED_UP.0))
    }

    // ── Upstream flow ────────────────────────────────────────────────

    /// Mark a feed slot wanted. The flag is only taken while opened; the
    /// caller asks the transport for a slot when this returns `Some`.
    pub const fn feed_up(self) -> Option<Self> {
        if !self.contains(Self::OPENED) || self.contains(Self::FEEDING_UP) {
            return None;
        }
        Some(self.with(Self::FEEDING_UP))
    }

    /// Select the next outbound frame by priority Unlink > Sync > Link >
    /// Command, clearing its request bit and the feed flag.
    pub const fn pull_up(self) -> (Self, Option<UpFrame>) {
        let base = self.without(Self::FEEDING_UP);
        if self.contains(Self::UNLINK) {
            (base.without(Self::UNLINK), Some(UpFrame::Unlink))
        } else if self.contains(Self::SYNC) {
            (base.without(Self::SYNC), Some(UpFrame::Sync))
        } else if self.contains(Self::LINK) {
            (base.without(Self::LINK), Some(UpFrame::Link))
        } else if self.contains(Self::CUED_UP) {
            (base.without(Self::CUED_UP), Some(UpFrame::Command))
        } else {
            (base, None)
        }
    }

    /// Whether another frame is ready after a pull.
    pub const fn has_pending_up(self) -> bool {
        self.intersects(Self::REQUESTS) || self.contains(Self::CUED_UP)
    }

    // ── Downstream flow ──────────────────────────────────────────────

    /// Start a feeding cycle. Returns `Some` only when nothing was feeding
    /// or pulling; the caller then issues exactly one pull.
    pub const fn feed_down(self) -> Option<Self> {
        if self.intersects(Self::FEEDING_DOWN) || self.intersects(Self::PULLING_DOWN) {
            return None;
        }
        Some(self.with(Self::FEEDING_DOWN).with(Self::PULLING_DOWN))
    }

    /// One frame delivered: the pull credit is spent.
    pub const fn push_down(self) -> Self {
        self.without(Self::PULLING_DOWN)
    }

    /// Continue or end the feeding cycle after a delivered frame completes.
    /// Returns the next status and whether to pull again (`false` means the
    /// cycle goes idle). `None` when a pull is already outstanding.
    pub const fn cue_down(self, subscribed: bool) -> Option<(Self, bool)> {
        if self.contains(Self::PULLING_DOWN) {
            return None;
        }
        if subscribed && self.contains(Self::OPENED) && self.contains(Self::FEEDING_DOWN) {
            Some((self.with(Self::PULLING_DOWN), true))
        } else {
            Some((self.without(Self::FEEDING_DOWN), false))
        }
    }
}

impl BitOr for LinkStatus {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.with(rhs)
    }
}

impl fmt::Debug for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return f.write_str("CLOSED");
        }
        let mut first = true;
        for (flag, name) in NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const OPEN: LinkStatus = LinkStatus::OPENED;

    #[test]
    fn link_requires_open() {
        assert_eq!(LinkStatus::CLOSED.link(), None);
        assert_eq!(LinkStatus::CLOSED.sync(), None);
        let linked = OPEN.link().unwrap_or_default();
        assert!(linked.contains(LinkStatus::LINK | LinkStatus::LINKING | LinkStatus::LINKED));
        assert!(linked.contains(LinkStatus::FEEDING_UP));
        assert_eq!(linked.link(), None);
        assert_eq!(linked.sync(), None);
    }

    #[test]
    fn sync_sets_sync_bits_instead_of_link() {
        let synced = OPEN.sync().unwrap_or_default();
        assert!(synced.contains(LinkStatus::SYNC | LinkStatus::SYNCING | LinkStatus::LINKING));
        assert!(!synced.contains(LinkStatus::LINK));
        assert!(!synced.is_linked());
        let synced = synced.did_link();
        assert!(synced.is_linked());
        assert!(!synced.is_synced());
        assert!(synced.did_sync().is_synced());
    }

    #[test]
    fn unlink_cancels_unsent_request() {
        let pending = OPEN.link().unwrap_or_default();
        let cancelled = pending.unlink().unwrap_or_default();
        assert!(!cancelled.intersects(LinkStatus::REQUESTS));
        assert!(!cancelled.contains(LinkStatus::LINKED));
        assert!(cancelled.contains(OPEN));
        // Link may be requested again afterwards.
        assert!(cancelled.link().is_some());
    }

    #[test]
    fn unlink_after_send_queues_unlink_request() {
        let (sent, frame) = OPEN.sync().unwrap_or_default().pull_up();
        assert_eq!(frame, Some(UpFrame::Sync));
        let unlinking = sent.unlink().unwrap_or_default();
        assert!(unlinking.contains(LinkStatus::UNLINK | LinkStatus::UNLINKING));
        assert_eq!(unlinking.request_count(), 1);
        assert_eq!(unlinking.unlink(), None);
        assert_eq!(unlinking.link(), None);
    }

    #[test]
    fn unlinked_response_clears_every_link_flag() {
        let (sent, _) = OPEN.sync().unwrap_or_default().pull_up();
        let (sent, _) = sent.unlink().unwrap_or_default().pull_up();
        let done = sent.did_unlink();
        assert_eq!(done, OPEN);
        assert!(!done.intersects(LinkStatus::LINKING | LinkStatus::SYNCING));
    }

    #[test]
    fn pull_up_priority_table() {
        let cases = [
            (LinkStatus::UNLINK | LinkStatus::CUED_UP, Some(UpFrame::Unlink)),
            (LinkStatus::SYNC | LinkStatus::CUED_UP, Some(UpFrame::Sync)),
            (LinkStatus::LINK | LinkStatus::CUED_UP, Some(UpFrame::Link)),
            (LinkStatus::CUED_UP, Some(UpFrame::Command)),
            (LinkStatus::CLOSED, None),
        ];
        for (status, expected) in cases {
            let (next, frame) = (OPEN | LinkStatus::FEEDING_UP | status).pull_up();
            assert_eq!(frame, expected, "status {status}");
            assert!(!next.contains(LinkStatus::FEEDING_UP));
        }
        let (next, _) = (OPEN | LinkStatus::LINK | LinkStatus::CUED_UP).pull_up();
        assert!(next.has_pending_up());
    }

    #[test]
    fn feed_up_requires_open_and_is_edge_triggered() {
        assert_eq!(LinkStatus::CLOSED.feed_up(), None);
        let fed = OPEN.feed_up().unwrap_or_default();
        assert_eq!(fed.feed_up(), None);
    }

    #[test]
    fn feed_down_pulls_once() {
        let fed = OPEN.feed_down().unwrap_or_default();
        assert!(fed.contains(LinkStatus::FEEDING_DOWN | LinkStatus::PULLING_DOWN));
        assert_eq!(fed.feed_down(), None);
        // Delivered but still relaying: another feed must not pull.
        assert_eq!(fed.push_down().feed_down(), None);
    }

    #[test]
    fn cue_down_repulls_while_subscribed() {
        let delivered = OPEN.feed_down().unwrap_or_default().push_down();
        let (next, pull) = delivered.cue_down(true).unwrap_or_default();
        assert!(pull);
        assert!(next.contains(LinkStatus::PULLING_DOWN));
        assert_eq!(next.cue_down(true), None);

        let (idle, pull) = delivered.cue_down(false).unwrap_or_default();
        assert!(!pull);
        assert!(!idle.intersects(LinkStatus::FEEDING_DOWN | LinkStatus::PULLING_DOWN));
        assert!(idle.feed_down().is_some());
    }

    #[test]
    fn disconnect_keeps_open_and_queued_commands() {
        let status = OPEN | LinkStatus::LINKED | LinkStatus::CUED_UP | LinkStatus::PULLING_DOWN;
        assert_eq!(status.did_disconnect(), OPEN | LinkStatus::CUED_UP);
    }

    #[test]
    fn debug_lists_flags() {
        assert_eq!(format!("{:?}", LinkStatus::CLOSED), "CLOSED");
        assert_eq!(format!("{:?}", OPEN | LinkStatus::LINKED), "OPENED|LINKED");
    }
}
