// ── Downlink views ──
//
// A view is the caller's handle on a remote lane. Many views may share one
// link; each carries its own observers, stage and flags. Kind-specific
// accessors (`get`, `set`, `put`, ...) live with their kinds.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arc_swap::{ArcSwap, ArcSwapOption};
use serde_json::Value;
use tracing::warn;

use crate::config::DownlinkConfig;
use crate::error::{DownlinkError, ObserverError};
use crate::host::DownlinkHost;
use crate::kind::DownlinkKind;
use crate::link::{CommandAck, LinkModel};
use crate::model::LinkAddress;
use crate::observer::{LinkObserver, ObserverSet};
use crate::stage::Stage;

pub struct DownlinkView<K: DownlinkKind> {
    address: LinkAddress,
    keep_linked: AtomicBool,
    keep_synced: AtomicBool,
    stateful: AtomicBool,
    stage: Option<Arc<dyn Stage>>,
    observers: ArcSwap<ObserverSet<K::Observer>>,
    link: ArcSwapOption<LinkModel<K>>,
    host: ArcSwapOption<DownlinkHost>,
}

impl<K: DownlinkKind> DownlinkView<K> {
    /// A view whose deferred observers run on the delivering context.
    pub fn new(address: LinkAddress, config: DownlinkConfig) -> Arc<Self> {
        Arc::new(Self::build(address, config, None))
    }

    /// A view whose deferred observers always run on `stage`.
    pub fn on_stage(
        address: LinkAddress,
        config: DownlinkConfig,
        stage: Arc<dyn Stage>,
    ) -> Arc<Self> {
        Arc::new(Self::build(address, config, Some(stage)))
    }

    fn build(
        address: LinkAddress,
        config: DownlinkConfig,
        stage: Option<Arc<dyn Stage>>,
    ) -> Self {
        Self {
            address,
            keep_linked: AtomicBool::new(config.keep_linked),
            keep_synced: AtomicBool::new(config.keep_synced),
            stateful: AtomicBool::new(config.stateful),
            stage,
            observers: ArcSwap::from_pointee(ObserverSet::default()),
            link: ArcSwapOption::empty(),
            host: ArcSwapOption::empty(),
        }
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn address(&self) -> &LinkAddress {
        &self.address
    }

    pub fn stage(&self) -> Option<&Arc<dyn Stage>> {
        self.stage.as_ref()
    }

    pub fn config(&self) -> DownlinkConfig {
        DownlinkConfig {
            keep_linked: self.keep_linked(),
            keep_synced: self.keep_synced(),
            stateful: self.is_stateful(),
        }
    }

    pub fn keep_linked(&self) -> bool {
        self.keep_linked.load(Ordering::Acquire)
    }

    pub fn set_keep_linked(&self, keep_linked: bool) {
        self.keep_linked.store(keep_linked, Ordering::Release);
    }

    pub fn keep_synced(&self) -> bool {
        self.keep_synced.load(Ordering::Acquire)
    }

    pub fn set_keep_synced(&self, keep_synced: bool) {
        self.keep_synced.store(keep_synced, Ordering::Release);
    }

    pub fn is_stateful(&self) -> bool {
        self.stateful.load(Ordering::Acquire)
    }

    /// Toggle whether inbound deltas update the shared mirror. Applies to the
    /// link, so every view on it sees the change.
    pub fn set_stateful(&self, stateful: bool) {
        self.stateful.store(stateful, Ordering::Release);
        if let Some(link) = self.link.load_full() {
            link.set_stateful(stateful);
        }
    }

    /// The link this view is attached to, while open.
    pub fn link_model(&self) -> Option<Arc<LinkModel<K>>> {
        self.link.load_full()
    }

    pub fn is_open(&self) -> bool {
        self.link.load().is_some()
    }

    pub fn is_linked(&self) -> bool {
        self.link.load_full().is_some_and(|link| link.is_linked())
    }

    pub fn is_synced(&self) -> bool {
        self.link.load_full().is_some_and(|link| link.is_synced())
    }

    // ── Observers ────────────────────────────────────────────────────

    pub fn observe(&self, observer: Arc<K::Observer>) {
        self.observers.rcu(|set| set.with(&observer));
    }

    pub fn unobserve(&self, observer: &Arc<K::Observer>) {
        self.observers.rcu(|set| set.without(observer));
    }

    pub fn observer_set(&self) -> Arc<ObserverSet<K::Observer>> {
        self.observers.load_full()
    }

    pub(crate) fn fail(&self, error: &ObserverError) {
        for observer in self.observers.load().iter() {
            observer.did_fail(error);
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Bind to the host's link for this address, creating it if needed, and
    /// request a link when `keep_linked` is set. A no-op if already open.
    pub fn open(self: &Arc<Self>, host: &Arc<DownlinkHost>) -> Result<(), DownlinkError> {
        if self.is_open() {
            return Ok(());
        }
        let link = host.bind_downlink(self)?;
        self.host.store(Some(Arc::clone(host)));
        self.link.store(Some(Arc::clone(&link)));
        if !self.is_stateful() {
            link.set_stateful(false);
        }
        if self.keep_linked() {
            if self.keep_synced() {
                link.sync();
            } else {
                link.link();
            }
        }
        Ok(())
    }

    /// Detach from the link. The last view to close closes the link.
    pub fn close(self: &Arc<Self>) {
        self.host.store(None);
        if let Some(link) = self.link.swap(None) {
            link.remove_downlink(self);
        }
    }

    /// Forget `link` if it is still the one this view is attached to.
    /// Returns whether it was.
    pub(crate) fn detach(&self, link: &Arc<LinkModel<K>>) -> bool {
        let prev = self.link.rcu(|current| match current {
            Some(current) if Arc::ptr_eq(current, link) => None,
            other => other.clone(),
        });
        prev.is_some_and(|prev| Arc::ptr_eq(&prev, link))
    }

    pub(crate) fn reopen(self: &Arc<Self>, link: &Arc<LinkModel<K>>) {
        if !self.detach(link) {
            return;
        }
        let Some(host) = self.host.load_full() else {
            return;
        };
        if let Err(error) = self.open(&host) {
            warn!(address = %self.address, %error, "view failed to reopen");
        }
    }

    pub fn link(&self) {
        if let Some(link) = self.link.load_full() {
            link.link();
        }
    }

    pub fn sync(&self) {
        if let Some(link) = self.link.load_full() {
            link.sync();
        }
    }

    pub fn unlink(&self) {
        if let Some(link) = self.link.load_full() {
            link.unlink();
        }
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Queue a raw command for the remote lane.
    pub fn command(&self, body: Value) -> Result<(), DownlinkError> {
        let link = self.link.load_full().ok_or(DownlinkError::NotOpen)?;
        link.command(body);
        Ok(())
    }

    /// Like [`command`](Self::command), resolving once the frame is sent.
    pub fn command_with_ack(&self, body: Value) -> CommandAck {
        match self.link.load_full() {
            Some(link) => link.command_with_ack(body),
            None => CommandAck::failed(DownlinkError::NotOpen),
        }
    }
}

impl<K: DownlinkKind> std::fmt::Debug for DownlinkView<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownlinkView")
            .field("address", &self.address)
            .field("kind", &K::TYPE)
            .field("open", &self.is_open())
            .field("observers", &self.observers.load().len())
            .finish_non_exhaustive()
    }
}
