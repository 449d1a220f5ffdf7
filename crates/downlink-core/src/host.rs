// ── Downlink host ──
//
// Registry of open links, keyed by link identity, so every view on the same
// remote lane shares one LinkModel. The transport is asked for a context
// exactly once per link.

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tracing::debug;

use crate::error::DownlinkError;
use crate::fanout::same;
use crate::kind::DownlinkKind;
use crate::link::{LinkBinding, LinkContext, LinkModel};
use crate::model::{LinkAddress, LinkKey};
use crate::view::DownlinkView;

/// The transport/session layer, seen from the link side.
pub trait Transport: Send + Sync + 'static {
    /// Open a channel for a new link. The binding is held weakly; once every
    /// view has closed, the link is dropped.
    fn open_link(&self, address: &LinkAddress, binding: Weak<dyn LinkBinding>) -> Arc<dyn LinkContext>;
}

pub struct DownlinkHost {
    transport: Arc<dyn Transport>,
    links: DashMap<LinkKey, Arc<dyn LinkBinding>>,
}

impl DownlinkHost {
    pub fn new(transport: Arc<dyn Transport>) -> Arc<Self> {
        Arc::new(Self {
            transport,
            links: DashMap::new(),
        })
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Attach `view` to the link for its address, creating the link if none
    /// is open. Fails when an open link of another kind already serves the
    /// address.
    pub fn bind_downlink<K: DownlinkKind>(
        self: &Arc<Self>,
        view: &Arc<DownlinkView<K>>,
    ) -> Result<Arc<LinkModel<K>>, DownlinkError> {
        let address = view.address();
        let key = address.key();
        loop {
            let binding = Arc::clone(
                self.links
                    .entry(key.clone())
                    .or_insert_with(|| {
                        debug!(%address, kind = %K::TYPE, "creating link");
                        LinkModel::<K>::create(self, address.clone())
                    })
                    .value(),
            );
            let actual = binding.downlink_type();
            let Ok(link) = Arc::clone(&binding).into_any().downcast::<LinkModel<K>>() else {
                return Err(DownlinkError::TypeMismatch {
                    node: address.node.clone(),
                    lane: address.lane.clone(),
                    expected: K::TYPE,
                    actual,
                });
            };
            match link.add_downlink(view) {
                Ok(()) => return Ok(link),
                // Lost a race with the last view closing; drop the stale entry
                // and bind a fresh link.
                Err(DownlinkError::Closed) => {
                    self.links.remove_if(&key, |_, current| same(current, &binding));
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Forget `link` if it is still the one registered for its address.
    pub fn close_downlink(&self, link: &Arc<dyn LinkBinding>) {
        let key = link.address().key();
        if self.links.remove_if(&key, |_, current| same(current, link)).is_some() {
            debug!(address = %link.address(), "link unregistered");
        }
    }

    pub fn binding(&self, address: &LinkAddress) -> Option<Arc<dyn LinkBinding>> {
        self.links.get(&address.key()).map(|entry| Arc::clone(entry.value()))
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Reopen every link, e.g. after the transport session was replaced.
    pub fn reopen(&self) {
        let bindings: Vec<Arc<dyn LinkBinding>> =
            self.links.iter().map(|entry| Arc::clone(entry.value())).collect();
        for binding in bindings {
            binding.reopen();
        }
    }
}
