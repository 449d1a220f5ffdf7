// ── Link state machine ──
//
// One LinkModel per remote lane. It owns the status word, the view set and
// the typed state, and runs the push/pull handshake with the transport:
// the transport drives it through `LinkBinding`, and it answers through the
// `LinkContext` the transport handed out when the link was opened.

mod status;
mod uplink;

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwapOption;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::error::{DownlinkError, ObserverError};
use crate::fanout::Fanout;
use crate::host::DownlinkHost;
use crate::kind::{DownlinkKind, DownlinkType};
use crate::model::{Envelope, LinkAddress};
use crate::relay::{DispatchOutcome, Dispatcher, LifecycleRelay, LinkEvent};
use crate::view::DownlinkView;

pub use status::{LinkStatus, UpFrame};
pub use uplink::CommandAck;
pub(crate) use uplink::UpCommand;

use uplink::UpQueue;

/// Transport-side half of a link: what the link asks of the transport.
pub trait LinkContext: Send + Sync {
    /// Send one outbound frame. Only called in answer to `pull_up`.
    fn push_up(&self, envelope: Envelope);
    /// Nothing to send for the slot granted by the last `pull_up`.
    fn skip_up(&self);
    /// Ask for an upstream slot; the transport answers with `pull_up`.
    fn feed_up(&self);
    /// Grant one inbound frame; the transport answers with `push_down`.
    fn pull_down(&self);
    /// The link has no more demand for inbound frames.
    fn skip_down(&self);
    fn did_open_down(&self);
    fn did_close_down(&self);
}

/// Link-side half: what the transport drives. Object safe so a transport can
/// hold links of every kind.
pub trait LinkBinding: Send + Sync + 'static {
    fn address(&self) -> &LinkAddress;

    fn downlink_type(&self) -> DownlinkType;

    fn status(&self) -> LinkStatus;

    /// Deliver one inbound frame granted by `pull_down`.
    fn push_down(self: Arc<Self>, envelope: Envelope) -> Result<(), DownlinkError>;

    /// An upstream slot granted after `feed_up`.
    fn pull_up(self: Arc<Self>);

    fn feed_down(&self);

    fn did_connect(self: Arc<Self>);

    fn did_disconnect(self: Arc<Self>);

    /// The transport closed the link for good.
    fn did_close(self: Arc<Self>);

    /// Detach every view and reopen each against its host.
    fn reopen(self: Arc<Self>);

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

// ── LinkModel ───────────────────────────────────────────────────────

/// State machine and fan-out registry for one downlink channel.
pub struct LinkModel<K: DownlinkKind> {
    address: LinkAddress,
    status: AtomicU32,
    /// `None` once closed; a closed model never reopens.
    views: ArcSwapOption<Fanout<DownlinkView<K>>>,
    context: Arc<dyn LinkContext>,
    host: Weak<DownlinkHost>,
    up_queue: UpQueue,
    stateful: AtomicBool,
    state: K::State,
}

impl<K: DownlinkKind> LinkModel<K> {
    /// A link not registered with any host, talking to `context` directly.
    pub fn new(address: LinkAddress, context: Arc<dyn LinkContext>) -> Arc<Self> {
        Arc::new(Self::build(address, context, Weak::new()))
    }

    /// Open a link through the host's transport.
    pub(crate) fn create(host: &Arc<DownlinkHost>, address: LinkAddress) -> Arc<dyn LinkBinding> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let binding: Weak<dyn LinkBinding> = weak.clone();
            let context = host.transport().open_link(&address, binding);
            Self::build(address, context, Arc::downgrade(host))
        })
    }

    fn build(address: LinkAddress, context: Arc<dyn LinkContext>, host: Weak<DownlinkHost>) -> Self {
        Self {
            address,
            status: AtomicU32::new(0),
            views: ArcSwapOption::from_pointee(Fanout::Empty),
            context,
            host,
            up_queue: UpQueue::default(),
            stateful: AtomicBool::new(true),
            state: K::new_state(),
        }
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn address(&self) -> &LinkAddress {
        &self.address
    }

    pub fn status(&self) -> LinkStatus {
        LinkStatus::from_bits(self.status.load(Ordering::Acquire))
    }

    pub fn state(&self) -> &K::State {
        &self.state
    }

    /// Snapshot of the attached views; empty once closed.
    pub fn views(&self) -> Arc<Fanout<DownlinkView<K>>> {
        self.views.load_full().unwrap_or_default()
    }

    pub fn is_open(&self) -> bool {
        self.status().contains(LinkStatus::OPENED)
    }

    pub fn is_closed(&self) -> bool {
        self.views.load().is_none()
    }

    pub fn is_linked(&self) -> bool {
        self.status().is_linked()
    }

    pub fn is_synced(&self) -> bool {
        self.status().is_synced()
    }

    pub fn is_stateful(&self) -> bool {
        self.stateful.load(Ordering::Acquire)
    }

    pub fn set_stateful(&self, stateful: bool) {
        self.stateful.store(stateful, Ordering::Release);
    }

    pub fn queued_commands(&self) -> usize {
        self.up_queue.len()
    }

    // ── Status transitions ───────────────────────────────────────────

    /// CAS loop applying `f` to the status word. Returns the status `f` was
    /// applied to and its output, or `None` if `f` declined.
    fn transition<R>(&self, f: impl Fn(LinkStatus) -> Option<(LinkStatus, R)>) -> Option<(LinkStatus, R)> {
        let mut current = self.status.load(Ordering::Acquire);
        loop {
            let old = LinkStatus::from_bits(current);
            let (next, out) = f(old)?;
            if next == old {
                return Some((old, out));
            }
            match self.status.compare_exchange_weak(
                current,
                next.bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some((old, out)),
                Err(actual) => current = actual,
            }
        }
    }

    fn update_status(&self, f: impl Fn(LinkStatus) -> Option<LinkStatus>) -> Option<LinkStatus> {
        self.transition(|status| f(status).map(|next| (next, ())))
            .map(|(old, ())| old)
    }

    // ── Link requests ────────────────────────────────────────────────

    pub fn link(&self) {
        if let Some(old) = self.update_status(LinkStatus::link) {
            debug!(node = %self.address.node, lane = %self.address.lane, "link requested");
            if !old.contains(LinkStatus::FEEDING_UP) {
                self.context.feed_up();
            }
        }
    }

    pub fn sync(&self) {
        if let Some(old) = self.update_status(LinkStatus::sync) {
            debug!(node = %self.address.node, lane = %self.address.lane, "sync requested");
            if !old.contains(LinkStatus::FEEDING_UP) {
                self.context.feed_up();
            }
        }
    }

    pub fn unlink(&self) {
        let Some(old) = self.update_status(LinkStatus::unlink) else {
            return;
        };
        if old.intersects(LinkStatus::LINK | LinkStatus::SYNC) {
            debug!(node = %self.address.node, lane = %self.address.lane, "unsent link request cancelled");
        } else {
            debug!(node = %self.address.node, lane = %self.address.lane, "unlink requested");
            if !old.contains(LinkStatus::FEEDING_UP) {
                self.context.feed_up();
            }
        }
    }

    // ── Upstream ─────────────────────────────────────────────────────

    pub fn command(&self, body: Value) {
        self.enqueue(UpCommand::new(body));
    }

    pub fn command_with_ack(&self, body: Value) -> CommandAck {
        let (command, ack) = UpCommand::with_ack(body);
        self.enqueue(command);
        ack
    }

    pub(crate) fn enqueue(&self, command: UpCommand) {
        if self.is_closed() {
            command.resolve(Err(DownlinkError::Closed));
            return;
        }
        self.up_queue.push(command);
        self.cue_up();
    }

    /// Mark a command ready and ask for a slot if none is pending.
    pub fn cue_up(&self) {
        let old = self.update_status(|status| {
            let next = status.with(LinkStatus::CUED_UP);
            Some(if status.contains(LinkStatus::OPENED) {
                next.with(LinkStatus::FEEDING_UP)
            } else {
                next
            })
        });
        if let Some(old) = old {
            if old.contains(LinkStatus::OPENED) && !old.contains(LinkStatus::FEEDING_UP) {
                self.context.feed_up();
            }
        }
    }

    pub fn feed_up(&self) {
        if self.update_status(LinkStatus::feed_up).is_some() {
            self.context.feed_up();
        }
    }

    fn after_push_up(&self) {
        if !self.up_queue.is_empty() {
            self.cue_up();
        } else if self.status().has_pending_up() {
            self.feed_up();
        }
    }

    // ── Downstream ───────────────────────────────────────────────────

    /// Start a feeding cycle; pulls once unless a pull is outstanding.
    pub fn feed_down(&self) {
        if self.update_status(LinkStatus::feed_down).is_some() {
            trace!(node = %self.address.node, lane = %self.address.lane, "pull down");
            self.context.pull_down();
        }
    }

    /// Called when a delivered frame's relay has finished.
    pub fn cue_down(&self) {
        let subscribed = self
            .views
            .load_full()
            .is_some_and(|views| !views.is_empty());
        match self.transition(|status| status.cue_down(subscribed)) {
            Some((_, true)) => self.context.pull_down(),
            Some((_, false)) => self.context.skip_down(),
            None => {}
        }
    }

    // ── Fan-out registry ─────────────────────────────────────────────

    /// Attach a view. Fails with `Closed` once the last view has left; the
    /// caller binds a fresh link instead.
    pub fn add_downlink(self: &Arc<Self>, view: &Arc<DownlinkView<K>>) -> Result<(), DownlinkError> {
        let prev = self
            .views
            .rcu(|current| current.as_ref().map(|views| Arc::new(views.with(view))));
        let Some(prev) = prev else {
            return Err(DownlinkError::Closed);
        };
        if prev.is_empty() {
            self.open_down();
        }
        Ok(())
    }

    /// Detach a view. Removing the last one closes the link.
    pub fn remove_downlink(self: &Arc<Self>, view: &Arc<DownlinkView<K>>) {
        let prev = self.views.rcu(|current| match current {
            Some(views) if views.contains(view) => {
                let next = views.without(view);
                (!next.is_empty()).then(|| Arc::new(next))
            }
            other => other.clone(),
        });
        let Some(prev) = prev else { return };
        if !prev.contains(view) {
            return;
        }
        if prev.len() == 1 {
            self.close_down();
        }
        let removed = Arc::new(Fanout::One(Arc::clone(view)));
        if let Err(error) = Dispatcher::new(LifecycleRelay::new(LinkEvent::DidClose), removed).run() {
            debug!(%error, "did_close observer failed");
        }
    }

    fn open_down(&self) {
        if self.update_status(LinkStatus::open).is_none() {
            return;
        }
        debug!(node = %self.address.node, lane = %self.address.lane, kind = %K::TYPE, "link opened");
        self.context.did_open_down();
        self.feed_down();
        if !self.up_queue.is_empty() {
            self.cue_up();
        }
    }

    fn close_down(self: &Arc<Self>) {
        if let Some(host) = self.host.upgrade() {
            let binding: Arc<dyn LinkBinding> = Arc::<Self>::clone(self);
            host.close_downlink(&binding);
        }
        let dropped = self.up_queue.fail_all();
        self.status.store(LinkStatus::CLOSED.bits(), Ordering::Release);
        debug!(node = %self.address.node, lane = %self.address.lane, dropped, "link closed");
        self.context.did_close_down();
    }

    // ── Dispatch helpers ─────────────────────────────────────────────

    fn dispatch_lifecycle(
        &self,
        event: LinkEvent,
        then: impl FnOnce() + Send + 'static,
    ) -> Result<DispatchOutcome, ObserverError> {
        Dispatcher::new(LifecycleRelay::new(event).then(then), self.views()).run()
    }

    fn dispatch_then_cue(self: &Arc<Self>, event: LinkEvent) -> Result<DispatchOutcome, ObserverError> {
        let link = Arc::clone(self);
        self.dispatch_lifecycle(event, move || link.cue_down())
    }

    fn send_request(self: &Arc<Self>, event: LinkEvent, envelope: Envelope) {
        let link = Arc::clone(self);
        let sent = self.dispatch_lifecycle(event, move || {
            trace!(node = %link.address.node, lane = %link.address.lane, kind = %envelope, "push up");
            link.context.push_up(envelope);
            link.after_push_up();
        });
        if let Err(error) = sent {
            debug!(%error, %event, "observer failed before request was sent");
        }
    }

    /// Re-request the link after a reconnect if any view wants it kept.
    fn relink(&self) {
        let views = self.views();
        if !views.iter().any(|view| view.keep_linked()) {
            return;
        }
        if views.iter().any(|view| view.keep_synced()) {
            self.sync();
        } else {
            self.link();
        }
    }
}

// ── Transport-facing binding ────────────────────────────────────────

impl<K: DownlinkKind> LinkBinding for LinkModel<K> {
    fn address(&self) -> &LinkAddress {
        &self.address
    }

    fn downlink_type(&self) -> DownlinkType {
        K::TYPE
    }

    fn status(&self) -> LinkStatus {
        Self::status(self)
    }

    fn push_down(self: Arc<Self>, envelope: Envelope) -> Result<(), DownlinkError> {
        self.update_status(|status| Some(status.push_down()));
        trace!(node = %self.address.node, lane = %self.address.lane, kind = %envelope, "push down");
        let outcome = match envelope {
            Envelope::Event(header) => match K::decode(header.body) {
                Ok(event) => K::dispatch_event(&self, event),
                Err(error) => {
                    warn!(node = %self.address.node, lane = %self.address.lane, %error, "dropping undecodable event");
                    self.cue_down();
                    return Err(error);
                }
            },
            Envelope::Linked(_) => {
                self.update_status(|status| Some(status.did_link()));
                debug!(node = %self.address.node, lane = %self.address.lane, "linked");
                self.dispatch_then_cue(LinkEvent::DidLink)
            }
            Envelope::Synced(_) => {
                self.update_status(|status| Some(status.did_sync()));
                debug!(node = %self.address.node, lane = %self.address.lane, "synced");
                self.dispatch_then_cue(LinkEvent::DidSync)
            }
            Envelope::Unlinked(_) => {
                self.update_status(|status| Some(status.did_unlink()));
                debug!(node = %self.address.node, lane = %self.address.lane, "unlinked");
                self.dispatch_then_cue(LinkEvent::DidUnlink)
            }
            other @ (Envelope::LinkRequest(_)
            | Envelope::SyncRequest(_)
            | Envelope::UnlinkRequest(_)
            | Envelope::Command(_)) => {
                warn!(node = %self.address.node, lane = %self.address.lane, kind = %other, "ignoring outbound envelope sent downstream");
                self.cue_down();
                return Ok(());
            }
        };
        outcome.map(|_| ()).map_err(DownlinkError::from)
    }

    fn pull_up(self: Arc<Self>) {
        let Some((_, frame)) = self.transition(|status| Some(status.pull_up())) else {
            return;
        };
        let (event, envelope) = match frame {
            Some(UpFrame::Unlink) => (LinkEvent::WillUnlink, Envelope::unlink_request(&self.address)),
            Some(UpFrame::Sync) => (LinkEvent::WillSync, Envelope::sync_request(&self.address)),
            Some(UpFrame::Link) => (LinkEvent::WillLink, Envelope::link_request(&self.address)),
            Some(UpFrame::Command) => {
                if let Some(command) = self.up_queue.pop() {
                    let envelope = Envelope::command(&self.address, command.body.clone());
                    trace!(node = %self.address.node, lane = %self.address.lane, "push up command");
                    self.context.push_up(envelope);
                    command.resolve(Ok(()));
                    self.after_push_up();
                } else {
                    self.context.skip_up();
                }
                return;
            }
            None => {
                self.context.skip_up();
                return;
            }
        };
        self.send_request(event, envelope);
    }

    fn feed_down(&self) {
        Self::feed_down(self);
    }

    fn did_connect(self: Arc<Self>) {
        debug!(node = %self.address.node, lane = %self.address.lane, "connected");
        if let Err(error) = self.dispatch_lifecycle(LinkEvent::DidConnect, || {}) {
            debug!(%error, "did_connect observer failed");
        }
        Self::feed_down(&self);
        self.relink();
    }

    fn did_disconnect(self: Arc<Self>) {
        self.update_status(|status| Some(status.did_disconnect()));
        debug!(node = %self.address.node, lane = %self.address.lane, "disconnected");
        if let Err(error) = self.dispatch_lifecycle(LinkEvent::DidDisconnect, || {}) {
            debug!(%error, "did_disconnect observer failed");
        }
    }

    fn did_close(self: Arc<Self>) {
        let Some(views) = self.views.swap(None) else {
            return;
        };
        if !views.is_empty() {
            self.close_down();
        }
        for view in views.iter() {
            view.detach(&self);
        }
        if let Err(error) = Dispatcher::new(LifecycleRelay::new(LinkEvent::DidClose), views).run() {
            debug!(%error, "did_close observer failed");
        }
    }

    fn reopen(self: Arc<Self>) {
        let Some(views) = self.views.swap(None) else {
            return;
        };
        if !views.is_empty() {
            self.close_down();
        }
        debug!(node = %self.address.node, lane = %self.address.lane, views = views.len(), "reopening link");
        for view in views.iter() {
            view.reopen(&self);
        }
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
