// ── Relay dispatch ──
//
// A relay delivers one event to every view attached to a link, phase by
// phase. For each (phase, view) pair the view's preemptive observers run
// first, on the delivering context; deferred observers run on the view's
// stage. When a hop is needed the dispatcher records its position and
// re-enqueues itself on the target stage, so the whole dispatch is a plain
// struct that resumes where it stopped.

use std::sync::Arc;

use strum::Display;
use tracing::{trace, warn};

use crate::error::{ObserverError, ObserverResult};
use crate::fanout::Fanout;
use crate::kind::DownlinkKind;
use crate::observer::LinkObserver;
use crate::stage::{Stage, same_stage};
use crate::view::DownlinkView;

/// What one event does at each phase.
pub trait Relay<K: DownlinkKind>: Send + 'static {
    fn phase_count(&self) -> usize;

    fn first_phase(&self) -> usize {
        0
    }

    /// Runs once per phase, before any observer sees it. Relays that mutate
    /// typed state do it here so every view observes the same transition.
    fn begin_phase(&mut self, _phase: usize) {}

    fn notify(&self, phase: usize, observer: &K::Observer) -> ObserverResult;

    /// Every (phase, view) pair completed.
    fn done(&mut self) {}

    /// An observer error ended the dispatch early.
    fn abort(&mut self, _error: &ObserverError) {}
}

/// Result of running a dispatcher up to its next stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Completed,
    /// Re-enqueued on a view's stage; the rest runs there.
    Suspended,
}

/// Resumable cursor over (phase, view, preemptive).
pub struct Dispatcher<K: DownlinkKind, R> {
    relay: R,
    views: Arc<Fanout<DownlinkView<K>>>,
    phase: usize,
    view_index: usize,
    preemptive: bool,
    stage: Option<Arc<dyn Stage>>,
}

impl<K: DownlinkKind, R: Relay<K>> Dispatcher<K, R> {
    /// Dispatch over a snapshot of the view set. Views attached after this
    /// point do not see the event.
    pub fn new(relay: R, views: Arc<Fanout<DownlinkView<K>>>) -> Self {
        let phase = relay.first_phase();
        Self {
            relay,
            views,
            phase,
            view_index: 0,
            preemptive: true,
            stage: None,
        }
    }

    /// Declare the stage the caller is running on. Views bound to it run
    /// their deferred observers inline.
    pub fn on_stage(mut self, stage: Option<Arc<dyn Stage>>) -> Self {
        self.stage = stage;
        self
    }

    pub fn run(mut self) -> Result<DispatchOutcome, ObserverError> {
        let phase_count = self.relay.phase_count();
        while self.phase < phase_count {
            if self.view_index == 0 && self.preemptive {
                self.relay.begin_phase(self.phase);
            }
            while let Some(view) = self.views.get(self.view_index).cloned() {
                let observers = view.observer_set();
                if self.preemptive {
                    for observer in observers.preemptive().iter() {
                        self.notify(&view, observer)?;
                    }
                    self.preemptive = false;
                }
                if !observers.deferred().is_empty() {
                    if let Some(target) = self.hop_target(&view) {
                        trace!(
                            phase = self.phase,
                            view = self.view_index,
                            "relay hopping to view stage"
                        );
                        self.stage = Some(Arc::clone(&target));
                        target.execute(Box::new(move || self.resume()));
                        return Ok(DispatchOutcome::Suspended);
                    }
                    for observer in observers.deferred().iter() {
                        self.notify(&view, observer)?;
                    }
                }
                self.view_index += 1;
                self.preemptive = true;
            }
            self.phase += 1;
            self.view_index = 0;
            self.preemptive = true;
        }
        self.relay.done();
        Ok(DispatchOutcome::Completed)
    }

    fn resume(self) {
        if let Err(error) = self.run() {
            warn!(%error, "observer failed on stage");
        }
    }

    fn hop_target(&self, view: &DownlinkView<K>) -> Option<Arc<dyn Stage>> {
        let target = view.stage()?;
        match self.stage {
            Some(ref current) if same_stage(current, target) => None,
            _ => Some(Arc::clone(target)),
        }
    }

    fn notify(&mut self, view: &DownlinkView<K>, observer: &K::Observer) -> ObserverResult {
        let Err(error) = self.relay.notify(self.phase, observer) else {
            return Ok(());
        };
        if !error.is_fatal() {
            view.fail(&error);
        }
        self.relay.abort(&error);
        Err(error)
    }
}

// ── Lifecycle relay ─────────────────────────────────────────────────

/// A link lifecycle callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum LinkEvent {
    WillLink,
    DidLink,
    WillSync,
    DidSync,
    WillUnlink,
    DidUnlink,
    DidConnect,
    DidDisconnect,
    DidClose,
}

impl LinkEvent {
    pub fn notify<O: ?Sized + LinkObserver>(self, observer: &O) -> ObserverResult {
        match self {
            Self::WillLink => observer.will_link(),
            Self::DidLink => observer.did_link(),
            Self::WillSync => observer.will_sync(),
            Self::DidSync => observer.did_sync(),
            Self::WillUnlink => observer.will_unlink(),
            Self::DidUnlink => observer.did_unlink(),
            Self::DidConnect => observer.did_connect(),
            Self::DidDisconnect => observer.did_disconnect(),
            Self::DidClose => observer.did_close(),
        }
    }
}

/// Single-phase relay for a lifecycle callback, with an optional
/// continuation run once the dispatch ends either way.
pub(crate) struct LifecycleRelay {
    event: LinkEvent,
    then: Option<Box<dyn FnOnce() + Send>>,
}

impl LifecycleRelay {
    pub(crate) fn new(event: LinkEvent) -> Self {
        Self { event, then: None }
    }

    pub(crate) fn then(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.then = Some(Box::new(f));
        self
    }

    fn finish(&mut self) {
        if let Some(then) = self.then.take() {
            then();
        }
    }
}

impl<K: DownlinkKind> Relay<K> for LifecycleRelay {
    fn phase_count(&self) -> usize {
        1
    }

    fn notify(&self, _phase: usize, observer: &K::Observer) -> ObserverResult {
        self.event.notify(observer)
    }

    fn done(&mut self) {
        self.finish();
    }

    fn abort(&mut self, _error: &ObserverError) {
        self.finish();
    }
}
