// ── Value downlinks ──
//
// A single replaceable cell. Inbound events carry the new value as the body;
// local writes are last-write-wins, so only the newest queued `set` is sent.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use super::{DownlinkKind, DownlinkType};
use crate::error::{DownlinkError, ObserverError, ObserverResult};
use crate::link::{LinkModel, UpCommand};
use crate::observer::LinkObserver;
use crate::reconcile::{Output, Reconciler, ValueInput};
use crate::relay::{DispatchOutcome, Dispatcher, Relay};
use crate::stage::Stage;
use crate::state::{Snapshot, StateCell, StateStream};
use crate::view::DownlinkView;

pub struct ValueKind;

/// Callbacks for value downlinks.
pub trait ValueObserver: LinkObserver {
    fn will_receive(&self, _body: &Value) -> ObserverResult {
        Ok(())
    }

    fn will_set(&self, _value: &Value) -> ObserverResult {
        Ok(())
    }

    /// `old` is `None` when nothing was set before, or when the link is not
    /// stateful.
    fn did_set(&self, _value: &Value, _old: Option<&Value>) -> ObserverResult {
        Ok(())
    }

    fn did_receive(&self, _body: &Value) -> ObserverResult {
        Ok(())
    }
}

// ── State ───────────────────────────────────────────────────────────

#[derive(Default)]
pub struct ValueState {
    cell: StateCell<Option<Value>>,
    reconciler: Reconciler<dyn ValueInput>,
}

impl ValueState {
    pub fn get(&self) -> Option<Value> {
        self.cell.load().state.clone()
    }

    pub fn snapshot(&self) -> Arc<Snapshot<Option<Value>>> {
        self.cell.load()
    }

    pub fn subscribe(&self) -> StateStream<Option<Value>> {
        self.cell.subscribe()
    }

    pub fn reconciler(&self) -> &Reconciler<dyn ValueInput> {
        &self.reconciler
    }

    fn replace(&self, value: &Value) -> Option<Value> {
        self.cell
            .update(|current| Some((Some(value.clone()), current.clone())))
            .flatten()
    }
}

impl DownlinkKind for ValueKind {
    type Observer = dyn ValueObserver;
    type State = ValueState;
    type Event = Value;

    const TYPE: DownlinkType = DownlinkType::Value;

    fn new_state() -> ValueState {
        ValueState::default()
    }

    fn decode(body: Value) -> Result<Value, DownlinkError> {
        Ok(body)
    }

    fn dispatch_event(
        link: &Arc<LinkModel<Self>>,
        value: Value,
    ) -> Result<DispatchOutcome, ObserverError> {
        let relay = ValueEventRelay {
            link: Arc::clone(link),
            value,
            old: None,
        };
        Dispatcher::new(relay, link.views()).run()
    }
}

// ── Relays ──────────────────────────────────────────────────────────

/// will_receive, will_set, did_set, did_receive. The cell is replaced as
/// did_set begins.
struct ValueEventRelay {
    link: Arc<LinkModel<ValueKind>>,
    value: Value,
    old: Option<Value>,
}

impl Relay<ValueKind> for ValueEventRelay {
    fn phase_count(&self) -> usize {
        4
    }

    fn begin_phase(&mut self, phase: usize) {
        if phase == 2 && self.link.is_stateful() {
            let state = self.link.state();
            self.old = state.replace(&self.value);
            state.reconciler.propagate(None);
        }
    }

    fn notify(&self, phase: usize, observer: &dyn ValueObserver) -> ObserverResult {
        match phase {
            0 => observer.will_receive(&self.value),
            1 => observer.will_set(&self.value),
            2 => observer.did_set(&self.value, self.old.as_ref()),
            _ => observer.did_receive(&self.value),
        }
    }

    fn done(&mut self) {
        self.link.cue_down();
    }

    fn abort(&mut self, _error: &ObserverError) {
        self.link.cue_down();
    }
}

/// Local write: did_set on every view, then the value is queued upstream.
struct ValueSetRelay {
    link: Arc<LinkModel<ValueKind>>,
    value: Value,
    old: Option<Value>,
}

impl ValueSetRelay {
    fn send(&mut self) {
        let value = std::mem::take(&mut self.value);
        self.link.enqueue(UpCommand::coalescing(value));
    }
}

impl Relay<ValueKind> for ValueSetRelay {
    fn phase_count(&self) -> usize {
        1
    }

    fn notify(&self, _phase: usize, observer: &dyn ValueObserver) -> ObserverResult {
        observer.did_set(&self.value, self.old.as_ref())
    }

    fn done(&mut self) {
        self.send();
    }

    fn abort(&mut self, _error: &ObserverError) {
        self.send();
    }
}

// ── Link operations ─────────────────────────────────────────────────

impl LinkModel<ValueKind> {
    /// Apply a local write, notify views and queue it upstream. Returns the
    /// value it replaced.
    pub fn set_local(self: &Arc<Self>, value: Value, stage: Option<Arc<dyn Stage>>) -> Option<Value> {
        let old = if self.is_stateful() {
            self.state().replace(&value)
        } else {
            None
        };
        let relay = ValueSetRelay {
            link: Arc::clone(self),
            value,
            old: old.clone(),
        };
        if let Err(error) = Dispatcher::new(relay, self.views()).on_stage(stage).run() {
            debug!(%error, "did_set observer failed");
        }
        old
    }

    /// Pull the bound input if it changed since the last reconcile.
    pub fn reconcile(self: &Arc<Self>, version: i64) {
        let reconciler = self.state().reconciler();
        let Some(pending) = reconciler.begin(version) else {
            return;
        };
        if pending.whole {
            let value = reconciler.input().and_then(|input| input.get());
            if let Some(value) = value {
                if self.state().get().as_ref() != Some(&value) {
                    self.set_local(value, None);
                }
            }
        }
        reconciler.finish(version);
    }
}

// ── View API ────────────────────────────────────────────────────────

impl DownlinkView<ValueKind> {
    pub fn get(&self) -> Option<Value> {
        self.link_model()?.state().get()
    }

    /// Replace the value locally and send it. Returns the previous local
    /// value, or `None` if the view is not open.
    pub fn set(&self, value: Value) -> Option<Value> {
        let Some(link) = self.link_model() else {
            warn!(address = %self.address(), "set on a downlink that is not open");
            return None;
        };
        let old = link.set_local(value, self.stage().cloned());
        link.state().reconciler().touch();
        link.reconcile(0);
        old
    }

    pub fn subscribe(&self) -> Option<StateStream<Option<Value>>> {
        Some(self.link_model()?.state().subscribe())
    }

    pub fn bind_input(&self, input: Arc<dyn ValueInput>) -> Result<(), DownlinkError> {
        let link = self.link_model().ok_or(DownlinkError::NotOpen)?;
        link.state().reconciler().bind_input(input);
        Ok(())
    }

    pub fn bind_output(&self, output: &Arc<dyn Output>) -> Result<(), DownlinkError> {
        let link = self.link_model().ok_or(DownlinkError::NotOpen)?;
        link.state().reconciler().bind_output(output);
        Ok(())
    }

    pub fn invalidate(&self) {
        if let Some(link) = self.link_model() {
            link.state().reconciler().invalidate();
        }
    }

    pub fn reconcile(&self, version: i64) {
        if let Some(link) = self.link_model() {
            link.reconcile(version);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn replace_returns_previous() {
        let state = ValueState::default();
        assert_eq!(state.replace(&json!("a")), None);
        assert_eq!(state.replace(&json!("b")), Some(json!("a")));
        assert_eq!(state.get(), Some(json!("b")));
        assert_eq!(state.snapshot().revision, 2);
    }
}
