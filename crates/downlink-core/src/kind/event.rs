// ── Event downlinks ──
//
// Stateless: every inbound body is forwarded to observers as-is.

use std::sync::Arc;

use serde_json::Value;

use super::{DownlinkKind, DownlinkType};
use crate::error::{DownlinkError, ObserverError, ObserverResult};
use crate::link::LinkModel;
use crate::observer::LinkObserver;
use crate::relay::{DispatchOutcome, Dispatcher, Relay};

pub struct EventKind;

pub trait EventObserver: LinkObserver {
    fn will_receive(&self, _body: &Value) -> ObserverResult {
        Ok(())
    }

    fn on_event(&self, _body: &Value) -> ObserverResult {
        Ok(())
    }

    fn did_receive(&self, _body: &Value) -> ObserverResult {
        Ok(())
    }
}

impl DownlinkKind for EventKind {
    type Observer = dyn EventObserver;
    type State = ();
    type Event = Value;

    const TYPE: DownlinkType = DownlinkType::Event;

    fn new_state() {}

    fn decode(body: Value) -> Result<Value, DownlinkError> {
        Ok(body)
    }

    fn dispatch_event(
        link: &Arc<LinkModel<Self>>,
        body: Value,
    ) -> Result<DispatchOutcome, ObserverError> {
        let relay = EventRelay {
            link: Arc::clone(link),
            body,
        };
        Dispatcher::new(relay, link.views()).run()
    }
}

struct EventRelay {
    link: Arc<LinkModel<EventKind>>,
    body: Value,
}

impl Relay<EventKind> for EventRelay {
    fn phase_count(&self) -> usize {
        3
    }

    fn notify(&self, phase: usize, observer: &dyn EventObserver) -> ObserverResult {
        match phase {
            0 => observer.will_receive(&self.body),
            1 => observer.on_event(&self.body),
            _ => observer.did_receive(&self.body),
        }
    }

    fn done(&mut self) {
        self.link.cue_down();
    }

    fn abort(&mut self, _error: &ObserverError) {
        self.link.cue_down();
    }
}
