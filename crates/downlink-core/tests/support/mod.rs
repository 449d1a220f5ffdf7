#![allow(dead_code, clippy::unwrap_used)]
// Shared fixtures: a transport that records what links ask of it, and
// observers that log every callback they receive.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use downlink_core::{
    Dispatch, DownlinkHost, Envelope, EventObserver, LinkAddress, LinkBinding, LinkContext,
    LinkObserver, ListObserver, MapObserver, ObserverError, ObserverResult, Transport,
    ValueObserver,
};

// ── Tracing ─────────────────────────────────────────────────────────

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ── Transport ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum ContextCall {
    PushUp(Envelope),
    SkipUp,
    FeedUp,
    PullDown,
    SkipDown,
    DidOpenDown,
    DidCloseDown,
}

#[derive(Default)]
pub struct RecordingContext {
    calls: Mutex<Vec<ContextCall>>,
}

impl RecordingContext {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<ContextCall> {
        self.calls.lock().clone()
    }

    pub fn take(&self) -> Vec<ContextCall> {
        std::mem::take(&mut *self.calls.lock())
    }

    pub fn count(&self, call: &ContextCall) -> usize {
        self.calls.lock().iter().filter(|c| *c == call).count()
    }

    /// Outbound frames, in push order.
    pub fn pushed(&self) -> Vec<Envelope> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                ContextCall::PushUp(envelope) => Some(envelope.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: ContextCall) {
        self.calls.lock().push(call);
    }
}

impl LinkContext for RecordingContext {
    fn push_up(&self, envelope: Envelope) {
        self.record(ContextCall::PushUp(envelope));
    }

    fn skip_up(&self) {
        self.record(ContextCall::SkipUp);
    }

    fn feed_up(&self) {
        self.record(ContextCall::FeedUp);
    }

    fn pull_down(&self) {
        self.record(ContextCall::PullDown);
    }

    fn skip_down(&self) {
        self.record(ContextCall::SkipDown);
    }

    fn did_open_down(&self) {
        self.record(ContextCall::DidOpenDown);
    }

    fn did_close_down(&self) {
        self.record(ContextCall::DidCloseDown);
    }
}

pub struct OpenedLink {
    pub address: LinkAddress,
    pub context: Arc<RecordingContext>,
    pub binding: Weak<dyn LinkBinding>,
}

#[derive(Default)]
pub struct MockTransport {
    opened: Mutex<Vec<OpenedLink>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn opened(&self) -> usize {
        self.opened.lock().len()
    }

    /// Context and binding of the `index`th link opened.
    pub fn link(&self, index: usize) -> (Arc<RecordingContext>, Arc<dyn LinkBinding>) {
        let opened = self.opened.lock();
        let link = &opened[index];
        (Arc::clone(&link.context), link.binding.upgrade().unwrap())
    }
}

impl Transport for MockTransport {
    fn open_link(&self, address: &LinkAddress, binding: Weak<dyn LinkBinding>) -> Arc<dyn LinkContext> {
        let context = RecordingContext::new();
        self.opened.lock().push(OpenedLink {
            address: address.clone(),
            context: Arc::clone(&context),
            binding,
        });
        context
    }
}

pub fn host() -> (Arc<MockTransport>, Arc<DownlinkHost>) {
    let transport = MockTransport::new();
    let host = DownlinkHost::new(transport.clone());
    (transport, host)
}

// ── Observers ───────────────────────────────────────────────────────

/// Logs every callback as a short string, e.g. `did_update(0,"x",None)`.
pub struct Recorder {
    pub name: String,
    dispatch: Dispatch,
    log: Arc<Mutex<Vec<String>>>,
    fail_on: Option<(String, ObserverError)>,
}

impl Recorder {
    pub fn new(name: &str) -> Arc<Self> {
        Self::build(name, Dispatch::Deferred, Arc::default(), None)
    }

    pub fn preemptive(name: &str) -> Arc<Self> {
        Self::build(name, Dispatch::Preemptive, Arc::default(), None)
    }

    /// A recorder appending to a log shared with other recorders.
    pub fn shared(name: &str, dispatch: Dispatch, log: &Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        Self::build(name, dispatch, Arc::clone(log), None)
    }

    /// A recorder whose `callback` returns `error`.
    pub fn failing(name: &str, callback: &str, error: ObserverError) -> Arc<Self> {
        Self::build(
            name,
            Dispatch::Deferred,
            Arc::default(),
            Some((callback.to_owned(), error)),
        )
    }

    fn build(
        name: &str,
        dispatch: Dispatch,
        log: Arc<Mutex<Vec<String>>>,
        fail_on: Option<(String, ObserverError)>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_owned(),
            dispatch,
            log,
            fail_on,
        })
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    pub fn clear(&self) {
        self.log.lock().clear();
    }

    fn hit(&self, entry: String) -> ObserverResult {
        let callback = entry.split('(').next().unwrap_or_default().to_owned();
        self.log.lock().push(entry);
        match &self.fail_on {
            Some((on, error)) if *on == callback => Err(error.clone()),
            _ => Ok(()),
        }
    }
}

fn opt(value: Option<&Value>) -> String {
    value.map_or_else(|| "None".to_owned(), Value::to_string)
}

impl LinkObserver for Recorder {
    fn dispatch(&self) -> Dispatch {
        self.dispatch
    }

    fn will_link(&self) -> ObserverResult {
        self.hit("will_link".into())
    }

    fn did_link(&self) -> ObserverResult {
        self.hit("did_link".into())
    }

    fn will_sync(&self) -> ObserverResult {
        self.hit("will_sync".into())
    }

    fn did_sync(&self) -> ObserverResult {
        self.hit("did_sync".into())
    }

    fn will_unlink(&self) -> ObserverResult {
        self.hit("will_unlink".into())
    }

    fn did_unlink(&self) -> ObserverResult {
        self.hit("did_unlink".into())
    }

    fn did_connect(&self) -> ObserverResult {
        self.hit("did_connect".into())
    }

    fn did_disconnect(&self) -> ObserverResult {
        self.hit("did_disconnect".into())
    }

    fn did_close(&self) -> ObserverResult {
        self.hit("did_close".into())
    }

    fn did_fail(&self, error: &ObserverError) {
        self.log.lock().push(format!("did_fail({error})"));
    }
}

impl ValueObserver for Recorder {
    fn will_receive(&self, body: &Value) -> ObserverResult {
        self.hit(format!("will_receive({body})"))
    }

    fn will_set(&self, value: &Value) -> ObserverResult {
        self.hit(format!("will_set({value})"))
    }

    fn did_set(&self, value: &Value, old: Option<&Value>) -> ObserverResult {
        self.hit(format!("did_set({value},{})", opt(old)))
    }

    fn did_receive(&self, body: &Value) -> ObserverResult {
        self.hit(format!("did_receive({body})"))
    }
}

impl ListObserver for Recorder {
    fn will_receive(&self, body: &Value) -> ObserverResult {
        self.hit(format!("will_receive({body})"))
    }

    fn did_receive(&self, body: &Value) -> ObserverResult {
        self.hit(format!("did_receive({body})"))
    }

    fn will_update(&self, index: usize, value: &Value) -> ObserverResult {
        self.hit(format!("will_update({index},{value})"))
    }

    fn did_update(&self, index: usize, value: &Value, old: Option<&Value>) -> ObserverResult {
        self.hit(format!("did_update({index},{value},{})", opt(old)))
    }

    fn will_move(&self, from: usize, to: usize) -> ObserverResult {
        self.hit(format!("will_move({from},{to})"))
    }

    fn did_move(&self, from: usize, to: usize, value: Option<&Value>) -> ObserverResult {
        self.hit(format!("did_move({from},{to},{})", opt(value)))
    }

    fn will_remove(&self, index: usize) -> ObserverResult {
        self.hit(format!("will_remove({index})"))
    }

    fn did_remove(&self, index: usize, old: Option<&Value>) -> ObserverResult {
        self.hit(format!("did_remove({index},{})", opt(old)))
    }

    fn will_drop(&self, lower: usize) -> ObserverResult {
        self.hit(format!("will_drop({lower})"))
    }

    fn did_drop(&self, lower: usize) -> ObserverResult {
        self.hit(format!("did_drop({lower})"))
    }

    fn will_take(&self, upper: usize) -> ObserverResult {
        self.hit(format!("will_take({upper})"))
    }

    fn did_take(&self, upper: usize) -> ObserverResult {
        self.hit(format!("did_take({upper})"))
    }

    fn will_clear(&self) -> ObserverResult {
        self.hit("will_clear".into())
    }

    fn did_clear(&self) -> ObserverResult {
        self.hit("did_clear".into())
    }
}

impl MapObserver for Recorder {
    fn will_receive(&self, body: &Value) -> ObserverResult {
        self.hit(format!("will_receive({body})"))
    }

    fn did_receive(&self, body: &Value) -> ObserverResult {
        self.hit(format!("did_receive({body})"))
    }

    fn will_update(&self, key: &Value, value: &Value) -> ObserverResult {
        self.hit(format!("will_update({key},{value})"))
    }

    fn did_update(&self, key: &Value, value: &Value, old: Option<&Value>) -> ObserverResult {
        self.hit(format!("did_update({key},{value},{})", opt(old)))
    }

    fn will_remove(&self, key: &Value) -> ObserverResult {
        self.hit(format!("will_remove({key})"))
    }

    fn did_remove(&self, key: &Value, old: Option<&Value>) -> ObserverResult {
        self.hit(format!("did_remove({key},{})", opt(old)))
    }

    fn will_drop(&self, lower: usize) -> ObserverResult {
        self.hit(format!("will_drop({lower})"))
    }

    fn did_drop(&self, lower: usize) -> ObserverResult {
        self.hit(format!("did_drop({lower})"))
    }

    fn will_take(&self, upper: usize) -> ObserverResult {
        self.hit(format!("will_take({upper})"))
    }

    fn did_take(&self, upper: usize) -> ObserverResult {
        self.hit(format!("did_take({upper})"))
    }

    fn will_clear(&self) -> ObserverResult {
        self.hit("will_clear".into())
    }

    fn did_clear(&self) -> ObserverResult {
        self.hit("did_clear".into())
    }
}

impl EventObserver for Recorder {
    fn will_receive(&self, body: &Value) -> ObserverResult {
        self.hit(format!("will_receive({body})"))
    }

    fn on_event(&self, body: &Value) -> ObserverResult {
        self.hit(format!("on_event({body})"))
    }

    fn did_receive(&self, body: &Value) -> ObserverResult {
        self.hit(format!("did_receive({body})"))
    }
}
