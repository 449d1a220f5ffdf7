// ── Map downlinks ──
//
// Keyed entries kept in first-insert order, so `drop`/`take` have a stable
// meaning. Keys are arbitrary JSON values, looked up by their canonical text.

use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::{DownlinkKind, DownlinkType, Received};
use crate::error::{DownlinkError, ObserverError, ObserverResult};
use crate::link::{LinkModel, UpCommand};
use crate::model::MapOp;
use crate::model::ops::encode;
use crate::observer::LinkObserver;
use crate::reconcile::{KeyEffect, KeyedInput, Output, Reconciler, key_id};
use crate::relay::{DispatchOutcome, Dispatcher, Relay};
use crate::stage::Stage;
use crate::state::{Snapshot, StateCell, StateStream};
use crate::view::DownlinkView;

pub struct MapKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapEntry {
    pub key: Value,
    pub value: Value,
}

pub type MapEntries = IndexMap<String, MapEntry>;

/// Callbacks for map downlinks.
pub trait MapObserver: LinkObserver {
    fn will_receive(&self, _body: &Value) -> ObserverResult {
        Ok(())
    }

    fn did_receive(&self, _body: &Value) -> ObserverResult {
        Ok(())
    }

    fn will_update(&self, _key: &Value, _value: &Value) -> ObserverResult {
        Ok(())
    }

    /// `old` is `None` for a new key.
    fn did_update(&self, _key: &Value, _value: &Value, _old: Option<&Value>) -> ObserverResult {
        Ok(())
    }

    fn will_remove(&self, _key: &Value) -> ObserverResult {
        Ok(())
    }

    fn did_remove(&self, _key: &Value, _old: Option<&Value>) -> ObserverResult {
        Ok(())
    }

    fn will_drop(&self, _lower: usize) -> ObserverResult {
        Ok(())
    }

    fn did_drop(&self, _lower: usize) -> ObserverResult {
        Ok(())
    }

    fn will_take(&self, _upper: usize) -> ObserverResult {
        Ok(())
    }

    fn did_take(&self, _upper: usize) -> ObserverResult {
        Ok(())
    }

    fn will_clear(&self) -> ObserverResult {
        Ok(())
    }

    fn did_clear(&self) -> ObserverResult {
        Ok(())
    }
}

// ── Pure operations ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum MapChange {
    Updated {
        key: Value,
        value: Value,
        old: Option<Value>,
    },
    Removed {
        key: Value,
        old: Option<Value>,
    },
    Dropped {
        lower: usize,
    },
    Taken {
        upper: usize,
    },
    Cleared,
}

impl MapChange {
    pub fn to_op(&self) -> MapOp {
        match self {
            Self::Updated { key, value, .. } => MapOp::Update {
                key: key.clone(),
                value: value.clone(),
            },
            Self::Removed { key, .. } => MapOp::Remove { key: key.clone() },
            Self::Dropped { lower } => MapOp::Drop { lower: *lower },
            Self::Taken { upper } => MapOp::Take { upper: *upper },
            Self::Cleared => MapOp::Clear,
        }
    }

    pub fn key(&self) -> Option<&Value> {
        match self {
            Self::Updated { key, .. } | Self::Removed { key, .. } => Some(key),
            Self::Dropped { .. } | Self::Taken { .. } | Self::Cleared => None,
        }
    }

    fn notify(&self, observer: &dyn MapObserver) -> ObserverResult {
        match self {
            Self::Updated { key, value, old } => observer.did_update(key, value, old.as_ref()),
            Self::Removed { key, old } => observer.did_remove(key, old.as_ref()),
            Self::Dropped { lower } => observer.did_drop(*lower),
            Self::Taken { upper } => observer.did_take(*upper),
            Self::Cleared => observer.did_clear(),
        }
    }
}

fn will_notify(op: &MapOp, observer: &dyn MapObserver) -> ObserverResult {
    match op {
        MapOp::Update { key, value } => observer.will_update(key, value),
        MapOp::Remove { key } => observer.will_remove(key),
        MapOp::Drop { lower } => observer.will_drop(*lower),
        MapOp::Take { upper } => observer.will_take(*upper),
        MapOp::Clear => observer.will_clear(),
    }
}

/// Apply `op` to `entries`. Returns the next entries (or `None` when nothing
/// changes) and the resolved change.
fn apply_op(entries: &MapEntries, op: &MapOp) -> (Option<MapEntries>, MapChange) {
    match op {
        MapOp::Update { key, value } => {
            let mut next = entries.clone();
            let old = next
                .insert(
                    key_id(key),
                    MapEntry {
                        key: key.clone(),
                        value: value.clone(),
                    },
                )
                .map(|entry| entry.value);
            let change = MapChange::Updated {
                key: key.clone(),
                value: value.clone(),
                old,
            };
            (Some(next), change)
        }
        MapOp::Remove { key } => {
            let id = key_id(key);
            if !entries.contains_key(&id) {
                let change = MapChange::Removed {
                    key: key.clone(),
                    old: None,
                };
                return (None, change);
            }
            let mut next = entries.clone();
            let old = next.shift_remove(&id).map(|entry| entry.value);
            (Some(next), MapChange::Removed { key: key.clone(), old })
        }
        MapOp::Drop { lower } => {
            let change = MapChange::Dropped { lower: *lower };
            if *lower == 0 || entries.is_empty() {
                return (None, change);
            }
            let next = entries
                .iter()
                .skip(*lower)
                .map(|(id, entry)| (id.clone(), entry.clone()))
                .collect();
            (Some(next), change)
        }
        MapOp::Take { upper } => {
            let change = MapChange::Taken { upper: *upper };
            if *upper >= entries.len() {
                return (None, change);
            }
            let next = entries
                .iter()
                .take(*upper)
                .map(|(id, entry)| (id.clone(), entry.clone()))
                .collect();
            (Some(next), change)
        }
        MapOp::Clear => {
            let next = (!entries.is_empty()).then(IndexMap::new);
            (next, MapChange::Cleared)
        }
    }
}

// ── State ───────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MapState {
    cell: StateCell<MapEntries>,
    reconciler: Reconciler<dyn KeyedInput>,
}

impl MapState {
    pub fn snapshot(&self) -> Arc<Snapshot<MapEntries>> {
        self.cell.load()
    }

    pub fn subscribe(&self) -> StateStream<MapEntries> {
        self.cell.subscribe()
    }

    pub fn reconciler(&self) -> &Reconciler<dyn KeyedInput> {
        &self.reconciler
    }

    pub fn len(&self) -> usize {
        self.cell.load().state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &Value) -> Option<Value> {
        self.cell
            .load()
            .state
            .get(&key_id(key))
            .map(|entry| entry.value.clone())
    }

    pub fn contains_key(&self, key: &Value) -> bool {
        self.cell.load().state.contains_key(&key_id(key))
    }

    pub fn keys(&self) -> Vec<Value> {
        self.cell
            .load()
            .state
            .values()
            .map(|entry| entry.key.clone())
            .collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.cell
            .load()
            .state
            .values()
            .map(|entry| entry.value.clone())
            .collect()
    }

    fn apply(&self, op: &MapOp, commit: bool) -> MapChange {
        if commit {
            let committed = self.cell.update(|entries| {
                let (next, change) = apply_op(entries, op);
                next.map(|next| (next, change))
            });
            if let Some(change) = committed {
                return change;
            }
        }
        apply_op(&self.cell.load().state, op).1
    }
}

impl DownlinkKind for MapKind {
    type Observer = dyn MapObserver;
    type State = MapState;
    type Event = Received<MapOp>;

    const TYPE: DownlinkType = DownlinkType::Map;

    fn new_state() -> MapState {
        MapState::default()
    }

    fn decode(body: Value) -> Result<Received<MapOp>, DownlinkError> {
        let op = MapOp::decode(body.clone())?;
        Ok(Received { body, op })
    }

    fn dispatch_event(
        link: &Arc<LinkModel<Self>>,
        event: Received<MapOp>,
    ) -> Result<DispatchOutcome, ObserverError> {
        let relay = MapEventRelay {
            link: Arc::clone(link),
            event,
            change: None,
        };
        Dispatcher::new(relay, link.views()).run()
    }
}

// ── Relays ──────────────────────────────────────────────────────────

struct MapEventRelay {
    link: Arc<LinkModel<MapKind>>,
    event: Received<MapOp>,
    change: Option<MapChange>,
}

impl Relay<MapKind> for MapEventRelay {
    fn phase_count(&self) -> usize {
        4
    }

    fn begin_phase(&mut self, phase: usize) {
        if phase != 2 {
            return;
        }
        let stateful = self.link.is_stateful();
        let state = self.link.state();
        let change = state.apply(&self.event.op, stateful);
        if stateful {
            state.reconciler.propagate(change.key());
        }
        self.change = Some(change);
    }

    fn notify(&self, phase: usize, observer: &dyn MapObserver) -> ObserverResult {
        match (phase, &self.change) {
            (0, _) => observer.will_receive(&self.event.body),
            (1, _) => will_notify(&self.event.op, observer),
            (2, Some(change)) => change.notify(observer),
            (2, None) => Ok(()),
            _ => observer.did_receive(&self.event.body),
        }
    }

    fn done(&mut self) {
        self.link.cue_down();
    }

    fn abort(&mut self, _error: &ObserverError) {
        self.link.cue_down();
    }
}

struct MapWriteRelay {
    link: Arc<LinkModel<MapKind>>,
    change: MapChange,
}

impl MapWriteRelay {
    fn send(&self) {
        self.link.enqueue(UpCommand::new(encode(&self.change.to_op())));
    }
}

impl Relay<MapKind> for MapWriteRelay {
    fn phase_count(&self) -> usize {
        1
    }

    fn notify(&self, _phase: usize, observer: &dyn MapObserver) -> ObserverResult {
        self.change.notify(observer)
    }

    fn done(&mut self) {
        self.send();
    }

    fn abort(&mut self, _error: &ObserverError) {
        self.send();
    }
}

// ── Link operations ─────────────────────────────────────────────────

impl LinkModel<MapKind> {
    /// Apply a local operation, notify views and queue it upstream.
    pub fn write_local(self: &Arc<Self>, op: &MapOp, stage: Option<Arc<dyn Stage>>) -> MapChange {
        let change = self.state().apply(op, self.is_stateful());
        let relay = MapWriteRelay {
            link: Arc::clone(self),
            change: change.clone(),
        };
        if let Err(error) = Dispatcher::new(relay, self.views()).on_stage(stage).run() {
            debug!(%error, op = op.tag(), "map observer failed");
        }
        change
    }

    pub fn reconcile(self: &Arc<Self>, version: i64) {
        let reconciler = self.state().reconciler();
        let Some(pending) = reconciler.begin(version) else {
            return;
        };
        if let Some(input) = reconciler.input() {
            if pending.whole {
                self.reconcile_whole(input.as_ref());
            } else {
                for (key, effect) in pending.effects {
                    self.reconcile_effect(input.as_ref(), key, effect);
                }
            }
        }
        reconciler.finish(version);
    }

    pub fn reconcile_key(self: &Arc<Self>, key: &Value, version: i64) {
        let reconciler = self.state().reconciler();
        if let Some(effect) = reconciler.take_effect(key) {
            if let Some(input) = reconciler.input() {
                self.reconcile_effect(input.as_ref(), key.clone(), effect);
            }
        }
        reconciler.finish_key(key, version);
    }

    fn reconcile_effect(self: &Arc<Self>, input: &dyn KeyedInput, key: Value, effect: KeyEffect) {
        let value = match effect {
            KeyEffect::Update => input.get(&key),
            KeyEffect::Remove => None,
        };
        match value {
            Some(value) => self.upsert(key, value),
            None if self.state().contains_key(&key) => {
                self.write_local(&MapOp::Remove { key }, None);
            }
            None => {}
        }
    }

    fn reconcile_whole(self: &Arc<Self>, input: &dyn KeyedInput) {
        let keys = input.keys();
        for key in &keys {
            if let Some(value) = input.get(key) {
                self.upsert(key.clone(), value);
            }
        }
        let wanted: HashSet<String> = keys.iter().map(key_id).collect();
        let stale: Vec<Value> = self
            .state()
            .snapshot()
            .state
            .iter()
            .filter(|(id, _)| !wanted.contains(*id))
            .map(|(_, entry)| entry.key.clone())
            .collect();
        for key in stale {
            self.write_local(&MapOp::Remove { key }, None);
        }
    }

    fn upsert(self: &Arc<Self>, key: Value, value: Value) {
        if self.state().get(&key).as_ref() == Some(&value) {
            return;
        }
        self.write_local(&MapOp::Update { key, value }, None);
    }
}

// ── View API ────────────────────────────────────────────────────────

impl DownlinkView<MapKind> {
    pub fn len(&self) -> usize {
        self.link_model().map_or(0, |link| link.state().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &Value) -> Option<Value> {
        self.link_model()?.state().get(key)
    }

    pub fn contains_key(&self, key: &Value) -> bool {
        self.link_model()
            .is_some_and(|link| link.state().contains_key(key))
    }

    pub fn keys(&self) -> Vec<Value> {
        self.link_model()
            .map(|link| link.state().keys())
            .unwrap_or_default()
    }

    pub fn values(&self) -> Vec<Value> {
        self.link_model()
            .map(|link| link.state().values())
            .unwrap_or_default()
    }

    pub fn subscribe(&self) -> Option<StateStream<MapEntries>> {
        Some(self.link_model()?.state().subscribe())
    }

    /// Insert or replace `key`, returning the replaced value.
    pub fn put(&self, key: Value, value: Value) -> Option<Value> {
        match self.write(&MapOp::Update { key, value }) {
            Some(MapChange::Updated { old, .. }) => old,
            _ => None,
        }
    }

    pub fn remove(&self, key: &Value) -> Option<Value> {
        match self.write(&MapOp::Remove { key: key.clone() }) {
            Some(MapChange::Removed { old, .. }) => old,
            _ => None,
        }
    }

    /// Remove the first `lower` entries in insertion order.
    pub fn drop_front(&self, lower: usize) {
        self.write(&MapOp::Drop { lower });
    }

    /// Keep only the first `upper` entries in insertion order.
    pub fn take_front(&self, upper: usize) {
        self.write(&MapOp::Take { upper });
    }

    pub fn clear(&self) {
        self.write(&MapOp::Clear);
    }

    fn write(&self, op: &MapOp) -> Option<MapChange> {
        let Some(link) = self.link_model() else {
            warn!(address = %self.address(), op = op.tag(), "write on a map downlink that is not open");
            return None;
        };
        let change = link.write_local(op, self.stage().cloned());
        let reconciler = link.state().reconciler();
        match change.key() {
            Some(key) => reconciler.touch_key(key),
            None => reconciler.touch(),
        }
        link.reconcile(0);
        Some(change)
    }

    pub fn bind_input(&self, input: Arc<dyn KeyedInput>) -> Result<(), DownlinkError> {
        let link = self.link_model().ok_or(DownlinkError::NotOpen)?;
        link.state().reconciler().bind_input(input);
        Ok(())
    }

    pub fn bind_output(&self, output: &Arc<dyn Output>) -> Result<(), DownlinkError> {
        let link = self.link_model().ok_or(DownlinkError::NotOpen)?;
        link.state().reconciler().bind_output(output);
        Ok(())
    }

    pub fn bind_key_output(&self, key: &Value, output: &Arc<dyn Output>) -> Result<(), DownlinkError> {
        let link = self.link_model().ok_or(DownlinkError::NotOpen)?;
        link.state().reconciler().bind_key_output(key, output);
        Ok(())
    }

    pub fn invalidate(&self) {
        if let Some(link) = self.link_model() {
            link.state().reconciler().invalidate();
        }
    }

    pub fn invalidate_key(&self, key: &Value, effect: KeyEffect) {
        if let Some(link) = self.link_model() {
            link.state().reconciler().invalidate_key(key, effect);
        }
    }

    pub fn reconcile(&self, version: i64) {
        if let Some(link) = self.link_model() {
            link.reconcile(version);
        }
    }

    pub fn reconcile_key(&self, key: &Value, version: i64) {
        if let Some(link) = self.link_model() {
            link.reconcile_key(key, version);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn update(key: Value, value: Value) -> MapOp {
        MapOp::Update { key, value }
    }

    #[test]
    fn update_reports_previous_value() {
        let state = MapState::default();
        let first = state.apply(&update(json!("a"), json!(1)), true);
        assert_eq!(
            first,
            MapChange::Updated {
                key: json!("a"),
                value: json!(1),
                old: None
            }
        );
        let second = state.apply(&update(json!("a"), json!(2)), true);
        assert!(matches!(second, MapChange::Updated { old: Some(ref v), .. } if *v == json!(1)));
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn structured_keys_look_up_by_value() {
        let state = MapState::default();
        state.apply(&update(json!({"id": 7}), json!("seven")), true);
        assert_eq!(state.get(&json!({"id": 7})), Some(json!("seven")));
        assert!(!state.contains_key(&json!({"id": 8})));
    }

    #[test]
    fn drop_and_take_follow_insertion_order() {
        let state = MapState::default();
        for (k, v) in [("c", 1), ("a", 2), ("b", 3)] {
            state.apply(&update(json!(k), json!(v)), true);
        }
        state.apply(&MapOp::Drop { lower: 1 }, true);
        assert_eq!(state.keys(), vec![json!("a"), json!("b")]);
        state.apply(&MapOp::Take { upper: 1 }, true);
        assert_eq!(state.keys(), vec![json!("a")]);
    }

    #[test]
    fn removing_missing_key_changes_nothing() {
        let state = MapState::default();
        state.apply(&update(json!("a"), json!(1)), true);
        let revision = state.snapshot().revision;
        let change = state.apply(&MapOp::Remove { key: json!("z") }, true);
        assert_eq!(
            change,
            MapChange::Removed {
                key: json!("z"),
                old: None
            }
        );
        assert_eq!(state.snapshot().revision, revision);
    }

    #[test]
    fn uncommitted_apply_resolves_against_mirror() {
        let state = MapState::default();
        state.apply(&update(json!("a"), json!(1)), true);
        let change = state.apply(&update(json!("a"), json!(5)), false);
        assert!(matches!(change, MapChange::Updated { old: Some(ref v), .. } if *v == json!(1)));
        assert_eq!(state.get(&json!("a")), Some(json!(1)));
    }
}
