// ── List downlinks ──
//
// An ordered sequence of keyed entries. Operations address entries by index
// and optionally by key; a key that resolves wins over the index, so an entry
// stays addressable while concurrent writers reorder the list.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{DownlinkKind, DownlinkType, Received};
use crate::error::{DownlinkError, ObserverError, ObserverResult};
use crate::link::{LinkModel, UpCommand};
use crate::model::ListOp;
use crate::model::ops::encode;
use crate::observer::LinkObserver;
use crate::reconcile::{KeyEffect, KeyedInput, Output, Reconciler};
use crate::relay::{DispatchOutcome, Dispatcher, Relay};
use crate::stage::Stage;
use crate::state::{Snapshot, StateCell, StateStream};
use crate::view::DownlinkView;

pub struct ListKind;

/// One list entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListEntry {
    pub key: String,
    pub value: Value,
}

/// Callbacks for list downlinks. `did_*` callbacks fire once per operation;
/// values the local mirror could not supply are `None`.
pub trait ListObserver: LinkObserver {
    fn will_receive(&self, _body: &Value) -> ObserverResult {
        Ok(())
    }

    fn did_receive(&self, _body: &Value) -> ObserverResult {
        Ok(())
    }

    fn will_update(&self, _index: usize, _value: &Value) -> ObserverResult {
        Ok(())
    }

    fn did_update(&self, _index: usize, _value: &Value, _old: Option<&Value>) -> ObserverResult {
        Ok(())
    }

    fn will_move(&self, _from: usize, _to: usize) -> ObserverResult {
        Ok(())
    }

    fn did_move(&self, _from: usize, _to: usize, _value: Option<&Value>) -> ObserverResult {
        Ok(())
    }

    fn will_remove(&self, _index: usize) -> ObserverResult {
        Ok(())
    }

    fn did_remove(&self, _index: usize, _old: Option<&Value>) -> ObserverResult {
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

/// The resolved effect of one list operation.
#[derive(Debug, Clone, PartialEq)]
pub enum ListChange {
    Updated {
        index: usize,
        key: Option<String>,
        value: Value,
        old: Option<Value>,
    },
    Moved {
        from: usize,
        to: usize,
        key: Option<String>,
        value: Option<Value>,
    },
    Removed {
        index: usize,
        key: Option<String>,
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

impl ListChange {
    /// The operation to send upstream for a local change.
    pub fn to_op(&self) -> ListOp {
        match self {
            Self::Updated {
                index, key, value, ..
            } => ListOp::Update {
                index: *index,
                key: key.clone(),
                value: value.clone(),
            },
            Self::Moved { from, to, key, .. } => ListOp::Move {
                from: *from,
                to: *to,
                key: key.clone(),
            },
            Self::Removed { index, key, .. } => ListOp::Remove {
                index: *index,
                key: key.clone(),
            },
            Self::Dropped { lower } => ListOp::Drop { lower: *lower },
            Self::Taken { upper } => ListOp::Take { upper: *upper },
            Self::Cleared => ListOp::Clear,
        }
    }

    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Updated { key, .. } | Self::Moved { key, .. } | Self::Removed { key, .. } => {
                key.as_deref()
            }
            Self::Dropped { .. } | Self::Taken { .. } | Self::Cleared => None,
        }
    }

    fn notify(&self, observer: &dyn ListObserver) -> ObserverResult {
        match self {
            Self::Updated {
                index, value, old, ..
            } => observer.did_update(*index, value, old.as_ref()),
            Self::Moved {
                from, to, value, ..
            } => observer.did_move(*from, *to, value.as_ref()),
            Self::Removed { index, old, .. } => observer.did_remove(*index, old.as_ref()),
            Self::Dropped { lower } => observer.did_drop(*lower),
            Self::Taken { upper } => observer.did_take(*upper),
            Self::Cleared => observer.did_clear(),
        }
    }
}

fn will_notify(op: &ListOp, observer: &dyn ListObserver) -> ObserverResult {
    match op {
        ListOp::Update { index, value, .. } => observer.will_update(*index, value),
        ListOp::Move { from, to, .. } => observer.will_move(*from, *to),
        ListOp::Remove { index, .. } => observer.will_remove(*index),
        ListOp::Drop { lower } => observer.will_drop(*lower),
        ListOp::Take { upper } => observer.will_take(*upper),
        ListOp::Clear => observer.will_clear(),
    }
}

fn new_key() -> String {
    Uuid::new_v4().to_string()
}

/// Index of the entry an operation refers to: its key if present in the
/// list, otherwise the index clamped to the last entry. `None` only when the
/// list is empty.
fn resolve(entries: &[ListEntry], index: usize, key: Option<&str>) -> Option<usize> {
    let last = entries.len().checked_sub(1)?;
    key.and_then(|key| entries.iter().position(|entry| entry.key == key))
        .or(Some(index.min(last)))
}

/// Apply `op` to `entries`. Returns the next entries (or `None` when the
/// operation changes nothing) and the resolved change.
fn apply_op(entries: &[ListEntry], op: &ListOp) -> (Option<Vec<ListEntry>>, ListChange) {
    match op {
        ListOp::Update { index, key, value } => {
            let found = match key {
                Some(key) => entries.iter().position(|entry| entry.key == *key),
                None => (*index < entries.len()).then_some(*index),
            };
            let mut next = entries.to_vec();
            let (index, key, old) = if let Some(found) = found {
                let entry = &mut next[found];
                let old = std::mem::replace(&mut entry.value, value.clone());
                (found, entry.key.clone(), Some(old))
            } else {
                let at = (*index).min(next.len());
                let key = key.clone().unwrap_or_else(new_key);
                next.insert(
                    at,
                    ListEntry {
                        key: key.clone(),
                        value: value.clone(),
                    },
                );
                (at, key, None)
            };
            let change = ListChange::Updated {
                index,
                key: Some(key),
                value: value.clone(),
                old,
            };
            (Some(next), change)
        }
        ListOp::Move { from, to, key } => {
            let Some(from) = resolve(entries, *from, key.as_deref()) else {
                let change = ListChange::Moved {
                    from: *from,
                    to: *to,
                    key: key.clone(),
                    value: None,
                };
                return (None, change);
            };
            let at = (*to).min(entries.len().saturating_sub(1));
            let mut next = entries.to_vec();
            let entry = next.remove(from);
            let change = ListChange::Moved {
                from,
                to: *to,
                key: Some(entry.key.clone()),
                value: Some(entry.value.clone()),
            };
            next.insert(at, entry);
            ((from != at).then_some(next), change)
        }
        ListOp::Remove { index, key } => {
            let Some(at) = resolve(entries, *index, key.as_deref()) else {
                let change = ListChange::Removed {
                    index: *index,
                    key: key.clone(),
                    old: None,
                };
                return (None, change);
            };
            let mut next = entries.to_vec();
            let entry = next.remove(at);
            let change = ListChange::Removed {
                index: at,
                key: Some(entry.key),
                old: Some(entry.value),
            };
            (Some(next), change)
        }
        ListOp::Drop { lower } => {
            let change = ListChange::Dropped { lower: *lower };
            if *lower == 0 || entries.is_empty() {
                return (None, change);
            }
            let next = entries[(*lower).min(entries.len())..].to_vec();
            (Some(next), change)
        }
        ListOp::Take { upper } => {
            let change = ListChange::Taken { upper: *upper };
            if *upper >= entries.len() {
                return (None, change);
            }
            (Some(entries[..*upper].to_vec()), change)
        }
        ListOp::Clear => {
            let next = (!entries.is_empty()).then(Vec::new);
            (next, ListChange::Cleared)
        }
    }
}

// ── State ───────────────────────────────────────────────────────────

#[derive(Default)]
pub struct ListState {
    cell: StateCell<Vec<ListEntry>>,
    reconciler: Reconciler<dyn KeyedInput>,
}

impl ListState {
    pub fn snapshot(&self) -> Arc<Snapshot<Vec<ListEntry>>> {
        self.cell.load()
    }

    pub fn subscribe(&self) -> StateStream<Vec<ListEntry>> {
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

    pub fn get(&self, index: usize) -> Option<ListEntry> {
        self.cell.load().state.get(index).cloned()
    }

    pub fn position(&self, key: &str) -> Option<usize> {
        self.cell
            .load()
            .state
            .iter()
            .position(|entry| entry.key == key)
    }

    pub fn values(&self) -> Vec<Value> {
        self.cell
            .load()
            .state
            .iter()
            .map(|entry| entry.value.clone())
            .collect()
    }

    /// Resolve `op` against the mirror, committing it when `commit` is set.
    fn apply(&self, op: &ListOp, commit: bool) -> ListChange {
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

impl DownlinkKind for ListKind {
    type Observer = dyn ListObserver;
    type State = ListState;
    type Event = Received<ListOp>;

    const TYPE: DownlinkType = DownlinkType::List;

    fn new_state() -> ListState {
        ListState::default()
    }

    fn decode(body: Value) -> Result<Received<ListOp>, DownlinkError> {
        let op = ListOp::decode(body.clone())?;
        Ok(Received { body, op })
    }

    fn dispatch_event(
        link: &Arc<LinkModel<Self>>,
        event: Received<ListOp>,
    ) -> Result<DispatchOutcome, ObserverError> {
        let relay = ListEventRelay {
            link: Arc::clone(link),
            event,
            change: None,
        };
        Dispatcher::new(relay, link.views()).run()
    }
}

// ── Relays ──────────────────────────────────────────────────────────

/// will_receive, will_<op>, did_<op>, did_receive. The mirror changes as
/// did_<op> begins.
struct ListEventRelay {
    link: Arc<LinkModel<ListKind>>,
    event: Received<ListOp>,
    change: Option<ListChange>,
}

impl Relay<ListKind> for ListEventRelay {
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
            let key = change.key().map(|key| Value::String(key.to_owned()));
            state.reconciler.propagate(key.as_ref());
        }
        self.change = Some(change);
    }

    fn notify(&self, phase: usize, observer: &dyn ListObserver) -> ObserverResult {
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

/// Local write: did_<op> on every view, then the op is queued upstream.
struct ListWriteRelay {
    link: Arc<LinkModel<ListKind>>,
    change: ListChange,
}

impl ListWriteRelay {
    fn send(&self) {
        self.link.enqueue(UpCommand::new(encode(&self.change.to_op())));
    }
}

impl Relay<ListKind> for ListWriteRelay {
    fn phase_count(&self) -> usize {
        1
    }

    fn notify(&self, _phase: usize, observer: &dyn ListObserver) -> ObserverResult {
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

impl LinkModel<ListKind> {
    /// Apply a local operation, notify views and queue it upstream.
    pub fn write_local(self: &Arc<Self>, op: &ListOp, stage: Option<Arc<dyn Stage>>) -> ListChange {
        let change = self.state().apply(op, self.is_stateful());
        let relay = ListWriteRelay {
            link: Arc::clone(self),
            change: change.clone(),
        };
        if let Err(error) = Dispatcher::new(relay, self.views()).on_stage(stage).run() {
            debug!(%error, op = op.tag(), "list observer failed");
        }
        change
    }

    /// Reconcile against the bound input: pull recorded key effects, or the
    /// whole input with upsert-then-prune.
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
                    self.reconcile_effect(input.as_ref(), &key, effect);
                }
            }
        }
        reconciler.finish(version);
    }

    pub fn reconcile_key(self: &Arc<Self>, key: &Value, version: i64) {
        let reconciler = self.state().reconciler();
        if let Some(effect) = reconciler.take_effect(key) {
            if let Some(input) = reconciler.input() {
                self.reconcile_effect(input.as_ref(), key, effect);
            }
        }
        reconciler.finish_key(key, version);
    }

    fn reconcile_effect(self: &Arc<Self>, input: &dyn KeyedInput, key: &Value, effect: KeyEffect) {
        let value = match effect {
            KeyEffect::Update => input.get(key),
            KeyEffect::Remove => None,
        };
        match value {
            Some(value) => self.upsert_keyed(entry_key(key), value),
            None => self.remove_keyed(&entry_key(key)),
        }
    }

    fn reconcile_whole(self: &Arc<Self>, input: &dyn KeyedInput) {
        let keys = input.keys();
        for key in &keys {
            if let Some(value) = input.get(key) {
                self.upsert_keyed(entry_key(key), value);
            }
        }
        let wanted: HashSet<String> = keys.iter().map(entry_key).collect();
        let stale: Vec<String> = self
            .state()
            .snapshot()
            .state
            .iter()
            .filter(|entry| !wanted.contains(&entry.key))
            .map(|entry| entry.key.clone())
            .collect();
        for key in stale {
            self.remove_keyed(&key);
        }
    }

    fn upsert_keyed(self: &Arc<Self>, key: String, value: Value) {
        let state = self.state();
        let index = match state.position(&key) {
            Some(index) if state.get(index).is_some_and(|entry| entry.value == value) => return,
            Some(index) => index,
            None => state.len(),
        };
        self.write_local(
            &ListOp::Update {
                index,
                key: Some(key),
                value,
            },
            None,
        );
    }

    fn remove_keyed(self: &Arc<Self>, key: &str) {
        if let Some(index) = self.state().position(key) {
            self.write_local(
                &ListOp::Remove {
                    index,
                    key: Some(key.to_owned()),
                },
                None,
            );
        }
    }
}

fn entry_key(key: &Value) -> String {
    key.as_str()
        .map_or_else(|| key.to_string(), str::to_owned)
}

// ── View API ────────────────────────────────────────────────────────

impl DownlinkView<ListKind> {
    pub fn len(&self) -> usize {
        self.link_model().map_or(0, |link| link.state().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.link_model()?.state().get(index).map(|entry| entry.value)
    }

    pub fn entry(&self, index: usize) -> Option<ListEntry> {
        self.link_model()?.state().get(index)
    }

    pub fn values(&self) -> Vec<Value> {
        self.link_model()
            .map(|link| link.state().values())
            .unwrap_or_default()
    }

    pub fn subscribe(&self) -> Option<StateStream<Vec<ListEntry>>> {
        Some(self.link_model()?.state().subscribe())
    }

    /// Append a new entry.
    pub fn push(&self, value: Value) {
        let index = self.len();
        self.insert(index, value);
    }

    /// Insert a new entry at `index` (clamped to the length).
    pub fn insert(&self, index: usize, value: Value) {
        self.write(&ListOp::Update {
            index,
            key: Some(new_key()),
            value,
        });
    }

    /// Replace the entry at `index`, or append when out of range. Returns the
    /// replaced value.
    pub fn update(&self, index: usize, value: Value) -> Option<Value> {
        let key = self.entry(index).map(|entry| entry.key);
        match self.write(&ListOp::Update { index, key, value }) {
            Some(ListChange::Updated { old, .. }) => old,
            _ => None,
        }
    }

    /// Move the entry at `from` to `to`; both are clamped to the last entry.
    pub fn move_entry(&self, from: usize, to: usize) {
        let key = self.entry(from).map(|entry| entry.key);
        self.write(&ListOp::Move { from, to, key });
    }

    /// Remove the entry at `index` (clamped to the last entry), returning
    /// its value.
    pub fn remove(&self, index: usize) -> Option<Value> {
        let key = self.entry(index).map(|entry| entry.key);
        match self.write(&ListOp::Remove { index, key }) {
            Some(ListChange::Removed { old, .. }) => old,
            _ => None,
        }
    }

    /// Remove the first `lower` entries.
    pub fn drop_front(&self, lower: usize) {
        self.write(&ListOp::Drop { lower });
    }

    /// Keep only the first `upper` entries.
    pub fn take_front(&self, upper: usize) {
        self.write(&ListOp::Take { upper });
    }

    pub fn clear(&self) {
        self.write(&ListOp::Clear);
    }

    fn write(&self, op: &ListOp) -> Option<ListChange> {
        let Some(link) = self.link_model() else {
            warn!(address = %self.address(), op = op.tag(), "write on a list downlink that is not open");
            return None;
        };
        let change = link.write_local(op, self.stage().cloned());
        let reconciler = link.state().reconciler();
        match change.key() {
            Some(key) => reconciler.touch_key(&Value::String(key.to_owned())),
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

    pub fn bind_key_output(&self, key: &str, output: &Arc<dyn Output>) -> Result<(), DownlinkError> {
        let link = self.link_model().ok_or(DownlinkError::NotOpen)?;
        link.state()
            .reconciler()
            .bind_key_output(&Value::String(key.to_owned()), output);
        Ok(())
    }

    pub fn invalidate(&self) {
        if let Some(link) = self.link_model() {
            link.state().reconciler().invalidate();
        }
    }

    pub fn invalidate_key(&self, key: &str, effect: KeyEffect) {
        if let Some(link) = self.link_model() {
            link.state()
                .reconciler()
                .invalidate_key(&Value::String(key.to_owned()), effect);
        }
    }

    pub fn reconcile(&self, version: i64) {
        if let Some(link) = self.link_model() {
            link.reconcile(version);
        }
    }

    pub fn reconcile_key(&self, key: &str, version: i64) {
        if let Some(link) = self.link_model() {
            link.reconcile_key(&Value::String(key.to_owned()), version);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn entries(pairs: &[(&str, i64)]) -> Vec<ListEntry> {
        pairs
            .iter()
            .map(|(key, value)| ListEntry {
                key: (*key).to_owned(),
                value: json!(value),
            })
            .collect()
    }

    fn values(entries: &[ListEntry]) -> Vec<Value> {
        entries.iter().map(|entry| entry.value.clone()).collect()
    }

    #[test]
    fn update_by_index_replaces_in_place() {
        let list = entries(&[("a", 1), ("b", 2)]);
        let op = ListOp::Update {
            index: 1,
            key: None,
            value: json!(9),
        };
        let (next, change) = apply_op(&list, &op);
        assert_eq!(next.map(|n| values(&n)), Some(vec![json!(1), json!(9)]));
        assert_eq!(
            change,
            ListChange::Updated {
                index: 1,
                key: Some("b".into()),
                value: json!(9),
                old: Some(json!(2)),
            }
        );
    }

    #[test]
    fn update_with_unknown_key_inserts() {
        let list = entries(&[("a", 1), ("b", 2)]);
        let op = ListOp::Update {
            index: 1,
            key: Some("z".into()),
            value: json!(0),
        };
        let (next, _) = apply_op(&list, &op);
        let next = next.unwrap_or_default();
        assert_eq!(values(&next), vec![json!(1), json!(0), json!(2)]);
        assert_eq!(next[1].key, "z");
    }

    #[test]
    fn key_beats_stale_index() {
        let list = entries(&[("a", 1), ("b", 2), ("c", 3)]);
        let op = ListOp::Remove {
            index: 0,
            key: Some("c".into()),
        };
        let (next, change) = apply_op(&list, &op);
        assert_eq!(next.map(|n| values(&n)), Some(vec![json!(1), json!(2)]));
        assert!(matches!(change, ListChange::Removed { index: 2, .. }));
    }

    #[test]
    fn move_clamps_destination_but_reports_requested_index() {
        let list = entries(&[("a", 1), ("b", 2), ("c", 3)]);
        let op = ListOp::Move {
            from: 0,
            to: 10,
            key: None,
        };
        let (next, change) = apply_op(&list, &op);
        assert_eq!(
            next.map(|n| values(&n)),
            Some(vec![json!(2), json!(3), json!(1)])
        );
        assert!(matches!(change, ListChange::Moved { from: 0, to: 10, .. }));
    }

    #[test]
    fn out_of_range_remove_takes_last_entry() {
        let list = entries(&[("a", 1), ("b", 2)]);
        let (next, change) = apply_op(&list, &ListOp::Remove { index: 5, key: None });
        assert_eq!(next.map(|n| values(&n)), Some(vec![json!(1)]));
        assert_eq!(
            change,
            ListChange::Removed {
                index: 1,
                key: Some("b".into()),
                old: Some(json!(2))
            }
        );
    }

    #[test]
    fn remove_on_empty_list_is_a_no_op() {
        let (next, change) = apply_op(&[], &ListOp::Remove { index: 0, key: None });
        assert!(next.is_none());
        assert_eq!(
            change,
            ListChange::Removed {
                index: 0,
                key: None,
                old: None
            }
        );
    }

    #[test]
    fn update_move_remove_by_index_empties_list() {
        let state = ListState::default();
        state.apply(
            &ListOp::Update {
                index: 0,
                key: None,
                value: json!("x"),
            },
            true,
        );
        let moved = state.apply(
            &ListOp::Move {
                from: 0,
                to: 2,
                key: None,
            },
            true,
        );
        assert!(matches!(moved, ListChange::Moved { from: 0, to: 2, value: Some(_), .. }));
        let removed = state.apply(&ListOp::Remove { index: 2, key: None }, true);
        assert!(state.is_empty());
        assert!(matches!(removed, ListChange::Removed { index: 0, old: Some(_), .. }));
    }

    #[test]
    fn drop_and_take_trim_ends() {
        let list = entries(&[("a", 1), ("b", 2), ("c", 3), ("d", 4)]);
        let (dropped, _) = apply_op(&list, &ListOp::Drop { lower: 1 });
        assert_eq!(
            dropped.map(|n| values(&n)),
            Some(vec![json!(2), json!(3), json!(4)])
        );
        let (taken, _) = apply_op(&list, &ListOp::Take { upper: 2 });
        assert_eq!(taken.map(|n| values(&n)), Some(vec![json!(1), json!(2)]));
        assert!(apply_op(&list, &ListOp::Take { upper: 9 }).0.is_none());
        assert_eq!(apply_op(&list, &ListOp::Drop { lower: 9 }).0, Some(Vec::new()));
    }

    #[test]
    fn update_move_remove_by_key_empties_list() {
        let state = ListState::default();
        state.apply(
            &ListOp::Update {
                index: 0,
                key: Some("k".into()),
                value: json!("x"),
            },
            true,
        );
        state.apply(
            &ListOp::Move {
                from: 0,
                to: 2,
                key: Some("k".into()),
            },
            true,
        );
        let change = state.apply(
            &ListOp::Remove {
                index: 2,
                key: Some("k".into()),
            },
            true,
        );
        assert!(state.is_empty());
        assert!(matches!(change, ListChange::Removed { index: 0, .. }));
    }

    #[test]
    fn uncommitted_apply_leaves_mirror() {
        let state = ListState::default();
        let change = state.apply(&ListOp::Clear, false);
        assert_eq!(change, ListChange::Cleared);
        state.apply(
            &ListOp::Update {
                index: 0,
                key: None,
                value: json!(1),
            },
            false,
        );
        assert!(state.is_empty());
        assert_eq!(state.snapshot().revision, 0);
    }

    #[test]
    fn change_round_trips_to_op() {
        let change = ListChange::Moved {
            from: 1,
            to: 0,
            key: Some("k".into()),
            value: Some(json!(1)),
        };
        assert_eq!(
            change.to_op(),
            ListOp::Move {
                from: 1,
                to: 0,
                key: Some("k".into())
            }
        );
    }
}
