// ── Input/output reconciliation ──
//
// A downlink can be driven by a bound input (a value or keyed source) and can
// feed bound outputs. Invalidation marks the downlink stale and tells outputs
// to drop cached reads; reconciliation at a version pulls what changed from
// the input, applies it through the local write path, and lets outputs
// re-read. A version is reconciled at most once: the first caller to move
// the version off -1 does the work.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use arc_swap::ArcSwap;
use dashmap::DashMap;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use crate::fanout::Fanout;

/// Stale version marker.
pub const STALE: i64 = -1;

/// What an input change did to a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEffect {
    Update,
    Remove,
}

/// A downstream consumer of a downlink's state.
pub trait Output: Send + Sync {
    fn invalidate_output(&self);
    fn reconcile_output(&self, version: i64);
}

/// A scalar source driving a value downlink.
pub trait ValueInput: Send + Sync {
    fn get(&self) -> Option<Value>;
}

/// A keyed source driving a list or map downlink. List keys are entry keys
/// as JSON strings.
pub trait KeyedInput: Send + Sync {
    fn get(&self, key: &Value) -> Option<Value>;
    fn keys(&self) -> Vec<Value>;
}

/// Canonical string form of a key, used for lookups.
pub(crate) fn key_id(key: &Value) -> String {
    key.to_string()
}

/// Work claimed by one reconcile pass.
pub(crate) struct Pending {
    /// The whole input is stale: upsert everything, then prune.
    pub(crate) whole: bool,
    pub(crate) effects: Vec<(Value, KeyEffect)>,
}

pub struct Reconciler<I: ?Sized> {
    version: AtomicI64,
    input: RwLock<Option<Arc<I>>>,
    whole: AtomicBool,
    effects: Mutex<IndexMap<String, (Value, KeyEffect)>>,
    outputs: ArcSwap<Fanout<dyn Output>>,
    key_outputs: DashMap<String, Fanout<dyn Output>>,
}

impl<I: ?Sized> Default for Reconciler<I> {
    fn default() -> Self {
        Self {
            version: AtomicI64::new(STALE),
            input: RwLock::new(None),
            whole: AtomicBool::new(false),
            effects: Mutex::new(IndexMap::new()),
            outputs: ArcSwap::from_pointee(Fanout::Empty),
            key_outputs: DashMap::new(),
        }
    }
}

impl<I: ?Sized> Reconciler<I> {
    pub fn version(&self) -> i64 {
        self.version.load(Ordering::Acquire)
    }

    pub fn is_stale(&self) -> bool {
        self.version() == STALE
    }

    // ── Binding ──────────────────────────────────────────────────────

    /// Bind an input; the whole input is pulled on the next reconcile.
    pub fn bind_input(&self, input: Arc<I>) {
        *self.input.write() = Some(input);
        self.invalidate();
    }

    pub fn unbind_input(&self) -> Option<Arc<I>> {
        self.input.write().take()
    }

    pub(crate) fn input(&self) -> Option<Arc<I>> {
        self.input.read().clone()
    }

    pub fn bind_output(&self, output: &Arc<dyn Output>) {
        self.outputs.rcu(|outputs| outputs.with(output));
    }

    pub fn unbind_output(&self, output: &Arc<dyn Output>) {
        self.outputs.rcu(|outputs| outputs.without(output));
    }

    pub fn bind_key_output(&self, key: &Value, output: &Arc<dyn Output>) {
        self.key_outputs
            .entry(key_id(key))
            .and_modify(|outputs| *outputs = outputs.with(output))
            .or_insert_with(|| Fanout::One(Arc::clone(output)));
    }

    pub fn unbind_key_output(&self, key: &Value, output: &Arc<dyn Output>) {
        let id = key_id(key);
        if let Some(mut outputs) = self.key_outputs.get_mut(&id) {
            *outputs = outputs.without(output);
        }
        self.key_outputs.remove_if(&id, |_, outputs| outputs.is_empty());
    }

    // ── Invalidation ─────────────────────────────────────────────────

    /// The whole input changed.
    pub fn invalidate(&self) {
        self.whole.store(true, Ordering::Release);
        self.mark_stale(None);
    }

    /// One input key changed.
    pub fn invalidate_key(&self, key: &Value, effect: KeyEffect) {
        self.effects
            .lock()
            .insert(key_id(key), (key.clone(), effect));
        self.mark_stale(Some(key));
    }

    /// A local or remote write changed the state; no input read is owed.
    pub(crate) fn touch(&self) {
        self.mark_stale(None);
    }

    pub(crate) fn touch_key(&self, key: &Value) {
        self.mark_stale(Some(key));
    }

    fn mark_stale(&self, key: Option<&Value>) {
        let was = self.version.swap(STALE, Ordering::AcqRel);
        match key {
            Some(key) => {
                for output in self.key_output_set(key).iter() {
                    output.invalidate_output();
                }
            }
            None => {
                for outputs in self.all_key_outputs() {
                    for output in outputs.iter() {
                        output.invalidate_output();
                    }
                }
            }
        }
        if was != STALE {
            for output in self.outputs.load().iter() {
                output.invalidate_output();
            }
        }
    }

    // ── Reconciliation ───────────────────────────────────────────────

    /// Claim the reconcile of `version`. Returns `None` when the state is
    /// already consistent, which makes repeat calls free.
    pub(crate) fn begin(&self, version: i64) -> Option<Pending> {
        let version = version.max(0);
        self.version
            .compare_exchange(STALE, version, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        let whole = self.whole.swap(false, Ordering::AcqRel);
        let effects = std::mem::take(&mut *self.effects.lock())
            .into_values()
            .collect();
        Some(Pending { whole, effects })
    }

    /// Take the pending effect for one key, if the input recorded one.
    pub(crate) fn take_effect(&self, key: &Value) -> Option<KeyEffect> {
        self.effects
            .lock()
            .shift_remove(&key_id(key))
            .map(|(_, effect)| effect)
    }

    /// Let every output re-read at `version`.
    pub(crate) fn finish(&self, version: i64) {
        for output in self.outputs.load().iter() {
            output.reconcile_output(version);
        }
        for outputs in self.all_key_outputs() {
            for output in outputs.iter() {
                output.reconcile_output(version);
            }
        }
    }

    pub(crate) fn finish_key(&self, key: &Value, version: i64) {
        for output in self.key_output_set(key).iter() {
            output.reconcile_output(version);
        }
    }

    /// Push a remote change straight through to outputs without claiming a
    /// version.
    pub(crate) fn propagate(&self, key: Option<&Value>) {
        let version = self.version().max(0);
        let outputs = match key {
            Some(key) => vec![self.key_output_set(key)],
            None => self.all_key_outputs(),
        };
        for output in outputs.iter().flat_map(Fanout::iter) {
            output.invalidate_output();
            output.reconcile_output(version);
        }
        for output in self.outputs.load().iter() {
            output.invalidate_output();
            output.reconcile_output(version);
        }
    }

    // Clone sets out of the map so callbacks never run under a shard lock.
    fn key_output_set(&self, key: &Value) -> Fanout<dyn Output> {
        self.key_outputs
            .get(&key_id(key))
            .map(|outputs| outputs.value().clone())
            .unwrap_or_default()
    }

    fn all_key_outputs(&self) -> Vec<Fanout<dyn Output>> {
        self.key_outputs
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }
}
