// ── Typed state storage ──
//
// Lock-free state root shared by a link's views. Writers build the next
// snapshot from the current one and publish it with a compare-and-swap;
// every accepted snapshot is broadcast to subscribers via a `watch` channel.

mod stream;

use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::watch;

pub use stream::{StateStream, StateWatchStream};

/// An immutable state revision.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<T> {
    /// Bumped by one on every accepted write.
    pub revision: u64,
    pub state: T,
}

/// CAS-guarded state root with change broadcast.
pub struct StateCell<T> {
    current: ArcSwap<Snapshot<T>>,
    published: watch::Sender<Arc<Snapshot<T>>>,
}

impl<T: Send + Sync + 'static> StateCell<T> {
    pub fn new(initial: T) -> Self {
        let snapshot = Arc::new(Snapshot {
            revision: 0,
            state: initial,
        });
        let (published, _) = watch::channel(Arc::clone(&snapshot));
        Self {
            current: ArcSwap::new(snapshot),
            published,
        }
    }

    pub fn load(&self) -> Arc<Snapshot<T>> {
        self.current.load_full()
    }

    pub fn revision(&self) -> u64 {
        self.current.load().revision
    }

    /// Apply `f` to the current state until the swap succeeds.
    ///
    /// `f` may run more than once under contention and must be pure. It
    /// returns `None` to leave the state untouched, or the next state plus a
    /// value handed back to the caller.
    pub fn update<R>(&self, mut f: impl FnMut(&T) -> Option<(T, R)>) -> Option<R> {
        loop {
            let current = self.current.load_full();
            let (state, out) = f(&current.state)?;
            let next = Arc::new(Snapshot {
                revision: current.revision + 1,
                state,
            });
            let prev = self.current.compare_and_swap(&current, Arc::clone(&next));
            if Arc::ptr_eq(&*prev, &current) {
                self.publish(next);
                return Some(out);
            }
        }
    }

    // Writers racing past the swap may publish out of order; only a newer
    // revision replaces the broadcast value.
    fn publish(&self, next: Arc<Snapshot<T>>) {
        self.published.send_if_modified(|slot| {
            if slot.revision < next.revision {
                *slot = next;
                true
            } else {
                false
            }
        });
    }

    pub fn subscribe(&self) -> StateStream<T> {
        StateStream::new(self.published.subscribe())
    }
}

impl<T: Default + Send + Sync + 'static> Default for StateCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_bumps_revision() {
        let cell = StateCell::new(0_u32);
        let old = cell.update(|n| Some((n + 1, *n)));
        assert_eq!(old, Some(0));
        let snap = cell.load();
        assert_eq!(snap.revision, 1);
        assert_eq!(snap.state, 1);
    }

    #[test]
    fn declined_update_keeps_revision() {
        let cell = StateCell::new(String::from("a"));
        let out: Option<()> = cell.update(|_| None);
        assert!(out.is_none());
        assert_eq!(cell.revision(), 0);
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let cell = Arc::new(StateCell::new(0_u64));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cell = Arc::clone(&cell);
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        cell.update(|n| Some((n + 1, ())));
                    }
                })
            })
            .collect();
        for handle in handles {
            let _ = handle.join();
        }
        let snap = cell.load();
        assert_eq!(snap.state, 2000);
        assert_eq!(snap.revision, 2000);
        assert_eq!(cell.subscribe().latest().revision, 2000);
    }
}
