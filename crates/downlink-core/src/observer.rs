// ── Observer capabilities ──
//
// Lifecycle callbacks shared by every downlink kind. Kind-specific traits
// (`ValueObserver`, `ListObserver`, ...) extend `LinkObserver`; every method
// has a no-op default so an observer implements only what it needs.

use std::sync::Arc;

use crate::error::{ObserverError, ObserverResult};
use crate::fanout::Fanout;

/// How an observer wants to be scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dispatch {
    /// Runs on whatever context delivers the event, before deferred ones.
    Preemptive,
    /// Runs on the view's stage.
    #[default]
    Deferred,
}

/// Link lifecycle callbacks.
pub trait LinkObserver: Send + Sync {
    /// Read once when the observer is registered.
    fn dispatch(&self) -> Dispatch {
        Dispatch::Deferred
    }

    fn will_link(&self) -> ObserverResult {
        Ok(())
    }

    fn did_link(&self) -> ObserverResult {
        Ok(())
    }

    fn will_sync(&self) -> ObserverResult {
        Ok(())
    }

    fn did_sync(&self) -> ObserverResult {
        Ok(())
    }

    fn will_unlink(&self) -> ObserverResult {
        Ok(())
    }

    fn did_unlink(&self) -> ObserverResult {
        Ok(())
    }

    fn did_connect(&self) -> ObserverResult {
        Ok(())
    }

    fn did_disconnect(&self) -> ObserverResult {
        Ok(())
    }

    fn did_close(&self) -> ObserverResult {
        Ok(())
    }

    /// A callback on this view returned a non-fatal error.
    fn did_fail(&self, _error: &ObserverError) {}
}

// ── ObserverSet ─────────────────────────────────────────────────────

/// A view's observers, split by dispatch class at registration time.
pub struct ObserverSet<O: ?Sized> {
    preemptive: Fanout<O>,
    deferred: Fanout<O>,
}

impl<O: ?Sized> Default for ObserverSet<O> {
    fn default() -> Self {
        Self {
            preemptive: Fanout::Empty,
            deferred: Fanout::Empty,
        }
    }
}

impl<O: ?Sized> Clone for ObserverSet<O> {
    fn clone(&self) -> Self {
        Self {
            preemptive: self.preemptive.clone(),
            deferred: self.deferred.clone(),
        }
    }
}

impl<O: ?Sized + LinkObserver> ObserverSet<O> {
    pub fn with(&self, observer: &Arc<O>) -> Self {
        let mut next = self.clone();
        match observer.dispatch() {
            Dispatch::Preemptive => next.preemptive = self.preemptive.with(observer),
            Dispatch::Deferred => next.deferred = self.deferred.with(observer),
        }
        next
    }

    pub fn without(&self, observer: &Arc<O>) -> Self {
        Self {
            preemptive: self.preemptive.without(observer),
            deferred: self.deferred.without(observer),
        }
    }

    pub fn preemptive(&self) -> &Fanout<O> {
        &self.preemptive
    }

    pub fn deferred(&self) -> &Fanout<O> {
        &self.deferred
    }

    pub fn len(&self) -> usize {
        self.preemptive.len() + self.deferred.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Preemptive observers first, then deferred.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<O>> {
        self.preemptive.iter().chain(self.deferred.iter())
    }
}
