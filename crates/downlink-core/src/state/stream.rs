// ── State subscriptions ──

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use super::Snapshot;

/// A subscription to a downlink's state.
///
/// Holds the snapshot seen at creation and wakes on every later revision.
pub struct StateStream<T: Send + Sync + 'static> {
    current: Arc<Snapshot<T>>,
    receiver: watch::Receiver<Arc<Snapshot<T>>>,
}

impl<T: Send + Sync + 'static> StateStream<T> {
    pub(crate) fn new(receiver: watch::Receiver<Arc<Snapshot<T>>>) -> Self {
        let current = Arc::clone(&receiver.borrow());
        Self { current, receiver }
    }

    /// The snapshot captured at creation, or at the last `changed()`.
    pub fn current(&self) -> &Arc<Snapshot<T>> {
        &self.current
    }

    pub fn latest(&self) -> Arc<Snapshot<T>> {
        Arc::clone(&self.receiver.borrow())
    }

    /// Wait for the next revision. Returns `None` once the link is gone.
    pub async fn changed(&mut self) -> Option<Arc<Snapshot<T>>> {
        self.receiver.changed().await.ok()?;
        let snap = Arc::clone(&self.receiver.borrow_and_update());
        self.current = Arc::clone(&snap);
        Some(snap)
    }

    pub fn into_stream(self) -> StateWatchStream<T> {
        StateWatchStream {
            inner: WatchStream::new(self.receiver),
        }
    }
}

/// `Stream` adapter yielding each published snapshot.
pub struct StateWatchStream<T: Send + Sync + 'static> {
    inner: WatchStream<Arc<Snapshot<T>>>,
}

impl<T: Send + Sync + 'static> Stream for StateWatchStream<T> {
    type Item = Arc<Snapshot<T>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::super::StateCell;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn changed_yields_new_revision() {
        let cell = StateCell::new(vec![1]);
        let mut stream = cell.subscribe();
        assert_eq!(stream.current().revision, 0);

        cell.update(|v| {
            let mut next = v.clone();
            next.push(2);
            Some((next, ()))
        });

        let snap = stream.changed().await;
        assert_eq!(snap.map(|s| s.state.clone()), Some(vec![1, 2]));
        assert_eq!(stream.current().revision, 1);
    }

    #[tokio::test]
    async fn into_stream_starts_with_current() {
        let cell = StateCell::new("a");
        let mut stream = cell.subscribe().into_stream();
        let first = stream.next().await;
        assert_eq!(first.map(|s| s.state), Some("a"));
    }

    #[tokio::test]
    async fn changed_ends_when_cell_dropped() {
        let cell = StateCell::new(0);
        let mut stream = cell.subscribe();
        drop(cell);
        assert!(stream.changed().await.is_none());
    }
}
