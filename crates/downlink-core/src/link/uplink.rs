// ── Outbound command queue ──

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::DownlinkError;

type AckSender = oneshot::Sender<Result<(), DownlinkError>>;

/// A command body waiting for an upstream feed slot.
pub(crate) struct UpCommand {
    pub(crate) body: Value,
    /// Last-write-wins: a newer coalescing command replaces queued ones.
    pub(crate) coalesce: bool,
    pub(crate) ack: Option<AckSender>,
}

impl UpCommand {
    pub(crate) fn new(body: Value) -> Self {
        Self {
            body,
            coalesce: false,
            ack: None,
        }
    }

    pub(crate) fn coalescing(body: Value) -> Self {
        Self {
            body,
            coalesce: true,
            ack: None,
        }
    }

    pub(crate) fn with_ack(body: Value) -> (Self, CommandAck) {
        let (tx, rx) = oneshot::channel();
        let command = Self {
            body,
            coalesce: false,
            ack: Some(tx),
        };
        (command, CommandAck { rx })
    }

    /// Resolve the acknowledgement. A dropped receiver is not an error.
    pub(crate) fn resolve(self, result: Result<(), DownlinkError>) {
        if let Some(ack) = self.ack {
            let _ = ack.send(result);
        }
    }
}

#[derive(Default)]
pub(crate) struct UpQueue {
    queue: Mutex<VecDeque<UpCommand>>,
}

impl UpQueue {
    pub(crate) fn push(&self, command: UpCommand) {
        let mut queue = self.queue.lock();
        if command.coalesce {
            queue.retain(|queued| !queued.coalesce);
        }
        queue.push_back(command);
    }

    pub(crate) fn pop(&self) -> Option<UpCommand> {
        self.queue.lock().pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Drop every queued command, failing its acknowledgement.
    pub(crate) fn fail_all(&self) -> usize {
        let drained: Vec<UpCommand> = self.queue.lock().drain(..).collect();
        let count = drained.len();
        for command in drained {
            command.resolve(Err(DownlinkError::Closed));
        }
        count
    }
}

// ── CommandAck ──────────────────────────────────────────────────────

/// Resolves once the command has been handed to the transport, or with
/// [`DownlinkError::Closed`] if the link closes first.
pub struct CommandAck {
    rx: oneshot::Receiver<Result<(), DownlinkError>>,
}

impl CommandAck {
    pub(crate) fn failed(error: DownlinkError) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(error));
        Self { rx }
    }
}

impl Future for CommandAck {
    type Output = Result<(), DownlinkError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(DownlinkError::Closed)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_test::{assert_pending, assert_ready, task};

    #[test]
    fn coalescing_commands_replace_queued_ones() {
        let queue = UpQueue::default();
        queue.push(UpCommand::coalescing(json!(1)));
        queue.push(UpCommand::new(json!("cmd")));
        queue.push(UpCommand::coalescing(json!(2)));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop().map(|c| c.body), Some(json!("cmd")));
        assert_eq!(queue.pop().map(|c| c.body), Some(json!(2)));
        assert!(queue.is_empty());
    }

    #[test]
    fn ack_resolves_on_send() {
        let (command, ack) = UpCommand::with_ack(json!(1));
        let mut ack = task::spawn(ack);
        assert_pending!(ack.poll());
        command.resolve(Ok(()));
        assert!(matches!(assert_ready!(ack.poll()), Ok(())));
    }

    #[test]
    fn failing_queue_closes_acks() {
        let queue = UpQueue::default();
        let (command, ack) = UpCommand::with_ack(json!(1));
        queue.push(command);
        assert_eq!(queue.fail_all(), 1);
        let mut ack = task::spawn(ack);
        assert!(matches!(assert_ready!(ack.poll()), Err(DownlinkError::Closed)));
    }

    #[test]
    fn dropped_sender_reads_as_closed() {
        let (command, ack) = UpCommand::with_ack(json!(1));
        drop(command);
        let mut ack = task::spawn(ack);
        assert!(matches!(assert_ready!(ack.poll()), Err(DownlinkError::Closed)));
    }
}
