// ── Execution stages ──
//
// A Stage is an execution context that relays hop onto when a view's
// deferred observers must run somewhere other than the delivering thread.
// Hops are cooperative: `execute` enqueues and returns.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// A unit of work scheduled on a stage.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// An execution context that runs tasks in submission order.
pub trait Stage: Send + Sync + 'static {
    fn execute(&self, task: Task);
}

/// Whether two stage handles refer to the same execution context.
pub fn same_stage(a: &Arc<dyn Stage>, b: &Arc<dyn Stage>) -> bool {
    crate::fanout::same(a, b)
}

// ── TaskStage ───────────────────────────────────────────────────────

/// Stage backed by a tokio task draining an unbounded queue.
///
/// Tasks run one at a time on the worker, so everything scheduled on the same
/// `TaskStage` is serialized. The worker exits when cancelled or when every
/// handle has been dropped.
pub struct TaskStage {
    tx: mpsc::UnboundedSender<Task>,
}

impl TaskStage {
    /// Spawn the worker on the current tokio runtime.
    pub fn spawn(cancel: CancellationToken) -> (Arc<Self>, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(stage_worker_task(rx, cancel));
        (Arc::new(Self { tx }), handle)
    }
}

impl Stage for TaskStage {
    fn execute(&self, task: Task) {
        if self.tx.send(task).is_err() {
            debug!("stage worker stopped; dropping task");
        }
    }
}

async fn stage_worker_task(mut rx: mpsc::UnboundedReceiver<Task>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            task = rx.recv() => {
                let Some(task) = task else { break };
                task();
            }
        }
    }
    trace!("stage worker exited");
}

// ── QueueStage ──────────────────────────────────────────────────────

/// Stage whose queue is drained explicitly by its owner.
///
/// Suits hosts with their own loop (a frame tick, a UI thread) and makes
/// suspended dispatches observable in tests.
#[derive(Default)]
pub struct QueueStage {
    queue: Mutex<VecDeque<Task>>,
}

impl QueueStage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Run the oldest queued task. Returns `false` when the queue was empty.
    pub fn run_next(&self) -> bool {
        // Pop before running: the task may enqueue more work on this stage.
        let task = self.queue.lock().pop_front();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Run queued tasks, including ones enqueued while draining. Returns the
    /// number of tasks run.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
        }
        ran
    }
}

impl Stage for QueueStage {
    fn execute(&self, task: Task) {
        self.queue.lock().push_back(task);
    }
}
