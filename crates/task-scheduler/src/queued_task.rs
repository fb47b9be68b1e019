use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::description::{TaskDescription, TaskPriority};
use crate::TaskId;

/// Scheduling state of a queued task, as reported to the state-change
/// callback passed to `schedule`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueuedTaskState {
    Executing,
    /// The current execution attempt was stopped so a more important task
    /// can run; the task is pending again.
    CancelledToBeRescheduled,
    /// Terminal: the task finished or its owner cancelled it.
    Finished,
}

pub type StateChangeCallback = Arc<dyn Fn(QueuedTaskState) + Send + Sync>;

/// Result of one execution attempt, only visible to the dispatcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ExecutionStatus {
    Terminated,
    CancelledToReschedule,
}

pub(crate) struct TaskInner<D> {
    pub(crate) id: TaskId,
    pub(crate) description: Arc<D>,
    /// FIFO tie-break within a priority class.
    pub(crate) sequence: u64,
    /// Monotone non-decreasing; readable from any thread.
    priority: AtomicU8,
    executing: AtomicBool,
    /// Latch for cancel-to-be-rescheduled. If it is set before the worker
    /// actually starts, the worker returns `CancelledToReschedule` without
    /// running `execute` at all.
    cancelled_to_be_rescheduled: AtomicBool,
    /// Owner cancellation; never reset.
    cancellation: CancellationToken,
    /// Interrupts the current execution attempt, for either cancellation
    /// flavor. Recreated on every attempt.
    attempt_cancellation: Mutex<CancellationToken>,
    finished: watch::Sender<bool>,
    state_change: Option<StateChangeCallback>,
    /// Wakes the dispatcher of the owning scheduler.
    wake_up: Arc<tokio::sync::Notify>,
}

impl<D: TaskDescription> TaskInner<D> {
    pub(crate) fn new(
        id: TaskId,
        sequence: u64,
        priority: TaskPriority,
        description: D,
        state_change: Option<StateChangeCallback>,
        wake_up: Arc<tokio::sync::Notify>,
    ) -> Arc<Self> {
        let (finished, _) = watch::channel(false);
        let cancellation = CancellationToken::new();
        let attempt_cancellation = Mutex::new(cancellation.child_token());
        Arc::new(TaskInner {
            id,
            description: Arc::new(description),
            sequence,
            priority: AtomicU8::new(priority as u8),
            executing: AtomicBool::new(false),
            cancelled_to_be_rescheduled: AtomicBool::new(false),
            cancellation,
            attempt_cancellation,
            finished,
            state_change,
            wake_up,
        })
    }

    pub(crate) fn priority(&self) -> TaskPriority {
        TaskPriority::from_u8(self.priority.load(Ordering::SeqCst))
    }

    pub(crate) fn is_executing(&self) -> bool {
        self.executing.load(Ordering::SeqCst)
    }

    pub(crate) fn is_owner_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Bumps the priority if `priority` is higher than the current one.
    /// Returns whether anything changed. Does not wake the dispatcher, the
    /// caller decides whether a re-poke is needed.
    pub(crate) fn elevate_priority(&self, priority: TaskPriority) -> bool {
        self.priority.fetch_max(priority as u8, Ordering::SeqCst) < priority as u8
    }

    pub(crate) fn notify_state(&self, state: QueuedTaskState) {
        if let Some(callback) = &self.state_change {
            callback(state);
        }
    }

    pub(crate) fn set_executing(&self) {
        self.executing.store(true, Ordering::SeqCst);
    }

    /// Asks the current execution attempt to stop so the task can be
    /// rescheduled. Safe to call before the worker started: the latch is
    /// observed first thing.
    pub(crate) fn cancel_to_be_rescheduled(&self) {
        self.cancelled_to_be_rescheduled.store(true, Ordering::SeqCst);
        self.attempt_cancellation.lock().unwrap().cancel();
    }

    pub(crate) fn reset_for_reschedule(&self) {
        self.executing.store(false, Ordering::SeqCst);
        self.cancelled_to_be_rescheduled.store(false, Ordering::SeqCst);
    }

    pub(crate) fn finish(&self) {
        // State-change listeners run before waiters resume, so bookkeeping
        // keyed on task completion is consistent by the time `wait` returns.
        self.notify_state(QueuedTaskState::Finished);
        self.finished.send_replace(true);
    }

    /// Runs one execution attempt on the current worker.
    pub(crate) async fn run(&self) -> ExecutionStatus {
        if self.cancelled_to_be_rescheduled.load(Ordering::SeqCst)
            && !self.cancellation.is_cancelled()
        {
            return ExecutionStatus::CancelledToReschedule;
        }
        let attempt = self.cancellation.child_token();
        *self.attempt_cancellation.lock().unwrap() = attempt.clone();
        // The latch may have fired between the check above and installing
        // the fresh token.
        if self.cancelled_to_be_rescheduled.load(Ordering::SeqCst) {
            attempt.cancel();
        }
        self.description.execute(&attempt).await;
        if self.cancelled_to_be_rescheduled.load(Ordering::SeqCst)
            && !self.cancellation.is_cancelled()
        {
            ExecutionStatus::CancelledToReschedule
        } else {
            ExecutionStatus::Terminated
        }
    }

    fn cancel(&self) {
        self.cancellation.cancel();
        self.wake_up.notify_one();
    }

    async fn wait(&self) {
        let mut receiver = self.finished.subscribe();
        // wait_for returns immediately if the value already satisfies the
        // predicate; the only error is a dropped sender, which cannot
        // happen while `self` is alive.
        let _ = receiver.wait_for(|finished| *finished).await;
    }
}

/// Caller-side handle to a scheduled task. Clones observe the same task.
pub struct QueuedTask<D> {
    pub(crate) inner: Arc<TaskInner<D>>,
}

impl<D> Clone for QueuedTask<D> {
    fn clone(&self) -> Self {
        QueuedTask { inner: self.inner.clone() }
    }
}

impl<D: TaskDescription> QueuedTask<D> {
    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    pub fn description(&self) -> &Arc<D> {
        &self.inner.description
    }

    pub fn priority(&self) -> TaskPriority {
        self.inner.priority()
    }

    /// Whether a worker picked the task up. Remains true while the task is
    /// being cancelled for rescheduling, until it is pending again.
    pub fn is_executing(&self) -> bool {
        self.inner.is_executing()
    }

    /// Cancels the task. Execution observes the cancellation at its next
    /// suspension point and is never re-attempted.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Bumps the task's priority so it is considered earlier in dispatch
    /// rounds. Lowering a priority is a no-op.
    pub fn elevate_priority(&self, priority: TaskPriority) {
        if self.inner.elevate_priority(priority) {
            self.inner.wake_up.notify_one();
        }
    }

    /// Suspends until the task is terminal. Dropping the returned future
    /// does not affect the task.
    pub async fn wait(&self) {
        self.inner.wait().await;
    }

    /// Like [`QueuedTask::wait`], but if the returned future is dropped
    /// before the task finished, the task is cancelled. For callers that
    /// are the sole owner of the task.
    pub async fn wait_propagating_cancellation(&self) {
        struct CancelOnDrop<'a, D: TaskDescription> {
            task: &'a QueuedTask<D>,
            finished: bool,
        }
        impl<D: TaskDescription> Drop for CancelOnDrop<'_, D> {
            fn drop(&mut self) {
                if !self.finished {
                    self.task.cancel();
                }
            }
        }

        let mut guard = CancelOnDrop { task: self, finished: false };
        guard.task.inner.wait().await;
        guard.finished = true;
    }
}
