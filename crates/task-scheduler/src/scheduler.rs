use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::description::{TaskDependency, TaskDescription, TaskPriority};
use crate::queued_task::{ExecutionStatus, QueuedTask, QueuedTaskState, StateChangeCallback, TaskInner};

struct SchedulerState<D> {
    pending: Vec<Arc<TaskInner<D>>>,
    executing: Vec<Arc<TaskInner<D>>>,
}

/// Admits tasks, sequences them respecting the dependencies their
/// descriptions declare, and caps concurrency per priority band. See the
/// crate documentation for the full contract.
pub struct TaskScheduler<D: TaskDescription> {
    state: Arc<Mutex<SchedulerState<D>>>,
    wake_up: Arc<Notify>,
    /// `(priority, max concurrently used cores)`, sorted by descending
    /// priority with non-increasing limits. A task is charged against the
    /// first band at or below its own priority.
    capacities: Arc<Vec<(TaskPriority, usize)>>,
    shutdown: CancellationToken,
    next_id: AtomicU64,
    next_sequence: AtomicU64,
}

impl<D: TaskDescription> TaskScheduler<D> {
    /// Creates a scheduler and spawns its dispatcher loop onto the current
    /// runtime.
    ///
    /// Panics if `capacities` is empty, not sorted by strictly descending
    /// priority, or has increasing concurrency limits: all of these are
    /// programmer errors in the embedding code.
    pub fn new(capacities: Vec<(TaskPriority, usize)>) -> Self {
        assert!(!capacities.is_empty(), "scheduler needs at least one priority band");
        for window in capacities.windows(2) {
            assert!(
                window[0].0 > window[1].0,
                "priority bands must be sorted by strictly descending priority"
            );
            assert!(
                window[0].1 >= window[1].1,
                "lower priority bands cannot have a larger concurrency limit"
            );
        }
        assert!(
            capacities.iter().all(|(_, limit)| *limit >= 1),
            "a concurrency limit of 0 would starve the band forever"
        );

        let scheduler = TaskScheduler {
            state: Arc::new(Mutex::new(SchedulerState { pending: Vec::new(), executing: Vec::new() })),
            wake_up: Arc::new(Notify::new()),
            capacities: Arc::new(capacities),
            shutdown: CancellationToken::new(),
            next_id: AtomicU64::new(0),
            next_sequence: AtomicU64::new(0),
        };

        let state = scheduler.state.clone();
        let wake_up = scheduler.wake_up.clone();
        let capacities = scheduler.capacities.clone();
        let shutdown = scheduler.shutdown.clone();
        tokio::spawn(async move {
            loop {
                // Create the listener before dispatching so wake-ups issued
                // during the round are not lost.
                let notified = wake_up.notified();
                dispatch_round(&state, &capacities, &wake_up);
                tokio::select! {
                    _ = notified => {}
                    _ = shutdown.cancelled() => break,
                }
            }
        });

        scheduler
    }

    /// Enqueues a task and wakes the dispatcher. Returns immediately; the
    /// handle can be used to await, cancel, or re-prioritize the task.
    pub fn schedule(&self, priority: TaskPriority, description: D) -> QueuedTask<D> {
        self.schedule_inner(priority, description, None)
    }

    /// Like [`TaskScheduler::schedule`], with a callback invoked on every
    /// scheduling state change of the task.
    pub fn schedule_with_state_callback(
        &self,
        priority: TaskPriority,
        description: D,
        on_state_change: StateChangeCallback,
    ) -> QueuedTask<D> {
        self.schedule_inner(priority, description, Some(on_state_change))
    }

    fn schedule_inner(
        &self,
        priority: TaskPriority,
        description: D,
        on_state_change: Option<StateChangeCallback>,
    ) -> QueuedTask<D> {
        let task = TaskInner::new(
            self.next_id.fetch_add(1, Ordering::SeqCst),
            self.next_sequence.fetch_add(1, Ordering::SeqCst),
            priority,
            description,
            on_state_change,
            self.wake_up.clone(),
        );
        self.state.lock().unwrap().pending.push(task.clone());
        self.wake_up.notify_one();
        QueuedTask { inner: task }
    }

    /// Number of tasks currently executing; for introspection and tests.
    pub fn currently_executing_count(&self) -> usize {
        self.state.lock().unwrap().executing.len()
    }
}

impl<D: TaskDescription> Drop for TaskScheduler<D> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn max_concurrent_tasks(capacities: &[(TaskPriority, usize)], priority: TaskPriority) -> usize {
    capacities
        .iter()
        .find(|(band, _)| *band <= priority)
        .or_else(|| capacities.last())
        .map(|(_, limit)| *limit)
        .expect("capacities are non-empty")
}

/// One dispatch round: sweep cancelled pending tasks, then admit pending
/// tasks in priority order while the concurrency budget and their declared
/// dependencies allow it.
fn dispatch_round<D: TaskDescription>(
    state: &Arc<Mutex<SchedulerState<D>>>,
    capacities: &[(TaskPriority, usize)],
    wake_up: &Arc<Notify>,
) {
    let mut finished = Vec::new();
    let mut admitted = Vec::new();

    {
        let mut locked = state.lock().unwrap();

        // Tasks cancelled by their owner before they started never execute.
        locked.pending.retain(|task| {
            if task.is_owner_cancelled() {
                finished.push(task.clone());
                false
            } else {
                true
            }
        });

        locked
            .pending
            .sort_by(|a, b| b.priority().cmp(&a.priority()).then(a.sequence.cmp(&b.sequence)));

        let mut index = 0;
        'pending: while index < locked.pending.len() {
            let task = locked.pending[index].clone();
            let used: usize = locked
                .executing
                .iter()
                .map(|t| t.description.estimated_cpu_core_count())
                .sum();
            if used >= max_concurrent_tasks(capacities, task.priority()) {
                // Every task further down the queue has the same or a lower
                // priority, and limits are non-increasing.
                break;
            }

            let executing_descriptions: Vec<Arc<D>> =
                locked.executing.iter().map(|t| t.description.clone()).collect();
            let mut has_unresolved_wait = false;
            let mut issued_cancellation = false;
            for dependency in task.description.dependencies(&executing_descriptions) {
                match dependency {
                    TaskDependency::Wait(other) => {
                        if let Some(running) = find_executing(&locked.executing, &other) {
                            // Priority inheritance: whatever we wait on must
                            // not be outprioritized by our own admission.
                            running.elevate_priority(task.priority());
                            has_unresolved_wait = true;
                        }
                    }
                    TaskDependency::CancelAndReschedule(other) => {
                        let Some(running) = find_executing(&locked.executing, &other) else {
                            continue;
                        };
                        if running.priority() > task.priority() {
                            // Never preempt a more important task.
                            has_unresolved_wait = true;
                        } else if !running.description.is_idempotent() {
                            tracing::error!(
                                "cannot cancel non-idempotent task '{}' to reschedule it; \
                                 waiting for it instead",
                                running.description
                            );
                            has_unresolved_wait = true;
                        } else {
                            tracing::debug!(
                                "cancelling task '{}' so that '{}' can run",
                                running.description,
                                task.description
                            );
                            running.cancel_to_be_rescheduled();
                            issued_cancellation = true;
                        }
                    }
                }
            }

            if issued_cancellation {
                // Wait for the cancelled tasks to actually stop and
                // re-enqueue themselves; their exit re-pokes the dispatcher.
                break 'pending;
            }
            if has_unresolved_wait {
                index += 1;
                continue;
            }

            locked.pending.remove(index);
            task.set_executing();
            locked.executing.push(task.clone());
            admitted.push(task);
        }
    }

    for task in finished {
        task.finish();
    }
    for task in admitted {
        task.notify_state(QueuedTaskState::Executing);
        spawn_execution(task, state.clone(), wake_up.clone());
    }
}

fn find_executing<'a, D>(
    executing: &'a [Arc<TaskInner<D>>],
    description: &Arc<D>,
) -> Option<&'a Arc<TaskInner<D>>> {
    executing.iter().find(|task| Arc::ptr_eq(&task.description, description))
}

fn spawn_execution<D: TaskDescription>(
    task: Arc<TaskInner<D>>,
    state: Arc<Mutex<SchedulerState<D>>>,
    wake_up: Arc<Notify>,
) {
    tokio::spawn(async move {
        let status = task.run().await;
        {
            let mut locked = state.lock().unwrap();
            locked.executing.retain(|t| !Arc::ptr_eq(t, &task));
            if status == ExecutionStatus::CancelledToReschedule {
                task.reset_for_reschedule();
                locked.pending.push(task.clone());
            }
        }
        match status {
            ExecutionStatus::Terminated => task.finish(),
            ExecutionStatus::CancelledToReschedule => {
                task.notify_state(QueuedTaskState::CancelledToBeRescheduled)
            }
        }
        wake_up.notify_one();
    });
}
