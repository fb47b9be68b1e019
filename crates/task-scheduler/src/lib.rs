/*!
This crate defines a generic task scheduler which is responsible for:
1. Multiplexing many heterogeneous jobs onto a bounded number of cooperative
   worker slots, with a per-priority concurrency budget.
2. Sequencing jobs according to the dependencies their descriptions declare
   against the currently executing jobs, including the ability to cancel an
   executing job so that a more important one can run first, and reschedule
   it afterwards.

When a `TaskScheduler` is created, a dispatcher loop is spawned onto the
runtime. The dispatcher waits to be woken up and then performs one dispatch
round. It wakes up when:

1. a new task is scheduled
2. a task finishes or is cancelled to be rescheduled
3. a task's priority is elevated

It is only within a dispatch round that tasks are admitted for execution.
The publicly accessible methods can be called from any task: they only
mutate the queue and wake the dispatcher.

Execution is cooperative: a task description's `execute` method receives a
cancellation token and is expected to observe it at its suspension points.
Owner-initiated cancellation (via [`QueuedTask::cancel`]) is terminal;
cancellation for rescheduling re-enqueues the task and execution is
re-attempted from the start, which is why only idempotent descriptions may
be cancelled for rescheduling.
*/

mod description;
mod queued_task;
mod scheduler;

pub use description::{TaskDependency, TaskDescription, TaskPriority};
pub use queued_task::{QueuedTask, QueuedTaskState, StateChangeCallback};
pub use scheduler::TaskScheduler;

pub type TaskId = u64;
