use std::fmt::Display;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Execution priority of a queued task. Order matters: a task with a higher
/// priority is always considered for admission before a lower one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum TaskPriority {
    Background = 0,
    Low = 1,
    Medium = 2,
    High = 3,
}

impl TaskPriority {
    pub(crate) fn from_u8(raw: u8) -> TaskPriority {
        match raw {
            0 => TaskPriority::Background,
            1 => TaskPriority::Low,
            2 => TaskPriority::Medium,
            _ => TaskPriority::High,
        }
    }
}

/// How a pending task relates to a currently executing one.
pub enum TaskDependency<D> {
    /// The pending task must not start before the referenced task finished.
    Wait(Arc<D>),
    /// The referenced task should be cancelled and rescheduled so the
    /// pending task can run first. Only valid against idempotent tasks of
    /// lower or equal priority; the dispatcher downgrades anything else to
    /// `Wait`.
    CancelAndReschedule(Arc<D>),
}

/// What a task does, independently of its scheduling state.
///
/// Descriptions are shared with the dispatcher and with other descriptions
/// (through [`TaskDescription::dependencies`]), so they must be cheap to
/// keep behind an `Arc` and must not hold mutable scheduling state of their
/// own.
#[async_trait]
pub trait TaskDescription: Display + Send + Sync + 'static {
    /// Run the task. Must observe `cancellation` at reasonable intervals;
    /// when the token fires, the method should return as soon as it can do
    /// so cleanly. Must be idempotent if [`TaskDescription::is_idempotent`]
    /// returns true, because execution is re-attempted from the start after
    /// a cancel-for-reschedule.
    async fn execute(&self, cancellation: &CancellationToken);

    fn is_idempotent(&self) -> bool {
        false
    }

    /// How many CPU cores the task is expected to saturate. Admission
    /// charges this amount against the concurrency budget of the task's
    /// priority band.
    fn estimated_cpu_core_count(&self) -> usize {
        1
    }

    /// Dependencies of this task against the currently executing tasks.
    /// Called on every dispatch round in which the task is pending.
    fn dependencies(&self, currently_executing: &[Arc<Self>]) -> Vec<TaskDependency<Self>>
    where
        Self: Sized;
}
