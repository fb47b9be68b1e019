use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use task_scheduler::{TaskDependency, TaskDescription};
use tokio_util::sync::CancellationToken;

use crate::prepare::{PrepareTargetsTaskDescription, TargetPreparationPurpose};
use crate::update_index_store::UpdateIndexStoreTaskDescription;

/// The closed world of tasks the indexing scheduler runs. Keeping them in
/// one enum lets a pending task declare dependencies against executing
/// tasks of either kind.
pub enum IndexTaskDescription {
    PrepareTargets(PrepareTargetsTaskDescription),
    UpdateIndexStore(UpdateIndexStoreTaskDescription),
}

impl fmt::Display for IndexTaskDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexTaskDescription::PrepareTargets(description) => description.fmt(f),
            IndexTaskDescription::UpdateIndexStore(description) => description.fmt(f),
        }
    }
}

#[async_trait]
impl TaskDescription for IndexTaskDescription {
    async fn execute(&self, cancellation: &CancellationToken) {
        match self {
            IndexTaskDescription::PrepareTargets(description) => {
                description.execute(cancellation).await
            }
            IndexTaskDescription::UpdateIndexStore(description) => {
                description.execute(cancellation).await
            }
        }
    }

    // Both preparation and index-store updates only write state behind
    // freshness checks, so re-running them from the start is safe.
    fn is_idempotent(&self) -> bool {
        true
    }

    // The build server and the compiler govern their own parallelism.
    fn estimated_cpu_core_count(&self) -> usize {
        1
    }

    fn dependencies(&self, currently_executing: &[Arc<Self>]) -> Vec<TaskDependency<Self>> {
        match self {
            IndexTaskDescription::PrepareTargets(description) => currently_executing
                .iter()
                .filter_map(|other| {
                    let IndexTaskDescription::PrepareTargets(other_preparation) = other.as_ref()
                    else {
                        return None;
                    };
                    // An editor-driven preparation may interrupt a
                    // background one; everything else serializes, because
                    // most build servers cannot run two builds at once.
                    if other_preparation.purpose == TargetPreparationPurpose::ForIndexing
                        && description.purpose == TargetPreparationPurpose::ForEditorFunctionality
                    {
                        Some(TaskDependency::CancelAndReschedule(other.clone()))
                    } else {
                        Some(TaskDependency::Wait(other.clone()))
                    }
                })
                .collect(),
            IndexTaskDescription::UpdateIndexStore(description) => {
                let main_files = description.main_file_uris();
                currently_executing
                    .iter()
                    .filter_map(|other| {
                        let IndexTaskDescription::UpdateIndexStore(other_update) = other.as_ref()
                        else {
                            return None;
                        };
                        // At most one process may write units for a main
                        // file at a time; disjoint batches can run freely.
                        if other_update.main_file_uris().is_disjoint(&main_files) {
                            None
                        } else {
                            Some(TaskDependency::Wait(other.clone()))
                        }
                    })
                    .collect()
            }
        }
    }
}
