use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use index_types::{BuildServer, TargetId};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::up_to_date_tracker::{NoSecondaryKey, UpToDateTracker};

/// Why a target is being prepared. Editor-driven preparation outranks
/// indexing: it wins when requests are merged and may cancel-and-reschedule
/// an indexing-driven preparation in the scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TargetPreparationPurpose {
    ForIndexing,
    ForEditorFunctionality,
}

/// Builds a batch of targets through the build server so their sources can
/// be type-checked and indexed.
pub struct PrepareTargetsTaskDescription {
    pub(crate) id: Uuid,
    pub(crate) targets: Vec<TargetId>,
    pub(crate) purpose: TargetPreparationPurpose,
    build_server: Arc<dyn BuildServer>,
    preparation_up_to_date_tracker: Arc<UpToDateTracker<TargetId>>,
}

impl PrepareTargetsTaskDescription {
    pub(crate) fn new(
        targets: Vec<TargetId>,
        purpose: TargetPreparationPurpose,
        build_server: Arc<dyn BuildServer>,
        preparation_up_to_date_tracker: Arc<UpToDateTracker<TargetId>>,
    ) -> Self {
        PrepareTargetsTaskDescription {
            id: Uuid::new_v4(),
            targets,
            purpose,
            build_server,
            preparation_up_to_date_tracker,
        }
    }

    pub(crate) async fn execute(&self, cancellation: &CancellationToken) {
        let op_start = Instant::now();
        let targets_to_prepare: Vec<TargetId> = self
            .targets
            .iter()
            .filter(|target| {
                !self.preparation_up_to_date_tracker.is_up_to_date(target, &NoSecondaryKey)
            })
            .cloned()
            .collect();
        if targets_to_prepare.is_empty() {
            tracing::debug!("{self}: all targets already prepared");
            return;
        }

        let target_set: BTreeSet<TargetId> = targets_to_prepare.iter().cloned().collect();
        let result = tokio::select! {
            result = self.build_server.prepare(target_set) => result,
            _ = cancellation.cancelled() => return,
        };
        match result {
            Ok(()) if !cancellation.is_cancelled() => {
                self.preparation_up_to_date_tracker.mark_up_to_date(
                    targets_to_prepare.into_iter().map(|target| (target, NoSecondaryKey)),
                    op_start,
                );
            }
            Ok(()) => {}
            // The next trigger retries; the tracker entries stay out-of-date.
            Err(error) => tracing::info!("{self} failed: {error:#}"),
        }
    }
}

impl fmt::Display for PrepareTargetsTaskDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let targets =
            self.targets.iter().map(TargetId::as_str).collect::<Vec<_>>().join(", ");
        match self.purpose {
            TargetPreparationPurpose::ForIndexing => {
                write!(f, "preparing {targets} for indexing")
            }
            TargetPreparationPurpose::ForEditorFunctionality => {
                write!(f, "preparing {targets} for editor functionality")
            }
        }
    }
}
