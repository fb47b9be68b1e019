use std::collections::BTreeMap;
use std::sync::Arc;

use index_types::{DocumentUri, TargetId};
use serde::Serialize;

/// Invoked on every transition that could change the manager's
/// [`ProgressStatus`]; consumers re-query the status and surface it.
pub type ProgressStatusDidChangeCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum WorkStatus {
    Scheduled,
    Executing,
}

/// A monotone summary of the manager's in-flight work, cheap enough to
/// recompute on every poll.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "state")]
pub enum ProgressStatus {
    /// An editor-driven preparation outranks everything else in the status
    /// display: the user is actively waiting on it.
    PreparingFileForEditorFunctionality,
    /// The build graph is being generated; files are not known yet.
    SchedulingIndexing,
    Indexing {
        preparing: BTreeMap<TargetId, WorkStatus>,
        indexing: BTreeMap<DocumentUri, WorkStatus>,
    },
    UpToDate,
}

impl ProgressStatus {
    pub fn is_up_to_date(&self) -> bool {
        matches!(self, ProgressStatus::UpToDate)
    }
}
