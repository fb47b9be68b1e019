use std::sync::Arc;

/// Structured entries for the user-visible indexing log.
///
/// A task id is stable across one partition's lifetime: one `Begin`, any
/// number of `Report`s, one `End`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexLogStructure {
    Begin { title: String, task_id: String },
    Report { task_id: String },
    End { task_id: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexLogSeverity {
    Info,
    Warning,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexLogMessage {
    pub message: String,
    pub severity: IndexLogSeverity,
    pub structure: IndexLogStructure,
}

pub type IndexLogCallback = Arc<dyn Fn(IndexLogMessage) + Send + Sync>;
