use crate::uri::DocumentUri;

/// Read-only view on the editor's open documents, used to detect in-memory
/// edits that have not reached disk yet.
pub trait DocumentManager: Send + Sync {
    fn has_unsaved_changes(&self, uri: &DocumentUri) -> bool;
}
