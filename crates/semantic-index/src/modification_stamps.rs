use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use index_types::{DocumentManager, DocumentUri};

/// Modification state of a file on disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileStamp {
    Missing,
    ModifiedAt(SystemTime),
}

/// How aggressively the checked index discards results from units that may
/// be stale.
#[derive(Clone)]
pub enum IndexCheckLevel {
    /// Results are stale only when the source file no longer exists.
    DeletedFiles,
    /// Also stale when the file was modified on disk after the unit was
    /// written.
    ModifiedFiles,
    /// Also stale when the editor has unsaved edits for the file.
    InMemoryModifiedFiles(Arc<dyn DocumentManager>),
}

impl fmt::Debug for IndexCheckLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexCheckLevel::DeletedFiles => f.write_str("DeletedFiles"),
            IndexCheckLevel::ModifiedFiles => f.write_str("ModifiedFiles"),
            IndexCheckLevel::InMemoryModifiedFiles(_) => f.write_str("InMemoryModifiedFiles"),
        }
    }
}

/// Caches file modification times, existence and in-memory-edit state for
/// the lifetime of one consumer request.
///
/// The caches are never invalidated, so an instance MUST NOT outlive the
/// request it serves: holding on to one would pin the filesystem state it
/// observed first.
#[derive(Default)]
pub struct ModificationStampCache {
    mtimes: HashMap<DocumentUri, FileStamp>,
    exists: HashMap<DocumentUri, bool>,
    in_memory_edits: HashMap<DocumentUri, bool>,
}

impl ModificationStampCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The modification time of `uri`, maximised over its symlink chain.
    pub fn mtime(&mut self, uri: &DocumentUri) -> FileStamp {
        if let Some(stamp) = self.mtimes.get(uri) {
            return *stamp;
        }
        let stamp = match uri.file_path() {
            Some(path) => mtime_following_symlinks(&path),
            None => FileStamp::Missing,
        };
        self.mtimes.insert(uri.clone(), stamp);
        stamp
    }

    pub fn exists(&mut self, uri: &DocumentUri) -> bool {
        if let Some(exists) = self.exists.get(uri) {
            return *exists;
        }
        let exists =
            uri.file_path().map(|path| fs::metadata(path).is_ok()).unwrap_or(false);
        self.exists.insert(uri.clone(), exists);
        exists
    }

    pub fn has_in_memory_edits(
        &mut self,
        uri: &DocumentUri,
        documents: &Arc<dyn DocumentManager>,
    ) -> bool {
        if let Some(has_edits) = self.in_memory_edits.get(uri) {
            return *has_edits;
        }
        let has_edits = documents.has_unsaved_changes(uri);
        self.in_memory_edits.insert(uri.clone(), has_edits);
        has_edits
    }
}

/// Walks the symlink chain starting at `path` and returns the maximum
/// modification time seen along it. A repeated link is a cycle and makes
/// the file count as missing, as does a dangling link.
fn mtime_following_symlinks(path: &Path) -> FileStamp {
    let mut visited: HashSet<PathBuf> = HashSet::new();
    let mut current = path.to_path_buf();
    let mut newest: Option<SystemTime> = None;
    loop {
        if !visited.insert(current.clone()) {
            tracing::error!(
                "symlink cycle through {} while checking the modification time of {}",
                current.display(),
                path.display()
            );
            return FileStamp::Missing;
        }
        let metadata = match fs::symlink_metadata(&current) {
            Ok(metadata) => metadata,
            Err(_) => return FileStamp::Missing,
        };
        if let Ok(modified) = metadata.modified() {
            newest = Some(newest.map_or(modified, |newest| newest.max(modified)));
        }
        if !metadata.file_type().is_symlink() {
            break;
        }
        match fs::read_link(&current) {
            Ok(target) if target.is_absolute() => current = target,
            Ok(target) => {
                current = current.parent().unwrap_or(Path::new("")).join(target);
            }
            Err(_) => return FileStamp::Missing,
        }
    }
    match newest {
        Some(newest) => FileStamp::ModifiedAt(newest),
        None => FileStamp::Missing,
    }
}
