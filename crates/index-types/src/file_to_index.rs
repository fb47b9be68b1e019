use serde::{Deserialize, Serialize};

use crate::language::Language;
use crate::target::TargetId;
use crate::uri::DocumentUri;

/// The key under which a compilation unit is recorded in the index store.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutputPath {
    /// The build server declared a per-file unit output path.
    Path(String),
    /// The build server cannot provide unit output paths; lookups fall back
    /// to the latest unit known for the main file.
    NotSupported,
}

/// A file the update-index-store pipeline should produce a unit for.
///
/// Header files cannot be compiled on their own; they are indexed through a
/// main file that includes them.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum FileToIndex {
    Indexable(DocumentUri),
    Header { header: DocumentUri, main_file: DocumentUri },
}

impl FileToIndex {
    /// The file the user refers to; freshness is tracked under this URI.
    pub fn source_file(&self) -> &DocumentUri {
        match self {
            FileToIndex::Indexable(uri) => uri,
            FileToIndex::Header { header, .. } => header,
        }
    }

    /// The translation-unit entry point the compiler is actually invoked on.
    pub fn main_file(&self) -> &DocumentUri {
        match self {
            FileToIndex::Indexable(uri) => uri,
            FileToIndex::Header { main_file, .. } => main_file,
        }
    }
}

/// Everything the update-index-store task needs to know about one file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileIndexInfo {
    pub file: FileToIndex,
    pub target: TargetId,
    pub output_path: OutputPath,
    pub language: Language,
}

impl FileIndexInfo {
    pub fn source_file(&self) -> &DocumentUri {
        self.file.source_file()
    }

    pub fn main_file(&self) -> &DocumentUri {
        self.file.main_file()
    }
}
