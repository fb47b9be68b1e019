use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::language::Language;

/// Compiler invocation settings for one file in one target, as resolved by
/// the build server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildSettings {
    pub compiler_arguments: Vec<String>,
    pub working_directory: Option<PathBuf>,
    pub language: Language,
    /// Settings synthesised without ground truth from the build server.
    /// Fallback settings are good enough for syntax highlighting but must
    /// never feed the index store.
    pub is_fallback: bool,
}
