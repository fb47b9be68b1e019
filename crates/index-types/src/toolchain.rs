use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A compiler toolchain advertised by the build server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Toolchain {
    pub identifier: String,
    pub swiftc: Option<PathBuf>,
    pub clang: Option<PathBuf>,
    /// Whether `swiftc` of this toolchain accepts several
    /// `-index-file-path` arguments in a single indexing invocation.
    pub can_index_multiple_swift_files_in_single_invocation: bool,
}
