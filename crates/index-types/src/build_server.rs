use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::build_settings::BuildSettings;
use crate::file_to_index::OutputPath;
use crate::language::Language;
use crate::target::TargetId;
use crate::toolchain::Toolchain;
use crate::uri::DocumentUri;

/// Per-file metadata from the build graph.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceFileInfo {
    /// Whether any target knows how to build this file. Non-buildable files
    /// (e.g. headers) are indexed through a main file instead.
    pub is_buildable: bool,
    pub may_contain_tests: bool,
    /// The unit output path under which this file is indexed.
    pub output_path: OutputPath,
}

impl Default for SourceFileInfo {
    fn default() -> Self {
        SourceFileInfo {
            is_buildable: false,
            may_contain_tests: false,
            output_path: OutputPath::NotSupported,
        }
    }
}

/// The build-server integration this crate drives but does not implement.
///
/// All methods may suspend on build-server RPCs. Implementations own their
/// caching and their own notion of an "up-to-date build graph"; the indexing
/// core only sequences calls against it.
#[async_trait]
pub trait BuildServer: Send + Sync {
    /// Suspends until the build graph reflects the current state of the
    /// project files.
    async fn wait_for_up_to_date_build_graph(&self);

    async fn source_files(
        &self,
        include_non_buildable: bool,
    ) -> HashMap<DocumentUri, SourceFileInfo>;

    /// All targets containing the document.
    async fn targets(&self, uri: &DocumentUri) -> Vec<TargetId>;

    /// The single target chosen to represent the document when it belongs to
    /// several targets.
    async fn canonical_target(&self, uri: &DocumentUri) -> Option<TargetId>;

    /// Transitive reverse dependencies of the given targets, not including
    /// the targets themselves.
    async fn targets_depending_on(&self, targets: &BTreeSet<TargetId>) -> Vec<TargetId>;

    /// Sorts targets so that low-level targets come first. The result must
    /// contain exactly the input targets; callers treat a mismatch as a
    /// build-server bug and fall back to a deterministic order.
    async fn topological_sort(&self, targets: Vec<TargetId>) -> Vec<TargetId>;

    async fn default_language(
        &self,
        uri: &DocumentUri,
        target: Option<&TargetId>,
    ) -> Option<Language>;

    /// Build settings for a file in a target. When `fallback_after_timeout`
    /// is true the implementation may answer with synthesised fallback
    /// settings instead of blocking indefinitely.
    async fn build_settings(
        &self,
        uri: &DocumentUri,
        target: &TargetId,
        language: &Language,
        fallback_after_timeout: bool,
    ) -> Option<BuildSettings>;

    async fn toolchain(&self, target: &TargetId, language: &Language) -> Option<Arc<Toolchain>>;

    /// Builds the dependencies of the given targets so their sources can be
    /// type-checked and indexed.
    async fn prepare(&self, targets: BTreeSet<TargetId>) -> anyhow::Result<()>;

    /// The index-store directory declared by the build server at
    /// initialization, if any. Indexing is impossible without one.
    fn index_store_path(&self) -> Option<PathBuf>;
}
