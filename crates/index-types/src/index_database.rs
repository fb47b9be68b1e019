use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;

use crate::symbols::{Symbol, SymbolOccurrence, SymbolRole};

/// The opaque on-disk symbol database written by the compiler's indexing
/// mode.
///
/// Enumeration callbacks return `false` to stop the iteration early. A
/// closed database must not panic: enumerations yield nothing, date lookups
/// return `None`, and the implementation logs the condition.
#[async_trait]
pub trait IndexDatabase: Send + Sync {
    fn for_each_symbol_occurrence_by_usr(
        &self,
        usr: &str,
        roles: SymbolRole,
        cb: &mut dyn FnMut(&SymbolOccurrence) -> bool,
    );

    /// Occurrences whose *relations* reference `usr` with one of `roles`.
    fn for_each_related_symbol_occurrence_by_usr(
        &self,
        usr: &str,
        roles: SymbolRole,
        cb: &mut dyn FnMut(&SymbolOccurrence) -> bool,
    );

    fn for_each_canonical_symbol_occurrence_by_name(
        &self,
        name: &str,
        cb: &mut dyn FnMut(&SymbolOccurrence) -> bool,
    );

    #[allow(clippy::too_many_arguments)]
    fn for_each_canonical_symbol_occurrence_containing_pattern(
        &self,
        pattern: &str,
        anchor_start: bool,
        anchor_end: bool,
        subsequence: bool,
        ignore_case: bool,
        cb: &mut dyn FnMut(&SymbolOccurrence) -> bool,
    );

    fn symbols_contained_in_source_file(&self, path: &Path) -> Vec<Symbol>;

    fn for_each_unit_test_symbol_occurrence(&self, cb: &mut dyn FnMut(&SymbolOccurrence) -> bool);

    fn for_each_unit_test_symbol_occurrence_referenced_by_main_files(
        &self,
        main_files: &[PathBuf],
        cb: &mut dyn FnMut(&SymbolOccurrence) -> bool,
    );

    /// Timestamp of the newest unit that has `path` as its main file.
    fn date_of_latest_unit_for(&self, path: &Path) -> Option<SystemTime>;

    /// Timestamp of the unit recorded under an exact output path.
    fn date_of_unit_for(&self, output_path: &str) -> Option<SystemTime>;

    /// Main files whose units include `path`; used to index headers through
    /// a containing translation unit.
    fn main_files_containing_file(&self, path: &Path, cross_language: bool) -> Vec<PathBuf>;

    /// Imports units written under the given output paths and suspends until
    /// they are visible to queries.
    async fn process_units_for_output_paths_and_wait(&self, output_paths: Vec<String>);

    /// Rescans the index store for new or removed units.
    async fn poll_for_unit_changes_and_wait(&self);

    /// Whether the database is driven by an explicit set of unit output
    /// paths instead of directory scans.
    fn uses_explicit_output_paths(&self) -> bool {
        false
    }

    fn add_unit_out_file_paths(&self, _paths: &[String]) {}

    fn remove_unit_out_file_paths(&self, _paths: &[String]) {}
}
