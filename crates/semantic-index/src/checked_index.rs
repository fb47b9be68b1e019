use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use index_types::{
    DocumentUri, IndexDatabase, OutputPath, Symbol, SymbolKind, SymbolOccurrence, SymbolRole,
};

use crate::modification_stamps::{FileStamp, IndexCheckLevel, ModificationStampCache};

/// Options for pattern-based canonical occurrence searches.
#[derive(Clone, Copy, Debug, Default)]
pub struct PatternMatchOptions {
    pub anchor_start: bool,
    pub anchor_end: bool,
    pub subsequence: bool,
    pub ignore_case: bool,
}

/// A freshness-checking view over the raw index database.
///
/// Every query filters occurrences whose unit is older than the current
/// on-disk (or in-memory, depending on the check level) state of the source
/// file, so stale symbol locations never reach consumers.
///
/// An instance caches modification stamps and container-name walks and must
/// not outlive the consumer request it was created for.
pub struct CheckedIndex {
    database: Arc<dyn IndexDatabase>,
    check_level: IndexCheckLevel,
    stamps: ModificationStampCache,
    container_names_by_usr: HashMap<String, Vec<String>>,
}

impl CheckedIndex {
    pub fn new(database: Arc<dyn IndexDatabase>, check_level: IndexCheckLevel) -> Self {
        CheckedIndex {
            database,
            check_level,
            stamps: ModificationStampCache::new(),
            container_names_by_usr: HashMap::new(),
        }
    }

    pub fn check_level(&self) -> &IndexCheckLevel {
        &self.check_level
    }

    /// Whether a unit with timestamp `unit_timestamp` is up-to-date for the
    /// source file `uri` under the current check level.
    fn is_unit_timestamp_up_to_date(
        &mut self,
        uri: &DocumentUri,
        unit_timestamp: SystemTime,
    ) -> bool {
        match self.check_level.clone() {
            IndexCheckLevel::DeletedFiles => self.stamps.exists(uri),
            IndexCheckLevel::ModifiedFiles => {
                self.mtime_dominated_by(uri, unit_timestamp)
            }
            IndexCheckLevel::InMemoryModifiedFiles(documents) => {
                !self.stamps.has_in_memory_edits(uri, &documents)
                    && self.mtime_dominated_by(uri, unit_timestamp)
            }
        }
    }

    fn mtime_dominated_by(&mut self, uri: &DocumentUri, unit_timestamp: SystemTime) -> bool {
        match self.stamps.mtime(uri) {
            FileStamp::Missing => false,
            FileStamp::ModifiedAt(mtime) => unit_timestamp >= mtime,
        }
    }

    fn is_up_to_date_occurrence(&mut self, occurrence: &SymbolOccurrence) -> bool {
        let uri = DocumentUri::from_file_path(&occurrence.location.path);
        self.is_unit_timestamp_up_to_date(&uri, occurrence.location.timestamp)
    }

    pub fn for_each_symbol_occurrence(
        &mut self,
        usr: &str,
        roles: SymbolRole,
        cb: &mut dyn FnMut(&SymbolOccurrence) -> bool,
    ) {
        let database = self.database.clone();
        database.for_each_symbol_occurrence_by_usr(usr, roles, &mut |occurrence| {
            if self.is_up_to_date_occurrence(occurrence) {
                cb(occurrence)
            } else {
                true
            }
        });
    }

    pub fn occurrences(&mut self, usr: &str, roles: SymbolRole) -> Vec<SymbolOccurrence> {
        let mut result = Vec::new();
        self.for_each_symbol_occurrence(usr, roles, &mut |occurrence| {
            result.push(occurrence.clone());
            true
        });
        result
    }

    /// Occurrences whose relations reference `usr` with one of `roles`.
    pub fn occurrences_related_to(
        &mut self,
        usr: &str,
        roles: SymbolRole,
    ) -> Vec<SymbolOccurrence> {
        let database = self.database.clone();
        let mut result = Vec::new();
        database.for_each_related_symbol_occurrence_by_usr(usr, roles, &mut |occurrence| {
            if self.is_up_to_date_occurrence(occurrence) {
                result.push(occurrence.clone());
            }
            true
        });
        result
    }

    pub fn for_each_canonical_occurrence_by_name(
        &mut self,
        name: &str,
        cb: &mut dyn FnMut(&SymbolOccurrence) -> bool,
    ) {
        let database = self.database.clone();
        database.for_each_canonical_symbol_occurrence_by_name(name, &mut |occurrence| {
            if self.is_up_to_date_occurrence(occurrence) {
                cb(occurrence)
            } else {
                true
            }
        });
    }

    pub fn for_each_canonical_occurrence_containing_pattern(
        &mut self,
        pattern: &str,
        options: PatternMatchOptions,
        cb: &mut dyn FnMut(&SymbolOccurrence) -> bool,
    ) {
        let database = self.database.clone();
        database.for_each_canonical_symbol_occurrence_containing_pattern(
            pattern,
            options.anchor_start,
            options.anchor_end,
            options.subsequence,
            options.ignore_case,
            &mut |occurrence| {
                if self.is_up_to_date_occurrence(occurrence) {
                    cb(occurrence)
                } else {
                    true
                }
            },
        );
    }

    /// Symbols defined in `uri`, or nothing if the file has no up-to-date
    /// unit: a half-indexed file would produce confusing outlines.
    pub fn symbols_in_file(&mut self, uri: &DocumentUri) -> Vec<Symbol> {
        if !self.has_any_up_to_date_unit(uri, None) {
            tracing::debug!("not returning symbols in {uri}: no up-to-date unit");
            return Vec::new();
        }
        let Some(path) = uri.file_path() else {
            return Vec::new();
        };
        self.database.symbols_contained_in_source_file(&path)
    }

    pub fn unit_tests(&mut self) -> Vec<SymbolOccurrence> {
        let database = self.database.clone();
        let mut result = Vec::new();
        database.for_each_unit_test_symbol_occurrence(&mut |occurrence| {
            if self.is_up_to_date_occurrence(occurrence) {
                result.push(occurrence.clone());
            }
            true
        });
        result
    }

    pub fn unit_tests_referenced_by_main_files(
        &mut self,
        main_files: &[PathBuf],
    ) -> Vec<SymbolOccurrence> {
        let database = self.database.clone();
        let mut result = Vec::new();
        database.for_each_unit_test_symbol_occurrence_referenced_by_main_files(
            main_files,
            &mut |occurrence| {
                if self.is_up_to_date_occurrence(occurrence) {
                    result.push(occurrence.clone());
                }
                true
            },
        );
        result
    }

    /// Whether at least one unit whose main file covers `uri` is newer than
    /// the source itself. `main_file` keys the unit lookup when `uri` is a
    /// header.
    pub fn has_any_up_to_date_unit(
        &mut self,
        uri: &DocumentUri,
        main_file: Option<&DocumentUri>,
    ) -> bool {
        let unit_file = main_file.unwrap_or(uri);
        let Some(unit_path) = unit_file.file_path() else {
            return false;
        };
        let Some(unit_timestamp) = self.database.date_of_latest_unit_for(&unit_path) else {
            return false;
        };
        self.is_unit_timestamp_up_to_date(uri, unit_timestamp)
    }

    /// Like [`CheckedIndex::has_any_up_to_date_unit`] but keyed by an exact
    /// unit output path. Falls back to the any-unit check when the build
    /// server does not support output paths.
    pub fn has_up_to_date_unit(
        &mut self,
        uri: &DocumentUri,
        main_file: Option<&DocumentUri>,
        output_path: &OutputPath,
    ) -> bool {
        match output_path {
            OutputPath::NotSupported => self.has_any_up_to_date_unit(uri, main_file),
            OutputPath::Path(output_path) => {
                let Some(unit_timestamp) = self.database.date_of_unit_for(output_path) else {
                    return false;
                };
                self.is_unit_timestamp_up_to_date(uri, unit_timestamp)
            }
        }
    }

    /// Definition occurrences of `usr`, or its declarations if the index
    /// knows no definition (e.g. a symbol defined in a module compiled
    /// without indexing).
    pub fn definition_or_declaration_occurrences(&mut self, usr: &str) -> Vec<SymbolOccurrence> {
        let definitions = self.occurrences(usr, SymbolRole::DEFINITION);
        if !definitions.is_empty() {
            return definitions;
        }
        self.occurrences(usr, SymbolRole::DECLARATION)
    }

    /// A deterministic representative of the definitions or declarations of
    /// `usr`, so follow-up queries do not jump between equally good
    /// occurrences.
    pub fn primary_definition_or_declaration_occurrence(
        &mut self,
        usr: &str,
    ) -> Option<SymbolOccurrence> {
        let mut occurrences = self.definition_or_declaration_occurrences(usr);
        occurrences.sort_by(|a, b| a.canonical_cmp(b));
        occurrences.into_iter().next()
    }

    pub fn main_files_containing_file(
        &mut self,
        uri: &DocumentUri,
        cross_language: bool,
    ) -> Vec<PathBuf> {
        let Some(path) = uri.file_path() else {
            return Vec::new();
        };
        self.database.main_files_containing_file(&path, cross_language)
    }

    /// The names of the containers of `occurrence`, outermost first.
    ///
    /// Accessors report the containers of the entity they belong to.
    /// Extensions resolve to the extended type when the index knows it.
    /// Results are memoised per container USR for the instance lifetime.
    pub fn container_names(&mut self, occurrence: &SymbolOccurrence) -> Vec<String> {
        self.container_names_inner(occurrence, &mut HashSet::new())
    }

    fn container_names_inner(
        &mut self,
        occurrence: &SymbolOccurrence,
        visited: &mut HashSet<String>,
    ) -> Vec<String> {
        let accessor_of = occurrence
            .relations
            .iter()
            .filter(|relation| relation.roles.contains(SymbolRole::ACCESSOR_OF))
            .min_by(|a, b| a.symbol.usr.cmp(&b.symbol.usr));
        if let Some(subject) = accessor_of {
            if visited.insert(subject.symbol.usr.clone()) {
                if let Some(subject_occurrence) =
                    self.primary_definition_or_declaration_occurrence(&subject.symbol.usr)
                {
                    return self.container_names_inner(&subject_occurrence, visited);
                }
            }
        }

        let container = occurrence
            .relations
            .iter()
            .filter(|relation| {
                relation.roles.contains(SymbolRole::CHILD_OF)
                    && relation.symbol.kind.is_container()
            })
            .min_by(|a, b| a.symbol.usr.cmp(&b.symbol.usr));
        let Some(container) = container.map(|relation| relation.symbol.clone()) else {
            return Vec::new();
        };

        if let Some(cached) = self.container_names_by_usr.get(&container.usr) {
            return cached.clone();
        }
        if !visited.insert(container.usr.clone()) {
            return Vec::new();
        }

        let mut resolved = container.clone();
        if resolved.kind == SymbolKind::Extension {
            if let Some(extended) = self.extended_type_of(&resolved.usr) {
                resolved = extended;
            }
        }

        let mut names = match self.primary_definition_or_declaration_occurrence(&resolved.usr) {
            Some(container_occurrence) => {
                self.container_names_inner(&container_occurrence, visited)
            }
            None => Vec::new(),
        };
        names.push(resolved.name.clone());
        self.container_names_by_usr.insert(container.usr, names.clone());
        names
    }

    /// The type an extension extends, resolved through the `EXTENDED_BY`
    /// relation recorded on the extended type's occurrences.
    fn extended_type_of(&mut self, extension_usr: &str) -> Option<Symbol> {
        let mut found = None;
        self.database.for_each_related_symbol_occurrence_by_usr(
            extension_usr,
            SymbolRole::EXTENDED_BY,
            &mut |occurrence| {
                found = Some(occurrence.symbol.clone());
                false
            },
        );
        found
    }
}
