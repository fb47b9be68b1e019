//! Fake collaborators for the test suites: an in-memory build server, an
//! in-memory index database and a document manager whose answers the tests
//! script directly.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use async_trait::async_trait;
use index_types::{
    BuildServer, BuildSettings, DocumentManager, DocumentUri, FileIndexInfo, FileToIndex,
    IndexDatabase, IndexLogCallback, IndexLogMessage, Language, OutputPath, SourceFileInfo,
    Symbol, SymbolOccurrence, SymbolRole, TargetId, Toolchain,
};
use tokio::sync::Semaphore;

/// Chronological record of the calls the fakes received, shared between
/// fakes so tests can assert cross-collaborator ordering.
#[derive(Clone, Default)]
pub(crate) struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub(crate) fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub(crate) fn snapshot(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

pub(crate) fn null_index_log() -> IndexLogCallback {
    Arc::new(|_| {})
}

pub(crate) fn collecting_index_log() -> (IndexLogCallback, Arc<Mutex<Vec<IndexLogMessage>>>) {
    let collected: Arc<Mutex<Vec<IndexLogMessage>>> = Arc::default();
    let sink = collected.clone();
    (Arc::new(move |message| sink.lock().unwrap().push(message)), collected)
}

pub(crate) fn file_index_info(path: &str, target: &str, language: Language) -> FileIndexInfo {
    FileIndexInfo {
        file: FileToIndex::Indexable(DocumentUri::from_file_path(path)),
        target: TargetId::from(target),
        output_path: OutputPath::NotSupported,
        language,
    }
}

/// Writes a standalone executable shell script, for use as a fake compiler.
#[cfg(unix)]
pub(crate) fn write_executable_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[derive(Default)]
struct FakeBuildServerState {
    source_files: HashMap<DocumentUri, SourceFileInfo>,
    targets_by_file: HashMap<DocumentUri, Vec<TargetId>>,
    settings_by_file: HashMap<DocumentUri, BuildSettings>,
    toolchain: Option<Arc<Toolchain>>,
    reverse_dependencies: HashMap<TargetId, Vec<TargetId>>,
    /// Verbatim answer for `topological_sort`; defaults to lexicographic.
    topological_result: Option<Vec<TargetId>>,
    index_store_path: Option<PathBuf>,
}

#[derive(Default)]
pub(crate) struct FakeBuildServer {
    state: Mutex<FakeBuildServerState>,
    pub(crate) events: EventLog,
    /// When set, `prepare` suspends until the test hands it a permit.
    prepare_gate: Mutex<Option<Arc<Semaphore>>>,
}

impl FakeBuildServer {
    pub(crate) fn with_events(events: EventLog) -> Self {
        FakeBuildServer { events, ..Default::default() }
    }

    pub(crate) fn add_source_file(
        &self,
        uri: &DocumentUri,
        target: &TargetId,
        settings: BuildSettings,
        output_path: OutputPath,
    ) {
        let mut state = self.state.lock().unwrap();
        state.source_files.insert(
            uri.clone(),
            SourceFileInfo { is_buildable: true, may_contain_tests: false, output_path },
        );
        state.targets_by_file.entry(uri.clone()).or_default().push(target.clone());
        state.settings_by_file.insert(uri.clone(), settings);
    }

    /// Registers target membership without making the file buildable, like
    /// a header known to the build graph.
    pub(crate) fn add_target_for_file(&self, uri: &DocumentUri, target: &TargetId) {
        let mut state = self.state.lock().unwrap();
        state.targets_by_file.entry(uri.clone()).or_default().push(target.clone());
    }

    pub(crate) fn set_toolchain(&self, toolchain: Toolchain) {
        self.state.lock().unwrap().toolchain = Some(Arc::new(toolchain));
    }

    pub(crate) fn set_index_store_path(&self, path: impl Into<PathBuf>) {
        self.state.lock().unwrap().index_store_path = Some(path.into());
    }

    pub(crate) fn set_reverse_dependencies(&self, target: &TargetId, dependents: Vec<TargetId>) {
        self.state.lock().unwrap().reverse_dependencies.insert(target.clone(), dependents);
    }

    pub(crate) fn set_topological_result(&self, order: Vec<TargetId>) {
        self.state.lock().unwrap().topological_result = Some(order);
    }

    pub(crate) fn gate_prepare(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.prepare_gate.lock().unwrap() = Some(gate.clone());
        gate
    }
}

#[async_trait]
impl BuildServer for FakeBuildServer {
    async fn wait_for_up_to_date_build_graph(&self) {
        self.events.push("build-graph");
    }

    async fn source_files(
        &self,
        _include_non_buildable: bool,
    ) -> HashMap<DocumentUri, SourceFileInfo> {
        self.state.lock().unwrap().source_files.clone()
    }

    async fn targets(&self, uri: &DocumentUri) -> Vec<TargetId> {
        self.state.lock().unwrap().targets_by_file.get(uri).cloned().unwrap_or_default()
    }

    async fn canonical_target(&self, uri: &DocumentUri) -> Option<TargetId> {
        self.targets(uri).await.into_iter().next()
    }

    async fn targets_depending_on(&self, targets: &BTreeSet<TargetId>) -> Vec<TargetId> {
        let state = self.state.lock().unwrap();
        targets
            .iter()
            .flat_map(|target| {
                state.reverse_dependencies.get(target).cloned().unwrap_or_default()
            })
            .collect()
    }

    async fn topological_sort(&self, targets: Vec<TargetId>) -> Vec<TargetId> {
        if let Some(result) = self.state.lock().unwrap().topological_result.clone() {
            return result;
        }
        let mut sorted = targets;
        sorted.sort();
        sorted
    }

    async fn default_language(
        &self,
        uri: &DocumentUri,
        _target: Option<&TargetId>,
    ) -> Option<Language> {
        if let Some(settings) = self.state.lock().unwrap().settings_by_file.get(uri) {
            return Some(settings.language.clone());
        }
        Language::from_uri(uri)
    }

    async fn build_settings(
        &self,
        uri: &DocumentUri,
        _target: &TargetId,
        _language: &Language,
        _fallback_after_timeout: bool,
    ) -> Option<BuildSettings> {
        self.state.lock().unwrap().settings_by_file.get(uri).cloned()
    }

    async fn toolchain(&self, _target: &TargetId, _language: &Language) -> Option<Arc<Toolchain>> {
        self.state.lock().unwrap().toolchain.clone()
    }

    async fn prepare(&self, targets: BTreeSet<TargetId>) -> anyhow::Result<()> {
        let names = targets.iter().map(TargetId::as_str).collect::<Vec<_>>().join(", ");
        self.events.push(format!("prepare {names}"));
        let gate = self.prepare_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire_owned().await.expect("prepare gate closed").forget();
        }
        Ok(())
    }

    fn index_store_path(&self) -> Option<PathBuf> {
        self.state.lock().unwrap().index_store_path.clone()
    }
}

#[derive(Default)]
struct FakeIndexDatabaseState {
    occurrences: Vec<SymbolOccurrence>,
    symbols_by_file: HashMap<PathBuf, Vec<Symbol>>,
    latest_unit_dates: HashMap<PathBuf, SystemTime>,
    unit_dates_by_output_path: HashMap<String, SystemTime>,
    main_files: HashMap<PathBuf, Vec<PathBuf>>,
    /// When true, processing output paths records a fresh unit for them,
    /// like a real import would.
    register_units_on_process: bool,
}

#[derive(Default)]
pub(crate) struct FakeIndexDatabase {
    state: Mutex<FakeIndexDatabaseState>,
    pub(crate) events: EventLog,
}

impl FakeIndexDatabase {
    pub(crate) fn with_events(events: EventLog) -> Self {
        FakeIndexDatabase { events, ..Default::default() }
    }

    pub(crate) fn add_occurrence(&self, occurrence: SymbolOccurrence) {
        self.state.lock().unwrap().occurrences.push(occurrence);
    }

    pub(crate) fn add_symbol_in_file(&self, path: &Path, symbol: Symbol) {
        self.state.lock().unwrap().symbols_by_file.entry(path.to_path_buf()).or_default().push(symbol);
    }

    pub(crate) fn set_latest_unit_date(&self, path: &Path, date: SystemTime) {
        self.state.lock().unwrap().latest_unit_dates.insert(path.to_path_buf(), date);
    }

    pub(crate) fn set_unit_date_for_output_path(&self, output_path: &str, date: SystemTime) {
        self.state
            .lock()
            .unwrap()
            .unit_dates_by_output_path
            .insert(output_path.to_string(), date);
    }

    pub(crate) fn add_main_file_containing(&self, header: &Path, main_file: &Path) {
        self.state
            .lock()
            .unwrap()
            .main_files
            .entry(header.to_path_buf())
            .or_default()
            .push(main_file.to_path_buf());
    }

    pub(crate) fn register_units_on_process(&self) {
        self.state.lock().unwrap().register_units_on_process = true;
    }

    fn for_each_matching(
        &self,
        filter: impl Fn(&SymbolOccurrence) -> bool,
        cb: &mut dyn FnMut(&SymbolOccurrence) -> bool,
    ) {
        let occurrences = self.state.lock().unwrap().occurrences.clone();
        for occurrence in &occurrences {
            if filter(occurrence) && !cb(occurrence) {
                return;
            }
        }
    }
}

#[async_trait]
impl IndexDatabase for FakeIndexDatabase {
    fn for_each_symbol_occurrence_by_usr(
        &self,
        usr: &str,
        roles: SymbolRole,
        cb: &mut dyn FnMut(&SymbolOccurrence) -> bool,
    ) {
        self.for_each_matching(
            |occurrence| occurrence.symbol.usr == usr && occurrence.roles.intersects(roles),
            cb,
        );
    }

    fn for_each_related_symbol_occurrence_by_usr(
        &self,
        usr: &str,
        roles: SymbolRole,
        cb: &mut dyn FnMut(&SymbolOccurrence) -> bool,
    ) {
        self.for_each_matching(
            |occurrence| {
                occurrence.relations.iter().any(|relation| {
                    relation.symbol.usr == usr && relation.roles.intersects(roles)
                })
            },
            cb,
        );
    }

    fn for_each_canonical_symbol_occurrence_by_name(
        &self,
        name: &str,
        cb: &mut dyn FnMut(&SymbolOccurrence) -> bool,
    ) {
        self.for_each_matching(|occurrence| occurrence.symbol.name == name, cb);
    }

    fn for_each_canonical_symbol_occurrence_containing_pattern(
        &self,
        pattern: &str,
        anchor_start: bool,
        anchor_end: bool,
        _subsequence: bool,
        ignore_case: bool,
        cb: &mut dyn FnMut(&SymbolOccurrence) -> bool,
    ) {
        let pattern =
            if ignore_case { pattern.to_lowercase() } else { pattern.to_string() };
        self.for_each_matching(
            |occurrence| {
                let name = if ignore_case {
                    occurrence.symbol.name.to_lowercase()
                } else {
                    occurrence.symbol.name.clone()
                };
                match (anchor_start, anchor_end) {
                    (true, true) => name == pattern,
                    (true, false) => name.starts_with(&pattern),
                    (false, true) => name.ends_with(&pattern),
                    (false, false) => name.contains(&pattern),
                }
            },
            cb,
        );
    }

    fn symbols_contained_in_source_file(&self, path: &Path) -> Vec<Symbol> {
        self.state.lock().unwrap().symbols_by_file.get(path).cloned().unwrap_or_default()
    }

    fn for_each_unit_test_symbol_occurrence(
        &self,
        cb: &mut dyn FnMut(&SymbolOccurrence) -> bool,
    ) {
        self.for_each_matching(
            |occurrence| occurrence.roles.contains(SymbolRole::TEST_CANDIDATE),
            cb,
        );
    }

    fn for_each_unit_test_symbol_occurrence_referenced_by_main_files(
        &self,
        main_files: &[PathBuf],
        cb: &mut dyn FnMut(&SymbolOccurrence) -> bool,
    ) {
        let main_files: HashSet<&PathBuf> = main_files.iter().collect();
        self.for_each_matching(
            |occurrence| {
                occurrence.roles.contains(SymbolRole::TEST_CANDIDATE)
                    && main_files.contains(&occurrence.location.path)
            },
            cb,
        );
    }

    fn date_of_latest_unit_for(&self, path: &Path) -> Option<SystemTime> {
        self.state.lock().unwrap().latest_unit_dates.get(path).copied()
    }

    fn date_of_unit_for(&self, output_path: &str) -> Option<SystemTime> {
        self.state.lock().unwrap().unit_dates_by_output_path.get(output_path).copied()
    }

    fn main_files_containing_file(&self, path: &Path, _cross_language: bool) -> Vec<PathBuf> {
        self.state.lock().unwrap().main_files.get(path).cloned().unwrap_or_default()
    }

    async fn process_units_for_output_paths_and_wait(&self, output_paths: Vec<String>) {
        self.events.push(format!("process-units {}", output_paths.join(", ")));
        let mut state = self.state.lock().unwrap();
        if state.register_units_on_process {
            let now = SystemTime::now();
            for output_path in output_paths {
                state.unit_dates_by_output_path.insert(output_path, now);
            }
        }
    }

    async fn poll_for_unit_changes_and_wait(&self) {
        self.events.push("poll-unit-changes");
    }
}

#[derive(Default)]
pub(crate) struct FakeDocumentManager {
    unsaved: Mutex<HashSet<DocumentUri>>,
}

impl FakeDocumentManager {
    pub(crate) fn set_unsaved_changes(&self, uri: &DocumentUri, unsaved: bool) {
        let mut state = self.unsaved.lock().unwrap();
        if unsaved {
            state.insert(uri.clone());
        } else {
            state.remove(uri);
        }
    }
}

impl DocumentManager for FakeDocumentManager {
    fn has_unsaved_changes(&self, uri: &DocumentUri) -> bool {
        self.unsaved.lock().unwrap().contains(uri)
    }
}
