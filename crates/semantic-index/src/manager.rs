use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use index_types::{
    BuildServer, DocumentUri, FileIndexInfo, FileToIndex, IndexDatabase, IndexLogCallback,
    Language, OutputPath, TargetId,
};
use task_scheduler::{QueuedTask, QueuedTaskState, TaskPriority, TaskScheduler};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::checked_index::CheckedIndex;
use crate::index_task::IndexTaskDescription;
use crate::modification_stamps::IndexCheckLevel;
use crate::prepare::{PrepareTargetsTaskDescription, TargetPreparationPurpose};
use crate::progress::{ProgressStatus, ProgressStatusDidChangeCallback, WorkStatus};
use crate::up_to_date_tracker::{NoSecondaryKey, UpToDateTracker};
use crate::update_index_store::UpdateIndexStoreTaskDescription;

/// Completion side of an orchestration task. Dropping it (normally or
/// through a panic) releases every waiter.
struct CompletionSignal {
    sender: watch::Sender<bool>,
}

impl Drop for CompletionSignal {
    fn drop(&mut self) {
        self.sender.send_replace(true);
    }
}

/// Cloneable handle that any number of waiters can await concurrently.
#[derive(Clone)]
struct CompletionHandle {
    receiver: watch::Receiver<bool>,
}

impl CompletionHandle {
    async fn wait(&self) {
        let mut receiver = self.receiver.clone();
        let _ = receiver.wait_for(|done| *done).await;
    }
}

fn completion_pair() -> (CompletionSignal, CompletionHandle) {
    let (sender, receiver) = watch::channel(false);
    (CompletionSignal { sender }, CompletionHandle { receiver })
}

/// Where a file is in the wait-for-preparation → prepare-target →
/// update-index-store pipeline. An absent entry means the file is fresh or
/// unknown.
enum InProgressIndexEntry {
    WaitingForPreparation { preparation_id: Uuid, index_task: CompletionHandle },
    Preparing { preparation_id: Uuid, index_task: CompletionHandle },
    UpdatingIndexStore { update_task: QueuedTask<IndexTaskDescription>, index_task: CompletionHandle },
}

impl InProgressIndexEntry {
    fn index_task(&self) -> &CompletionHandle {
        match self {
            InProgressIndexEntry::WaitingForPreparation { index_task, .. }
            | InProgressIndexEntry::Preparing { index_task, .. }
            | InProgressIndexEntry::UpdatingIndexStore { index_task, .. } => index_task,
        }
    }
}

struct InProgressPreparation {
    task: QueuedTask<IndexTaskDescription>,
    targets: Vec<TargetId>,
    purpose: TargetPreparationPurpose,
    /// Batches whose files move to `Preparing` when this task starts
    /// executing. Batches that join a deduplicated preparation add
    /// themselves here.
    associated_batches: Arc<Mutex<BTreeSet<Uuid>>>,
}

struct EditorPreparation {
    id: Uuid,
    document: DocumentUri,
    cancelled: CancellationToken,
    queued: Option<QueuedTask<IndexTaskDescription>>,
}

impl EditorPreparation {
    /// Cancels the preparation unless it is already running: interrupting a
    /// running preparation could mean no editor request ever sees a
    /// prepared target while the user keeps switching files.
    fn request_cancellation(&self) {
        self.cancelled.cancel();
        if let Some(queued) = &self.queued {
            if !queued.is_executing() {
                queued.cancel();
            }
        }
    }
}

#[derive(Default)]
struct ManagerState {
    in_progress_prepare_tasks: HashMap<TargetId, InProgressPreparation>,
    in_progress_index_tasks: HashMap<DocumentUri, InProgressIndexEntry>,
    in_progress_build_graph_tasks: HashMap<Uuid, CompletionHandle>,
    in_progress_prepare_for_editor: Option<EditorPreparation>,
}

#[derive(Clone)]
pub struct SemanticIndexOptions {
    /// Wall-clock budget per compiler invocation; generous for a
    /// single-file compile, so expiry means a hung process.
    pub update_index_store_timeout: Duration,
    /// Concurrency budget of the underlying task scheduler per priority
    /// band, sorted by descending priority.
    pub scheduler_capacities: Vec<(TaskPriority, usize)>,
}

impl Default for SemanticIndexOptions {
    fn default() -> Self {
        let cores = std::thread::available_parallelism().map(|cores| cores.get()).unwrap_or(4);
        SemanticIndexOptions {
            update_index_store_timeout: Duration::from_secs(120),
            scheduler_capacities: vec![
                (TaskPriority::Medium, cores),
                (TaskPriority::Background, (cores / 4).max(1)),
            ],
        }
    }
}

/// Orchestrates background indexing: tracks per-file pipeline state,
/// batches files by target, schedules prepare and update-index-store task
/// pairs, and reports progress.
///
/// The manager is cheap to clone; clones share all state. It must be
/// created inside a tokio runtime because it spawns the scheduler's
/// dispatcher.
#[derive(Clone)]
pub struct SemanticIndexManager {
    build_server: Arc<dyn BuildServer>,
    index_database: Arc<dyn IndexDatabase>,
    scheduler: Arc<TaskScheduler<IndexTaskDescription>>,
    preparation_up_to_date_tracker: Arc<UpToDateTracker<TargetId>>,
    index_up_to_date_tracker: Arc<UpToDateTracker<DocumentUri, TargetId>>,
    state: Arc<Mutex<ManagerState>>,
    index_log: IndexLogCallback,
    progress_status_did_change: ProgressStatusDidChangeCallback,
    update_index_store_timeout: Duration,
}

impl SemanticIndexManager {
    pub fn new(
        build_server: Arc<dyn BuildServer>,
        index_database: Arc<dyn IndexDatabase>,
        index_log: IndexLogCallback,
        progress_status_did_change: ProgressStatusDidChangeCallback,
        options: SemanticIndexOptions,
    ) -> Self {
        SemanticIndexManager {
            build_server,
            index_database,
            scheduler: Arc::new(TaskScheduler::new(options.scheduler_capacities)),
            preparation_up_to_date_tracker: Arc::new(UpToDateTracker::new()),
            index_up_to_date_tracker: Arc::new(UpToDateTracker::new()),
            state: Arc::new(Mutex::new(ManagerState::default())),
            index_log,
            progress_status_did_change,
            update_index_store_timeout: options.update_index_store_timeout,
        }
    }

    pub fn index_up_to_date_tracker(&self) -> &Arc<UpToDateTracker<DocumentUri, TargetId>> {
        &self.index_up_to_date_tracker
    }

    pub fn preparation_up_to_date_tracker(&self) -> &Arc<UpToDateTracker<TargetId>> {
        &self.preparation_up_to_date_tracker
    }

    /// A snapshot of what the manager is currently working on.
    pub fn progress_status(&self) -> ProgressStatus {
        let state = self.state.lock().unwrap();
        if state.in_progress_prepare_for_editor.is_some() {
            return ProgressStatus::PreparingFileForEditorFunctionality;
        }
        if !state.in_progress_build_graph_tasks.is_empty() {
            return ProgressStatus::SchedulingIndexing;
        }
        let preparing: BTreeMap<TargetId, WorkStatus> = state
            .in_progress_prepare_tasks
            .iter()
            .map(|(target, preparation)| {
                let status = if preparation.task.is_executing() {
                    WorkStatus::Executing
                } else {
                    WorkStatus::Scheduled
                };
                (target.clone(), status)
            })
            .collect();
        let indexing: BTreeMap<DocumentUri, WorkStatus> = state
            .in_progress_index_tasks
            .iter()
            .map(|(uri, entry)| {
                let status = match entry {
                    InProgressIndexEntry::WaitingForPreparation { .. } => WorkStatus::Scheduled,
                    InProgressIndexEntry::Preparing { .. } => WorkStatus::Executing,
                    InProgressIndexEntry::UpdatingIndexStore { update_task, .. } => {
                        if update_task.is_executing() {
                            WorkStatus::Executing
                        } else {
                            WorkStatus::Scheduled
                        }
                    }
                };
                (uri.clone(), status)
            })
            .collect();
        if preparing.is_empty() && indexing.is_empty() {
            ProgressStatus::UpToDate
        } else {
            ProgressStatus::Indexing { preparing, indexing }
        }
    }

    /// Generates an up-to-date build graph and schedules background
    /// indexing of `files` (or of every buildable source file). Returns
    /// immediately; the work happens on a spawned orchestration task.
    pub fn schedule_build_graph_generation_and_background_index_all_files(
        &self,
        files: Option<Vec<DocumentUri>>,
        ensure_all_units_registered: bool,
        index_files_with_up_to_date_unit: bool,
    ) {
        let generation_id = Uuid::new_v4();
        let (signal, handle) = completion_pair();
        self.state.lock().unwrap().in_progress_build_graph_tasks.insert(generation_id, handle);
        self.notify_progress();

        let manager = self.clone();
        tokio::spawn(async move {
            let _signal = signal;
            manager.build_server.wait_for_up_to_date_build_graph().await;
            if ensure_all_units_registered {
                manager.index_database.poll_for_unit_changes_and_wait().await;
            }

            let files = match files {
                Some(files) => files,
                None => {
                    let mut files: Vec<DocumentUri> = manager
                        .build_server
                        .source_files(false)
                        .await
                        .into_iter()
                        .filter(|(_, info)| info.is_buildable)
                        .map(|(uri, _)| uri)
                        .collect();
                    files.sort();
                    files
                }
            };

            let mut files_to_index = manager.files_to_index(&files).await;
            if !index_files_with_up_to_date_unit {
                // Re-scheduling a file that is still waiting for its
                // preparation would not get it indexed any sooner.
                let waiting: HashSet<DocumentUri> = {
                    let state = manager.state.lock().unwrap();
                    state
                        .in_progress_index_tasks
                        .iter()
                        .filter(|(_, entry)| {
                            matches!(entry, InProgressIndexEntry::WaitingForPreparation { .. })
                        })
                        .map(|(uri, _)| uri.clone())
                        .collect()
                };
                let mut checked_index = CheckedIndex::new(
                    manager.index_database.clone(),
                    IndexCheckLevel::ModifiedFiles,
                );
                files_to_index.retain(|file| {
                    !waiting.contains(file.source_file())
                        && !checked_index.has_up_to_date_unit(
                            file.source_file(),
                            Some(file.main_file()),
                            &file.output_path,
                        )
                });
            }

            if manager.index_database.uses_explicit_output_paths() {
                let output_paths: Vec<String> = files_to_index
                    .iter()
                    .filter_map(|file| match &file.output_path {
                        OutputPath::Path(path) => Some(path.clone()),
                        OutputPath::NotSupported => None,
                    })
                    .collect();
                if !output_paths.is_empty() {
                    manager.index_database.add_unit_out_file_paths(&output_paths);
                }
            }

            manager
                .schedule_indexing(files_to_index, index_files_with_up_to_date_unit, TaskPriority::Low)
                .await;

            manager.state.lock().unwrap().in_progress_build_graph_tasks.remove(&generation_id);
            manager.notify_progress();
        });
    }

    /// Invalidates everything and re-runs preparation and indexing, even
    /// for files whose on-disk units look fresh.
    pub fn schedule_reindex(&self) {
        self.index_up_to_date_tracker.mark_all_known_out_of_date();
        self.preparation_up_to_date_tracker.mark_all_known_out_of_date();
        self.schedule_build_graph_generation_and_background_index_all_files(None, false, true);
    }

    /// Suspends until every build-graph generation and every in-progress
    /// index task known right now has finished, then imports pending unit
    /// changes. Tasks scheduled afterwards are not waited for.
    pub async fn wait_for_up_to_date_index(&self) {
        let build_graph_tasks: Vec<CompletionHandle> = {
            let state = self.state.lock().unwrap();
            state.in_progress_build_graph_tasks.values().cloned().collect()
        };
        futures::future::join_all(build_graph_tasks.iter().map(|handle| handle.wait())).await;

        let index_tasks: Vec<CompletionHandle> = {
            let state = self.state.lock().unwrap();
            state
                .in_progress_index_tasks
                .values()
                .map(|entry| entry.index_task().clone())
                .collect()
        };
        futures::future::join_all(index_tasks.iter().map(|handle| handle.wait())).await;

        self.index_database.poll_for_unit_changes_and_wait().await;
    }

    /// Like [`SemanticIndexManager::wait_for_up_to_date_index`], but only
    /// for the given files. Files whose canonical target changes while the
    /// wait is in progress are not re-resolved.
    pub async fn wait_for_up_to_date_index_for(&self, uris: &[DocumentUri]) {
        let build_graph_tasks: Vec<CompletionHandle> = {
            let state = self.state.lock().unwrap();
            state.in_progress_build_graph_tasks.values().cloned().collect()
        };
        futures::future::join_all(build_graph_tasks.iter().map(|handle| handle.wait())).await;

        let index_tasks: Vec<CompletionHandle> = {
            let state = self.state.lock().unwrap();
            uris.iter()
                .filter_map(|uri| state.in_progress_index_tasks.get(uri))
                .map(|entry| entry.index_task().clone())
                .collect()
        };
        futures::future::join_all(index_tasks.iter().map(|handle| handle.wait())).await;

        self.index_database.poll_for_unit_changes_and_wait().await;
    }

    /// Reacts to on-disk changes: invalidates freshness state and schedules
    /// re-indexing of the changed files.
    pub async fn files_did_change(&self, changed: &[DocumentUri]) {
        self.index_up_to_date_tracker.mark_out_of_date(changed.iter().cloned());

        // A file whose language the extension does not reveal is usually a
        // header; editing it invalidates the preparation of every target
        // that includes it, and of their dependents.
        let mut out_of_date_targets: BTreeSet<TargetId> = BTreeSet::new();
        for uri in changed {
            if Language::from_uri(uri).is_none() {
                out_of_date_targets.extend(self.build_server.targets(uri).await);
            }
        }
        if !out_of_date_targets.is_empty() {
            let dependents = self.build_server.targets_depending_on(&out_of_date_targets).await;
            out_of_date_targets.extend(dependents);
            self.preparation_up_to_date_tracker.mark_out_of_date(out_of_date_targets);
        }

        self.schedule_build_graph_generation_and_background_index_all_files(
            Some(changed.to_vec()),
            false,
            false,
        );
    }

    /// Prepares the target of `uri` so editor requests (diagnostics,
    /// completion) can be answered. Preparations for documents the user
    /// navigated away from are cancelled as long as they have not started.
    pub fn schedule_preparation_for_editor_functionality(
        &self,
        uri: &DocumentUri,
        priority: TaskPriority,
    ) {
        let preparation_id = Uuid::new_v4();
        let cancelled = CancellationToken::new();
        {
            let mut state = self.state.lock().unwrap();
            if let Some(existing) = &state.in_progress_prepare_for_editor {
                if existing.document == *uri {
                    return;
                }
                existing.request_cancellation();
            }
            state.in_progress_prepare_for_editor = Some(EditorPreparation {
                id: preparation_id,
                document: uri.clone(),
                cancelled: cancelled.clone(),
                queued: None,
            });
        }
        self.notify_progress();

        let manager = self.clone();
        let uri = uri.clone();
        tokio::spawn(async move {
            let target = manager.build_server.canonical_target(&uri).await;
            match target {
                Some(target) if !cancelled.is_cancelled() => {
                    let task = manager.enqueue_preparation(
                        vec![target],
                        TargetPreparationPurpose::ForEditorFunctionality,
                        priority,
                        None,
                    );
                    {
                        let mut state = manager.state.lock().unwrap();
                        match &mut state.in_progress_prepare_for_editor {
                            Some(entry) if entry.id == preparation_id => {
                                entry.queued = Some(task.clone());
                            }
                            // Superseded while resolving the target; apply
                            // the cancellation the superseder could not.
                            _ => {
                                if !task.is_executing() {
                                    task.cancel();
                                }
                            }
                        }
                    }
                    task.wait().await;
                }
                Some(_) => {}
                None => {
                    tracing::debug!("cannot prepare {uri} for editor functionality: no canonical target");
                }
            }
            {
                let mut state = manager.state.lock().unwrap();
                if state
                    .in_progress_prepare_for_editor
                    .as_ref()
                    .is_some_and(|entry| entry.id == preparation_id)
                {
                    state.in_progress_prepare_for_editor = None;
                }
            }
            manager.notify_progress();
        });
    }

    /// Prepares `target` ahead of a build-settings request. Returns `false`
    /// without doing anything if the target is already prepared.
    pub async fn prepare_targets_for_options_request(&self, target: &TargetId) -> bool {
        if self.preparation_up_to_date_tracker.is_up_to_date(target, &NoSecondaryKey) {
            return false;
        }
        let task = self.enqueue_preparation(
            vec![target.clone()],
            TargetPreparationPurpose::ForEditorFunctionality,
            TaskPriority::Medium,
            None,
        );
        task.wait().await;
        true
    }

    /// Resolves which file the compiler must be invoked on for each of
    /// `files`, dropping files that cannot be indexed.
    async fn files_to_index(&self, files: &[DocumentUri]) -> Vec<FileIndexInfo> {
        let source_files = self.build_server.source_files(true).await;
        let mut seen = HashSet::new();
        let mut result = Vec::new();
        for uri in files {
            if !seen.insert(uri.clone()) {
                continue;
            }
            let file = if source_files.get(uri).is_some_and(|info| info.is_buildable) {
                FileToIndex::Indexable(uri.clone())
            } else {
                // Probably a header: index it through a main file that
                // includes it, preferring one the build graph can build.
                let Some(path) = uri.file_path() else {
                    continue;
                };
                let main_file = self
                    .index_database
                    .main_files_containing_file(&path, false)
                    .into_iter()
                    .map(DocumentUri::from_file_path)
                    .find(|main| source_files.get(main).is_some_and(|info| info.is_buildable));
                let Some(main_file) = main_file else {
                    tracing::debug!("not indexing {uri}: no buildable main file includes it");
                    continue;
                };
                FileToIndex::Header { header: uri.clone(), main_file }
            };

            let main_file = file.main_file().clone();
            let Some(target) = self.build_server.canonical_target(&main_file).await else {
                tracing::debug!("not indexing {main_file}: no canonical target");
                continue;
            };
            let Some(language) =
                self.build_server.default_language(&main_file, Some(&target)).await
            else {
                tracing::debug!("not indexing {main_file}: unknown language");
                continue;
            };
            if language.semantic_kind().is_none() {
                continue;
            }
            let output_path = source_files
                .get(&main_file)
                .map(|info| info.output_path.clone())
                .unwrap_or(OutputPath::NotSupported);
            result.push(FileIndexInfo { file, target, output_path, language });
        }
        result
    }

    /// Groups files by canonical target, orders targets bottom-up and
    /// schedules one prepare-then-index orchestration per target batch.
    async fn schedule_indexing(
        &self,
        files: Vec<FileIndexInfo>,
        index_files_with_up_to_date_unit: bool,
        priority: TaskPriority,
    ) {
        if files.is_empty() {
            return;
        }
        let mut files_by_target: HashMap<TargetId, Vec<FileIndexInfo>> = HashMap::new();
        for file in files {
            files_by_target.entry(file.target.clone()).or_default().push(file);
        }

        let targets: Vec<TargetId> = files_by_target.keys().cloned().collect();
        let sorted = self.build_server.topological_sort(targets.clone()).await;
        let sorted = {
            let expected: BTreeSet<&TargetId> = targets.iter().collect();
            let received: BTreeSet<&TargetId> = sorted.iter().collect();
            if expected == received {
                sorted
            } else {
                tracing::error!(
                    "topological sort changed the set of targets; falling back to lexicographic order"
                );
                let mut fallback = targets;
                fallback.sort();
                fallback
            }
        };

        // Target batches of size one: preparing several targets per build
        // only pays off once the build server can prepare them jointly.
        for target in sorted {
            let files = files_by_target.remove(&target).expect("target came from this grouping");
            self.schedule_target_batch(target, files, index_files_with_up_to_date_unit, priority);
        }
    }

    /// Schedules preparation of `target` followed by one update-index-store
    /// task per file.
    fn schedule_target_batch(
        &self,
        target: TargetId,
        files: Vec<FileIndexInfo>,
        index_files_with_up_to_date_unit: bool,
        priority: TaskPriority,
    ) {
        let preparation_id = Uuid::new_v4();
        let (signal, handle) = completion_pair();
        {
            let mut state = self.state.lock().unwrap();
            for file in &files {
                state.in_progress_index_tasks.insert(
                    file.source_file().clone(),
                    InProgressIndexEntry::WaitingForPreparation {
                        preparation_id,
                        index_task: handle.clone(),
                    },
                );
            }
        }
        self.notify_progress();

        let manager = self.clone();
        tokio::spawn(async move {
            let _signal = signal;
            let preparation_task = manager.enqueue_preparation(
                vec![target],
                TargetPreparationPurpose::ForIndexing,
                priority,
                Some(preparation_id),
            );
            preparation_task.wait().await;

            let mut update_tasks = Vec::new();
            for file in files {
                let source = file.source_file().clone();
                let description = UpdateIndexStoreTaskDescription::new(
                    vec![file],
                    manager.build_server.clone(),
                    manager.index_database.clone(),
                    manager.index_up_to_date_tracker.clone(),
                    index_files_with_up_to_date_unit,
                    manager.update_index_store_timeout,
                    manager.index_log.clone(),
                );
                let description_id = description.id;
                let callback_manager = manager.clone();
                let callback_source = source.clone();
                let update_task = {
                    // Keep the lock across scheduling and the entry update:
                    // the task could otherwise finish before the entry
                    // exists, leaving it behind forever.
                    let mut state = manager.state.lock().unwrap();
                    let update_task = manager.scheduler.schedule_with_state_callback(
                        priority,
                        IndexTaskDescription::UpdateIndexStore(description),
                        Arc::new(move |task_state| match task_state {
                            QueuedTaskState::Finished => callback_manager
                                .remove_finished_update_task(&callback_source, description_id),
                            _ => callback_manager.notify_progress(),
                        }),
                    );
                    if let Some(entry) = state.in_progress_index_tasks.get_mut(&source) {
                        let index_task = entry.index_task().clone();
                        *entry = InProgressIndexEntry::UpdatingIndexStore {
                            update_task: update_task.clone(),
                            index_task,
                        };
                    }
                    update_task
                };
                manager.notify_progress();
                update_tasks.push(update_task);
            }
            futures::future::join_all(update_tasks.iter().map(|task| task.wait())).await;
        });
    }

    /// Schedules a preparation task, or joins an equivalent one that is
    /// already in flight.
    fn enqueue_preparation(
        &self,
        targets: Vec<TargetId>,
        purpose: TargetPreparationPurpose,
        priority: TaskPriority,
        batch: Option<Uuid>,
    ) -> QueuedTask<IndexTaskDescription> {
        {
            let mut state = self.state.lock().unwrap();
            if let Some(existing) =
                targets.first().and_then(|target| state.in_progress_prepare_tasks.get(target))
            {
                if existing.targets == targets && existing.purpose >= purpose {
                    let mut start_immediately = None;
                    if let Some(batch) = batch {
                        existing.associated_batches.lock().unwrap().insert(batch);
                        if existing.task.is_executing() {
                            start_immediately = Some(batch);
                        }
                    }
                    existing.task.elevate_priority(priority);
                    let task = existing.task.clone();
                    drop(state);
                    if let Some(batch) = start_immediately {
                        self.preparation_started(batch);
                    }
                    return task;
                }
            }

            let description = PrepareTargetsTaskDescription::new(
                targets.clone(),
                purpose,
                self.build_server.clone(),
                self.preparation_up_to_date_tracker.clone(),
            );
            let description_id = description.id;
            let associated_batches = Arc::new(Mutex::new(BTreeSet::from_iter(batch)));
            let callback_manager = self.clone();
            let callback_batches = associated_batches.clone();
            // The lock is held across scheduling and the entry insertions;
            // see schedule_target_batch for why.
            let task = self.scheduler.schedule_with_state_callback(
                priority,
                IndexTaskDescription::PrepareTargets(description),
                Arc::new(move |task_state| match task_state {
                    QueuedTaskState::Executing => {
                        let batches: Vec<Uuid> =
                            callback_batches.lock().unwrap().iter().copied().collect();
                        for batch in batches {
                            callback_manager.preparation_started(batch);
                        }
                        callback_manager.notify_progress();
                    }
                    QueuedTaskState::Finished => {
                        callback_manager.remove_finished_preparation(description_id);
                    }
                    QueuedTaskState::CancelledToBeRescheduled => {
                        callback_manager.notify_progress();
                    }
                }),
            );
            for target in &targets {
                state.in_progress_prepare_tasks.insert(
                    target.clone(),
                    InProgressPreparation {
                        task: task.clone(),
                        targets: targets.clone(),
                        purpose,
                        associated_batches: associated_batches.clone(),
                    },
                );
            }
            drop(state);
            self.notify_progress();
            task
        }
    }

    /// Moves every file waiting on `batch` from `WaitingForPreparation` to
    /// `Preparing`.
    fn preparation_started(&self, batch: Uuid) {
        {
            let mut state = self.state.lock().unwrap();
            for entry in state.in_progress_index_tasks.values_mut() {
                if let InProgressIndexEntry::WaitingForPreparation { preparation_id, index_task } =
                    entry
                {
                    if *preparation_id == batch {
                        *entry = InProgressIndexEntry::Preparing {
                            preparation_id: *preparation_id,
                            index_task: index_task.clone(),
                        };
                    }
                }
            }
        }
        self.notify_progress();
    }

    fn remove_finished_preparation(&self, description_id: Uuid) {
        {
            let mut state = self.state.lock().unwrap();
            state.in_progress_prepare_tasks.retain(|_, preparation| {
                match preparation.task.description().as_ref() {
                    IndexTaskDescription::PrepareTargets(description) => {
                        description.id != description_id
                    }
                    _ => true,
                }
            });
        }
        self.notify_progress();
    }

    /// Removes the pipeline entry of `source`, but only if it still belongs
    /// to the update task that finished.
    fn remove_finished_update_task(&self, source: &DocumentUri, description_id: Uuid) {
        {
            let mut state = self.state.lock().unwrap();
            let owned_by_finished_task = match state.in_progress_index_tasks.get(source) {
                Some(InProgressIndexEntry::UpdatingIndexStore { update_task, .. }) => {
                    match update_task.description().as_ref() {
                        IndexTaskDescription::UpdateIndexStore(description) => {
                            description.id == description_id
                        }
                        _ => false,
                    }
                }
                _ => false,
            };
            if owned_by_finished_task {
                state.in_progress_index_tasks.remove(source);
            }
        }
        self.notify_progress();
    }

    fn notify_progress(&self) {
        (self.progress_status_did_change)();
    }
}
