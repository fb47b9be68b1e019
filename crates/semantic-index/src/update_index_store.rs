use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use index_types::language::SemanticKind;
use index_types::{
    BuildServer, BuildSettings, DocumentUri, FileIndexInfo, IndexDatabase, IndexLogCallback,
    IndexLogMessage, IndexLogSeverity, IndexLogStructure, Language, OutputPath, Toolchain,
};
use tempfile::NamedTempFile;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::checked_index::CheckedIndex;
use crate::compiler_arguments::{
    is_argument_list_too_long, remove_index_unit_output_path, set_index_store_path,
    strip_clang_build_arguments, strip_swift_build_arguments,
    supplemental_clang_indexing_arguments, supplemental_swift_indexing_arguments,
    write_output_file_map, write_response_file,
};
use crate::error::Error;
use crate::Result;
use crate::modification_stamps::IndexCheckLevel;
use crate::up_to_date_tracker::UpToDateTracker;

use index_types::TargetId;

/// Invokes the compiler in index-only mode on a batch of files from one
/// target, then imports the written units into the index database.
pub struct UpdateIndexStoreTaskDescription {
    pub(crate) id: Uuid,
    pub(crate) files: Vec<FileIndexInfo>,
    build_server: Arc<dyn BuildServer>,
    index_database: Arc<dyn IndexDatabase>,
    index_up_to_date_tracker: Arc<UpToDateTracker<DocumentUri, TargetId>>,
    /// Index files even when an up-to-date unit exists on disk; set for
    /// explicit re-index requests.
    index_files_with_up_to_date_unit: bool,
    /// Wall-clock budget per compiler invocation.
    timeout: Duration,
    log: IndexLogCallback,
}

/// Files that share one compiler invocation.
pub(crate) struct FilesPartition {
    pub(crate) files: Vec<FileIndexInfo>,
    pub(crate) settings: BuildSettings,
}

pub(crate) struct IndexingInvocation {
    compiler: PathBuf,
    arguments: Vec<String>,
    /// Output-file-maps and response files referenced from `arguments`;
    /// deleted when the invocation is dropped.
    temp_files: Vec<NamedTempFile>,
}

impl IndexingInvocation {
    #[cfg(test)]
    pub(crate) fn arguments(&self) -> &[String] {
        &self.arguments
    }
}

enum ProcessOutcome {
    Exited(i32),
    Signalled,
    TimedOut,
    SpawnFailed,
}

impl UpdateIndexStoreTaskDescription {
    pub(crate) fn new(
        files: Vec<FileIndexInfo>,
        build_server: Arc<dyn BuildServer>,
        index_database: Arc<dyn IndexDatabase>,
        index_up_to_date_tracker: Arc<UpToDateTracker<DocumentUri, TargetId>>,
        index_files_with_up_to_date_unit: bool,
        timeout: Duration,
        log: IndexLogCallback,
    ) -> Self {
        debug_assert!(!files.is_empty());
        UpdateIndexStoreTaskDescription {
            id: Uuid::new_v4(),
            files,
            build_server,
            index_database,
            index_up_to_date_tracker,
            index_files_with_up_to_date_unit,
            timeout,
            log,
        }
    }

    pub(crate) fn main_file_uris(&self) -> BTreeSet<DocumentUri> {
        self.files.iter().map(|file| file.main_file().clone()).collect()
    }

    pub(crate) async fn execute(&self, cancellation: &CancellationToken) {
        let files_to_index = self.files_to_index();
        if files_to_index.is_empty() {
            tracing::debug!("{self}: everything up-to-date, nothing to do");
            return;
        }

        let target = files_to_index[0].target.clone();
        let partitions = match self.partition(files_to_index).await {
            Ok(partitions) => partitions,
            Err(error) => {
                tracing::error!("cannot partition files of {target} for indexing: {error}");
                return;
            }
        };

        for partition in partitions {
            if cancellation.is_cancelled() {
                return;
            }
            self.update_index_store_for_partition(partition, cancellation).await;
        }
    }

    /// Drops files that are already known fresh, either through the tracker
    /// or through an up-to-date unit in the index store.
    fn files_to_index(&self) -> Vec<FileIndexInfo> {
        let mut checked_index =
            CheckedIndex::new(self.index_database.clone(), IndexCheckLevel::ModifiedFiles);
        self.files
            .iter()
            .filter(|file| {
                if self
                    .index_up_to_date_tracker
                    .is_up_to_date(file.source_file(), &file.target)
                {
                    tracing::debug!("not indexing {}: indexed since the last edit", file.source_file());
                    return false;
                }
                if !self.index_files_with_up_to_date_unit
                    && checked_index.has_up_to_date_unit(
                        file.source_file(),
                        Some(file.main_file()),
                        &file.output_path,
                    )
                {
                    tracing::debug!("not indexing {}: unit is up-to-date", file.source_file());
                    return false;
                }
                true
            })
            .cloned()
            .collect()
    }

    /// Splits the files into per-invocation partitions: Clang files compile
    /// one at a time; Swift files with identical build settings may share a
    /// multi-file invocation when the toolchain supports it.
    pub(crate) async fn partition(
        &self,
        files: Vec<FileIndexInfo>,
    ) -> Result<Vec<FilesPartition>> {
        let mut partitions = Vec::new();
        let mut swift_by_settings: BTreeMap<(Vec<String>, Option<PathBuf>), FilesPartition> =
            BTreeMap::new();

        let target = files[0].target.clone();
        let toolchain = self
            .build_server
            .toolchain(&target, &files[0].language)
            .await
            .ok_or_else(|| Error::NoToolchain {
                uri: files[0].source_file().clone(),
                target: target.clone(),
            })?;
        let multi_file_swift = toolchain.can_index_multiple_swift_files_in_single_invocation;

        for file in files {
            if file.language.semantic_kind().is_none() {
                tracing::error!(
                    "{}",
                    Error::LanguageNotSupported(file.source_file().clone())
                );
                continue;
            }
            let settings = match self
                .build_server
                .build_settings(file.main_file(), &file.target, &file.language, false)
                .await
            {
                Some(settings) if settings.is_fallback => {
                    tracing::error!(
                        "{}",
                        Error::FallbackBuildSettings(file.source_file().clone())
                    );
                    continue;
                }
                Some(settings) => settings,
                None => {
                    tracing::error!("{}", Error::NoBuildSettings(file.source_file().clone()));
                    continue;
                }
            };

            if file.language == Language::Swift && multi_file_swift {
                // The unit output path necessarily differs per file, so it
                // is removed before comparing settings for batchability.
                let normalized_arguments =
                    remove_index_unit_output_path(&settings.compiler_arguments);
                let key = (normalized_arguments.clone(), settings.working_directory.clone());
                swift_by_settings
                    .entry(key)
                    .or_insert_with(|| FilesPartition {
                        files: Vec::new(),
                        settings: BuildSettings {
                            compiler_arguments: normalized_arguments,
                            ..settings
                        },
                    })
                    .files
                    .push(file);
            } else {
                partitions.push(FilesPartition { files: vec![file], settings });
            }
        }

        partitions.extend(swift_by_settings.into_values());
        Ok(partitions)
    }

    async fn update_index_store_for_partition(
        &self,
        partition: FilesPartition,
        cancellation: &CancellationToken,
    ) {
        let op_start = Instant::now();
        let toolchain = self
            .build_server
            .toolchain(&partition.files[0].target, &partition.settings.language)
            .await;
        let invocation = toolchain
            .ok_or_else(|| Error::NoToolchain {
                uri: partition.files[0].source_file().clone(),
                target: partition.files[0].target.clone(),
            })
            .and_then(|toolchain| self.indexing_invocation(&partition, &toolchain));
        let invocation = match invocation {
            Ok(invocation) => invocation,
            Err(error) => {
                tracing::error!("cannot index {}: {error}", partition_display(&partition));
                return;
            }
        };

        let outcome = self.run_indexing_process(&partition, invocation, cancellation).await;
        match outcome {
            ProcessOutcome::Exited(0) => {
                self.index_up_to_date_tracker.mark_up_to_date(
                    partition
                        .files
                        .iter()
                        .map(|file| (file.source_file().clone(), file.target.clone())),
                    op_start,
                );
            }
            // Common when the file has compile errors; the index still got
            // whatever the compiler managed to record.
            ProcessOutcome::Exited(code) => {
                tracing::debug!(
                    "indexing {} exited with code {code}",
                    partition_display(&partition)
                );
            }
            ProcessOutcome::Signalled => {
                if !cancellation.is_cancelled() {
                    tracing::error!(
                        "indexing {} terminated by a signal",
                        partition_display(&partition)
                    );
                }
            }
            ProcessOutcome::TimedOut => {
                tracing::warn!(
                    "indexing {} timed out after {:?}; the files stay out-of-date",
                    partition_display(&partition),
                    self.timeout
                );
            }
            ProcessOutcome::SpawnFailed => return,
        }

        let output_paths: Vec<String> = partition
            .files
            .iter()
            .filter_map(|file| match &file.output_path {
                OutputPath::Path(path) => Some(path.clone()),
                OutputPath::NotSupported => None,
            })
            .collect();
        if !output_paths.is_empty() {
            // Make the newly written units visible before the task
            // completes, so waiters observe them.
            self.index_database.process_units_for_output_paths_and_wait(output_paths).await;
        }
    }

    /// Assembles the compiler command line for one partition.
    pub(crate) fn indexing_invocation(
        &self,
        partition: &FilesPartition,
        toolchain: &Toolchain,
    ) -> Result<IndexingInvocation> {
        let index_store_path =
            self.build_server.index_store_path().ok_or(Error::NoIndexStorePath)?;
        let first_file = &partition.files[0];
        let semantic_kind = partition
            .settings
            .language
            .semantic_kind()
            .ok_or_else(|| Error::LanguageNotSupported(first_file.source_file().clone()))?;

        match semantic_kind {
            SemanticKind::Swift => {
                let compiler = toolchain.swiftc.clone().ok_or_else(|| Error::NoCompiler {
                    toolchain: toolchain.identifier.clone(),
                    language: Language::Swift,
                })?;
                let mut arguments =
                    strip_swift_build_arguments(&partition.settings.compiler_arguments);
                let mut temp_files = Vec::new();
                arguments.push("-index-file".to_string());
                if partition.files.len() > 1 {
                    let mut unit_output_paths = BTreeMap::new();
                    for file in &partition.files {
                        let main_path = local_path(file.main_file())?;
                        let unit_output_path = match &file.output_path {
                            OutputPath::Path(path) => path.clone(),
                            OutputPath::NotSupported => {
                                format!("{}.o", main_path.display())
                            }
                        };
                        unit_output_paths
                            .insert(main_path.display().to_string(), unit_output_path);
                    }
                    let output_file_map = write_output_file_map(&unit_output_paths)?;
                    arguments.push("-output-file-map".to_string());
                    arguments.push(output_file_map.path().display().to_string());
                    temp_files.push(output_file_map);
                    for file in &partition.files {
                        arguments.push("-index-file-path".to_string());
                        arguments.push(local_path(file.main_file())?.display().to_string());
                    }
                    arguments.push("-disable-batch-mode".to_string());
                } else {
                    let main_path = local_path(first_file.main_file())?;
                    arguments.push("-index-file-path".to_string());
                    arguments.push(main_path.display().to_string());
                    arguments.push("-disable-batch-mode".to_string());
                    if first_file.output_path == OutputPath::NotSupported {
                        arguments.push("-index-unit-output-path".to_string());
                        arguments.push(format!("{}.o", main_path.display()));
                    }
                }
                arguments.extend(supplemental_swift_indexing_arguments());
                set_index_store_path(&mut arguments, &index_store_path);
                Ok(IndexingInvocation { compiler, arguments, temp_files })
            }
            SemanticKind::Clang => {
                let compiler = toolchain.clang.clone().ok_or_else(|| Error::NoCompiler {
                    toolchain: toolchain.identifier.clone(),
                    language: partition.settings.language.clone(),
                })?;
                let mut arguments =
                    strip_clang_build_arguments(&partition.settings.compiler_arguments);
                arguments.push("-fsyntax-only".to_string());
                arguments.extend(supplemental_clang_indexing_arguments());
                set_index_store_path(&mut arguments, &index_store_path);
                Ok(IndexingInvocation { compiler, arguments, temp_files: Vec::new() })
            }
        }
    }

    async fn run_indexing_process(
        &self,
        partition: &FilesPartition,
        mut invocation: IndexingInvocation,
        cancellation: &CancellationToken,
    ) -> ProcessOutcome {
        let task_id = format!("update-indexstore-{}", Uuid::new_v4());
        self.log(IndexLogMessage {
            message: format!(
                "{} {}",
                invocation.compiler.display(),
                invocation.arguments.join(" ")
            ),
            severity: IndexLogSeverity::Info,
            structure: IndexLogStructure::Begin {
                title: format!("Indexing {}", partition_display(partition)),
                task_id: task_id.clone(),
            },
        });

        let spawned = self.spawn_compiler(&mut invocation, partition);
        let mut child = match spawned {
            Ok(child) => child,
            Err(error) => {
                self.log(IndexLogMessage {
                    message: format!("failed to start the indexing process: {error}"),
                    severity: IndexLogSeverity::Error,
                    structure: IndexLogStructure::End { task_id },
                });
                tracing::error!(
                    "failed to spawn {} to index {}: {error}",
                    invocation.compiler.display(),
                    partition_display(partition)
                );
                return ProcessOutcome::SpawnFailed;
            }
        };

        let stdout_forwarder = self.forward_output(child.stdout.take(), &task_id);
        let stderr_forwarder = self.forward_output(child.stderr.take(), &task_id);

        let outcome = tokio::select! {
            status = child.wait() => match status {
                Ok(status) => match status.code() {
                    Some(code) => ProcessOutcome::Exited(code),
                    None => ProcessOutcome::Signalled,
                },
                Err(_) => ProcessOutcome::Signalled,
            },
            _ = tokio::time::sleep(self.timeout) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                ProcessOutcome::TimedOut
            }
            _ = cancellation.cancelled() => {
                // The compiler handles SIGINT by exiting cleanly; a hard
                // kill could leave a corrupt unit behind.
                interrupt(&child);
                match tokio::time::timeout(Duration::from_secs(10), child.wait()).await {
                    Ok(_) => {}
                    Err(_) => {
                        let _ = child.start_kill();
                        let _ = child.wait().await;
                    }
                }
                ProcessOutcome::Signalled
            }
        };

        let _ = stdout_forwarder.await;
        let _ = stderr_forwarder.await;

        let (message, severity) = match &outcome {
            ProcessOutcome::Exited(0) => ("finished".to_string(), IndexLogSeverity::Info),
            ProcessOutcome::Exited(code) => {
                (format!("finished with exit code {code}"), IndexLogSeverity::Info)
            }
            ProcessOutcome::Signalled => {
                ("terminated by a signal".to_string(), IndexLogSeverity::Warning)
            }
            ProcessOutcome::TimedOut => {
                (format!("timed out after {:?}", self.timeout), IndexLogSeverity::Error)
            }
            ProcessOutcome::SpawnFailed => unreachable!("handled above"),
        };
        self.log(IndexLogMessage {
            message,
            severity,
            structure: IndexLogStructure::End { task_id },
        });
        outcome
    }

    fn spawn_compiler(
        &self,
        invocation: &mut IndexingInvocation,
        partition: &FilesPartition,
    ) -> std::io::Result<tokio::process::Child> {
        let spawn = |program: &PathBuf, arguments: &[String]| {
            let mut command = Command::new(program);
            command
                .args(arguments)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);
            if let Some(working_directory) = &partition.settings.working_directory {
                command.current_dir(working_directory);
            }
            command.spawn()
        };

        match spawn(&invocation.compiler, &invocation.arguments) {
            Ok(child) => Ok(child),
            Err(error) if is_argument_list_too_long(&error) => {
                tracing::debug!(
                    "argument list too long for {}; retrying with a response file",
                    partition_display(partition)
                );
                let response_file = write_response_file(&invocation.arguments)
                    .map_err(std::io::Error::other)?;
                let arguments = vec![format!("@{}", response_file.path().display())];
                let child = spawn(&invocation.compiler, &arguments)?;
                invocation.temp_files.push(response_file);
                Ok(child)
            }
            Err(error) => Err(error),
        }
    }

    fn forward_output(
        &self,
        stream: Option<impl AsyncRead + Unpin + Send + 'static>,
        task_id: &str,
    ) -> tokio::task::JoinHandle<()> {
        let log = self.log.clone();
        let task_id = task_id.to_string();
        tokio::spawn(async move {
            let Some(stream) = stream else { return };
            let mut lines = BufReader::new(stream).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                log(IndexLogMessage {
                    message: line,
                    severity: IndexLogSeverity::Info,
                    structure: IndexLogStructure::Report { task_id: task_id.clone() },
                });
            }
        })
    }

    fn log(&self, message: IndexLogMessage) {
        (self.log)(message);
    }
}

impl fmt::Display for UpdateIndexStoreTaskDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "updating index store for {}", files_display(&self.files))
    }
}

fn partition_display(partition: &FilesPartition) -> String {
    files_display(&partition.files)
}

fn files_display(files: &[FileIndexInfo]) -> String {
    files
        .iter()
        .map(|file| file.source_file().as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn local_path(uri: &DocumentUri) -> Result<PathBuf> {
    uri.file_path().ok_or_else(|| Error::NoFilePath(uri.clone()))
}

#[cfg(unix)]
fn interrupt(child: &tokio::process::Child) {
    if let Some(pid) = child.id() {
        // Safety: sending SIGINT to our own child process.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGINT);
        }
    }
}

#[cfg(not(unix))]
fn interrupt(child: &tokio::process::Child) {
    let _ = child;
}
