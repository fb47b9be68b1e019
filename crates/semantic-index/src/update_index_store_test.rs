#![cfg(unix)]

use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};

use big_s::S;
use index_types::{
    BuildSettings, DocumentUri, FileIndexInfo, FileToIndex, IndexLogStructure, Language,
    OutputPath, TargetId, Toolchain,
};
use tokio_util::sync::CancellationToken;

use crate::compiler_arguments::{
    supplemental_clang_indexing_arguments, supplemental_swift_indexing_arguments,
};
use crate::test_utils::{
    collecting_index_log, null_index_log, write_executable_script, EventLog, FakeBuildServer,
    FakeIndexDatabase,
};
use crate::up_to_date_tracker::UpToDateTracker;
use crate::update_index_store::{FilesPartition, UpdateIndexStoreTaskDescription};

fn swift_settings(arguments: Vec<String>) -> BuildSettings {
    BuildSettings {
        compiler_arguments: arguments,
        working_directory: None,
        language: Language::Swift,
        is_fallback: false,
    }
}

fn swift_file(path: &str, target: &TargetId, output_path: OutputPath) -> FileIndexInfo {
    FileIndexInfo {
        file: FileToIndex::Indexable(DocumentUri::from_file_path(path)),
        target: target.clone(),
        output_path,
        language: Language::Swift,
    }
}

fn toolchain(multi_file: bool) -> Toolchain {
    Toolchain {
        identifier: S("test-toolchain"),
        swiftc: Some("/toolchain/bin/swiftc".into()),
        clang: Some("/toolchain/bin/clang".into()),
        can_index_multiple_swift_files_in_single_invocation: multi_file,
    }
}

fn description(
    files: Vec<FileIndexInfo>,
    build_server: &Arc<FakeBuildServer>,
    tracker: &Arc<UpToDateTracker<DocumentUri, TargetId>>,
) -> UpdateIndexStoreTaskDescription {
    UpdateIndexStoreTaskDescription::new(
        files,
        build_server.clone(),
        Arc::new(FakeIndexDatabase::default()),
        tracker.clone(),
        false,
        Duration::from_secs(10),
        null_index_log(),
    )
}

#[tokio::test]
async fn swift_files_with_equal_settings_share_a_partition() {
    let build_server = Arc::new(FakeBuildServer::default());
    build_server.set_toolchain(toolchain(true));
    let target = TargetId::from("//core:lib");
    let shared_arguments = vec![S("-module-name"), S("Core"), S("/proj/a.swift"), S("/proj/b.swift")];

    let files = [
        ("/proj/a.swift", shared_arguments.clone(), false),
        ("/proj/b.swift", shared_arguments.clone(), false),
        ("/proj/c.swift", vec![S("-module-name"), S("Other"), S("/proj/c.swift")], false),
        ("/proj/fallback.swift", vec![S("/proj/fallback.swift")], true),
    ]
    .map(|(path, arguments, is_fallback)| {
        let file = swift_file(path, &target, OutputPath::NotSupported);
        build_server.add_source_file(
            file.source_file(),
            &target,
            BuildSettings { is_fallback, ..swift_settings(arguments) },
            OutputPath::NotSupported,
        );
        file
    });

    let tracker = Arc::new(UpToDateTracker::new());
    let task = description(files.to_vec(), &build_server, &tracker);
    let mut partitions = task.partition(files.to_vec()).await.unwrap();
    partitions.sort_by_key(|partition| partition.files.len());

    // Fallback settings are dropped, the shared settings batch together.
    assert_eq!(partitions.len(), 2);
    assert_eq!(partitions[0].files.len(), 1);
    assert_eq!(partitions[0].files[0].source_file().as_str(), "file:///proj/c.swift");
    assert_eq!(partitions[1].files.len(), 2);
}

#[tokio::test]
async fn single_file_toolchains_never_batch_swift_files() {
    let build_server = Arc::new(FakeBuildServer::default());
    build_server.set_toolchain(toolchain(false));
    let target = TargetId::from("//core:lib");
    let arguments = vec![S("-module-name"), S("Core")];

    let files: Vec<FileIndexInfo> = ["/proj/a.swift", "/proj/b.swift"]
        .iter()
        .map(|path| {
            let file = swift_file(path, &target, OutputPath::NotSupported);
            build_server.add_source_file(
                file.source_file(),
                &target,
                swift_settings(arguments.clone()),
                OutputPath::NotSupported,
            );
            file
        })
        .collect();

    let tracker = Arc::new(UpToDateTracker::new());
    let task = description(files.clone(), &build_server, &tracker);
    let partitions = task.partition(files).await.unwrap();
    assert_eq!(partitions.len(), 2);
    assert!(partitions.iter().all(|partition| partition.files.len() == 1));
}

#[tokio::test]
async fn swift_single_file_invocation_arguments() {
    let build_server = Arc::new(FakeBuildServer::default());
    build_server.set_index_store_path("/index/store");
    let target = TargetId::from("//core:lib");
    let file = swift_file("/proj/a.swift", &target, OutputPath::NotSupported);

    let tracker = Arc::new(UpToDateTracker::new());
    let task = description(vec![file.clone()], &build_server, &tracker);
    let partition = FilesPartition {
        files: vec![file],
        settings: swift_settings(vec![S("/proj/a.swift"), S("-module-name"), S("Core"), S("-c")]),
    };
    let invocation = task.indexing_invocation(&partition, &toolchain(false)).unwrap();

    let mut expected = vec![
        S("/proj/a.swift"),
        S("-module-name"),
        S("Core"),
        // `-c` is stripped.
        S("-index-file"),
        S("-index-file-path"),
        S("/proj/a.swift"),
        S("-disable-batch-mode"),
        S("-index-unit-output-path"),
        S("/proj/a.swift.o"),
    ];
    expected.extend(supplemental_swift_indexing_arguments());
    expected.push(S("-index-store-path"));
    expected.push(S("/index/store"));
    assert_eq!(invocation.arguments(), &expected[..]);
}

#[tokio::test]
async fn swift_multi_file_invocation_uses_an_output_file_map() {
    let build_server = Arc::new(FakeBuildServer::default());
    build_server.set_index_store_path("/index/store");
    let target = TargetId::from("//core:lib");
    let first = swift_file("/proj/a.swift", &target, OutputPath::Path(S("/build/a.o")));
    let second = swift_file("/proj/b.swift", &target, OutputPath::NotSupported);

    let tracker = Arc::new(UpToDateTracker::new());
    let task = description(vec![first.clone(), second.clone()], &build_server, &tracker);
    let partition = FilesPartition {
        files: vec![first, second],
        settings: swift_settings(vec![S("-module-name"), S("Core")]),
    };
    let invocation = task.indexing_invocation(&partition, &toolchain(true)).unwrap();
    let arguments = invocation.arguments();

    let map_path = arguments
        .iter()
        .position(|argument| argument == "-output-file-map")
        .map(|index| arguments[index + 1].clone())
        .expect("expected an output file map");
    let map: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&map_path).unwrap()).unwrap();
    assert_eq!(map["/proj/a.swift"]["index-unit-output-path"], "/build/a.o");
    // Files without a declared output path get a synthesised one.
    assert_eq!(map["/proj/b.swift"]["index-unit-output-path"], "/proj/b.swift.o");

    let index_file_paths: Vec<&String> = arguments
        .iter()
        .enumerate()
        .filter(|(_, argument)| *argument == "-index-file-path")
        .map(|(index, _)| &arguments[index + 1])
        .collect();
    assert_eq!(index_file_paths, ["/proj/a.swift", "/proj/b.swift"]);
    assert!(!arguments.contains(&S("-index-unit-output-path")));
    assert!(arguments.contains(&S("-disable-batch-mode")));
}

#[tokio::test]
async fn clang_invocation_arguments() {
    let build_server = Arc::new(FakeBuildServer::default());
    build_server.set_index_store_path("/index/store");
    let target = TargetId::from("//core:lib");
    let file = FileIndexInfo {
        file: FileToIndex::Indexable(DocumentUri::from_file_path("/proj/main.m")),
        target: target.clone(),
        output_path: OutputPath::NotSupported,
        language: Language::ObjectiveC,
    };

    let tracker = Arc::new(UpToDateTracker::new());
    let task = description(vec![file.clone()], &build_server, &tracker);
    let partition = FilesPartition {
        files: vec![file],
        settings: BuildSettings {
            compiler_arguments: vec![S("-c"), S("/proj/main.m"), S("-MD"), S("-fmodules")],
            working_directory: None,
            language: Language::ObjectiveC,
            is_fallback: false,
        },
    };
    let invocation = task.indexing_invocation(&partition, &toolchain(false)).unwrap();

    let mut expected = vec![S("/proj/main.m"), S("-fmodules"), S("-fsyntax-only")];
    expected.extend(supplemental_clang_indexing_arguments());
    expected.push(S("-index-store-path"));
    expected.push(S("/index/store"));
    assert_eq!(invocation.arguments(), &expected[..]);
}

/// A project directory with one on-disk Swift file and a scripted fake
/// compiler.
struct ProcessFixture {
    build_server: Arc<FakeBuildServer>,
    database: Arc<FakeIndexDatabase>,
    tracker: Arc<UpToDateTracker<DocumentUri, TargetId>>,
    target: TargetId,
    file: FileIndexInfo,
    _dir: tempfile::TempDir,
}

fn process_fixture(compiler_body: &str) -> ProcessFixture {
    let dir = tempfile::tempdir().unwrap();
    let events = EventLog::default();
    let build_server = Arc::new(FakeBuildServer::with_events(events.clone()));
    let database = Arc::new(FakeIndexDatabase::with_events(events));
    let target = TargetId::from("//core:lib");

    let source = dir.path().join("a.swift");
    fs::write(&source, "let a = 1").unwrap();
    let compiler = write_executable_script(dir.path(), "fake-swiftc", compiler_body);
    build_server.set_toolchain(Toolchain {
        identifier: S("test-toolchain"),
        swiftc: Some(compiler),
        clang: None,
        can_index_multiple_swift_files_in_single_invocation: false,
    });
    build_server.set_index_store_path(dir.path().join("index-store"));

    let uri = DocumentUri::from_file_path(&source);
    let output_path = OutputPath::Path(format!("{}.o", source.display()));
    build_server.add_source_file(
        &uri,
        &target,
        swift_settings(vec![source.display().to_string()]),
        output_path.clone(),
    );
    let file = FileIndexInfo {
        file: FileToIndex::Indexable(uri),
        target: target.clone(),
        output_path,
        language: Language::Swift,
    };

    ProcessFixture { build_server, database, tracker: Arc::new(UpToDateTracker::new()), target, file, _dir: dir }
}

impl ProcessFixture {
    fn description(&self, timeout: Duration) -> UpdateIndexStoreTaskDescription {
        UpdateIndexStoreTaskDescription::new(
            vec![self.file.clone()],
            self.build_server.clone(),
            self.database.clone(),
            self.tracker.clone(),
            false,
            timeout,
            null_index_log(),
        )
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn successful_indexing_marks_files_up_to_date_and_imports_units() {
    let fixture = process_fixture("exit 0");
    let task = fixture.description(Duration::from_secs(10));
    task.execute(&CancellationToken::new()).await;

    assert!(fixture.tracker.is_up_to_date(fixture.file.source_file(), &fixture.target));
    let events = fixture.database.events.snapshot();
    assert!(
        events.iter().any(|event| event.starts_with("process-units ")),
        "units were not imported: {events:?}"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_compilation_leaves_files_out_of_date_but_still_imports_units() {
    let fixture = process_fixture("exit 1");
    let task = fixture.description(Duration::from_secs(10));
    task.execute(&CancellationToken::new()).await;

    assert!(!fixture.tracker.is_up_to_date(fixture.file.source_file(), &fixture.target));
    // The compiler may have written units before failing.
    let events = fixture.database.events.snapshot();
    assert!(events.iter().any(|event| event.starts_with("process-units ")));
}

#[tokio::test(flavor = "multi_thread")]
async fn files_already_marked_up_to_date_are_not_recompiled() {
    let fixture = process_fixture("echo unexpected-invocation >&2; exit 0");
    fixture.tracker.mark_up_to_date(
        [(fixture.file.source_file().clone(), fixture.target.clone())],
        Instant::now(),
    );

    let task = fixture.description(Duration::from_secs(10));
    task.execute(&CancellationToken::new()).await;
    assert!(fixture.database.events.snapshot().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn hung_compilers_are_terminated_after_the_timeout() {
    let fixture = process_fixture("sleep 30");
    let task = fixture.description(Duration::from_millis(250));
    let start = Instant::now();
    task.execute(&CancellationToken::new()).await;

    assert!(start.elapsed() < Duration::from_secs(10), "the timeout did not fire");
    assert!(!fixture.tracker.is_up_to_date(fixture.file.source_file(), &fixture.target));
}

#[tokio::test(flavor = "multi_thread")]
async fn cancellation_interrupts_the_compiler() {
    // The compiler contract is to exit cleanly on SIGINT; the fake does the
    // same through a trap.
    let fixture = process_fixture("trap 'exit 130' INT\nsleep 30 &\nwait $!");
    let task = fixture.description(Duration::from_secs(60));
    let cancellation = CancellationToken::new();
    let canceller = cancellation.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        canceller.cancel();
    });

    let start = Instant::now();
    task.execute(&cancellation).await;
    assert!(start.elapsed() < Duration::from_secs(10), "cancellation did not interrupt");
    assert!(!fixture.tracker.is_up_to_date(fixture.file.source_file(), &fixture.target));
}

#[tokio::test(flavor = "multi_thread")]
async fn the_index_log_brackets_each_partition_with_a_stable_task_id() {
    let dir = tempfile::tempdir().unwrap();
    let events = EventLog::default();
    let build_server = Arc::new(FakeBuildServer::with_events(events.clone()));
    let database = Arc::new(FakeIndexDatabase::with_events(events));
    let target = TargetId::from("//core:lib");

    let source = dir.path().join("a.swift");
    fs::write(&source, "let a = 1").unwrap();
    let compiler = write_executable_script(dir.path(), "fake-swiftc", "echo compiling a.swift");
    build_server.set_toolchain(Toolchain {
        identifier: S("test-toolchain"),
        swiftc: Some(compiler),
        clang: None,
        can_index_multiple_swift_files_in_single_invocation: false,
    });
    build_server.set_index_store_path(dir.path().join("index-store"));
    let uri = DocumentUri::from_file_path(&source);
    build_server.add_source_file(
        &uri,
        &target,
        swift_settings(vec![source.display().to_string()]),
        OutputPath::NotSupported,
    );

    let (log, collected) = collecting_index_log();
    let task = UpdateIndexStoreTaskDescription::new(
        vec![FileIndexInfo {
            file: FileToIndex::Indexable(uri),
            target: target.clone(),
            output_path: OutputPath::NotSupported,
            language: Language::Swift,
        }],
        build_server,
        database,
        Arc::new(UpToDateTracker::new()),
        false,
        Duration::from_secs(10),
        log,
    );
    task.execute(&CancellationToken::new()).await;

    let messages = collected.lock().unwrap();
    let IndexLogStructure::Begin { task_id, title } = &messages.first().unwrap().structure
    else {
        panic!("expected the log to start with a Begin entry");
    };
    assert!(title.starts_with("Indexing "));
    let IndexLogStructure::End { task_id: end_task_id } = &messages.last().unwrap().structure
    else {
        panic!("expected the log to finish with an End entry");
    };
    assert_eq!(task_id, end_task_id);
    assert!(messages.iter().any(|message| {
        matches!(&message.structure, IndexLogStructure::Report { task_id: report_id }
            if report_id == task_id)
            && message.message == "compiling a.swift"
    }));
}
