//! Integration tests for linkmap-graph
//!
//! Drives import, extraction and analysis through the public API against a
//! small on-disk project, with `nm` answered by a mock runner.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use linkmap_graph::analyzer::{
    dependee_closure, dependency_closure, duplicate_symbols, find_artifact, undefined_symbols,
    useless_dependencies,
};
use linkmap_graph::import::{import_compile_database, import_lines};
use linkmap_graph::testing::MockRunner;
use linkmap_graph::{
    ArtifactType, Category, DuplicateFilter, ExtractionOptions, ExtractionScheduler, GraphStore,
    ImportOptions, NoopObserver, Phase, SearchPaths,
};
use tempfile::TempDir;

const ELF: &[u8] = b"\x7fELF\x02\x01\x01\0";
const AR: &[u8] = b"!<arch>\n";

struct Project {
    _tmp: TempDir,
    root: PathBuf,
}

impl Project {
    /// A program linking one object, one archive and two shared libraries,
    /// one of which it never uses.
    fn new() -> Self {
        let tmp = tempfile::tempdir().expect("Failed to create temp dir");
        let root = tmp.path().canonicalize().unwrap();
        fs::create_dir_all(root.join("lib")).unwrap();

        let files: &[(&str, &[u8])] = &[
            ("main.c", b"int main(void) { return helper() + shared_fn(); }"),
            ("util.c", b"int helper(void) { return 1; }"),
            ("main.o", ELF),
            ("util.o", ELF),
            ("libutil.a", AR),
            ("app", ELF),
            ("lib/libshared.so", ELF),
            ("lib/libunused.so", ELF),
        ];
        for (name, contents) in files {
            fs::write(root.join(name), contents).unwrap();
        }

        Self { _tmp: tmp, root }
    }

    fn path(&self, name: &str) -> String {
        self.root.join(name).to_string_lossy().into_owned()
    }

    fn build_log(&self) -> String {
        let dir = self.root.display();
        format!(
            "'{dir}' gcc -c -o main.o main.c\n\
             '{dir}' gcc -c -o util.o util.c\n\
             '{dir}' ar qc libutil.a util.o\n\
             '{dir}' gcc -o app main.o libutil.a -Llib -lshared -lunused -lmissing\n"
        )
    }

    fn runner(&self) -> MockRunner {
        let nm = |flags: &str, name: &str| format!("nm {flags} {}", self.path(name));
        MockRunner::new()
            .with_stdout(nm("--undefined-only", "main.o"), "                 U helper\n                 U shared_fn\n")
            .with_stdout(
                nm("-S --defined-only", "main.o"),
                "0000000000000000 0000000000000020 T main\n",
            )
            .with_stdout(
                nm("-S --defined-only --extern-only", "main.o"),
                "0000000000000000 0000000000000020 T main\n",
            )
            .with_stdout(
                nm("-S --defined-only", "util.o"),
                "0000000000000000 0000000000000010 T helper\n",
            )
            .with_stdout(
                nm("-S --defined-only --extern-only", "util.o"),
                "0000000000000000 0000000000000010 T helper\n",
            )
            .with_stdout(
                nm("-S --defined-only", "libutil.a"),
                "\nutil.o:\n0000000000000000 0000000000000010 T helper\n",
            )
            .with_stdout(
                nm("-S --defined-only --extern-only", "libutil.a"),
                "\nutil.o:\n0000000000000000 0000000000000010 T helper\n",
            )
            .with_stdout(
                nm("--undefined-only", "app"),
                "                 U shared_fn@VERS_1\n                 U __libc_start_main@GLIBC_2.34\n",
            )
            .with_stdout(
                nm("-D -S --defined-only", "lib/libshared.so"),
                "0000000000001100 0000000000000018 T shared_fn@@VERS_1\n",
            )
            .with_stdout(
                nm("-D -S --defined-only --extern-only", "lib/libshared.so"),
                "0000000000001100 0000000000000018 T shared_fn@@VERS_1\n",
            )
            .with_stdout(
                nm("-D -S --defined-only --extern-only", "lib/libunused.so"),
                "0000000000001000 0000000000000008 T unused_fn\n",
            )
    }

    fn scheduler(&self) -> ExtractionScheduler {
        ExtractionScheduler::new(Arc::new(self.runner()), SearchPaths::default())
            .with_observer(Arc::new(NoopObserver))
            .with_options(ExtractionOptions {
                jobs: 3,
                ..Default::default()
            })
    }
}

fn names<'a>(artifacts: impl IntoIterator<Item = &'a linkmap_graph::Artifact>) -> Vec<String> {
    let mut names: Vec<String> = artifacts.into_iter().map(|a| a.name.clone()).collect();
    names.sort();
    names
}

async fn extracted_project() -> (Project, GraphStore) {
    let project = Project::new();
    let store = GraphStore::open_in_memory().unwrap();

    let report = import_lines(
        &store,
        project.build_log().as_bytes(),
        "/unused",
        ImportOptions::default(),
    )
    .expect("Should import");
    assert_eq!(report.imported, 4);

    let report = project
        .scheduler()
        .extract_symbols(&store)
        .await
        .expect("Should extract");
    assert_eq!(report.dependencies.processed, 4);
    assert_eq!(report.dependencies.failed, 0);
    assert_eq!(report.symbols.failed, 0);

    (project, store)
}

#[tokio::test]
async fn pipeline_builds_the_dependency_graph() {
    let (project, store) = extracted_project().await;

    let app = store.artifact_by_name(&project.path("app")).unwrap().unwrap();
    assert_eq!(app.artifact_type, ArtifactType::Executable);
    assert!(app.generating_command_id.is_some());

    let deps = store.dependencies_of(app.id).unwrap();
    assert_eq!(
        names(&deps),
        names(&[
            store.artifact_by_name(&project.path("lib/libshared.so")).unwrap().unwrap(),
            store.artifact_by_name(&project.path("lib/libunused.so")).unwrap().unwrap(),
            store.artifact_by_name(&project.path("libutil.a")).unwrap().unwrap(),
            store.artifact_by_name(&project.path("main.o")).unwrap().unwrap(),
        ])
    );

    let archive = store.artifact_by_name(&project.path("libutil.a")).unwrap().unwrap();
    assert_eq!(archive.artifact_type, ArtifactType::Static);
    assert_eq!(
        names(&store.dependencies_of(archive.id).unwrap()),
        vec![project.path("util.o")]
    );

    let closure = dependency_closure(&store, app.id, &[]).unwrap();
    assert_eq!(closure.len(), 7);
    let sources = dependency_closure(&store, app.id, &[ArtifactType::Source]).unwrap();
    assert_eq!(names(&sources), vec![project.path("main.c"), project.path("util.c")]);

    let util_c = find_artifact(&store, &project.path("util.c")).unwrap();
    let dependees = dependee_closure(&store, util_c.id, &[ArtifactType::Executable]).unwrap();
    assert_eq!(names(&dependees), vec![project.path("app")]);
}

#[tokio::test]
async fn versioned_symbols_share_one_row() {
    let (project, store) = extracted_project().await;

    let shared_fn = store.symbol_by_name("shared_fn").unwrap().expect("symbol exists");
    assert!(store.symbol_by_name("shared_fn@VERS_1").unwrap().is_none());
    assert!(store.symbol_by_name("shared_fn@@VERS_1").unwrap().is_none());

    let lib = store.artifact_by_name(&project.path("lib/libshared.so")).unwrap().unwrap();
    let exported = store.references(lib.id, Category::External).unwrap();
    assert_eq!(exported.len(), 1);
    assert_eq!(exported[0].symbol_id, shared_fn.id);
    assert_eq!(exported[0].size, Some(0x18));
}

#[tokio::test]
async fn unresolved_symbols_follow_direct_dependencies() {
    let (project, store) = extracted_project().await;
    let app = find_artifact(&store, &project.path("app")).unwrap();
    let lib = find_artifact(&store, &project.path("lib/libshared.so")).unwrap();

    let unresolved = undefined_symbols(&store, app.id).unwrap();
    let symbols: Vec<_> = unresolved.iter().map(|u| u.symbol.name.as_str()).collect();
    assert_eq!(symbols, vec!["__libc_start_main"]);
    assert!(unresolved[0].candidates.is_empty());

    store.remove_dependency(app.id, lib.id).unwrap();
    let unresolved = undefined_symbols(&store, app.id).unwrap();
    let shared_fn = unresolved
        .iter()
        .find(|u| u.symbol.name == "shared_fn")
        .expect("shared_fn is unresolved without its library");
    assert_eq!(names(&shared_fn.candidates), vec![project.path("lib/libshared.so")]);

    // main.o alone needs helper, which two artifacts in the graph provide
    let main_o = find_artifact(&store, &project.path("main.o")).unwrap();
    let unresolved = undefined_symbols(&store, main_o.id).unwrap();
    let helper = unresolved.iter().find(|u| u.symbol.name == "helper").unwrap();
    assert_eq!(
        names(&helper.candidates),
        vec![project.path("libutil.a"), project.path("util.o")]
    );
}

#[tokio::test]
async fn unused_shared_libraries_are_reported() {
    let (project, store) = extracted_project().await;
    let app = find_artifact(&store, &project.path("app")).unwrap();

    let usage = useless_dependencies(&store, app.id).unwrap();
    assert_eq!(names(&usage.useful), vec![project.path("lib/libshared.so")]);
    assert_eq!(names(&usage.useless), vec![project.path("lib/libunused.so")]);
}

#[tokio::test]
async fn duplicated_definitions_are_found() {
    let (project, store) = extracted_project().await;

    let duplicates = duplicate_symbols(&store, &DuplicateFilter::default()).unwrap();
    let helper = duplicates
        .iter()
        .find(|d| d.symbol.name == "helper")
        .expect("helper is defined twice");
    // util.o and the archive that wraps it each export 0x10 bytes
    assert_eq!(helper.total_size, 0x20);
    let mut holders: Vec<_> = helper.occurrences.iter().map(|o| o.artifact.name.clone()).collect();
    holders.sort();
    assert_eq!(holders, vec![project.path("libutil.a"), project.path("util.o")]);
    assert!(helper.occurrences.iter().all(|o| o.category == Category::External));
}

#[tokio::test]
async fn reimport_and_rerun_are_idempotent() {
    let (project, store) = extracted_project().await;
    let before = store.stats().unwrap();

    let report = import_lines(
        &store,
        project.build_log().as_bytes(),
        "/unused",
        ImportOptions::default(),
    )
    .unwrap();
    assert_eq!(report.imported, 0);
    assert_eq!(report.existing, 4);

    let rerun = project.scheduler().extract_symbols(&store).await.unwrap();
    assert!(rerun.dependencies.up_to_date);
    assert!(rerun.symbols.up_to_date);

    let forced = project
        .scheduler()
        .with_options(ExtractionOptions {
            force: true,
            ..Default::default()
        })
        .extract_symbols(&store)
        .await
        .unwrap();
    assert_eq!(forced.dependencies.processed, 4);
    assert_eq!(store.stats().unwrap(), before);
}

#[tokio::test]
async fn compile_database_feeds_the_same_pipeline() {
    let project = Project::new();
    let store = GraphStore::open_in_memory().unwrap();
    let dir = project.root.display().to_string();
    let database = serde_json::json!([
        { "directory": dir, "command": "gcc -c -o main.o main.c", "file": "main.c" },
        { "directory": dir, "arguments": ["gcc", "-c", "-o", "util.o", "util.c"], "file": "util.c" },
    ]);

    import_compile_database(
        &store,
        database.to_string().as_bytes(),
        ImportOptions::default(),
    )
    .unwrap();

    let report = project.scheduler().extract_dependencies(&store).await.unwrap();
    assert_eq!(report.processed, 2);
    assert!(store.phase_timestamp(Phase::ExtractDependencies).unwrap().is_some());
    assert!(store.artifact_by_name(&project.path("util.o")).unwrap().is_some());
}

#[tokio::test]
async fn graph_persists_across_reopen() {
    let project = Project::new();
    let db_path = project.root.join("graph.db");
    {
        let store = GraphStore::open(&db_path).unwrap();
        import_lines(
            &store,
            project.build_log().as_bytes(),
            "/unused",
            ImportOptions::default(),
        )
        .unwrap();
        project.scheduler().extract_dependencies(&store).await.unwrap();
    }

    let store = GraphStore::open(&db_path).unwrap();
    let stats = store.stats().unwrap();
    assert_eq!(stats.commands, 4);
    assert_eq!(stats.artifacts, 8);
    assert!(stats.dependencies > 0);
}
