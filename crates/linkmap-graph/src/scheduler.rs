//! Extraction scheduling.
//!
//! Drives the resolver over every stored command and the symbol extractor
//! over every stored binary artifact. Work units run on a bounded set of
//! tasks; their results are applied to the store by a single writer loop
//! inside one transaction per run.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, warn};

use crate::artifacts::{Artifact, CommandRecord};
use crate::command::ParsedCommand;
use crate::process::SharedRunner;
use crate::resolver::{self, ResolveError, Resolution, SearchPaths};
use crate::store::{GraphStore, Phase, StoreError};
use crate::symbols::{
    self, ArtifactFormat, Category, ExtractError, ExtractedSymbols, SymbolReference,
};

/// Errors that abort an extraction run.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Worker task failed: {0}")]
    Worker(#[from] JoinError),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Extraction behavior switches.
#[derive(Debug, Clone, Copy)]
pub struct ExtractionOptions {
    /// Maximum number of units in flight
    pub jobs: usize,
    /// Do all the work, then roll back
    pub dry_run: bool,
    /// Ignore phase timestamps
    pub force: bool,
}

impl Default for ExtractionOptions {
    fn default() -> Self {
        Self {
            jobs: 4,
            dry_run: false,
            force: false,
        }
    }
}

/// The unit a worker is processing.
#[derive(Debug, Clone, Copy)]
pub enum WorkItem<'a> {
    Command(&'a CommandRecord),
    Artifact(&'a Artifact),
}

impl std::fmt::Display for WorkItem<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkItem::Command(command) => {
                write!(f, "command {} ({})", command.id, command.command_line())
            }
            WorkItem::Artifact(artifact) => write!(f, "{} {}", artifact.artifact_type, artifact.name),
        }
    }
}

/// How one unit ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Results were stored; `warnings` holds non-fatal problems
    Completed { warnings: Vec<String> },
    /// Nothing to do for this unit
    Skipped { reason: String },
    /// The unit failed and wrote nothing
    Failed { error: String },
}

/// Receives per-unit notifications from a running phase.
///
/// `before` fires when a unit is handed to a worker; `after` and
/// `progress` fire once its result has been applied.
pub trait ExtractionObserver: Send + Sync {
    fn before(&self, _item: &WorkItem<'_>) {}

    fn after(&self, _item: &WorkItem<'_>, _outcome: &ItemOutcome) {}

    fn progress(&self, _done: usize, _total: usize) {}
}

/// Reports every unit through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingObserver;

impl ExtractionObserver for LoggingObserver {
    fn before(&self, item: &WorkItem<'_>) {
        debug!("Processing {}", item);
    }

    fn after(&self, item: &WorkItem<'_>, outcome: &ItemOutcome) {
        match outcome {
            ItemOutcome::Completed { warnings } => {
                for warning in warnings {
                    warn!("{}: {}", item, warning);
                }
            }
            ItemOutcome::Skipped { reason } => debug!("Skipped {}: {}", item, reason),
            ItemOutcome::Failed { error } => warn!("Failed {}: {}", item, error),
        }
    }

    fn progress(&self, done: usize, total: usize) {
        if done == total || done % 100 == 0 {
            info!("Progress: {}/{}", done, total);
        }
    }
}

/// Ignores all notifications.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ExtractionObserver for NoopObserver {}

/// Statistics from one phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseReport {
    pub processed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// The phase did not run because its results were current
    pub up_to_date: bool,
}

impl PhaseReport {
    fn up_to_date() -> Self {
        Self {
            up_to_date: true,
            ..Default::default()
        }
    }

    fn record(&mut self, outcome: &ItemOutcome) {
        match outcome {
            ItemOutcome::Completed { .. } => self.processed += 1,
            ItemOutcome::Skipped { .. } => self.skipped += 1,
            ItemOutcome::Failed { .. } => self.failed += 1,
        }
    }
}

/// Statistics from a full extraction run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionReport {
    pub dependencies: PhaseReport,
    pub symbols: PhaseReport,
}

/// A unit that can be handed to a worker.
trait Unit: Send + 'static {
    fn work_item(&self) -> WorkItem<'_>;
}

impl Unit for CommandRecord {
    fn work_item(&self) -> WorkItem<'_> {
        WorkItem::Command(self)
    }
}

impl Unit for Artifact {
    fn work_item(&self) -> WorkItem<'_> {
        WorkItem::Artifact(self)
    }
}

/// Returns true if a phase that finished at `done` has seen everything
/// its prerequisite produced at `prerequisite`.
fn is_current(done: Option<DateTime<Utc>>, prerequisite: Option<DateTime<Utc>>) -> bool {
    match (done, prerequisite) {
        (Some(done), Some(prerequisite)) => done >= prerequisite,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

/// Coordinates dependency and symbol extraction over a graph store.
pub struct ExtractionScheduler {
    runner: SharedRunner,
    search_paths: Arc<SearchPaths>,
    nm: String,
    options: ExtractionOptions,
    observer: Arc<dyn ExtractionObserver>,
}

impl ExtractionScheduler {
    /// Create a scheduler with default options and a [`LoggingObserver`].
    pub fn new(runner: SharedRunner, search_paths: SearchPaths) -> Self {
        Self {
            runner,
            search_paths: Arc::new(search_paths),
            nm: "nm".to_string(),
            options: ExtractionOptions::default(),
            observer: Arc::new(LoggingObserver),
        }
    }

    /// Set the symbol dump tool.
    pub fn with_nm(mut self, nm: impl Into<String>) -> Self {
        self.nm = nm.into();
        self
    }

    pub fn with_options(mut self, options: ExtractionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ExtractionObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Resolve the dependencies of every stored command.
    ///
    /// Skipped when dependencies were extracted after the last import.
    pub async fn extract_dependencies(&self, store: &GraphStore) -> Result<PhaseReport> {
        let report = self.run(store, false).await?;
        Ok(report.dependencies)
    }

    /// Extract dependencies if needed, then the symbols of every binary artifact.
    ///
    /// Symbol extraction is skipped when it happened after the last
    /// dependency extraction.
    pub async fn extract_symbols(&self, store: &GraphStore) -> Result<ExtractionReport> {
        self.run(store, true).await
    }

    async fn run(&self, store: &GraphStore, with_symbols: bool) -> Result<ExtractionReport> {
        let force = self.options.force;
        let dependencies_stale = force
            || !is_current(
                store.phase_timestamp(Phase::ExtractDependencies)?,
                store.phase_timestamp(Phase::ImportCommands)?,
            );
        let symbols_stale = with_symbols
            && (force
                || dependencies_stale
                || !is_current(
                    store.phase_timestamp(Phase::ExtractSymbols)?,
                    store.phase_timestamp(Phase::ExtractDependencies)?,
                ));

        if !dependencies_stale {
            info!("Dependencies are up to date");
        }
        if with_symbols && !symbols_stale {
            info!("Symbols are up to date");
        }
        if !dependencies_stale && !symbols_stale {
            return Ok(ExtractionReport {
                dependencies: PhaseReport::up_to_date(),
                symbols: PhaseReport::up_to_date(),
            });
        }

        store.begin()?;
        let report = match self
            .run_phases(store, dependencies_stale, symbols_stale)
            .await
        {
            Ok(report) => report,
            Err(e) => {
                if let Err(rollback) = store.rollback() {
                    warn!("Rollback failed: {}", rollback);
                }
                return Err(e);
            }
        };

        if self.options.dry_run {
            store.rollback()?;
            info!("Dry run: discarded extraction results");
            return Ok(report);
        }

        store.commit()?;
        let finished = Utc::now();
        if dependencies_stale {
            store.set_phase_timestamp(Phase::ExtractDependencies, finished)?;
        }
        if symbols_stale {
            store.set_phase_timestamp(Phase::ExtractSymbols, finished)?;
        }
        Ok(report)
    }

    async fn run_phases(
        &self,
        store: &GraphStore,
        dependencies_stale: bool,
        symbols_stale: bool,
    ) -> Result<ExtractionReport> {
        let mut report = ExtractionReport {
            dependencies: PhaseReport::up_to_date(),
            symbols: PhaseReport::up_to_date(),
        };

        if dependencies_stale {
            info!("Extracting dependencies");
            report.dependencies = self.dependency_phase(store).await?;
            info!(
                "Dependencies: {} processed, {} failed",
                report.dependencies.processed, report.dependencies.failed
            );
        }

        if symbols_stale {
            info!("Extracting symbols");
            if self.options.force {
                let cleared = store.clear_references()?;
                debug!("Cleared {} symbol references", cleared);
            }
            report.symbols = self.symbol_phase(store).await?;
            info!(
                "Symbols: {} processed, {} skipped, {} failed",
                report.symbols.processed, report.symbols.skipped, report.symbols.failed
            );
        }

        Ok(report)
    }

    async fn dependency_phase(&self, store: &GraphStore) -> Result<PhaseReport> {
        let commands = store.commands()?;
        let search_paths = Arc::clone(&self.search_paths);

        self.drive(
            commands,
            |command, workers| {
                let search_paths = Arc::clone(&search_paths);
                workers.spawn_blocking(move || {
                    let result = resolve_command(&command, &search_paths);
                    (command, result)
                });
            },
            |command: &CommandRecord, result: std::result::Result<Resolution, ResolveError>| match result {
                Ok(resolution) => {
                    store_resolution(store, command, &resolution)?;
                    Ok(ItemOutcome::Completed {
                        warnings: resolution.errors,
                    })
                }
                Err(ResolveError::MissingOutput(tool)) => Ok(ItemOutcome::Skipped {
                    reason: format!("{tool} writes no artifact"),
                }),
                Err(e) => Ok(ItemOutcome::Failed {
                    error: e.to_string(),
                }),
            },
        )
        .await
    }

    async fn symbol_phase(&self, store: &GraphStore) -> Result<PhaseReport> {
        let artifacts = store.extractable_artifacts()?;

        self.drive(
            artifacts,
            |artifact, workers| {
                let runner = Arc::clone(&self.runner);
                let nm = self.nm.clone();
                workers.spawn(async move {
                    let result = symbols::extract_symbols(
                        runner.as_ref(),
                        &nm,
                        &artifact.name,
                        artifact.artifact_type,
                    )
                    .await;
                    (artifact, result)
                });
            },
            |artifact: &Artifact, result: std::result::Result<ExtractedSymbols, ExtractError>| match result {
                Ok(extracted) => store_symbols(store, artifact, &extracted),
                Err(e) => Ok(ItemOutcome::Failed {
                    error: e.to_string(),
                }),
            },
        )
        .await
    }

    /// Run `spawn` for each unit with at most `jobs` in flight, applying
    /// finished results with `apply` as they arrive.
    async fn drive<U, T, S, A>(&self, units: Vec<U>, mut spawn: S, mut apply: A) -> Result<PhaseReport>
    where
        U: Unit,
        T: Send + 'static,
        S: FnMut(U, &mut JoinSet<(U, T)>),
        A: FnMut(&U, T) -> Result<ItemOutcome>,
    {
        let total = units.len();
        let jobs = self.options.jobs.max(1);
        let mut pending = units.into_iter();
        let mut workers = JoinSet::new();
        let mut report = PhaseReport::default();
        let mut done = 0;

        loop {
            while workers.len() < jobs {
                let Some(unit) = pending.next() else {
                    break;
                };
                self.observer.before(&unit.work_item());
                spawn(unit, &mut workers);
            }

            let Some(joined) = workers.join_next().await else {
                break;
            };
            let (unit, result) = joined?;
            let outcome = apply(&unit, result)?;

            report.record(&outcome);
            self.observer.after(&unit.work_item(), &outcome);
            done += 1;
            self.observer.progress(done, total);
        }

        Ok(report)
    }
}

fn resolve_command(
    command: &CommandRecord,
    search_paths: &SearchPaths,
) -> std::result::Result<Resolution, ResolveError> {
    let parsed = ParsedCommand::from_parts(&command.directory, &command.executable, &command.args)?;
    resolver::resolve(&parsed, search_paths)
}

fn store_resolution(
    store: &GraphStore,
    command: &CommandRecord,
    resolution: &Resolution,
) -> std::result::Result<(), StoreError> {
    let output = store.upsert_artifact(&resolution.output, resolution.output_type, Some(command.id))?;
    for dependency in &resolution.dependencies {
        let id = store.upsert_artifact(&dependency.path, dependency.artifact_type, None)?;
        store.add_dependency(output, id)?;
    }
    Ok(())
}

fn store_symbols(
    store: &GraphStore,
    artifact: &Artifact,
    extracted: &ExtractedSymbols,
) -> Result<ItemOutcome> {
    store.delete_references_for(artifact.id)?;
    if extracted.format == ArtifactFormat::LinkerScript {
        return Ok(ItemOutcome::Skipped {
            reason: "linker script".to_string(),
        });
    }

    for category in Category::ALL {
        for entry in extracted.entries(category) {
            let symbol_id = store.symbol_id_or_insert(&entry.name, &symbols::demangle(&entry.name))?;
            store.insert_reference(&SymbolReference {
                artifact_id: artifact.id,
                symbol_id,
                category,
                type_code: entry.type_code,
                size: entry.size,
            })?;
        }
    }

    Ok(ItemOutcome::Completed {
        warnings: extracted.failures().map(ToString::to_string).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::ArtifactType;
    use crate::testing::MockRunner;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use tempfile::{TempDir, tempdir};

    const ELF: &[u8] = b"\x7fELF\x02\x01\x01\0";

    struct Project {
        _tmp: TempDir,
        root: PathBuf,
    }

    impl Project {
        fn new() -> Self {
            let tmp = tempdir().expect("Failed to create temp dir");
            let root = tmp.path().canonicalize().unwrap();
            Self { _tmp: tmp, root }
        }

        fn file(&self, name: &str, contents: &[u8]) -> String {
            let path = self.root.join(name);
            fs::write(&path, contents).unwrap();
            path.to_string_lossy().into_owned()
        }

        fn dir(&self) -> String {
            self.root.to_string_lossy().into_owned()
        }

        fn path(&self, name: &str) -> String {
            self.root.join(name).to_string_lossy().into_owned()
        }
    }

    fn scheduler(runner: MockRunner) -> ExtractionScheduler {
        ExtractionScheduler::new(Arc::new(runner), SearchPaths::default())
            .with_observer(Arc::new(NoopObserver))
    }

    fn add_command(store: &GraphStore, project: &Project, line: &str) {
        let parsed = ParsedCommand::parse(line, &project.dir()).unwrap();
        store
            .insert_command(&parsed.directory, &parsed.executable, &parsed.args().unwrap())
            .unwrap();
    }

    fn artifact_id(store: &GraphStore, path: &str) -> i64 {
        store.artifact_by_name(path).unwrap().expect("artifact exists").id
    }

    #[tokio::test]
    async fn test_extract_dependencies() {
        let project = Project::new();
        project.file("main.c", b"int main() {}");
        project.file("main.o", ELF);
        let store = GraphStore::open_in_memory().unwrap();
        add_command(&store, &project, "gcc -c -o main.o main.c");
        add_command(&store, &project, "gcc -o prog main.o missing.o");

        let report = scheduler(MockRunner::new())
            .extract_dependencies(&store)
            .await
            .unwrap();

        assert_eq!(report.processed, 2);
        assert_eq!(report.failed, 0);
        assert!(!store.in_transaction());

        let object = store.artifact_by_name(&project.path("main.o")).unwrap().unwrap();
        assert_eq!(object.artifact_type, ArtifactType::Object);
        assert!(object.generating_command_id.is_some());

        let prog = artifact_id(&store, &project.path("prog"));
        let deps: Vec<_> = store
            .dependencies_of(prog)
            .unwrap()
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(deps, vec![project.path("main.o")]);
        assert!(store.phase_timestamp(Phase::ExtractDependencies).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_staleness_gate_and_force() {
        let project = Project::new();
        project.file("main.c", b"");
        let store = GraphStore::open_in_memory().unwrap();
        add_command(&store, &project, "gcc -c -o main.o main.c");

        let first = scheduler(MockRunner::new())
            .extract_dependencies(&store)
            .await
            .unwrap();
        assert_eq!(first.processed, 1);

        let second = scheduler(MockRunner::new())
            .extract_dependencies(&store)
            .await
            .unwrap();
        assert!(second.up_to_date);
        assert_eq!(second.processed, 0);

        let forced = scheduler(MockRunner::new())
            .with_options(ExtractionOptions {
                force: true,
                ..Default::default()
            })
            .extract_dependencies(&store)
            .await
            .unwrap();
        assert_eq!(forced.processed, 1);

        // A newer import makes dependencies stale again
        store
            .set_phase_timestamp(Phase::ImportCommands, Utc::now() + chrono::Duration::seconds(1))
            .unwrap();
        let after_import = scheduler(MockRunner::new())
            .extract_dependencies(&store)
            .await
            .unwrap();
        assert!(!after_import.up_to_date);
    }

    #[tokio::test]
    async fn test_dry_run_discards_results() {
        let project = Project::new();
        project.file("main.c", b"");
        let store = GraphStore::open_in_memory().unwrap();
        add_command(&store, &project, "gcc -c -o main.o main.c");

        let report = scheduler(MockRunner::new())
            .with_options(ExtractionOptions {
                dry_run: true,
                ..Default::default()
            })
            .extract_dependencies(&store)
            .await
            .unwrap();

        assert_eq!(report.processed, 1);
        assert!(store.artifacts().unwrap().is_empty());
        assert!(store.phase_timestamp(Phase::ExtractDependencies).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_conflict_aborts_the_run() {
        let project = Project::new();
        project.file("a.c", b"");
        let store = GraphStore::open_in_memory().unwrap();
        add_command(&store, &project, "gcc -c -o a.o a.c");
        add_command(&store, &project, "gcc -O2 -c -o a.o a.c");

        let result = scheduler(MockRunner::new()).extract_dependencies(&store).await;

        assert!(matches!(
            result,
            Err(SchedulerError::Store(StoreError::GeneratorConflict { .. }))
        ));
        assert!(!store.in_transaction());
        assert!(store.artifacts().unwrap().is_empty());
        assert!(store.phase_timestamp(Phase::ExtractDependencies).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_extract_symbols() {
        let project = Project::new();
        project.file("main.c", b"");
        let object = project.file("main.o", ELF);
        let script = project.file("libscript.so", b"INPUT ( libreal.so )");
        let store = GraphStore::open_in_memory().unwrap();
        add_command(&store, &project, "gcc -c -o main.o main.c");
        add_command(&store, &project, "gcc -o prog main.o libscript.so");

        let runner = MockRunner::new()
            .with_stdout(
                format!("nm --undefined-only {object}"),
                "                 U puts@GLIBC_2.2.5\n                 U puts\n",
            )
            .with_stdout(
                format!("nm -S --defined-only {object}"),
                "0000000000000000 0000000000000010 T main\n0000000000000000 0000000000000004 b counter\n",
            )
            .with_stdout(
                format!("nm -S --defined-only --extern-only {object}"),
                "0000000000000000 0000000000000010 T main\n",
            );

        let report = scheduler(runner)
            .with_options(ExtractionOptions {
                jobs: 2,
                ..Default::default()
            })
            .extract_symbols(&store)
            .await
            .unwrap();

        assert_eq!(report.dependencies.processed, 2);
        // main.o is extracted; prog is missing on disk; libscript.so is a linker script
        assert_eq!(report.symbols.processed, 1);
        assert_eq!(report.symbols.failed, 1);
        assert_eq!(report.symbols.skipped, 1);

        let id = artifact_id(&store, &object);
        let undefined = store.references(id, Category::Undefined).unwrap();
        assert_eq!(undefined.len(), 1, "versioned and plain puts collapse");
        let puts = store.symbol_by_name("puts").unwrap().unwrap();
        assert_eq!(undefined[0].symbol_id, puts.id);

        let internal = store.references(id, Category::Internal).unwrap();
        assert_eq!(internal.len(), 1);
        assert_eq!(internal[0].size, Some(4));

        let script_id = artifact_id(&store, &script);
        for category in Category::ALL {
            assert!(store.references(script_id, category).unwrap().is_empty());
        }

        assert!(store.phase_timestamp(Phase::ExtractSymbols).unwrap().is_some());

        let again = scheduler(MockRunner::new()).extract_symbols(&store).await.unwrap();
        assert!(again.dependencies.up_to_date);
        assert!(again.symbols.up_to_date);
    }

    #[tokio::test]
    async fn test_assemble_only_step_writes_no_artifact() {
        let project = Project::new();
        let source = project.file("foo.c", b"int foo(void) { return 0; }");
        let assembly = project.file("foo.s", b"\t.text\n");
        let store = GraphStore::open_in_memory().unwrap();
        add_command(&store, &project, "gcc -S foo.c -o foo.s");
        add_command(&store, &project, "gcc -c foo.s -o foo.o");

        let report = scheduler(MockRunner::new())
            .extract_dependencies(&store)
            .await
            .expect("Should extract without a type conflict");

        assert_eq!(report.processed, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed, 0);

        let assembly = store.artifact_by_name(&assembly).unwrap().unwrap();
        assert_eq!(assembly.artifact_type, ArtifactType::Source);
        assert_eq!(assembly.generating_command_id, None);

        let object = artifact_id(&store, &project.path("foo.o"));
        let deps = store.dependencies_of(object).unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].id, assembly.id);
        assert!(store.artifact_by_name(&source).unwrap().is_none());
    }

    #[derive(Default)]
    struct RecordingObserver {
        started: Mutex<Vec<String>>,
        progress: Mutex<Vec<(usize, usize)>>,
    }

    impl ExtractionObserver for RecordingObserver {
        fn before(&self, item: &WorkItem<'_>) {
            self.started.lock().unwrap().push(item.to_string());
        }

        fn progress(&self, done: usize, total: usize) {
            self.progress.lock().unwrap().push((done, total));
        }
    }

    #[tokio::test]
    async fn test_observer_sees_every_unit() {
        let project = Project::new();
        let store = GraphStore::open_in_memory().unwrap();
        for name in ["a", "b", "c", "d", "e"] {
            project.file(&format!("{name}.c"), b"");
            add_command(&store, &project, &format!("gcc -c -o {name}.o {name}.c"));
        }

        let observer = Arc::new(RecordingObserver::default());
        ExtractionScheduler::new(Arc::new(MockRunner::new()), SearchPaths::default())
            .with_observer(observer.clone())
            .with_options(ExtractionOptions {
                jobs: 2,
                ..Default::default()
            })
            .extract_dependencies(&store)
            .await
            .unwrap();

        assert_eq!(observer.started.lock().unwrap().len(), 5);
        let progress = observer.progress.lock().unwrap().clone();
        assert_eq!(progress, (1..=5).map(|done| (done, 5)).collect::<Vec<_>>());
    }

    #[test]
    fn test_is_current() {
        let now = Utc::now();
        let later = now + chrono::Duration::seconds(1);
        assert!(is_current(Some(later), Some(now)));
        assert!(!is_current(Some(now), Some(later)));
        assert!(is_current(Some(now), None));
        assert!(!is_current(None, Some(now)));
        assert!(!is_current(None, None));
    }

    #[test]
    fn test_resolve_command_from_record() {
        let record = CommandRecord {
            id: 1,
            directory: "/nonexistent".to_string(),
            executable: "gcc".to_string(),
            args: "-c -o x.o x.c".to_string(),
        };
        let resolution = resolve_command(&record, &SearchPaths::default()).unwrap();
        assert!(Path::new(&resolution.output).ends_with("x.o"));
        assert_eq!(resolution.errors.len(), 1);
    }
}
