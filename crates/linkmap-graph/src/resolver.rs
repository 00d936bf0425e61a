//! Dependency resolution for parsed build commands.
//!
//! Walks the arguments of a [`ParsedCommand`] and turns every input path and
//! library namespec into an absolute, typed dependency. Problems with
//! individual arguments are collected on the [`Resolution`] instead of
//! failing the command.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::artifacts::ArtifactType;
use crate::command::{CommandError, IGNORED_FLAG_PREFIXES, ParsedCommand, ToolFamily, VALUE_FLAGS};
use crate::process::{ProcessError, ProcessResult, ToolRunner, display_command};

/// Errors that prevent a command from being resolved at all.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Unknown executable: {0}")]
    UnknownExecutable(String),

    #[error("Cannot determine the output of `{0}`")]
    MissingOutput(String),

    #[error("Search path discovery failed: {0}")]
    Discovery(ProcessResult),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Process(#[from] ProcessError),
}

pub type Result<T> = std::result::Result<T, ResolveError>;

/// Default library search directories of the active toolchain.
///
/// Built once per run and passed to every resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPaths {
    dirs: Vec<PathBuf>,
}

impl SearchPaths {
    /// Use a fixed list of directories.
    pub fn new<I, P>(dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            dirs: dirs.into_iter().map(Into::into).collect(),
        }
    }

    /// Ask the compiler driver for its library search directories.
    pub async fn discover(runner: &dyn ToolRunner, compiler: &str) -> Result<Self> {
        let args = vec!["-print-search-dirs".to_string()];
        let output = runner.run(compiler, &args).await?;
        if output.exit_code != 0 {
            return Err(ResolveError::Discovery(ProcessResult::new(
                display_command(compiler, &args),
                &output,
            )));
        }
        let paths = Self::from_search_dirs_report(&output.stdout);
        debug!("Toolchain library directories: {:?}", paths.dirs);
        Ok(paths)
    }

    /// Parse the `libraries: =dir:dir:...` line of `-print-search-dirs` output.
    ///
    /// Directories are canonicalized; ones that do not exist are dropped.
    pub fn from_search_dirs_report(report: &str) -> Self {
        let mut dirs: Vec<PathBuf> = Vec::new();
        let Some(line) = report
            .lines()
            .find_map(|line| line.strip_prefix("libraries:"))
        else {
            return Self::default();
        };

        let list = line.trim_start().trim_start_matches('=');
        for entry in list.split(':').filter(|e| !e.is_empty()) {
            if let Ok(dir) = Path::new(entry).canonicalize() {
                if dir.is_dir() && !dirs.contains(&dir) {
                    dirs.push(dir);
                }
            }
        }
        Self { dirs }
    }

    /// The directories, in search order.
    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }
}

/// One resolved dependency of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDependency {
    /// Canonical absolute path
    pub path: String,
    pub artifact_type: ArtifactType,
}

/// The outcome of resolving one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Absolute path of the produced artifact
    pub output: String,
    pub output_type: ArtifactType,
    /// De-duplicated dependencies in first-seen order
    pub dependencies: Vec<ResolvedDependency>,
    /// Directories registered with `-I` / `-isystem`
    pub include_dirs: Vec<PathBuf>,
    /// Human-readable problems with individual arguments
    pub errors: Vec<String>,
}

/// Resolve the dependencies of a parsed command.
///
/// Only unrecognized executables and commands without an output fail;
/// everything else is reported through [`Resolution::errors`].
pub fn resolve(command: &ParsedCommand, search_paths: &SearchPaths) -> Result<Resolution> {
    let family = command
        .family
        .ok_or_else(|| ResolveError::UnknownExecutable(command.executable.clone()))?;
    let output = command
        .output
        .as_deref()
        .ok_or_else(|| ResolveError::MissingOutput(command.executable.clone()))?;

    let directory = PathBuf::from(&command.directory);
    let output_type = ArtifactType::classify_output(output);
    let mut scan = Scan {
        output: absolute_output(&directory, output),
        directory,
        search_paths,
        library_dirs: Vec::new(),
        dependencies: Vec::new(),
        seen: HashSet::new(),
        include_dirs: Vec::new(),
        errors: Vec::new(),
    };

    match family {
        ToolFamily::CompileLink => scan.compile_link(&command.arguments, output_type),
        ToolFamily::Archive => scan.archive(&command.arguments),
    }

    Ok(Resolution {
        output: scan.output,
        output_type,
        dependencies: scan.dependencies,
        include_dirs: scan.include_dirs,
        errors: scan.errors,
    })
}

/// Outputs need not exist yet; only the parent directory is canonicalized.
fn absolute_output(directory: &Path, output: &str) -> String {
    let path = directory.join(output);
    if let (Some(parent), Some(file)) = (path.parent(), path.file_name()) {
        if let Ok(parent) = parent.canonicalize() {
            return parent.join(file).to_string_lossy().into_owned();
        }
    }
    path.to_string_lossy().into_owned()
}

/// Per-command resolution state.
struct Scan<'a> {
    directory: PathBuf,
    output: String,
    search_paths: &'a SearchPaths,
    /// Command-local `-L` directories
    library_dirs: Vec<PathBuf>,
    dependencies: Vec<ResolvedDependency>,
    seen: HashSet<String>,
    include_dirs: Vec<PathBuf>,
    errors: Vec<String>,
}

impl Scan<'_> {
    fn compile_link(&mut self, arguments: &[String], output_type: ArtifactType) {
        let mut openmp = false;
        let mut iter = arguments.iter().map(String::as_str);

        while let Some(arg) = iter.next() {
            if VALUE_FLAGS.contains(&arg) {
                iter.next();
            } else if arg == "-o" {
                iter.next();
            } else if matches!(arg, "-I" | "-isystem" | "-iquote" | "-idirafter") {
                match iter.next() {
                    Some(dir) => self.include_dir(dir),
                    None => self.errors.push(format!("Missing directory after {arg}")),
                }
            } else if arg == "-L" {
                match iter.next() {
                    Some(dir) => self.library_dir(dir),
                    None => self.errors.push("Missing directory after -L".to_string()),
                }
            } else if arg == "-l" {
                match iter.next() {
                    Some(name) => self.link_library(name),
                    None => self.errors.push("Missing library name after -l".to_string()),
                }
            } else if arg == "-fopenmp" {
                openmp = true;
            } else if let Some(dir) = arg
                .strip_prefix("-isystem")
                .or_else(|| arg.strip_prefix("-iquote"))
                .or_else(|| arg.strip_prefix("-idirafter"))
                .or_else(|| arg.strip_prefix("-I"))
            {
                self.include_dir(dir);
            } else if let Some(dir) = arg.strip_prefix("-L") {
                self.library_dir(dir);
            } else if let Some(name) = arg.strip_prefix("-l") {
                self.link_library(name);
            } else if arg.starts_with("-o") {
                // attached output, already known
            } else if arg.starts_with('-') {
                if !IGNORED_FLAG_PREFIXES.iter().any(|p| arg.starts_with(p)) {
                    debug!("Ignoring unknown flag {}", arg);
                }
            } else {
                self.input(arg, None);
            }
        }

        // The driver links the OpenMP runtime into shared objects on its own
        if openmp && output_type == ArtifactType::Shared {
            self.link_library("gomp");
            self.link_library("pthread");
        }
    }

    fn archive(&mut self, arguments: &[String]) {
        let mut seen_output = false;
        for arg in arguments {
            match ArtifactType::classify_output(arg) {
                ArtifactType::Static if !seen_output => seen_output = true,
                ArtifactType::Static => self.input(arg, Some(ArtifactType::Static)),
                ArtifactType::Object => self.input(arg, Some(ArtifactType::Object)),
                _ => {}
            }
        }
    }

    fn include_dir(&mut self, dir: &str) {
        self.include_dirs.push(self.directory.join(dir));
    }

    fn library_dir(&mut self, dir: &str) {
        match self.directory.join(dir).canonicalize() {
            Ok(path) => self.library_dirs.push(path),
            Err(e) => self
                .errors
                .push(format!("Invalid library directory {dir}: {e}")),
        }
    }

    fn input(&mut self, token: &str, artifact_type: Option<ArtifactType>) {
        match self.directory.join(token).canonicalize() {
            Ok(path) => {
                let artifact_type =
                    artifact_type.unwrap_or_else(|| ArtifactType::classify_input(&path));
                self.push(path, artifact_type);
            }
            Err(e) => self.errors.push(format!("Cannot resolve {token}: {e}")),
        }
    }

    fn link_library(&mut self, namespec: &str) {
        let (candidates, exact) = match namespec.strip_prefix(':') {
            Some(file) => (vec![file.to_string()], true),
            None => (
                vec![format!("lib{namespec}.so"), format!("lib{namespec}.a")],
                false,
            ),
        };

        let found = candidates.iter().find_map(|file| {
            self.library_dirs
                .iter()
                .chain(self.search_paths.dirs())
                .map(|dir| dir.join(file))
                .find(|path| path.is_file())
        });

        let Some(path) = found else {
            self.errors.push(format!("Cannot find library -l{namespec}"));
            return;
        };

        match path.canonicalize() {
            Ok(canonical) => {
                // Type by the name that matched, not the symlink target
                let mut artifact_type = ArtifactType::classify_input(&path);
                if exact && !artifact_type.is_library() {
                    artifact_type = ArtifactType::Library;
                }
                self.push(canonical, artifact_type);
            }
            Err(e) => self
                .errors
                .push(format!("Cannot resolve library {}: {e}", path.display())),
        }
    }

    fn push(&mut self, path: PathBuf, artifact_type: ArtifactType) {
        let path = path.to_string_lossy().into_owned();
        if path == self.output {
            self.errors
                .push(format!("{path} is listed as a dependency of itself"));
            return;
        }
        if self.seen.insert(path.clone()) {
            self.dependencies.push(ResolvedDependency {
                path,
                artifact_type,
            });
        }
    }
}
