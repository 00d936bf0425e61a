//! Loading recorded build invocations into the graph store.
//!
//! Accepts either a plain log with one command per line or a JSON
//! compilation database. Each entry is parsed independently; the whole
//! import is written in a single transaction.

use std::io::{BufRead, Read};

use chrono::Utc;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::command::{CommandError, ParsedCommand};
use crate::store::{GraphStore, Phase, StoreError};

/// Errors that abort a whole import.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Failed to read commands: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed compilation database: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, ImportError>;

/// Import behavior switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImportOptions {
    /// Parse and write everything, then roll back
    pub dry_run: bool,
    /// Drop all previously imported commands first
    pub replace: bool,
}

/// Statistics from an import.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    /// Commands stored for the first time
    pub imported: usize,
    /// Commands that were already stored
    pub existing: usize,
    /// Entries for tools outside the known grammars
    pub skipped: usize,
    /// Entries that could not be parsed or have no output
    pub failed: usize,
}

impl ImportReport {
    pub fn merge(&mut self, other: &ImportReport) {
        self.imported += other.imported;
        self.existing += other.existing;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

/// One entry of a `compile_commands.json` file.
#[derive(Debug, Deserialize)]
struct CompileCommand {
    directory: String,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    arguments: Option<Vec<String>>,
}

impl CompileCommand {
    /// The entry's `directory` is authoritative; the first token is always the executable.
    fn parse(self) -> std::result::Result<ParsedCommand, CommandError> {
        let mut arguments = match (self.arguments, self.command) {
            (Some(arguments), _) if !arguments.is_empty() => arguments,
            (_, Some(command)) => {
                shlex::split(&command).ok_or_else(|| CommandError::Tokenize(command.clone()))?
            }
            _ => return Err(CommandError::Empty),
        };
        if arguments.is_empty() {
            return Err(CommandError::Empty);
        }
        let executable = arguments.remove(0);
        Ok(ParsedCommand::from_arguments(self.directory, executable, arguments))
    }
}

/// Import a text log with one invocation per line.
///
/// Blank lines and `#` comments are ignored. Lines without a leading
/// directory use `default_directory`.
pub fn import_lines<R: BufRead>(
    store: &GraphStore,
    reader: R,
    default_directory: &str,
    options: ImportOptions,
) -> Result<ImportReport> {
    let mut entries = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        entries.push((
            format!("line {}", index + 1),
            ParsedCommand::parse(trimmed, default_directory),
        ));
    }
    import_entries(store, entries, options)
}

/// Import a JSON compilation database.
///
/// Entries may carry either a `command` string or an `arguments` array.
/// A document that fails to parse aborts the import before anything is
/// written.
pub fn import_compile_database<R: Read>(
    store: &GraphStore,
    reader: R,
    options: ImportOptions,
) -> Result<ImportReport> {
    let database: Vec<CompileCommand> = serde_json::from_reader(reader)?;
    let entries = database
        .into_iter()
        .enumerate()
        .map(|(index, entry)| (format!("entry {index}"), entry.parse()))
        .collect();
    import_entries(store, entries, options)
}

type Entry = (String, std::result::Result<ParsedCommand, CommandError>);

fn import_entries(
    store: &GraphStore,
    entries: Vec<Entry>,
    options: ImportOptions,
) -> Result<ImportReport> {
    store.begin()?;
    let report = match write_entries(store, entries, options) {
        Ok(report) => report,
        Err(e) => {
            if let Err(rollback) = store.rollback() {
                warn!("Rollback failed: {}", rollback);
            }
            return Err(e);
        }
    };

    if options.dry_run {
        store.rollback()?;
        info!(
            "Dry run: would import {} commands ({} already present)",
            report.imported, report.existing
        );
        return Ok(report);
    }

    store.commit()?;
    if report.imported > 0 || options.replace {
        store.set_phase_timestamp(Phase::ImportCommands, Utc::now())?;
    }

    info!(
        "Imported {} commands ({} already present, {} skipped, {} failed)",
        report.imported, report.existing, report.skipped, report.failed
    );
    Ok(report)
}

fn write_entries(
    store: &GraphStore,
    entries: Vec<Entry>,
    options: ImportOptions,
) -> Result<ImportReport> {
    let mut report = ImportReport::default();

    if options.replace {
        let removed = store.truncate_commands()?;
        debug!("Removed {} previously imported commands", removed);
    }

    for (label, parsed) in entries {
        let command = match parsed {
            Ok(command) => command,
            Err(e) => {
                warn!("Skipping {}: {}", label, e);
                report.failed += 1;
                continue;
            }
        };

        if !command.is_recognized() {
            warn!(
                "Skipping {}: unrecognized executable {}",
                label, command.executable
            );
            report.skipped += 1;
            continue;
        }

        if command.output.is_none() {
            warn!("Skipping {}: cannot determine what `{}` writes", label, command.executable);
            report.failed += 1;
            continue;
        }

        let args = match command.args() {
            Ok(args) => args,
            Err(e) => {
                warn!("Skipping {}: {}", label, e);
                report.failed += 1;
                continue;
            }
        };

        let (id, new) = store.insert_command(&command.directory, &command.executable, &args)?;
        if new {
            debug!("Imported command {} from {}", id, label);
            report.imported += 1;
        } else {
            report.existing += 1;
        }
    }

    Ok(report)
}
