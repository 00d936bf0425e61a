//! Symbol types and symbol table extraction.
//!
//! This module defines the symbol rows of the graph and the extractor that
//! interrogates a binary artifact with `nm` to learn which symbols it
//! needs (`undefined`), exports (`external`) and keeps to itself
//! (`internal`).

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use crate::artifacts::ArtifactType;
use crate::process::{ProcessError, ProcessResult, ToolRunner, display_command};

/// Symbols the toolchain emits into every object.
const HOUSEKEEPING_SYMBOLS: &[&str] = &["_GLOBAL_OFFSET_TABLE_", "__dso_handle"];

const ELF_MAGIC: &[u8] = b"\x7fELF";
const AR_MAGIC: &[u8] = b"!<arch>\n";

/// Errors that can occur while extracting symbols from an artifact.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Process(#[from] ProcessError),
}

pub type Result<T> = std::result::Result<T, ExtractError>;

/// How an artifact relates to a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Referenced but not defined here
    Undefined,
    /// Defined and visible to other artifacts
    External,
    /// Defined and file-local
    Internal,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Undefined, Category::External, Category::Internal];

    /// Returns the string representation stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Undefined => "undefined",
            Category::External => "external",
            Category::Internal => "internal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == s)
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// A symbol known to the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub id: i64,
    /// Version-stripped raw name
    pub name: String,
    /// Demangled form, empty if the name is not mangled
    pub demangled: String,
}

impl Symbol {
    /// The demangled name if there is one, otherwise the raw name.
    pub fn display_name(&self) -> &str {
        if self.demangled.is_empty() {
            &self.name
        } else {
            &self.demangled
        }
    }
}

/// One appearance of a symbol in an artifact's symbol table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolReference {
    pub artifact_id: i64,
    pub symbol_id: i64,
    pub category: Category,
    /// The `nm` type letter
    pub type_code: char,
    pub size: Option<i64>,
}

/// A parsed `nm` line.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SymbolEntry {
    pub name: String,
    pub type_code: char,
    pub size: Option<i64>,
}

/// What the leading bytes of an artifact say it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArtifactFormat {
    /// ELF object or ar archive
    #[default]
    Binary,
    /// Anything else, typically a GNU ld script posing as a library
    LinkerScript,
}

/// The symbol sets of one artifact.
#[derive(Debug, Clone, Default)]
pub struct ExtractedSymbols {
    pub format: ArtifactFormat,
    pub undefined: Vec<SymbolEntry>,
    pub external: Vec<SymbolEntry>,
    pub internal: Vec<SymbolEntry>,
    /// Every `nm` invocation, in order
    pub processes: Vec<ProcessResult>,
}

impl ExtractedSymbols {
    /// The entries of one category.
    pub fn entries(&self, category: Category) -> &[SymbolEntry] {
        match category {
            Category::Undefined => &self.undefined,
            Category::External => &self.external,
            Category::Internal => &self.internal,
        }
    }

    /// Invocations that exited non-zero or wrote to stderr.
    pub fn failures(&self) -> impl Iterator<Item = &ProcessResult> {
        self.processes.iter().filter(|p| p.is_failure())
    }
}

/// Strip a symbol version (`foo@@GLIBC_2.2.5` → `foo`).
///
/// The name ends at the first character outside `[A-Za-z0-9_$.]`.
pub fn strip_version(raw: &str) -> &str {
    raw.find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '.')))
        .map_or(raw, |end| &raw[..end])
}

/// Returns true for compiler-generated names that never link anything.
///
/// Covers constant pool labels (`.LC0`), clone and constructor suffixes
/// (`foo.cold`, `_GLOBAL__sub_I_main.cpp`) and toolchain housekeeping.
pub fn is_noise(name: &str) -> bool {
    name.starts_with(".LC") || name.contains('.') || HOUSEKEEPING_SYMBOLS.contains(&name)
}

/// Demangle a C++ symbol name; empty when `name` is not mangled.
pub fn demangle(name: &str) -> String {
    cpp_demangle::Symbol::new(name)
        .ok()
        .and_then(|symbol| symbol.demangle(&cpp_demangle::DemangleOptions::default()).ok())
        .unwrap_or_default()
}

/// Parse one line of `nm` output.
///
/// Accepts `type name`, `address type name` and `address size type name`.
/// Archive member headers, blank lines and filtered names yield `None`.
pub fn parse_nm_line(line: &str) -> Option<SymbolEntry> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let is_hex = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_hexdigit());

    let (size, code, raw) = match fields.as_slice() {
        [code, name] => (None, *code, *name),
        [address, code, name] if is_hex(address) => (None, *code, *name),
        [address, size, code, name] if is_hex(address) && is_hex(size) => {
            (i64::from_str_radix(size, 16).ok(), *code, *name)
        }
        _ => return None,
    };

    let mut chars = code.chars();
    let type_code = chars.next()?;
    if chars.next().is_some() {
        return None;
    }

    let name = strip_version(raw);
    if name.is_empty() || is_noise(name) {
        return None;
    }

    Some(SymbolEntry {
        name: name.to_string(),
        type_code,
        size,
    })
}

/// Parse a whole `nm` table, dropping identical entries.
pub fn parse_nm_output(output: &str) -> Vec<SymbolEntry> {
    let mut seen = HashSet::new();
    output
        .lines()
        .filter_map(parse_nm_line)
        .filter(|entry| seen.insert(entry.clone()))
        .collect()
}

/// Sniff the leading bytes of the file at `path`.
pub async fn detect_format(path: &Path) -> Result<ArtifactFormat> {
    let read_error = |source| ExtractError::Read {
        path: path.display().to_string(),
        source,
    };

    let file = tokio::fs::File::open(path).await.map_err(read_error)?;
    let mut header = Vec::with_capacity(AR_MAGIC.len());
    file.take(AR_MAGIC.len() as u64)
        .read_to_end(&mut header)
        .await
        .map_err(read_error)?;

    if header.starts_with(ELF_MAGIC) || header.starts_with(AR_MAGIC) {
        Ok(ArtifactFormat::Binary)
    } else {
        Ok(ArtifactFormat::LinkerScript)
    }
}

/// Extract the three symbol sets of the artifact at `path`.
///
/// Linker scripts are flagged and not interrogated. Tool failures are
/// recorded in [`ExtractedSymbols::processes`] and whatever output was
/// produced is still used.
pub async fn extract_symbols(
    runner: &dyn ToolRunner,
    nm: &str,
    path: &str,
    artifact_type: ArtifactType,
) -> Result<ExtractedSymbols> {
    let format = detect_format(Path::new(path)).await?;
    if format == ArtifactFormat::LinkerScript {
        debug!("{} is a linker script, skipping symbol extraction", path);
        return Ok(ExtractedSymbols {
            format,
            ..Default::default()
        });
    }

    let mut dump = SymbolDump {
        runner,
        nm,
        path,
        dynamic_fallback: artifact_type == ArtifactType::Shared,
        processes: Vec::new(),
    };

    let undefined = dump.table(&["--undefined-only"]).await?;
    let defined = dump.table(&["-S", "--defined-only"]).await?;
    let external = dump.table(&["-S", "--defined-only", "--extern-only"]).await?;

    let exported: HashSet<&str> = external.iter().map(|e| e.name.as_str()).collect();
    let internal: Vec<SymbolEntry> = defined
        .iter()
        .filter(|e| !exported.contains(e.name.as_str()))
        .cloned()
        .collect();

    debug!(
        "{}: {} undefined, {} external, {} internal",
        path,
        undefined.len(),
        external.len(),
        internal.len()
    );

    Ok(ExtractedSymbols {
        format,
        undefined,
        external,
        internal,
        processes: dump.processes,
    })
}

/// `nm` invocations against one artifact.
struct SymbolDump<'a> {
    runner: &'a dyn ToolRunner,
    nm: &'a str,
    path: &'a str,
    dynamic_fallback: bool,
    processes: Vec<ProcessResult>,
}

impl SymbolDump<'_> {
    /// Read a table, falling back to the dynamic table when it is empty.
    async fn table(&mut self, flags: &[&str]) -> Result<Vec<SymbolEntry>> {
        let entries = self.run(flags, false).await?;
        if entries.is_empty() && self.dynamic_fallback {
            return self.run(flags, true).await;
        }
        Ok(entries)
    }

    async fn run(&mut self, flags: &[&str], dynamic: bool) -> Result<Vec<SymbolEntry>> {
        let mut args: Vec<String> = Vec::with_capacity(flags.len() + 2);
        if dynamic {
            args.push("-D".to_string());
        }
        args.extend(flags.iter().map(|f| f.to_string()));
        args.push(self.path.to_string());

        let output = self.runner.run(self.nm, &args).await?;
        let result = ProcessResult::new(display_command(self.nm, &args), &output);
        if result.is_failure() {
            warn!("{}", result);
        }
        self.processes.push(result);

        Ok(parse_nm_output(&output.stdout))
    }
}
