//! Read-only queries over the extracted graph.
//!
//! Finds symbols defined in more than one place, undefined symbols that
//! no dependency satisfies, shared dependencies nothing uses, and the
//! transitive closure of an artifact.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;

use thiserror::Error;
use tracing::debug;

use crate::artifacts::{Artifact, ArtifactType};
use crate::process::{ProcessError, ProcessResult, ToolRunner, display_command};
use crate::store::{GraphStore, SizedReference, StoreError};
use crate::symbols::{Category, Symbol};

/// Errors that can occur while analyzing the graph.
#[derive(Debug, Error)]
pub enum AnalyzeError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Unknown artifact: {0}")]
    UnknownArtifact(String),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("Dependency report failed: {0}")]
    Tool(ProcessResult),
}

pub type Result<T> = std::result::Result<T, AnalyzeError>;

/// Find an artifact by exact name, falling back to the canonical form of `name`.
pub fn find_artifact(store: &GraphStore, name: &str) -> Result<Artifact> {
    if let Some(artifact) = store.artifact_by_name(name)? {
        return Ok(artifact);
    }
    if let Ok(canonical) = Path::new(name).canonicalize() {
        if let Some(artifact) = store.artifact_by_name(&canonical.to_string_lossy())? {
            return Ok(artifact);
        }
    }
    Err(AnalyzeError::UnknownArtifact(name.to_string()))
}

/// Include/exclude sets applied to duplicate symbol occurrences.
///
/// Empty include sets accept everything.
#[derive(Debug, Clone, Default)]
pub struct DuplicateFilter {
    pub include_types: HashSet<ArtifactType>,
    pub exclude_types: HashSet<ArtifactType>,
    pub include_categories: HashSet<Category>,
    pub exclude_categories: HashSet<Category>,
}

impl DuplicateFilter {
    fn accepts(&self, reference: &SizedReference) -> bool {
        let artifact_type = reference.artifact.artifact_type;
        (self.include_types.is_empty() || self.include_types.contains(&artifact_type))
            && !self.exclude_types.contains(&artifact_type)
            && (self.include_categories.is_empty()
                || self.include_categories.contains(&reference.category))
            && !self.exclude_categories.contains(&reference.category)
    }
}

/// One place a duplicated symbol occurs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occurrence {
    pub artifact: Artifact,
    pub category: Category,
    pub size: i64,
}

/// A symbol with more than one sized occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateSymbol {
    pub symbol: Symbol,
    pub total_size: i64,
    pub occurrences: Vec<Occurrence>,
}

/// Symbols with more than one sized occurrence, largest total first.
pub fn duplicate_symbols(store: &GraphStore, filter: &DuplicateFilter) -> Result<Vec<DuplicateSymbol>> {
    let mut groups: HashMap<i64, DuplicateSymbol> = HashMap::new();

    for reference in store.sized_references()? {
        if !filter.accepts(&reference) {
            continue;
        }
        let group = groups
            .entry(reference.symbol.id)
            .or_insert_with(|| DuplicateSymbol {
                symbol: reference.symbol.clone(),
                total_size: 0,
                occurrences: Vec::new(),
            });
        group.total_size += reference.size;
        group.occurrences.push(Occurrence {
            artifact: reference.artifact,
            category: reference.category,
            size: reference.size,
        });
    }

    let mut duplicates: Vec<DuplicateSymbol> = groups
        .into_values()
        .filter(|group| group.occurrences.len() > 1)
        .collect();
    duplicates.sort_by(|a, b| {
        b.total_size
            .cmp(&a.total_size)
            .then_with(|| a.symbol.name.cmp(&b.symbol.name))
    });
    Ok(duplicates)
}

/// An undefined symbol that no direct dependency exports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedSymbol {
    pub symbol: Symbol,
    /// Artifacts anywhere in the graph that export the symbol
    pub candidates: Vec<Artifact>,
}

/// Undefined symbols of an artifact that its direct dependencies leave unresolved.
pub fn undefined_symbols(store: &GraphStore, artifact_id: i64) -> Result<Vec<UnresolvedSymbol>> {
    let mut provided = HashSet::new();
    for dependency in store.dependencies_of(artifact_id)? {
        provided.extend(exported_symbols(store, dependency.id)?);
    }

    let mut seen = HashSet::new();
    let mut unresolved = Vec::new();
    for reference in store.references(artifact_id, Category::Undefined)? {
        if provided.contains(&reference.symbol_id) || !seen.insert(reference.symbol_id) {
            continue;
        }
        let symbol = store
            .symbol(reference.symbol_id)?
            .ok_or_else(|| StoreError::InvalidData(format!("dangling symbol {}", reference.symbol_id)))?;
        let candidates = store.exporters(reference.symbol_id)?;
        unresolved.push(UnresolvedSymbol { symbol, candidates });
    }

    unresolved.sort_by(|a, b| a.symbol.name.cmp(&b.symbol.name));
    Ok(unresolved)
}

/// Shared dependencies of an artifact, split by whether they satisfy any of its undefined symbols.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyUsage {
    pub useful: Vec<Artifact>,
    pub useless: Vec<Artifact>,
}

pub fn useless_dependencies(store: &GraphStore, artifact_id: i64) -> Result<DependencyUsage> {
    let needed: HashSet<i64> = store
        .references(artifact_id, Category::Undefined)?
        .into_iter()
        .map(|r| r.symbol_id)
        .collect();

    let mut usage = DependencyUsage::default();
    for dependency in store.dependencies_of(artifact_id)? {
        if dependency.artifact_type != ArtifactType::Shared {
            continue;
        }
        let exported = exported_symbols(store, dependency.id)?;
        if exported.iter().any(|id| needed.contains(id)) {
            usage.useful.push(dependency);
        } else {
            usage.useless.push(dependency);
        }
    }
    Ok(usage)
}

fn exported_symbols(store: &GraphStore, artifact_id: i64) -> Result<HashSet<i64>> {
    Ok(store
        .references(artifact_id, Category::External)?
        .into_iter()
        .map(|r| r.symbol_id)
        .collect())
}

/// Parse the "Unused direct dependencies" section of `ldd -u` output.
pub fn parse_ldd_unused(output: &str) -> Vec<String> {
    output
        .lines()
        .skip_while(|line| !line.contains("Unused direct dependencies"))
        .skip(1)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Ask the platform loader which direct dependencies of `path` are unused.
///
/// Paths are canonicalized when they exist so they compare with graph names.
pub async fn ldd_unused_dependencies(runner: &dyn ToolRunner, ldd: &str, path: &str) -> Result<Vec<String>> {
    let args = vec!["-u".to_string(), "-r".to_string(), path.to_string()];
    let output = runner.run(ldd, &args).await?;

    // ldd -u exits with 1 when it found unused dependencies
    if output.exit_code > 1 || output.exit_code < 0 {
        return Err(AnalyzeError::Tool(ProcessResult::new(
            display_command(ldd, &args),
            &output,
        )));
    }

    let unused = parse_ldd_unused(&output.stdout)
        .into_iter()
        .map(|lib| {
            Path::new(&lib)
                .canonicalize()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or(lib)
        })
        .collect::<Vec<_>>();
    debug!("{} reports {} unused dependencies of {}", ldd, unused.len(), path);
    Ok(unused)
}

/// Agreement between the graph's and the loader's unused dependency reports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrossCheck {
    pub agreed: Vec<String>,
    pub only_graph: Vec<String>,
    pub only_ldd: Vec<String>,
}

pub fn cross_check(usage: &DependencyUsage, ldd_unused: &[String]) -> CrossCheck {
    let graph: HashSet<&str> = usage.useless.iter().map(|a| a.name.as_str()).collect();
    let loader: HashSet<&str> = ldd_unused.iter().map(String::as_str).collect();

    let mut check = CrossCheck::default();
    for name in usage.useless.iter().map(|a| a.name.as_str()) {
        if loader.contains(name) {
            check.agreed.push(name.to_string());
        } else {
            check.only_graph.push(name.to_string());
        }
    }
    check.only_ldd = ldd_unused
        .iter()
        .filter(|name| !graph.contains(name.as_str()))
        .cloned()
        .collect();
    check
}

/// Which way to follow dependency edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// From dependee to dependency
    Dependencies,
    /// From dependency to dependee
    Dependees,
}

/// Everything `artifact_id` transitively depends on.
pub fn dependency_closure(store: &GraphStore, artifact_id: i64, types: &[ArtifactType]) -> Result<Vec<Artifact>> {
    closure(store, artifact_id, Direction::Dependencies, types)
}

/// Everything that transitively depends on `artifact_id`.
pub fn dependee_closure(store: &GraphStore, artifact_id: i64, types: &[ArtifactType]) -> Result<Vec<Artifact>> {
    closure(store, artifact_id, Direction::Dependees, types)
}

/// Breadth-first reachability from `artifact_id`.
///
/// Each reachable artifact is reported once, in discovery order. The start
/// is only reported when a cycle leads back to it. `types` restricts what
/// is reported, not what is traversed; empty means every type.
pub fn closure(
    store: &GraphStore,
    artifact_id: i64,
    direction: Direction,
    types: &[ArtifactType],
) -> Result<Vec<Artifact>> {
    let mut visited = HashSet::new();
    let mut worklist = VecDeque::from([artifact_id]);
    let mut reached = Vec::new();

    while let Some(current) = worklist.pop_front() {
        let neighbors = match direction {
            Direction::Dependencies => store.dependencies_of(current)?,
            Direction::Dependees => store.dependees_of(current)?,
        };
        for neighbor in neighbors {
            if !visited.insert(neighbor.id) {
                continue;
            }
            worklist.push_back(neighbor.id);
            if types.is_empty() || types.contains(&neighbor.artifact_type) {
                reached.push(neighbor);
            }
        }
    }

    Ok(reached)
}
