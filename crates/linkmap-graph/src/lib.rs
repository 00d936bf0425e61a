//! linkmap-graph: Build dependency graph infrastructure
//!
//! This crate provides the core build graph functionality for linkmap:
//! - Parsing of recorded compiler and archiver invocations
//! - Dependency resolution against the toolchain's library search paths
//! - Symbol table extraction from objects and libraries via `nm`
//! - Graph storage and querying

pub mod analyzer;
pub mod artifacts;
pub mod command;
pub mod import;
pub mod process;
pub mod resolver;
pub mod scheduler;
pub mod store;
pub mod symbols;
pub mod testing;

pub use analyzer::{
    AnalyzeError, CrossCheck, DependencyUsage, Direction, DuplicateFilter, DuplicateSymbol,
    Occurrence, UnresolvedSymbol,
};
pub use artifacts::{Artifact, ArtifactType, CommandRecord, Dependency};
pub use command::{CommandError, ParsedCommand, ToolFamily};
pub use import::{ImportError, ImportOptions, ImportReport};
pub use process::{ProcessError, ProcessOutput, ProcessResult, SharedRunner, SystemRunner, ToolRunner};
pub use resolver::{Resolution, ResolveError, ResolvedDependency, SearchPaths};
pub use scheduler::{
    ExtractionObserver, ExtractionOptions, ExtractionReport, ExtractionScheduler, ItemOutcome,
    LoggingObserver, NoopObserver, PhaseReport, SchedulerError, WorkItem,
};
pub use store::{GraphStats, GraphStore, Phase, SizedReference, StoreError};
pub use symbols::{
    ArtifactFormat, Category, ExtractError, ExtractedSymbols, Symbol, SymbolEntry, SymbolReference,
};
