//! linkmap: Build graph auditing for native C/C++ projects
//!
//! linkmap records the compiler and archiver invocations of a build, works
//! out which files each one reads and writes, and answers questions about
//! the resulting graph: unresolved symbols, unused shared libraries,
//! duplicated definitions and transitive closures.

mod config;

use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use config::Config;
use linkmap_graph::analyzer::{self, Direction};
use linkmap_graph::import::{self, ImportOptions, ImportReport};
use linkmap_graph::{
    ArtifactType, Category, DuplicateFilter, ExtractionOptions, ExtractionScheduler, GraphStore,
    LoggingObserver, Phase, PhaseReport, SearchPaths, SystemRunner,
};

/// Build graph auditing for native C/C++ projects
#[derive(Parser)]
#[command(name = "linkmap")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to .linkmap directory or config file (default: search for .linkmap/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to the graph database (overrides [store] path)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new .linkmap directory with config file
    Init {
        /// Force overwrite existing config
        #[arg(long)]
        force: bool,
    },

    /// Import recorded build commands
    Import {
        /// Read JSON compilation databases instead of command logs
        #[arg(long)]
        json: bool,

        /// Drop previously imported commands first
        #[arg(long)]
        replace: bool,

        /// Parse everything but write nothing
        #[arg(long)]
        dry_run: bool,

        /// Working directory for log lines that do not start with one
        #[arg(long)]
        directory: Option<PathBuf>,

        /// Files to read (default: stdin)
        files: Vec<PathBuf>,
    },

    /// Resolve dependencies and, optionally, symbol tables
    Extract {
        /// Also extract symbol tables with nm
        #[arg(long)]
        symbols: bool,

        /// Re-extract even when results are current
        #[arg(long)]
        force: bool,

        /// Do all the work, then discard it
        #[arg(long)]
        dry_run: bool,

        /// Number of parallel workers (overrides [extraction] jobs)
        #[arg(short, long)]
        jobs: Option<usize>,
    },

    /// List undefined symbols no direct dependency provides
    Undefined {
        /// Artifact path
        artifact: String,
    },

    /// List shared libraries an artifact links but does not use
    Useless {
        /// Artifact path
        artifact: String,

        /// Compare against the dynamic loader's own report
        #[arg(long)]
        ldd: bool,
    },

    /// List symbols defined in more than one artifact
    Duplicates {
        /// Only count occurrences in artifacts of this type
        #[arg(long = "type", value_parser = parse_artifact_type)]
        types: Vec<ArtifactType>,

        /// Ignore occurrences in artifacts of this type
        #[arg(long = "exclude-type", value_parser = parse_artifact_type)]
        exclude_types: Vec<ArtifactType>,

        /// Only count occurrences of this category
        #[arg(long = "category", value_parser = parse_category)]
        categories: Vec<Category>,

        /// Ignore occurrences of this category
        #[arg(long = "exclude-category", value_parser = parse_category)]
        exclude_categories: Vec<Category>,
    },

    /// List everything an artifact transitively depends on
    Closure {
        /// Artifact path
        artifact: String,

        /// Follow edges towards dependees instead
        #[arg(long)]
        reverse: bool,

        /// Only report artifacts of this type
        #[arg(long = "type", value_parser = parse_artifact_type)]
        types: Vec<ArtifactType>,
    },

    /// Show graph statistics
    Stats,
}

fn parse_artifact_type(s: &str) -> Result<ArtifactType, String> {
    ArtifactType::parse(s).ok_or_else(|| {
        let known: Vec<_> = ArtifactType::ALL.iter().map(|t| t.as_str()).collect();
        format!("unknown artifact type '{}' (expected one of: {})", s, known.join(", "))
    })
}

fn parse_category(s: &str) -> Result<Category, String> {
    Category::parse(s).ok_or_else(|| {
        let known: Vec<_> = Category::ALL.iter().map(|c| c.as_str()).collect();
        format!("unknown category '{}' (expected one of: {})", s, known.join(", "))
    })
}

fn env_filter(verbose: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Initialize logging for short commands.
/// Logs to stderr so reports on stdout stay clean.
fn init_logging(verbose: bool) {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(env_filter(verbose))
        .init();
}

/// Initialize logging for extraction runs.
/// Logs to stderr and to rotating files in .linkmap/logs/ with daily rotation.
fn init_file_logging(linkmap_dir: &Path, verbose: bool) {
    let logs_dir = linkmap_dir.join("logs");

    if let Err(e) = std::fs::create_dir_all(&logs_dir) {
        eprintln!("Warning: Failed to create logs directory: {}", e);
        init_logging(verbose);
        return;
    }

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &logs_dir, "linkmap.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Dropping the guard stops the background writer
    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
        std::sync::OnceLock::new();
    let _ = GUARD.set(guard);

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .with(env_filter(verbose))
        .init();
}

/// Load config from file or auto-discover from `.linkmap/config.toml`.
///
/// Returns the config and the path to the `.linkmap` directory (for resolving relative paths).
fn load_config(override_path: Option<&PathBuf>) -> Result<(Config, Option<PathBuf>)> {
    if let Some(path) = override_path {
        let config_file = if path.is_dir() {
            path.join(config::CONFIG_FILE)
        } else {
            path.clone()
        };
        let linkmap_dir = config_file.parent().unwrap_or(path).to_path_buf();
        let config = Config::from_file(&config_file)?;
        info!("Loaded config from {}", config_file.display());
        return Ok((config, Some(linkmap_dir)));
    }

    match Config::find_and_load() {
        Ok(Some((config, linkmap_dir))) => {
            tracing::debug!("Found config at {}", linkmap_dir.display());
            Ok((config, Some(linkmap_dir)))
        }
        Ok(None) => {
            tracing::debug!("No .linkmap/config.toml found, using defaults");
            Ok((Config::default(), None))
        }
        Err(e) => {
            warn!("Error searching for config: {}, using defaults", e);
            Ok((Config::default(), None))
        }
    }
}

/// Open the graph database, creating its directory when `create` is set.
fn open_store(path: &Path, create: bool) -> Result<GraphStore> {
    if create {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    } else if !path.exists() {
        anyhow::bail!(
            "No graph database at {}. Run 'linkmap import' first.",
            path.display()
        );
    }
    GraphStore::open(path).with_context(|| format!("Failed to open {}", path.display()))
}

/// Library directories from config, or from the compiler when none are configured.
async fn search_paths(config: &Config) -> SearchPaths {
    if !config.toolchain.library_dirs.is_empty() {
        return SearchPaths::new(config.toolchain.library_dirs.iter().cloned());
    }
    match SearchPaths::discover(&SystemRunner, &config.toolchain.compiler).await {
        Ok(paths) => paths,
        Err(e) => {
            warn!(
                "Could not ask {} for its library directories: {}. Only -L directories will be searched.",
                config.toolchain.compiler, e
            );
            SearchPaths::default()
        }
    }
}

fn print_phase(name: &str, report: &PhaseReport) {
    if report.up_to_date {
        println!("{name}: up to date");
    } else {
        println!(
            "{name}: {} processed, {} skipped, {} failed",
            report.processed, report.skipped, report.failed
        );
    }
}

fn print_import(report: &ImportReport) {
    println!(
        "Imported {} commands ({} already present, {} skipped, {} failed)",
        report.imported, report.existing, report.skipped, report.failed
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, config_dir) = match &cli.command {
        // Init must not fail on a broken config it is about to replace
        Commands::Init { .. } => (Config::default(), None),
        _ => load_config(cli.config.as_ref())?,
    };
    if let Some(problem) = config.validate().into_iter().next() {
        anyhow::bail!("Invalid configuration: {}", problem);
    }

    let linkmap_dir = config_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(config::LINKMAP_DIR));
    let db_path = cli
        .db
        .clone()
        .unwrap_or_else(|| config.resolve_store_path(config_dir.as_deref()));

    match &cli.command {
        Commands::Extract { .. } => init_file_logging(&linkmap_dir, cli.verbose),
        _ => init_logging(cli.verbose),
    }

    match cli.command {
        Commands::Init { force } => {
            use config::{CONFIG_FILE, LINKMAP_DIR};

            let linkmap_dir = PathBuf::from(LINKMAP_DIR);
            let config_path = linkmap_dir.join(CONFIG_FILE);

            if config_path.exists() && !force {
                anyhow::bail!(".linkmap/config.toml already exists. Use --force to overwrite.");
            }

            if !linkmap_dir.exists() {
                std::fs::create_dir_all(&linkmap_dir)?;
                info!("Created {}/", linkmap_dir.display());
            }

            let header = "# linkmap configuration\n\
                          # Relative paths are resolved against this .linkmap/ directory.\n\
                          # Leave toolchain.library_dirs empty to ask the compiler.\n\n";
            std::fs::write(&config_path, format!("{header}{}", config.to_toml()?))?;
            info!("Created {}", config_path.display());
            info!("Next steps:");
            info!("  1. Record your build's compiler invocations, one per line");
            info!("  2. Run 'linkmap import <log>' to load them");
            info!("  3. Run 'linkmap extract --symbols' to build the graph");
        }

        Commands::Import {
            json,
            replace,
            dry_run,
            directory,
            files,
        } => {
            let store = open_store(&db_path, true)?;
            let mut options = ImportOptions { dry_run, replace };
            let default_directory = match directory {
                Some(dir) => dir,
                None => std::env::current_dir()?,
            };
            let default_directory = default_directory.to_string_lossy().into_owned();

            let mut total = ImportReport::default();
            if files.is_empty() {
                let stdin = io::stdin().lock();
                total = if json {
                    import::import_compile_database(&store, stdin, options)?
                } else {
                    import::import_lines(&store, stdin, &default_directory, options)?
                };
            } else {
                for path in &files {
                    let file = File::open(path)
                        .with_context(|| format!("Failed to open {}", path.display()))?;
                    let reader = BufReader::new(file);
                    let report = if json {
                        import::import_compile_database(&store, reader, options)
                    } else {
                        import::import_lines(&store, reader, &default_directory, options)
                    }
                    .with_context(|| format!("Failed to import {}", path.display()))?;
                    total.merge(&report);
                    // Only the first file replaces
                    options.replace = false;
                }
            }
            print_import(&total);
        }

        Commands::Extract {
            symbols,
            force,
            dry_run,
            jobs,
        } => {
            let store = open_store(&db_path, false)?;
            let options = ExtractionOptions {
                jobs: jobs.unwrap_or(config.extraction.jobs).max(1),
                dry_run,
                force,
            };
            let scheduler = ExtractionScheduler::new(SystemRunner::shared(), search_paths(&config).await)
                .with_nm(config.toolchain.nm.clone())
                .with_options(options)
                .with_observer(Arc::new(LoggingObserver));

            if symbols {
                let report = scheduler.extract_symbols(&store).await?;
                print_phase("Dependencies", &report.dependencies);
                print_phase("Symbols", &report.symbols);
            } else {
                let report = scheduler.extract_dependencies(&store).await?;
                print_phase("Dependencies", &report);
            }
            if dry_run {
                println!("Dry run: nothing was written");
            }
        }

        Commands::Undefined { artifact } => {
            let store = open_store(&db_path, false)?;
            let artifact = analyzer::find_artifact(&store, &artifact)?;
            let unresolved = analyzer::undefined_symbols(&store, artifact.id)?;

            for entry in &unresolved {
                println!("{}", entry.symbol.display_name());
                for candidate in &entry.candidates {
                    println!("    provided by {}", candidate.name);
                }
            }
            info!("{} unresolved symbols in {}", unresolved.len(), artifact.name);
        }

        Commands::Useless { artifact, ldd } => {
            let store = open_store(&db_path, false)?;
            let artifact = analyzer::find_artifact(&store, &artifact)?;
            let usage = analyzer::useless_dependencies(&store, artifact.id)?;

            if ldd {
                let reported = analyzer::ldd_unused_dependencies(
                    &SystemRunner,
                    &config.toolchain.ldd,
                    &artifact.name,
                )
                .await?;
                let check = analyzer::cross_check(&usage, &reported);
                for name in &check.agreed {
                    println!("{name}");
                }
                for name in &check.only_graph {
                    println!("{name}    (graph only)");
                }
                for name in &check.only_ldd {
                    println!("{name}    ({} only)", config.toolchain.ldd);
                }
            } else {
                for dependency in &usage.useless {
                    println!("{}", dependency.name);
                }
            }
            info!(
                "{} of {} shared dependencies unused",
                usage.useless.len(),
                usage.useful.len() + usage.useless.len()
            );
        }

        Commands::Duplicates {
            types,
            exclude_types,
            categories,
            exclude_categories,
        } => {
            let store = open_store(&db_path, false)?;
            let filter = DuplicateFilter {
                include_types: types.into_iter().collect(),
                exclude_types: exclude_types.into_iter().collect(),
                include_categories: categories.into_iter().collect(),
                exclude_categories: exclude_categories.into_iter().collect(),
            };

            let duplicates = analyzer::duplicate_symbols(&store, &filter)?;
            for duplicate in &duplicates {
                println!(
                    "{} ({} bytes total)",
                    duplicate.symbol.display_name(),
                    duplicate.total_size
                );
                for occurrence in &duplicate.occurrences {
                    println!(
                        "    {:>8} {:<8} {}",
                        occurrence.size, occurrence.category, occurrence.artifact.name
                    );
                }
            }
            info!("{} duplicated symbols", duplicates.len());
        }

        Commands::Closure {
            artifact,
            reverse,
            types,
        } => {
            let store = open_store(&db_path, false)?;
            let artifact = analyzer::find_artifact(&store, &artifact)?;
            let direction = if reverse {
                Direction::Dependees
            } else {
                Direction::Dependencies
            };

            for reached in analyzer::closure(&store, artifact.id, direction, &types)? {
                println!("{:<10} {}", reached.artifact_type, reached.name);
            }
        }

        Commands::Stats => {
            let store = open_store(&db_path, false)?;
            let stats = store.stats()?;

            println!("Database:     {}", db_path.display());
            println!("Commands:     {}", stats.commands);
            println!("Artifacts:    {}", stats.artifacts);
            println!("Dependencies: {}", stats.dependencies);
            println!("Symbols:      {}", stats.symbols);
            println!("References:   {}", stats.references);
            for phase in [
                Phase::ImportCommands,
                Phase::ExtractDependencies,
                Phase::ExtractSymbols,
            ] {
                match store.phase_timestamp(phase)? {
                    Some(at) => println!("{:<22} {}", phase.as_str(), at.to_rfc3339()),
                    None => println!("{:<22} never", phase.as_str()),
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_filters() {
        let cli = Cli::try_parse_from([
            "linkmap",
            "duplicates",
            "--type",
            "object",
            "--exclude-category",
            "internal",
        ])
        .unwrap();
        match cli.command {
            Commands::Duplicates {
                types,
                exclude_categories,
                ..
            } => {
                assert_eq!(types, vec![ArtifactType::Object]);
                assert_eq!(exclude_categories, vec![Category::Internal]);
            }
            _ => panic!("expected duplicates"),
        }
    }

    #[test]
    fn test_rejects_unknown_type() {
        assert!(Cli::try_parse_from(["linkmap", "closure", "app", "--type", "dll"]).is_err());
    }

    #[test]
    fn test_open_store_requires_existing_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/graph.db");
        assert!(open_store(&path, false).is_err());
        assert!(open_store(&path, true).is_ok());
        assert!(path.exists());
    }
}
