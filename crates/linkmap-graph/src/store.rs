//! Graph storage using SQLite.
//!
//! Persists commands, artifacts, dependency edges, symbols and symbol
//! references as relational tables with unique constraints on their
//! natural identities, so every write is an idempotent upsert.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::artifacts::{Artifact, ArtifactType, CommandRecord, Dependency};
use crate::symbols::{Category, Symbol, SymbolReference};

pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS commands (
    id INTEGER PRIMARY KEY,
    directory TEXT NOT NULL,
    executable TEXT NOT NULL,
    args TEXT NOT NULL,
    UNIQUE (directory, executable, args)
);

CREATE TABLE IF NOT EXISTS artifacts (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    type TEXT NOT NULL,
    generating_command_id INTEGER REFERENCES commands(id) ON DELETE SET NULL
);

CREATE TABLE IF NOT EXISTS dependencies (
    dependee_id INTEGER NOT NULL REFERENCES artifacts(id) ON DELETE CASCADE,
    dependency_id INTEGER NOT NULL REFERENCES artifacts(id) ON DELETE CASCADE,
    PRIMARY KEY (dependee_id, dependency_id),
    CHECK (dependee_id <> dependency_id)
);

CREATE INDEX IF NOT EXISTS idx_dependencies_dependency
    ON dependencies(dependency_id);

CREATE TABLE IF NOT EXISTS symbols (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    demangled TEXT NOT NULL DEFAULT ''
);

-- Several references to one (artifact, symbol) pair are legal
CREATE TABLE IF NOT EXISTS symbol_references (
    id INTEGER PRIMARY KEY,
    artifact_id INTEGER NOT NULL REFERENCES artifacts(id) ON DELETE CASCADE,
    symbol_id INTEGER NOT NULL REFERENCES symbols(id),
    category TEXT NOT NULL CHECK (category IN ('undefined', 'external', 'internal')),
    type TEXT NOT NULL,
    size INTEGER
);

CREATE INDEX IF NOT EXISTS idx_symbol_references_artifact
    ON symbol_references(artifact_id, category);
CREATE INDEX IF NOT EXISTS idx_symbol_references_symbol
    ON symbol_references(symbol_id, category);

CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Error type for graph store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Artifact {name} is already a {existing} and cannot become a {requested}")]
    TypeConflict {
        name: String,
        existing: ArtifactType,
        requested: ArtifactType,
    },

    #[error("Artifact {name} is generated by command {existing} and cannot also be generated by command {requested}")]
    GeneratorConflict {
        name: String,
        existing: i64,
        requested: i64,
    },

    #[error("Artifact {0} cannot depend on itself")]
    SelfDependency(i64),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Pipeline phases whose completion time is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    ImportCommands,
    ExtractDependencies,
    ExtractSymbols,
}

impl Phase {
    /// Returns the metadata key for this phase.
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::ImportCommands => "import-commands",
            Phase::ExtractDependencies => "extract-dependencies",
            Phase::ExtractSymbols => "extract-symbols",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reference with a known, non-zero size, joined with its symbol and artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizedReference {
    pub symbol: Symbol,
    pub artifact: Artifact,
    pub category: Category,
    pub size: i64,
}

/// Row counts of the graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphStats {
    pub commands: i64,
    pub artifacts: i64,
    pub dependencies: i64,
    pub symbols: i64,
    pub references: i64,
}

/// Persistent storage for the build graph.
///
/// The store is the single writer: one owner issues every write, and
/// reads that decide a write happen through the same owner.
pub struct GraphStore {
    conn: Connection,
}

impl GraphStore {
    /// Open or create a graph database at the specified path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::init(conn)
    }

    /// Create an in-memory graph database.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn })
    }

    // Transactions

    /// Start a write transaction.
    pub fn begin(&self) -> Result<()> {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(())
    }

    pub fn commit(&self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    pub fn rollback(&self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    /// Returns true while a transaction is open.
    pub fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    // Commands

    /// Record a command, returning its id and whether it was new.
    pub fn insert_command(&self, directory: &str, executable: &str, args: &str) -> Result<(i64, bool)> {
        let inserted = self
            .conn
            .prepare_cached(
                "INSERT OR IGNORE INTO commands (directory, executable, args) VALUES (?1, ?2, ?3)",
            )?
            .execute(params![directory, executable, args])?;

        let id = self
            .conn
            .prepare_cached(
                "SELECT id FROM commands WHERE directory = ?1 AND executable = ?2 AND args = ?3",
            )?
            .query_row(params![directory, executable, args], |row| row.get(0))?;

        Ok((id, inserted > 0))
    }

    pub fn command(&self, id: i64) -> Result<Option<CommandRecord>> {
        let command = self
            .conn
            .prepare_cached("SELECT id, directory, executable, args FROM commands WHERE id = ?1")?
            .query_row(params![id], command_from_row)
            .optional()?;
        Ok(command)
    }

    /// All commands in insertion order.
    pub fn commands(&self) -> Result<Vec<CommandRecord>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT id, directory, executable, args FROM commands ORDER BY id")?;
        let rows = stmt.query_map([], command_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Delete every command. Artifacts keep their rows but lose their generator.
    pub fn truncate_commands(&self) -> Result<usize> {
        Ok(self.conn.execute("DELETE FROM commands", [])?)
    }

    // Artifacts

    /// Create an artifact or reconcile it with an existing row of the same name.
    ///
    /// A `library` artifact may be narrowed to `static` or `shared`, and an
    /// artifact without a generator may gain one. Any other disagreement is
    /// a conflict.
    pub fn upsert_artifact(
        &self,
        name: &str,
        artifact_type: ArtifactType,
        generating_command_id: Option<i64>,
    ) -> Result<i64> {
        let Some(existing) = self.artifact_by_name(name)? else {
            self.conn
                .prepare_cached(
                    "INSERT INTO artifacts (name, type, generating_command_id) VALUES (?1, ?2, ?3)",
                )?
                .execute(params![name, artifact_type, generating_command_id])?;
            return Ok(self.conn.last_insert_rowid());
        };

        if existing.artifact_type != artifact_type {
            if existing.artifact_type.can_refine_to(artifact_type) {
                self.conn
                    .prepare_cached("UPDATE artifacts SET type = ?1 WHERE id = ?2")?
                    .execute(params![artifact_type, existing.id])?;
            } else if !(artifact_type == ArtifactType::Library && existing.artifact_type.is_library())
            {
                return Err(StoreError::TypeConflict {
                    name: name.to_string(),
                    existing: existing.artifact_type,
                    requested: artifact_type,
                });
            }
        }

        match (existing.generating_command_id, generating_command_id) {
            (Some(current), Some(requested)) if current != requested => {
                return Err(StoreError::GeneratorConflict {
                    name: name.to_string(),
                    existing: current,
                    requested,
                });
            }
            (None, Some(requested)) => {
                self.conn
                    .prepare_cached("UPDATE artifacts SET generating_command_id = ?1 WHERE id = ?2")?
                    .execute(params![requested, existing.id])?;
            }
            _ => {}
        }

        Ok(existing.id)
    }

    pub fn artifact(&self, id: i64) -> Result<Option<Artifact>> {
        let artifact = self
            .conn
            .prepare_cached(
                "SELECT id, name, type, generating_command_id FROM artifacts WHERE id = ?1",
            )?
            .query_row(params![id], artifact_from_row)
            .optional()?;
        Ok(artifact)
    }

    pub fn artifact_by_name(&self, name: &str) -> Result<Option<Artifact>> {
        let artifact = self
            .conn
            .prepare_cached(
                "SELECT id, name, type, generating_command_id FROM artifacts WHERE name = ?1",
            )?
            .query_row(params![name], artifact_from_row)
            .optional()?;
        Ok(artifact)
    }

    pub fn artifacts(&self) -> Result<Vec<Artifact>> {
        self.query_artifacts(
            "SELECT id, name, type, generating_command_id FROM artifacts ORDER BY id",
            [],
        )
    }

    /// Artifacts that carry a symbol table (everything but sources).
    pub fn extractable_artifacts(&self) -> Result<Vec<Artifact>> {
        self.query_artifacts(
            "SELECT id, name, type, generating_command_id FROM artifacts
             WHERE type <> 'source' ORDER BY id",
            [],
        )
    }

    fn query_artifacts<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<Artifact>> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let rows = stmt.query_map(params, artifact_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // Dependencies

    /// Record that `dependee_id` needs `dependency_id`. Idempotent.
    pub fn add_dependency(&self, dependee_id: i64, dependency_id: i64) -> Result<()> {
        if dependee_id == dependency_id {
            return Err(StoreError::SelfDependency(dependee_id));
        }
        self.conn
            .prepare_cached(
                "INSERT OR IGNORE INTO dependencies (dependee_id, dependency_id) VALUES (?1, ?2)",
            )?
            .execute(params![dependee_id, dependency_id])?;
        Ok(())
    }

    /// Remove an edge, returning true if it existed.
    pub fn remove_dependency(&self, dependee_id: i64, dependency_id: i64) -> Result<bool> {
        let removed = self
            .conn
            .prepare_cached("DELETE FROM dependencies WHERE dependee_id = ?1 AND dependency_id = ?2")?
            .execute(params![dependee_id, dependency_id])?;
        Ok(removed > 0)
    }

    /// Direct dependencies of an artifact.
    pub fn dependencies_of(&self, artifact_id: i64) -> Result<Vec<Artifact>> {
        self.query_artifacts(
            "SELECT a.id, a.name, a.type, a.generating_command_id
             FROM dependencies d JOIN artifacts a ON a.id = d.dependency_id
             WHERE d.dependee_id = ?1 ORDER BY a.id",
            params![artifact_id],
        )
    }

    /// Direct dependees of an artifact.
    pub fn dependees_of(&self, artifact_id: i64) -> Result<Vec<Artifact>> {
        self.query_artifacts(
            "SELECT a.id, a.name, a.type, a.generating_command_id
             FROM dependencies d JOIN artifacts a ON a.id = d.dependee_id
             WHERE d.dependency_id = ?1 ORDER BY a.id",
            params![artifact_id],
        )
    }

    pub fn edges(&self) -> Result<Vec<Dependency>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT dependee_id, dependency_id FROM dependencies ORDER BY dependee_id, dependency_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Dependency {
                dependee_id: row.get(0)?,
                dependency_id: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // Symbols

    /// Look up a symbol by raw name, creating it on first sight.
    pub fn symbol_id_or_insert(&self, name: &str, demangled: &str) -> Result<i64> {
        self.conn
            .prepare_cached("INSERT OR IGNORE INTO symbols (name, demangled) VALUES (?1, ?2)")?
            .execute(params![name, demangled])?;
        let id = self
            .conn
            .prepare_cached("SELECT id FROM symbols WHERE name = ?1")?
            .query_row(params![name], |row| row.get(0))?;
        Ok(id)
    }

    pub fn symbol(&self, id: i64) -> Result<Option<Symbol>> {
        let symbol = self
            .conn
            .prepare_cached("SELECT id, name, demangled FROM symbols WHERE id = ?1")?
            .query_row(params![id], symbol_from_row)
            .optional()?;
        Ok(symbol)
    }

    pub fn symbol_by_name(&self, name: &str) -> Result<Option<Symbol>> {
        let symbol = self
            .conn
            .prepare_cached("SELECT id, name, demangled FROM symbols WHERE name = ?1")?
            .query_row(params![name], symbol_from_row)
            .optional()?;
        Ok(symbol)
    }

    // Symbol references

    pub fn insert_reference(&self, reference: &SymbolReference) -> Result<()> {
        self.conn
            .prepare_cached(
                "INSERT INTO symbol_references (artifact_id, symbol_id, category, type, size)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?
            .execute(params![
                reference.artifact_id,
                reference.symbol_id,
                reference.category,
                reference.type_code.to_string(),
                reference.size
            ])?;
        Ok(())
    }

    /// References of one artifact in one category.
    pub fn references(&self, artifact_id: i64, category: Category) -> Result<Vec<SymbolReference>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT artifact_id, symbol_id, category, type, size FROM symbol_references
             WHERE artifact_id = ?1 AND category = ?2 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![artifact_id, category], reference_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Artifacts that export `symbol_id` as `external`.
    pub fn exporters(&self, symbol_id: i64) -> Result<Vec<Artifact>> {
        self.query_artifacts(
            "SELECT DISTINCT a.id, a.name, a.type, a.generating_command_id
             FROM symbol_references r JOIN artifacts a ON a.id = r.artifact_id
             WHERE r.symbol_id = ?1 AND r.category = 'external' ORDER BY a.id",
            params![symbol_id],
        )
    }

    /// Every reference with a non-zero size.
    pub fn sized_references(&self) -> Result<Vec<SizedReference>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT s.id, s.name, s.demangled, a.id, a.name, a.type, a.generating_command_id,
                    r.category, r.size
             FROM symbol_references r
             JOIN symbols s ON s.id = r.symbol_id
             JOIN artifacts a ON a.id = r.artifact_id
             WHERE r.size IS NOT NULL AND r.size > 0
             ORDER BY r.id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(SizedReference {
                symbol: Symbol {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    demangled: row.get(2)?,
                },
                artifact: Artifact {
                    id: row.get(3)?,
                    name: row.get(4)?,
                    artifact_type: row.get(5)?,
                    generating_command_id: row.get(6)?,
                },
                category: row.get(7)?,
                size: row.get(8)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Drop the references of one artifact before re-extraction.
    pub fn delete_references_for(&self, artifact_id: i64) -> Result<usize> {
        Ok(self
            .conn
            .prepare_cached("DELETE FROM symbol_references WHERE artifact_id = ?1")?
            .execute(params![artifact_id])?)
    }

    pub fn clear_references(&self) -> Result<usize> {
        Ok(self.conn.execute("DELETE FROM symbol_references", [])?)
    }

    // Metadata

    /// When `phase` last completed, if ever.
    pub fn phase_timestamp(&self, phase: Phase) -> Result<Option<DateTime<Utc>>> {
        let value: Option<String> = self
            .conn
            .prepare_cached("SELECT value FROM metadata WHERE key = ?1")?
            .query_row(params![phase.as_str()], |row| row.get(0))
            .optional()?;

        value
            .map(|v| {
                DateTime::parse_from_rfc3339(&v)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|e| StoreError::InvalidData(format!("timestamp {v} for {phase}: {e}")))
            })
            .transpose()
    }

    pub fn set_phase_timestamp(&self, phase: Phase, time: DateTime<Utc>) -> Result<()> {
        self.conn
            .prepare_cached("INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)")?
            .execute(params![
                phase.as_str(),
                time.to_rfc3339_opts(SecondsFormat::Nanos, true)
            ])?;
        Ok(())
    }

    /// Get graph statistics.
    pub fn stats(&self) -> Result<GraphStats> {
        let count = |table: &str| -> Result<i64> {
            Ok(self
                .conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?)
        };
        Ok(GraphStats {
            commands: count("commands")?,
            artifacts: count("artifacts")?,
            dependencies: count("dependencies")?,
            symbols: count("symbols")?,
            references: count("symbol_references")?,
        })
    }
}

impl ToSql for ArtifactType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for ArtifactType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        ArtifactType::parse(s)
            .ok_or_else(|| FromSqlError::Other(format!("unknown artifact type {s}").into()))
    }
}

impl ToSql for Category {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Category {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        Category::parse(s)
            .ok_or_else(|| FromSqlError::Other(format!("unknown symbol category {s}").into()))
    }
}

fn command_from_row(row: &Row<'_>) -> rusqlite::Result<CommandRecord> {
    Ok(CommandRecord {
        id: row.get(0)?,
        directory: row.get(1)?,
        executable: row.get(2)?,
        args: row.get(3)?,
    })
}

fn artifact_from_row(row: &Row<'_>) -> rusqlite::Result<Artifact> {
    Ok(Artifact {
        id: row.get(0)?,
        name: row.get(1)?,
        artifact_type: row.get(2)?,
        generating_command_id: row.get(3)?,
    })
}

fn symbol_from_row(row: &Row<'_>) -> rusqlite::Result<Symbol> {
    Ok(Symbol {
        id: row.get(0)?,
        name: row.get(1)?,
        demangled: row.get(2)?,
    })
}

fn reference_from_row(row: &Row<'_>) -> rusqlite::Result<SymbolReference> {
    let type_code: String = row.get(3)?;
    Ok(SymbolReference {
        artifact_id: row.get(0)?,
        symbol_id: row.get(1)?,
        category: row.get(2)?,
        type_code: type_code.chars().next().unwrap_or('?'),
        size: row.get(4)?,
    })
}
