//! Artifact and command types for the build graph.
//!
//! These are the row types of the graph store: recorded build invocations
//! ([`CommandRecord`]), the files they consume and produce ([`Artifact`]),
//! and the "needs" edges between those files ([`Dependency`]).

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Matches shared objects with optional numeric version suffixes (`libz.so.1.2.13`).
static SHARED_OBJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.so(\.[0-9]+)*$").expect("valid shared object pattern"));

/// The kind of file an artifact represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    /// A translation unit or any other non-binary input
    Source,
    /// A relocatable object (`.o`)
    Object,
    /// A static archive (`.a`)
    Static,
    /// A shared object (`.so`, `.so.N`)
    Shared,
    /// A library whose concrete kind is not known yet
    Library,
    /// A linked program
    Executable,
}

impl ArtifactType {
    /// All artifact types, in declaration order.
    pub const ALL: [ArtifactType; 6] = [
        ArtifactType::Source,
        ArtifactType::Object,
        ArtifactType::Static,
        ArtifactType::Shared,
        ArtifactType::Library,
        ArtifactType::Executable,
    ];

    /// Returns the string representation stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactType::Source => "source",
            ArtifactType::Object => "object",
            ArtifactType::Static => "static",
            ArtifactType::Shared => "shared",
            ArtifactType::Library => "library",
            ArtifactType::Executable => "executable",
        }
    }

    /// Parse the database representation.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }

    /// Classify a path produced by a command.
    ///
    /// Unrecognized extensions are executables.
    pub fn classify_output(path: impl AsRef<Path>) -> Self {
        Self::classify(path.as_ref()).unwrap_or(ArtifactType::Executable)
    }

    /// Classify a path consumed by a command.
    ///
    /// Unrecognized extensions are sources.
    pub fn classify_input(path: impl AsRef<Path>) -> Self {
        Self::classify(path.as_ref()).unwrap_or(ArtifactType::Source)
    }

    fn classify(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy();
        if name.ends_with(".o") {
            Some(ArtifactType::Object)
        } else if name.ends_with(".a") {
            Some(ArtifactType::Static)
        } else if SHARED_OBJECT.is_match(&name) {
            Some(ArtifactType::Shared)
        } else {
            None
        }
    }

    /// Returns true if symbols can be extracted from artifacts of this type.
    pub fn has_symbols(&self) -> bool {
        !matches!(self, ArtifactType::Source)
    }

    /// Returns true if this type names some kind of library.
    pub fn is_library(&self) -> bool {
        matches!(
            self,
            ArtifactType::Static | ArtifactType::Shared | ArtifactType::Library
        )
    }

    /// Returns true if an artifact stored with this type may be re-typed as `other`.
    ///
    /// Only the placeholder `library` type can be narrowed.
    pub fn can_refine_to(&self, other: ArtifactType) -> bool {
        *self == other
            || (*self == ArtifactType::Library
                && matches!(other, ArtifactType::Static | ArtifactType::Shared))
    }
}

impl std::fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// A recorded build tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub id: i64,
    /// Working directory of the invocation
    pub directory: String,
    /// The executable as written in the invocation
    pub executable: String,
    /// Everything after the executable, shell-quoted for replay
    pub args: String,
}

impl CommandRecord {
    /// Reconstruct the full invocation line, without the directory.
    pub fn command_line(&self) -> String {
        if self.args.is_empty() {
            self.executable.clone()
        } else {
            format!("{} {}", self.executable, self.args)
        }
    }
}

/// A file participating in the build graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: i64,
    /// Canonical absolute path
    pub name: String,
    #[serde(rename = "type")]
    pub artifact_type: ArtifactType,
    /// The command whose execution produced this artifact
    pub generating_command_id: Option<i64>,
}

/// A directed "dependee needs dependency" edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dependency {
    pub dependee_id: i64,
    pub dependency_id: i64,
}
