//! Configuration file support for linkmap.
//!
//! All linkmap data is stored in a `.linkmap/` directory:
//! - `.linkmap/config.toml` - Configuration file
//! - `.linkmap/graph.db` - Build graph database
//! - `.linkmap/logs/` - Extraction logs
//!
//! Config discovery searches for `.linkmap/config.toml` starting from the current
//! directory and walking up to parent directories.

use std::path::{Path, PathBuf};

/// The linkmap data directory name.
pub const LINKMAP_DIR: &str = ".linkmap";
/// The config file name within the linkmap directory.
pub const CONFIG_FILE: &str = "config.toml";

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Main configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Graph database settings.
    pub store: StoreConfig,
    /// Extraction settings.
    pub extraction: ExtractionConfig,
    /// External tools and search paths.
    pub toolchain: ToolchainConfig,
}

/// Graph database configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path to the graph database.
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            // Relative to .linkmap/ directory
            path: PathBuf::from("graph.db"),
        }
    }
}

/// Extraction configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Maximum number of commands or artifacts processed at once.
    pub jobs: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self { jobs: 4 }
    }
}

/// Toolchain configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ToolchainConfig {
    /// Compiler driver asked for its default library directories.
    pub compiler: String,
    pub nm: String,
    pub ldd: String,
    /// Default library directories. Empty means ask `compiler`.
    pub library_dirs: Vec<PathBuf>,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            compiler: "cc".to_string(),
            nm: "nm".to_string(),
            ldd: "ldd".to_string(),
            library_dirs: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Find and load configuration from current or parent directories.
    pub fn find_and_load() -> Result<Option<(Self, PathBuf)>> {
        let current = std::env::current_dir()?;
        Self::find_and_load_from(&current)
    }

    /// Find and load configuration starting from a specific directory.
    ///
    /// Returns the config together with the `.linkmap` directory holding it.
    pub fn find_and_load_from(start: &Path) -> Result<Option<(Self, PathBuf)>> {
        let mut dir = start.to_path_buf();

        loop {
            let linkmap_dir = dir.join(LINKMAP_DIR);
            let config_path = linkmap_dir.join(CONFIG_FILE);
            if config_path.exists() {
                let config = Self::from_file(&config_path)?;
                return Ok(Some((config, linkmap_dir)));
            }

            if !dir.pop() {
                break;
            }
        }

        Ok(None)
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }

    /// Resolve the database path relative to the .linkmap directory.
    pub fn resolve_store_path(&self, linkmap_dir: Option<&Path>) -> PathBuf {
        if self.store.path.is_absolute() {
            self.store.path.clone()
        } else if let Some(dir) = linkmap_dir {
            dir.join(&self.store.path)
        } else {
            PathBuf::from(LINKMAP_DIR).join(&self.store.path)
        }
    }

    /// Check values that parse but cannot be used.
    pub fn validate(&self) -> Vec<ConfigValidationError> {
        let mut errors = Vec::new();

        if self.extraction.jobs == 0 {
            errors.push(ConfigValidationError {
                field: "extraction.jobs".to_string(),
                message: "Must be at least 1.".to_string(),
            });
        }

        for (field, tool) in [
            ("toolchain.compiler", &self.toolchain.compiler),
            ("toolchain.nm", &self.toolchain.nm),
            ("toolchain.ldd", &self.toolchain.ldd),
        ] {
            if tool.trim().is_empty() {
                errors.push(ConfigValidationError {
                    field: field.to_string(),
                    message: "Tool name cannot be empty.".to_string(),
                });
            }
        }

        errors
    }
}

/// Configuration validation error.
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ConfigValidationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.store.path, PathBuf::from("graph.db"));
        assert_eq!(config.extraction.jobs, 4);
        assert_eq!(config.toolchain.compiler, "cc");
        assert_eq!(config.toolchain.nm, "nm");
        assert_eq!(config.toolchain.ldd, "ldd");
        assert!(config.toolchain.library_dirs.is_empty());
    }

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
[extraction]
jobs = 16
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.extraction.jobs, 16);
        // Defaults should still apply
        assert_eq!(config.toolchain.nm, "nm");
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[store]
path = "/var/cache/build.db"

[extraction]
jobs = 8

[toolchain]
compiler = "x86_64-linux-gnu-gcc"
nm = "llvm-nm"
ldd = "/usr/bin/ldd"
library_dirs = ["/opt/sdk/lib", "/usr/lib"]
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.store.path, PathBuf::from("/var/cache/build.db"));
        assert_eq!(config.extraction.jobs, 8);
        assert_eq!(config.toolchain.compiler, "x86_64-linux-gnu-gcc");
        assert_eq!(config.toolchain.nm, "llvm-nm");
        assert_eq!(
            config.toolchain.library_dirs,
            vec![PathBuf::from("/opt/sdk/lib"), PathBuf::from("/usr/lib")]
        );
    }

    #[test]
    fn test_default_round_trips_through_toml() {
        let config = Config::default();
        let rendered = config.to_toml().unwrap();
        let parsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_resolve_store_path() {
        let config = Config::default();
        let linkmap_dir = PathBuf::from("/project/.linkmap");
        let resolved = config.resolve_store_path(Some(&linkmap_dir));
        assert_eq!(resolved, PathBuf::from("/project/.linkmap/graph.db"));
        assert_eq!(
            config.resolve_store_path(None),
            PathBuf::from(".linkmap/graph.db")
        );
    }

    #[test]
    fn test_find_and_load_walks_up() {
        let dir = tempfile::tempdir().unwrap();
        let linkmap_dir = dir.path().join(LINKMAP_DIR);
        std::fs::create_dir_all(&linkmap_dir).unwrap();
        std::fs::write(linkmap_dir.join(CONFIG_FILE), "[extraction]\njobs = 2\n").unwrap();
        let nested = dir.path().join("src/deep");
        std::fs::create_dir_all(&nested).unwrap();

        let (config, found) = Config::find_and_load_from(&nested).unwrap().unwrap();
        assert_eq!(config.extraction.jobs, 2);
        assert_eq!(found, linkmap_dir);
    }

    #[test]
    fn test_find_and_load_missing() {
        let dir = tempfile::tempdir().unwrap();
        // A config in some ancestor of the temp dir would be found too
        if let Some(found) = Config::find_and_load_from(dir.path()).unwrap() {
            assert!(!found.1.starts_with(dir.path()));
        }
    }

    #[test]
    fn test_validate() {
        let mut config = Config::default();
        assert!(config.validate().is_empty());

        config.extraction.jobs = 0;
        config.toolchain.nm = " ".to_string();
        let errors = config.validate();
        assert!(errors.iter().any(|e| e.field == "extraction.jobs"));
        assert!(errors.iter().any(|e| e.field == "toolchain.nm"));
    }
}
