//! Configuration management for `tangle`.
//!
//! Configuration sources and precedence (highest wins):
//! 1. CLI overrides (`--db`, `--actor`, `--lock-timeout`)
//! 2. Environment variables (`TANGLE_DIR`, `TANGLE_JSONL`)
//! 3. Workspace metadata (.tangle/metadata.json)
//! 4. DB config table
//! 5. Defaults

use crate::error::{Result, TangleError};
use crate::storage::SqliteStorage;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Default database filename used when metadata is missing.
const DEFAULT_DB_FILENAME: &str = "tangle.db";
/// Default JSONL filename used when metadata is missing.
const DEFAULT_JSONL_FILENAME: &str = "issues.jsonl";
/// Name of the metadata directory created by `tg init`.
pub const TANGLE_DIR_NAME: &str = ".tangle";
/// Default issue-ID prefix.
pub const DEFAULT_PREFIX: &str = "tg";
/// Default tombstone retention window in days.
pub const DEFAULT_RETENTION_DAYS: u64 = 30;
/// Default SQLite busy timeout in milliseconds.
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 30000;

/// Startup metadata describing DB + JSONL paths and workspace settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Metadata {
    pub database: String,
    pub jsonl_export: String,
    #[serde(default = "default_prefix")]
    pub issue_prefix: String,
    #[serde(default = "default_retention")]
    pub deletions_retention_days: Option<u64>,
}

fn default_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

const fn default_retention() -> Option<u64> {
    Some(DEFAULT_RETENTION_DAYS)
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            database: DEFAULT_DB_FILENAME.to_string(),
            jsonl_export: DEFAULT_JSONL_FILENAME.to_string(),
            issue_prefix: DEFAULT_PREFIX.to_string(),
            deletions_retention_days: Some(DEFAULT_RETENTION_DAYS),
        }
    }
}

impl Metadata {
    /// Load metadata.json from the tangle directory.
    ///
    /// A missing file yields defaults; blank path fields are repaired.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(tangle_dir: &Path) -> Result<Self> {
        let path = tangle_dir.join("metadata.json");
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(&path)?;
        let mut metadata: Self = serde_json::from_str(&contents)?;

        if metadata.database.trim().is_empty() {
            metadata.database = DEFAULT_DB_FILENAME.to_string();
        }
        if metadata.jsonl_export.trim().is_empty() {
            metadata.jsonl_export = DEFAULT_JSONL_FILENAME.to_string();
        }
        if metadata.issue_prefix.trim().is_empty() {
            metadata.issue_prefix = DEFAULT_PREFIX.to_string();
        }

        Ok(metadata)
    }

    /// Write metadata.json into the tangle directory.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save(&self, tangle_dir: &Path) -> Result<()> {
        let path = tangle_dir.join("metadata.json");
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(&path, contents)?;
        Ok(())
    }
}

/// Resolved paths for this workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigPaths {
    pub tangle_dir: PathBuf,
    pub db_path: PathBuf,
    pub jsonl_path: PathBuf,
    /// The JSONL path came from `TANGLE_JSONL`; external paths from this
    /// source still require `--allow-external-jsonl`.
    pub jsonl_from_env: bool,
    pub metadata: Metadata,
}

impl ConfigPaths {
    /// Resolve database + JSONL paths using metadata and environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if metadata cannot be read.
    pub fn resolve(tangle_dir: &Path, db_override: Option<&PathBuf>) -> Result<Self> {
        let metadata = Metadata::load(tangle_dir)?;
        let db_path = resolve_db_path(tangle_dir, &metadata, db_override);
        let (jsonl_path, jsonl_from_env) = resolve_jsonl_path(tangle_dir, &metadata);

        debug!(
            tangle_dir = %tangle_dir.display(),
            db_path = %db_path.display(),
            jsonl_path = %jsonl_path.display(),
            jsonl_from_env,
            "Resolved workspace paths"
        );

        Ok(Self {
            tangle_dir: tangle_dir.to_path_buf(),
            db_path,
            jsonl_path,
            jsonl_from_env,
            metadata,
        })
    }

    /// Whether the resolved JSONL path lives outside the tangle directory.
    #[must_use]
    pub fn jsonl_is_external(&self) -> bool {
        let canonical_tangle = self
            .tangle_dir
            .canonicalize()
            .unwrap_or_else(|_| self.tangle_dir.clone());
        !self.jsonl_path.starts_with(&self.tangle_dir)
            && !self.jsonl_path.starts_with(canonical_tangle)
    }
}

/// Discover the active `.tangle` directory.
///
/// Honors `TANGLE_DIR` when set, otherwise walks up from `start` (or CWD).
///
/// # Errors
///
/// Returns `NotInitialized` if no tangle directory is found.
pub fn discover_tangle_dir(start: Option<&Path>) -> Result<PathBuf> {
    if let Ok(value) = env::var("TANGLE_DIR") {
        if !value.trim().is_empty() {
            let path = PathBuf::from(value);
            if path.is_dir() {
                return Ok(path);
            }
            warn!(path = %path.display(), "TANGLE_DIR is set but is not a directory");
        }
    }

    let mut current = match start {
        Some(path) => path.to_path_buf(),
        None => env::current_dir()?,
    };

    loop {
        let candidate = current.join(TANGLE_DIR_NAME);
        if candidate.is_dir() {
            return Ok(candidate);
        }

        if !current.pop() {
            break;
        }
    }

    Err(TangleError::NotInitialized)
}

/// Open storage using resolved config paths, returning the storage and the
/// paths used.
///
/// # Errors
///
/// Returns an error if metadata cannot be read or the database cannot be
/// opened.
pub fn open_storage(
    tangle_dir: &Path,
    db_override: Option<&PathBuf>,
    lock_timeout: Option<u64>,
) -> Result<(SqliteStorage, ConfigPaths)> {
    let paths = ConfigPaths::resolve(tangle_dir, db_override)?;
    if !paths.db_path.exists() {
        return Err(TangleError::DatabaseNotFound {
            path: paths.db_path.clone(),
        });
    }
    let timeout = lock_timeout.unwrap_or(DEFAULT_LOCK_TIMEOUT_MS);
    let storage = SqliteStorage::open_with_timeout(&paths.db_path, Some(timeout))?;
    Ok((storage, paths))
}

/// Resolve the issue-ID prefix: DB config table first, then metadata.
///
/// # Errors
///
/// Returns an error if the config table lookup fails.
pub fn resolve_prefix(storage: &SqliteStorage, metadata: &Metadata) -> Result<String> {
    if let Some(prefix) = storage.get_config("issue_prefix")? {
        let trimmed = prefix.trim();
        if !trimmed.is_empty() {
            return Ok(trimmed.to_string());
        }
    }
    Ok(metadata.issue_prefix.clone())
}

/// Resolve the actor for mutation attribution.
///
/// `--actor` wins, then `TANGLE_ACTOR`, then `USER`, then a safe default.
#[must_use]
pub fn resolve_actor(cli_actor: Option<&str>) -> String {
    cli_actor
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .or_else(|| {
            env::var("TANGLE_ACTOR")
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        })
        .or_else(|| {
            env::var("USER")
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

fn resolve_db_path(
    tangle_dir: &Path,
    metadata: &Metadata,
    db_override: Option<&PathBuf>,
) -> PathBuf {
    if let Some(override_path) = db_override {
        return override_path.clone();
    }

    let candidate = PathBuf::from(&metadata.database);
    if candidate.is_absolute() {
        candidate
    } else {
        tangle_dir.join(candidate)
    }
}

/// Resolve the JSONL path, returning whether it came from `TANGLE_JSONL`.
fn resolve_jsonl_path(tangle_dir: &Path, metadata: &Metadata) -> (PathBuf, bool) {
    if let Ok(env_path) = env::var("TANGLE_JSONL") {
        if !env_path.trim().is_empty() {
            return (PathBuf::from(env_path), true);
        }
    }

    let candidate = PathBuf::from(&metadata.jsonl_export);
    let resolved = if candidate.is_absolute() {
        candidate
    } else {
        tangle_dir.join(candidate)
    };
    (resolved, false)
}

/// Initialize a new workspace: create `.tangle/`, metadata.json, and the
/// database, and persist the issue prefix in the config table.
///
/// # Errors
///
/// Returns `AlreadyInitialized` if the directory exists (unless `force`),
/// or an error if any file cannot be created.
pub fn init_workspace(parent: &Path, prefix: &str, force: bool) -> Result<ConfigPaths> {
    let tangle_dir = parent.join(TANGLE_DIR_NAME);

    if tangle_dir.join("metadata.json").exists() && !force {
        return Err(TangleError::AlreadyInitialized { path: tangle_dir });
    }

    fs::create_dir_all(&tangle_dir)?;

    let metadata = Metadata {
        issue_prefix: prefix.to_string(),
        ..Default::default()
    };
    metadata.save(&tangle_dir)?;

    let paths = ConfigPaths::resolve(&tangle_dir, None)?;
    let mut storage = SqliteStorage::open(&paths.db_path)?;
    storage.set_config("issue_prefix", prefix)?;

    Ok(paths)
}
