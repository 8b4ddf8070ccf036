//! Path confinement for sync operations.
//!
//! Sync I/O is restricted to an explicit allowlist of files inside the
//! `.tangle/` directory. Every read, write, or rename that sync performs
//! must pass [`validate_sync_path`] first.
//!
//! The `TANGLE_JSONL` environment variable may point the export file outside
//! `.tangle/`; such paths are honored only when the caller passes the
//! explicit external opt-in. Paths touching `.git/` are rejected
//! unconditionally, opt-in or not.

use crate::error::{Result, TangleError};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File suffixes sync may touch inside `.tangle/`.
pub const ALLOWED_SUFFIXES: &[&str] = &[
    "db",        // SQLite database
    "db-wal",    // SQLite WAL
    "db-shm",    // SQLite shared memory
    "jsonl",     // JSONL export
    "jsonl.tmp", // Atomic write temp files
];

/// Exact file names sync may touch inside `.tangle/`.
pub const ALLOWED_NAMES: &[&str] = &[".manifest.json", "metadata.json"];

/// Outcome of path validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathCheck {
    Allowed,
    OutsideTangleDir { path: PathBuf, tangle_dir: PathBuf },
    DisallowedName { path: PathBuf },
    TraversalAttempt { path: PathBuf },
    SymlinkEscape { path: PathBuf, target: PathBuf },
    CanonicalizationFailed { path: PathBuf, error: String },
    GitPath { path: PathBuf },
}

impl PathCheck {
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    /// Human-readable rejection reason, `None` when allowed.
    #[must_use]
    pub fn rejection_reason(&self) -> Option<String> {
        match self {
            Self::Allowed => None,
            Self::OutsideTangleDir { path, tangle_dir } => Some(format!(
                "path '{}' is outside the tangle directory '{}'",
                path.display(),
                tangle_dir.display()
            )),
            Self::DisallowedName { path } => Some(format!(
                "path '{}' is not in the sync allowlist (allowed suffixes: {ALLOWED_SUFFIXES:?})",
                path.display()
            )),
            Self::TraversalAttempt { path } => Some(format!(
                "path '{}' contains traversal sequences",
                path.display()
            )),
            Self::SymlinkEscape { path, target } => Some(format!(
                "symlink '{}' points outside the tangle directory to '{}'",
                path.display(),
                target.display()
            )),
            Self::CanonicalizationFailed { path, error } => Some(format!(
                "failed to canonicalize path '{}': {error}",
                path.display()
            )),
            Self::GitPath { path } => Some(format!(
                "path '{}' targets git internals; sync never touches .git/",
                path.display()
            )),
        }
    }

    fn into_error(self) -> TangleError {
        let path = match &self {
            Self::Allowed => PathBuf::new(),
            Self::OutsideTangleDir { path, .. }
            | Self::DisallowedName { path }
            | Self::TraversalAttempt { path }
            | Self::SymlinkEscape { path, .. }
            | Self::CanonicalizationFailed { path, .. }
            | Self::GitPath { path } => path.clone(),
        };
        TangleError::PathConfinement {
            path,
            reason: self
                .rejection_reason()
                .unwrap_or_else(|| "path validation failed".to_string()),
        }
    }
}

/// Reject any path that touches `.git/`, following symlinks.
///
/// This check runs regardless of the external opt-in.
#[must_use]
pub fn check_no_git_path(path: &Path) -> PathCheck {
    fn has_git_component(candidate: &Path) -> bool {
        candidate.components().any(|component| {
            matches!(component, std::path::Component::Normal(name) if name == ".git")
        })
    }

    if has_git_component(path) {
        return PathCheck::GitPath {
            path: path.to_path_buf(),
        };
    }

    // Resolve symlinks so a link into .git is caught too
    if let Ok(canonical) = path.canonicalize() {
        if has_git_component(&canonical) {
            return PathCheck::GitPath { path: canonical };
        }
    } else if let Some(parent) = path.parent() {
        if let Ok(canonical_parent) = parent.canonicalize() {
            if has_git_component(&canonical_parent) {
                return PathCheck::GitPath {
                    path: canonical_parent,
                };
            }
        }
    }

    PathCheck::Allowed
}

/// Validate that a path is inside `tangle_dir` and on the allowlist.
///
/// New files that don't exist yet are checked via their parent directory so
/// an export can create `issues.jsonl` on first run.
pub fn validate_sync_path(path: &Path, tangle_dir: &Path) -> PathCheck {
    debug!(path = %path.display(), tangle_dir = %tangle_dir.display(), "Validating sync path");

    let git_check = check_no_git_path(path);
    if !git_check.is_allowed() {
        warn!(
            path = %path.display(),
            reason = git_check.rejection_reason().unwrap_or_default(),
            "Git path access blocked"
        );
        return git_check;
    }

    if path
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        let result = PathCheck::TraversalAttempt {
            path: path.to_path_buf(),
        };
        warn!(
            path = %path.display(),
            reason = result.rejection_reason().unwrap_or_default(),
            "Sync path rejected"
        );
        return result;
    }

    let canonical_tangle = match tangle_dir.canonicalize() {
        Ok(p) => p,
        Err(e) => {
            warn!(path = %tangle_dir.display(), error = %e, "Tangle directory canonicalization failed");
            return PathCheck::CanonicalizationFailed {
                path: tangle_dir.to_path_buf(),
                error: e.to_string(),
            };
        }
    };

    // Symlink escape: the path itself must not resolve outside the directory
    if path.is_symlink() {
        if let Ok(target) = std::fs::read_link(path) {
            let canonical_target = target.canonicalize().unwrap_or_else(|_| target.clone());
            if !canonical_target.starts_with(&canonical_tangle) {
                warn!(
                    path = %path.display(),
                    target = %target.display(),
                    "Symlink escape detected"
                );
                return PathCheck::SymlinkEscape {
                    path: path.to_path_buf(),
                    target: canonical_target,
                };
            }
        }
    }

    // Canonicalize the path itself, or its parent for files not yet created
    let effective_canonical = if let Ok(canonical) = path.canonicalize() {
        canonical
    } else if let Some(parent) = path.parent() {
        match parent.canonicalize() {
            Ok(canonical_parent) => canonical_parent.join(path.file_name().unwrap_or_default()),
            Err(_) if path.starts_with(tangle_dir) || path.starts_with(&canonical_tangle) => {
                // Parent not created yet; prefix check already confines it
                return check_allowed_name(path);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Path canonicalization failed");
                return PathCheck::CanonicalizationFailed {
                    path: path.to_path_buf(),
                    error: e.to_string(),
                };
            }
        }
    } else {
        path.to_path_buf()
    };

    if !effective_canonical.starts_with(&canonical_tangle) {
        let result = PathCheck::OutsideTangleDir {
            path: path.to_path_buf(),
            tangle_dir: canonical_tangle,
        };
        warn!(
            path = %path.display(),
            reason = result.rejection_reason().unwrap_or_default(),
            "Sync path rejected"
        );
        return result;
    }

    let name_check = check_allowed_name(path);
    if !name_check.is_allowed() {
        warn!(
            path = %path.display(),
            reason = name_check.rejection_reason().unwrap_or_default(),
            "Sync path rejected"
        );
        return name_check;
    }

    debug!(path = %path.display(), "Sync path validated");
    PathCheck::Allowed
}

fn check_allowed_name(path: &Path) -> PathCheck {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    if ALLOWED_NAMES.contains(&file_name.as_str()) {
        return PathCheck::Allowed;
    }

    for suffix in ALLOWED_SUFFIXES {
        if file_name.ends_with(&format!(".{suffix}")) {
            return PathCheck::Allowed;
        }
    }

    PathCheck::DisallowedName {
        path: path.to_path_buf(),
    }
}

/// Convenience wrapper: validate and convert a rejection into an error.
///
/// # Errors
///
/// Returns `PathConfinement` if the path is not allowed.
pub fn require_sync_path(path: &Path, tangle_dir: &Path) -> Result<()> {
    let check = validate_sync_path(path, tangle_dir);
    if check.is_allowed() {
        Ok(())
    } else {
        Err(check.into_error())
    }
}

/// Main entry point for sync path validation with the external opt-in.
///
/// Rules, in order:
/// 1. git paths are always rejected
/// 2. paths inside `.tangle/` go through the standard allowlist
/// 3. paths outside `.tangle/` are rejected unless `allow_external` is set,
///    and even then must be `.jsonl` (or `.jsonl.tmp`) without traversal
///
/// # Errors
///
/// Returns `PathConfinement` describing the violated rule.
pub fn require_sync_path_with_external(
    path: &Path,
    tangle_dir: &Path,
    allow_external: bool,
) -> Result<()> {
    let git_check = check_no_git_path(path);
    if !git_check.is_allowed() {
        return Err(git_check.into_error());
    }

    if !allow_external {
        return require_sync_path(path, tangle_dir);
    }

    tracing::info!(path = %path.display(), "Using external JSONL path (--allow-external-jsonl)");

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    if !file_name.ends_with(".jsonl") && !file_name.ends_with(".jsonl.tmp") {
        return Err(TangleError::PathConfinement {
            path: path.to_path_buf(),
            reason: "external paths must be .jsonl files".to_string(),
        });
    }

    if path
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return Err(TangleError::PathConfinement {
            path: path.to_path_buf(),
            reason: "path contains traversal sequences".to_string(),
        });
    }

    Ok(())
}

/// Validate a temp file used for an atomic write.
///
/// The temp file must share the target's parent directory (a rename across
/// filesystems is not atomic) and carry a `.tmp` extension.
///
/// # Errors
///
/// Returns `PathConfinement` if the temp path violates any rule.
pub fn require_temp_file_path(
    temp_path: &Path,
    target_path: &Path,
    tangle_dir: &Path,
    allow_external: bool,
) -> Result<()> {
    let git_check = check_no_git_path(temp_path);
    if !git_check.is_allowed() {
        return Err(git_check.into_error());
    }

    if temp_path.parent() != target_path.parent() {
        return Err(TangleError::PathConfinement {
            path: temp_path.to_path_buf(),
            reason: format!(
                "temp file must share the target's directory '{}'",
                target_path.parent().unwrap_or_else(|| Path::new("")).display()
            ),
        });
    }

    let has_tmp_extension = temp_path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("tmp"));
    if !has_tmp_extension {
        return Err(TangleError::PathConfinement {
            path: temp_path.to_path_buf(),
            reason: "temp file must use a .tmp extension".to_string(),
        });
    }

    if allow_external {
        return Ok(());
    }

    let canonical_tangle = tangle_dir
        .canonicalize()
        .unwrap_or_else(|_| tangle_dir.to_path_buf());
    if let Some(parent) = temp_path.parent() {
        let canonical_parent = parent
            .canonicalize()
            .unwrap_or_else(|_| parent.to_path_buf());
        if !canonical_parent.starts_with(&canonical_tangle) {
            return Err(TangleError::PathConfinement {
                path: temp_path.to_path_buf(),
                reason: format!(
                    "temp file is outside the tangle directory '{}'",
                    tangle_dir.display()
                ),
            });
        }
    }

    Ok(())
}
