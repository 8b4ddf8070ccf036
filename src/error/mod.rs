//! Error types and handling for `tangle`.
//!
//! # Design
//!
//! - `thiserror`-derived taxonomy with structured variants for common cases
//! - Machine-readable codes and exit-code bands in [`structured`]
//! - Recovery hints for user-facing errors, including the exact override
//!   flag for overridable safety guards

mod structured;

pub use structured::{ErrorCode, StructuredError};

use std::path::PathBuf;
use thiserror::Error;

/// Primary error type for `tangle` operations.
#[derive(Error, Debug)]
pub enum TangleError {
    // === Storage Errors ===
    /// Database file not found at the specified path.
    #[error("Database not found at '{path}'")]
    DatabaseNotFound { path: PathBuf },

    /// Database is locked by another process.
    #[error("Database is locked: {path}")]
    DatabaseLocked { path: PathBuf },

    /// `SQLite` database error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    // === Issue Errors ===
    /// Issue with the specified ID was not found.
    #[error("Issue not found: {id}")]
    IssueNotFound { id: String },

    /// Attempted to create an issue with an ID that already exists.
    #[error("Issue ID collision: {id}")]
    IdCollision { id: String },

    /// Issue ID format is invalid.
    #[error("Invalid issue ID format: {id}")]
    InvalidId { id: String },

    // === Validation Errors ===
    /// Field validation failed.
    #[error("Validation failed: {field}: {reason}")]
    Validation { field: String, reason: String },

    /// Invalid status value.
    #[error("Invalid status: {status}")]
    InvalidStatus { status: String },

    /// Invalid issue type value.
    #[error("Invalid issue type: {issue_type}")]
    InvalidType { issue_type: String },

    /// Priority out of valid range (0-4).
    #[error("Priority must be 0-4, got: {priority}")]
    InvalidPriority { priority: i32 },

    // === Dependency Errors ===
    /// Dependency target not found.
    #[error("Dependency target not found: {id}")]
    DependencyNotFound { id: String },

    /// Self-referential dependency.
    #[error("Issue cannot depend on itself: {id}")]
    SelfDependency { id: String },

    /// Duplicate dependency.
    #[error("Dependency already exists: {from} -> {to}")]
    DuplicateDependency { from: String, to: String },

    // === Guard Errors ===
    /// A safety guard blocked the operation.
    ///
    /// `override_flag` names the flag that bypasses the guard, or `None`
    /// for hard guards that cannot be bypassed.
    #[error("{guard} guard blocked the operation: {details}")]
    GuardBlocked {
        guard: &'static str,
        details: String,
        override_flag: Option<&'static str>,
    },

    /// Unresolved merge conflict markers found in the JSONL file.
    #[error(
        "Conflict markers detected in '{path}': {count} marker(s), first at line {first_line}"
    )]
    ConflictMarkers {
        path: PathBuf,
        count: usize,
        first_line: usize,
    },

    // === Sync/JSONL Errors ===
    /// Failed to parse a line in the JSONL file.
    #[error("JSONL parse error at line {line}: {reason}")]
    JsonlParse { line: usize, reason: String },

    /// Issue prefix doesn't match the workspace prefix.
    #[error("Prefix mismatch: expected '{expected}', found '{found}'")]
    PrefixMismatch { expected: String, found: String },

    /// Export/import path escapes the metadata directory.
    #[error("Path confinement violation for '{path}': {reason}")]
    PathConfinement { path: PathBuf, reason: String },

    // === Configuration Errors ===
    /// Configuration file error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Workspace not initialized.
    #[error("tangle not initialized: run 'tg init' first")]
    NotInitialized,

    /// Already initialized.
    #[error("Already initialized at '{path}'")]
    AlreadyInitialized { path: PathBuf },

    // === I/O Errors ===
    /// File system I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TangleError {
    /// Can the user fix this without code changes?
    #[must_use]
    pub const fn is_user_recoverable(&self) -> bool {
        matches!(
            self,
            Self::DatabaseNotFound { .. }
                | Self::NotInitialized
                | Self::IssueNotFound { .. }
                | Self::Validation { .. }
                | Self::InvalidStatus { .. }
                | Self::InvalidType { .. }
                | Self::InvalidPriority { .. }
                | Self::PrefixMismatch { .. }
                | Self::GuardBlocked { .. }
        )
    }

    /// Human-friendly suggestion for fixing this error.
    #[must_use]
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::NotInitialized => Some("Run: tg init".to_string()),
            Self::DatabaseNotFound { .. } => Some("Check path or run: tg init".to_string()),
            Self::AlreadyInitialized { .. } => Some("Use --force to reinitialize".to_string()),
            Self::InvalidPriority { .. } => {
                Some("Use a priority between 0 (critical) and 4 (backlog)".to_string())
            }
            Self::InvalidStatus { .. } => Some(
                "Valid statuses: open, in_progress, blocked, deferred, closed, hooked".to_string(),
            ),
            Self::InvalidType { .. } => {
                Some("Valid types: task, bug, feature, epic, chore, docs, question".to_string())
            }
            Self::SelfDependency { .. } => Some("An issue cannot depend on itself".to_string()),
            Self::GuardBlocked { override_flag, .. } => override_flag.map_or_else(
                || Some("This guard cannot be overridden".to_string()),
                |flag| Some(format!("Re-run with {flag} to override")),
            ),
            Self::ConflictMarkers { .. } => Some(
                "Resolve the merge conflict in the JSONL file first; there is no override"
                    .to_string(),
            ),
            _ => None,
        }
    }

    /// Create a validation error for a specific field.
    #[must_use]
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a guard-blocked error for a named guard.
    #[must_use]
    pub fn guard_blocked(
        guard: &'static str,
        details: impl Into<String>,
        override_flag: Option<&'static str>,
    ) -> Self {
        Self::GuardBlocked {
            guard,
            details: details.into(),
            override_flag,
        }
    }

    /// Get the process exit code for this error.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        StructuredError::from_error(self).code.exit_code()
    }
}

/// Result type using `TangleError`.
pub type Result<T> = std::result::Result<T, TangleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TangleError::IssueNotFound {
            id: "tg-abc123".to_string(),
        };
        assert_eq!(err.to_string(), "Issue not found: tg-abc123");
    }

    #[test]
    fn test_validation_error() {
        let err = TangleError::validation("title", "cannot be empty");
        assert_eq!(err.to_string(), "Validation failed: title: cannot be empty");
    }

    #[test]
    fn test_guard_suggestion_names_override_flag() {
        let err = TangleError::guard_blocked("empty-db", "0 issues vs 3 in file", Some("--force"));
        assert_eq!(
            err.suggestion().as_deref(),
            Some("Re-run with --force to override")
        );
    }

    #[test]
    fn test_hard_guard_has_no_override() {
        let err = TangleError::ConflictMarkers {
            path: PathBuf::from("issues.jsonl"),
            count: 2,
            first_line: 4,
        };
        assert!(err.suggestion().is_some_and(|s| s.contains("no override")));
    }

    #[test]
    fn test_user_recoverable() {
        assert!(TangleError::NotInitialized.is_user_recoverable());
        let not_recoverable = TangleError::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(1),
            None,
        ));
        assert!(!not_recoverable.is_user_recoverable());
    }
}
