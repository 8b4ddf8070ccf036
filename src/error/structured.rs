//! Structured error output for machine consumers.
//!
//! Provides machine-parseable error information with:
//! - Stable error codes for categorization
//! - Exit-code bands grouped by category
//! - Hints for self-correction, including the exact override flag for
//!   overridable guards
//! - Retryability flags

use crate::error::TangleError;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Machine-readable error codes.
///
/// These codes are stable and can be used for programmatic error handling.
/// Format: `SCREAMING_SNAKE_CASE` for easy parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    // === Database Errors (exit code 2) ===
    /// Database file not found
    DatabaseNotFound,
    /// Database is locked by another process
    DatabaseLocked,
    /// Database operation failed
    DatabaseError,

    // === Issue Errors (exit code 3) ===
    /// Issue with specified ID not found
    IssueNotFound,
    /// Issue ID collision on create
    IdCollision,
    /// Invalid issue ID format
    InvalidId,

    // === Validation Errors (exit code 4) ===
    /// Field validation failed
    ValidationFailed,
    /// Invalid status value
    InvalidStatus,
    /// Invalid issue type value
    InvalidType,
    /// Priority out of range (0-4)
    InvalidPriority,
    /// Dependency target not found
    DependencyNotFound,
    /// Issue cannot depend on itself
    SelfDependency,
    /// Duplicate dependency
    DuplicateDependency,

    // === Guard Errors (exit code 5) ===
    /// A safety guard blocked the operation
    GuardBlocked,
    /// Conflict markers in JSONL (hard guard, no override)
    ConflictMarkers,

    // === Sync/JSONL Errors (exit code 6) ===
    /// JSONL parse error
    JsonlParseError,
    /// Prefix mismatch during import
    PrefixMismatch,
    /// Path confinement violation
    PathConfinement,

    // === Config Errors (exit code 7) ===
    /// Configuration error
    ConfigError,
    /// Workspace not initialized
    NotInitialized,
    /// Already initialized
    AlreadyInitialized,

    // === I/O Errors (exit code 8) ===
    /// File I/O error
    IoError,
    /// JSON serialization error
    JsonError,

    // === Internal Errors (exit code 1) ===
    /// Unexpected internal error
    InternalError,
}

impl ErrorCode {
    /// Get the string representation for JSON output.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            // Database
            Self::DatabaseNotFound => "DATABASE_NOT_FOUND",
            Self::DatabaseLocked => "DATABASE_LOCKED",
            Self::DatabaseError => "DATABASE_ERROR",
            // Issue
            Self::IssueNotFound => "ISSUE_NOT_FOUND",
            Self::IdCollision => "ID_COLLISION",
            Self::InvalidId => "INVALID_ID",
            // Validation
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::InvalidStatus => "INVALID_STATUS",
            Self::InvalidType => "INVALID_TYPE",
            Self::InvalidPriority => "INVALID_PRIORITY",
            Self::DependencyNotFound => "DEPENDENCY_NOT_FOUND",
            Self::SelfDependency => "SELF_DEPENDENCY",
            Self::DuplicateDependency => "DUPLICATE_DEPENDENCY",
            // Guard
            Self::GuardBlocked => "GUARD_BLOCKED",
            Self::ConflictMarkers => "CONFLICT_MARKERS",
            // Sync
            Self::JsonlParseError => "JSONL_PARSE_ERROR",
            Self::PrefixMismatch => "PREFIX_MISMATCH",
            Self::PathConfinement => "PATH_CONFINEMENT",
            // Config
            Self::ConfigError => "CONFIG_ERROR",
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::AlreadyInitialized => "ALREADY_INITIALIZED",
            // I/O
            Self::IoError => "IO_ERROR",
            Self::JsonError => "JSON_ERROR",
            // Internal
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Whether this error is potentially retryable.
    ///
    /// Retryable means the caller might succeed if it waits and retries
    /// (database locked) or fixes the input and retries (validation,
    /// overridable guard).
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DatabaseLocked
                | Self::ValidationFailed
                | Self::InvalidStatus
                | Self::InvalidType
                | Self::InvalidPriority
                | Self::GuardBlocked
        )
    }

    /// Get the exit code for this error category.
    ///
    /// Exit codes are grouped by category:
    /// - 1: Internal/unknown errors
    /// - 2: Database errors
    /// - 3: Issue not-found/ID errors
    /// - 4: Validation errors
    /// - 5: Guard-blocked operations
    /// - 6: Sync/JSONL errors
    /// - 7: Config / not-initialized errors
    /// - 8: I/O errors
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::DatabaseNotFound | Self::DatabaseLocked | Self::DatabaseError => 2,
            Self::IssueNotFound | Self::IdCollision | Self::InvalidId => 3,
            Self::ValidationFailed
            | Self::InvalidStatus
            | Self::InvalidType
            | Self::InvalidPriority
            | Self::DependencyNotFound
            | Self::SelfDependency
            | Self::DuplicateDependency => 4,
            Self::GuardBlocked | Self::ConflictMarkers => 5,
            Self::JsonlParseError | Self::PrefixMismatch | Self::PathConfinement => 6,
            Self::ConfigError | Self::NotInitialized | Self::AlreadyInitialized => 7,
            Self::IoError | Self::JsonError => 8,
            Self::InternalError => 1,
        }
    }
}

/// Structured error for machine-parseable output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    /// Machine-readable error code
    pub code: ErrorCode,
    /// Human-readable error message
    pub message: String,
    /// Optional hint for fixing the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// Whether the operation can be retried
    pub retryable: bool,
    /// Additional context data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl StructuredError {
    /// Create a new structured error from a `TangleError`.
    #[must_use]
    pub fn from_error(err: &TangleError) -> Self {
        let (code, context) = Self::extract_code_and_context(err);

        Self {
            code,
            message: err.to_string(),
            hint: err.suggestion(),
            retryable: code.is_retryable(),
            context,
        }
    }

    /// Serialize to JSON value.
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "error": {
                "code": self.code.as_str(),
                "message": self.message,
                "hint": self.hint,
                "retryable": self.retryable,
                "context": self.context,
            }
        })
    }

    /// Format for human-readable output.
    #[must_use]
    pub fn to_human(&self) -> String {
        let mut output = String::from("Error: ");
        output.push_str(&self.message);
        if let Some(hint) = &self.hint {
            output.push_str("\nHint: ");
            output.push_str(hint);
        }
        output
    }

    /// Extract error code and context from a `TangleError`.
    fn extract_code_and_context(err: &TangleError) -> (ErrorCode, Option<Value>) {
        match err {
            TangleError::DatabaseNotFound { path } => (
                ErrorCode::DatabaseNotFound,
                Some(json!({"path": path.display().to_string()})),
            ),
            TangleError::DatabaseLocked { path } => (
                ErrorCode::DatabaseLocked,
                Some(json!({"path": path.display().to_string()})),
            ),
            TangleError::Database(_) => (ErrorCode::DatabaseError, None),
            TangleError::IssueNotFound { id } => {
                (ErrorCode::IssueNotFound, Some(json!({"searched_id": id})))
            }
            TangleError::IdCollision { id } => (ErrorCode::IdCollision, Some(json!({"id": id}))),
            TangleError::InvalidId { id } => (ErrorCode::InvalidId, Some(json!({"id": id}))),
            TangleError::Validation { field, reason } => (
                ErrorCode::ValidationFailed,
                Some(json!({"field": field, "reason": reason})),
            ),
            TangleError::InvalidStatus { status } => {
                (ErrorCode::InvalidStatus, Some(json!({"status": status})))
            }
            TangleError::InvalidType { issue_type } => (
                ErrorCode::InvalidType,
                Some(json!({"issue_type": issue_type})),
            ),
            TangleError::InvalidPriority { priority } => (
                ErrorCode::InvalidPriority,
                Some(json!({"priority": priority})),
            ),
            TangleError::DependencyNotFound { id } => {
                (ErrorCode::DependencyNotFound, Some(json!({"id": id})))
            }
            TangleError::SelfDependency { id } => {
                (ErrorCode::SelfDependency, Some(json!({"id": id})))
            }
            TangleError::DuplicateDependency { from, to } => (
                ErrorCode::DuplicateDependency,
                Some(json!({"from": from, "to": to})),
            ),
            TangleError::GuardBlocked {
                guard,
                details,
                override_flag,
            } => (
                ErrorCode::GuardBlocked,
                Some(json!({
                    "guard": guard,
                    "details": details,
                    "override_flag": override_flag,
                })),
            ),
            TangleError::ConflictMarkers {
                path,
                count,
                first_line,
            } => (
                ErrorCode::ConflictMarkers,
                Some(json!({
                    "path": path.display().to_string(),
                    "marker_count": count,
                    "first_line": first_line,
                    "override_flag": Value::Null,
                })),
            ),
            TangleError::JsonlParse { line, reason } => (
                ErrorCode::JsonlParseError,
                Some(json!({"line": line, "reason": reason})),
            ),
            TangleError::PrefixMismatch { expected, found } => (
                ErrorCode::PrefixMismatch,
                Some(json!({"expected": expected, "found": found})),
            ),
            TangleError::PathConfinement { path, reason } => (
                ErrorCode::PathConfinement,
                Some(json!({
                    "path": path.display().to_string(),
                    "reason": reason,
                })),
            ),
            TangleError::Config(msg) => (ErrorCode::ConfigError, Some(json!({"detail": msg}))),
            TangleError::NotInitialized => (ErrorCode::NotInitialized, None),
            TangleError::AlreadyInitialized { path } => (
                ErrorCode::AlreadyInitialized,
                Some(json!({"path": path.display().to_string()})),
            ),
            TangleError::Io(_) => (ErrorCode::IoError, None),
            TangleError::Json(_) => (ErrorCode::JsonError, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_exit_code_bands() {
        assert_eq!(ErrorCode::IssueNotFound.exit_code(), 3);
        assert_eq!(ErrorCode::ValidationFailed.exit_code(), 4);
        assert_eq!(ErrorCode::GuardBlocked.exit_code(), 5);
        assert_eq!(ErrorCode::ConflictMarkers.exit_code(), 5);
        assert_eq!(ErrorCode::NotInitialized.exit_code(), 7);
        assert_eq!(ErrorCode::InternalError.exit_code(), 1);
    }

    #[test]
    fn test_guard_blocked_json_names_flag() {
        let err = TangleError::guard_blocked("stale-db", "missing: tg-x1", Some("--force"));
        let structured = StructuredError::from_error(&err);
        let ctx = structured.context.unwrap();
        assert_eq!(ctx["override_flag"], "--force");
        assert_eq!(structured.code.as_str(), "GUARD_BLOCKED");
    }

    #[test]
    fn test_conflict_markers_json_has_null_override() {
        let err = TangleError::ConflictMarkers {
            path: PathBuf::from("issues.jsonl"),
            count: 1,
            first_line: 9,
        };
        let structured = StructuredError::from_error(&err);
        let ctx = structured.context.unwrap();
        assert!(ctx["override_flag"].is_null());
    }

    #[test]
    fn test_to_json_shape() {
        let err = TangleError::NotInitialized;
        let value = StructuredError::from_error(&err).to_json();
        assert_eq!(value["error"]["code"], "NOT_INITIALIZED");
        assert_eq!(value["error"]["retryable"], false);
    }
}
