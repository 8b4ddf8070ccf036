//! JSONL import/export for `tangle`.
//!
//! This module handles:
//! - Export: `SQLite` -> JSONL (for git tracking)
//! - Import: JSONL -> `SQLite` (for git clone/pull)
//! - Dirty tracking for incremental exports
//! - Collision detection during imports
//! - Safety guards against lossy exports
//! - Path validation and allowlist enforcement

pub mod history;
pub mod path;

pub use path::{
    ALLOWED_NAMES, ALLOWED_SUFFIXES, PathCheck, check_no_git_path, require_sync_path,
    require_sync_path_with_external, require_temp_file_path, validate_sync_path,
};

use crate::error::{Result, TangleError};
use crate::model::{EventType, Issue, Status};
use crate::storage::SqliteStorage;
use crate::sync::history::HistoryConfig;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Metadata key for the JSONL content hash.
pub const METADATA_JSONL_CONTENT_HASH: &str = "jsonl_content_hash";
/// Metadata key for the last export time.
pub const METADATA_LAST_EXPORT_TIME: &str = "last_export_time";
/// Metadata key for the last import time.
pub const METADATA_LAST_IMPORT_TIME: &str = "last_import_time";

/// Configuration for JSONL export.
#[derive(Debug, Clone, Default)]
pub struct ExportConfig {
    /// Bypass the empty-database and staleness guards, rewrite the whole
    /// file, and clear all dirty markers.
    pub force: bool,
    /// Error handling policy for export.
    pub error_policy: SyncErrorPolicy,
    /// Retention period for tombstones in days (None = keep forever).
    pub retention_days: Option<u64>,
    /// The `.tangle` directory for path validation. None skips validation.
    pub tangle_dir: Option<PathBuf>,
    /// Allow a JSONL path outside `.tangle/` (explicit opt-in; git paths are
    /// still always rejected).
    pub allow_external_jsonl: bool,
    /// Configuration for history backups.
    pub history: HistoryConfig,
}

/// Record error handling policy, shared by export and import.
///
/// On export it governs records that fail to serialize or write; on
/// import, `BestEffort` downgrades unparseable lines from fatal to
/// skip-and-report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SyncErrorPolicy {
    /// Abort on any record error (default).
    #[default]
    Strict,
    /// Skip problematic records, process what we can.
    BestEffort,
    /// Export valid records, report failures.
    Partial,
    /// Only issue rows are fatal; relation errors are tolerated.
    RequiredCore,
}

impl std::fmt::Display for SyncErrorPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value = match self {
            Self::Strict => "strict",
            Self::BestEffort => "best-effort",
            Self::Partial => "partial",
            Self::RequiredCore => "required-core",
        };
        write!(f, "{value}")
    }
}

impl std::str::FromStr for SyncErrorPolicy {
    type Err = String;

    fn from_str(input: &str) -> std::result::Result<Self, Self::Err> {
        match input.to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "best-effort" | "best_effort" | "best" => Ok(Self::BestEffort),
            "partial" => Ok(Self::Partial),
            "required-core" | "required_core" | "core" => Ok(Self::RequiredCore),
            other => Err(format!(
                "Invalid error policy: {other}. Must be one of: strict, best-effort, partial, required-core"
            )),
        }
    }
}

/// Export entity types for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExportEntityType {
    Issue,
    Dependency,
    Label,
}

/// Export error record.
#[derive(Debug, Clone, Serialize)]
pub struct ExportError {
    pub entity_type: ExportEntityType,
    pub entity_id: String,
    pub message: String,
}

impl ExportError {
    fn new(
        entity_type: ExportEntityType,
        entity_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            entity_type,
            entity_id: entity_id.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn summary(&self) -> String {
        let id = if self.entity_id.is_empty() {
            "<unknown>"
        } else {
            self.entity_id.as_str()
        };
        format!("{:?} {id}: {}", self.entity_type, self.message)
    }
}

/// Export report with error details and counts.
#[derive(Debug, Clone, Serialize)]
pub struct ExportReport {
    pub issues_exported: usize,
    pub dependencies_exported: usize,
    pub labels_exported: usize,
    pub errors: Vec<ExportError>,
    pub policy_used: SyncErrorPolicy,
}

impl ExportReport {
    const fn new(policy: SyncErrorPolicy) -> Self {
        Self {
            issues_exported: 0,
            dependencies_exported: 0,
            labels_exported: 0,
            errors: Vec::new(),
            policy_used: policy,
        }
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Success rate for exported entities.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        let total = self.issues_exported + self.dependencies_exported + self.labels_exported;
        let failed = self.errors.len();
        if total + failed == 0 {
            1.0
        } else {
            total as f64 / (total + failed) as f64
        }
    }
}

struct ExportContext {
    policy: SyncErrorPolicy,
    errors: Vec<ExportError>,
}

impl ExportContext {
    const fn new(policy: SyncErrorPolicy) -> Self {
        Self {
            policy,
            errors: Vec::new(),
        }
    }

    fn handle_error(&mut self, err: ExportError) -> Result<()> {
        match self.policy {
            SyncErrorPolicy::Strict => {
                Err(TangleError::Config(format!("Export error: {}", err.summary())))
            }
            SyncErrorPolicy::BestEffort | SyncErrorPolicy::Partial => {
                self.errors.push(err);
                Ok(())
            }
            SyncErrorPolicy::RequiredCore => {
                if err.entity_type == ExportEntityType::Issue {
                    Err(TangleError::Config(format!(
                        "Export error: {}",
                        err.summary()
                    )))
                } else {
                    self.errors.push(err);
                    Ok(())
                }
            }
        }
    }
}

/// Result of a JSONL export operation.
#[derive(Debug, Clone)]
pub struct ExportResult {
    pub exported_count: usize,
    pub exported_ids: Vec<String>,
    /// IDs skipped due to expired tombstone retention (still clear dirty flags).
    pub skipped_tombstone_ids: Vec<String>,
    /// SHA-256 of the exported JSONL content.
    pub content_hash: String,
    /// Output file path (None when writing to a stream).
    pub output_path: Option<String>,
    /// Per-issue content hashes for incremental export tracking.
    pub issue_hashes: Vec<(String, String)>,
}

/// Configuration for JSONL import.
#[derive(Debug, Clone)]
pub struct ImportConfig {
    /// Skip prefix validation when importing.
    pub skip_prefix_validation: bool,
    /// Clear duplicate external refs within the file instead of erroring.
    pub clear_duplicate_external_refs: bool,
    /// How to handle dependency edges pointing at unknown issues.
    pub orphan_mode: OrphanMode,
    /// Upsert even when timestamps are equal or older.
    pub force_upsert: bool,
    /// The `.tangle` directory for path validation. None skips validation.
    pub tangle_dir: Option<PathBuf>,
    /// Allow a JSONL path outside `.tangle/` (explicit opt-in).
    pub allow_external_jsonl: bool,
    /// Actor recorded on import events.
    pub actor: String,
    /// How to handle unparseable lines: fatal under `Strict` (default),
    /// skipped and reported under `BestEffort`.
    pub error_policy: SyncErrorPolicy,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            skip_prefix_validation: false,
            clear_duplicate_external_refs: false,
            orphan_mode: OrphanMode::Strict,
            force_upsert: false,
            tangle_dir: None,
            allow_external_jsonl: false,
            actor: "import".to_string(),
            error_policy: SyncErrorPolicy::Strict,
        }
    }
}

/// Orphan handling behavior for import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrphanMode {
    /// Fail if any dependency targets a missing issue.
    #[default]
    Strict,
    /// Create placeholder issues for missing targets.
    Resurrect,
    /// Skip issues with orphaned dependencies.
    Skip,
    /// Import dangling edges as-is.
    Allow,
}

impl std::str::FromStr for OrphanMode {
    type Err = String;

    fn from_str(input: &str) -> std::result::Result<Self, Self::Err> {
        match input.to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "resurrect" => Ok(Self::Resurrect),
            "skip" => Ok(Self::Skip),
            "allow" => Ok(Self::Allow),
            other => Err(format!(
                "Invalid orphan mode: {other}. Must be one of: strict, resurrect, skip, allow"
            )),
        }
    }
}

/// A line that failed to parse during a best-effort import.
#[derive(Debug, Clone, Serialize)]
pub struct ImportLineError {
    /// 1-based line number in the JSONL file.
    pub line: usize,
    pub reason: String,
}

/// Result of a JSONL import.
#[derive(Debug, Clone, Default)]
pub struct ImportResult {
    /// Issues inserted as new rows.
    pub created: usize,
    /// Existing issues overwritten by a newer incoming record.
    pub updated: usize,
    /// Issues skipped (existing newer, equal timestamps, or orphaned).
    pub skipped: usize,
    /// Issues skipped because the existing row is a tombstone.
    pub tombstone_skipped: usize,
    /// Placeholder issues created for missing dependency targets.
    pub resurrected: usize,
    /// Unparseable lines skipped under the best-effort policy.
    pub line_errors: Vec<ImportLineError>,
}

impl ImportResult {
    #[must_use]
    pub const fn imported_count(&self) -> usize {
        self.created + self.updated
    }
}

// === Preflight checks ===

/// Status of a preflight check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreflightCheckStatus {
    Pass,
    Warn,
    Fail,
}

/// A single preflight check result.
#[derive(Debug, Clone)]
pub struct PreflightCheck {
    pub name: String,
    pub description: String,
    pub status: PreflightCheckStatus,
    pub message: String,
    pub remediation: Option<String>,
}

impl PreflightCheck {
    fn pass(
        name: impl Into<String>,
        description: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            status: PreflightCheckStatus::Pass,
            message: message.into(),
            remediation: None,
        }
    }

    fn warn(
        name: impl Into<String>,
        description: impl Into<String>,
        message: impl Into<String>,
        remediation: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            status: PreflightCheckStatus::Warn,
            message: message.into(),
            remediation: Some(remediation.into()),
        }
    }

    fn fail(
        name: impl Into<String>,
        description: impl Into<String>,
        message: impl Into<String>,
        remediation: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            status: PreflightCheckStatus::Fail,
            message: message.into(),
            remediation: Some(remediation.into()),
        }
    }
}

/// Result of running all preflight checks.
#[derive(Debug, Clone)]
pub struct PreflightResult {
    pub checks: Vec<PreflightCheck>,
    pub overall_status: PreflightCheckStatus,
}

impl PreflightResult {
    const fn new() -> Self {
        Self {
            checks: Vec::new(),
            overall_status: PreflightCheckStatus::Pass,
        }
    }

    fn add(&mut self, check: PreflightCheck) {
        match check.status {
            PreflightCheckStatus::Fail => self.overall_status = PreflightCheckStatus::Fail,
            PreflightCheckStatus::Warn if self.overall_status != PreflightCheckStatus::Fail => {
                self.overall_status = PreflightCheckStatus::Warn;
            }
            _ => {}
        }
        self.checks.push(check);
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.overall_status == PreflightCheckStatus::Pass
    }

    #[must_use]
    pub fn has_no_failures(&self) -> bool {
        self.overall_status != PreflightCheckStatus::Fail
    }

    #[must_use]
    pub fn failures(&self) -> Vec<&PreflightCheck> {
        self.checks
            .iter()
            .filter(|c| c.status == PreflightCheckStatus::Fail)
            .collect()
    }

    #[must_use]
    pub fn warnings(&self) -> Vec<&PreflightCheck> {
        self.checks
            .iter()
            .filter(|c| c.status == PreflightCheckStatus::Warn)
            .collect()
    }

    /// Convert to an error if any check failed.
    ///
    /// # Errors
    ///
    /// Returns a config error listing the failed checks.
    pub fn into_result(self) -> Result<Self> {
        if self.overall_status == PreflightCheckStatus::Fail {
            let mut msg = String::from("Preflight checks failed:\n");
            for check in self.failures() {
                use std::fmt::Write;
                let _ = writeln!(msg, "  - {}: {}", check.name, check.message);
                if let Some(ref rem) = check.remediation {
                    let _ = writeln!(msg, "    Hint: {rem}");
                }
            }
            Err(TangleError::Config(msg))
        } else {
            Ok(self)
        }
    }
}

/// Run read-only preflight checks for an export.
///
/// Validates the tangle directory, the output path allowlist, database
/// accessibility, and the two data-loss guards without mutating anything.
///
/// # Errors
///
/// Returns an error only on unexpected I/O failure; guard violations are
/// reported inside the `PreflightResult`.
#[allow(clippy::too_many_lines)]
pub fn preflight_export(
    storage: &SqliteStorage,
    output_path: &Path,
    config: &ExportConfig,
) -> Result<PreflightResult> {
    let mut result = PreflightResult::new();

    debug!(
        output_path = %output_path.display(),
        tangle_dir = ?config.tangle_dir,
        "Running export preflight checks"
    );

    if let Some(ref tangle_dir) = config.tangle_dir {
        if tangle_dir.is_dir() {
            result.add(PreflightCheck::pass(
                "tangle_dir_exists",
                "Tangle directory exists",
                format!("Found: {}", tangle_dir.display()),
            ));
        } else {
            result.add(PreflightCheck::fail(
                "tangle_dir_exists",
                "Tangle directory exists",
                format!("Not found: {}", tangle_dir.display()),
                "Run 'tg init' to initialize the tangle directory.",
            ));
        }

        let canonical_tangle = tangle_dir
            .canonicalize()
            .unwrap_or_else(|_| tangle_dir.clone());
        let is_external =
            !output_path.starts_with(tangle_dir) && !output_path.starts_with(&canonical_tangle);

        match require_sync_path_with_external(output_path, tangle_dir, config.allow_external_jsonl)
        {
            Ok(()) => {
                let msg = format!(
                    "Path {} validated (external={is_external})",
                    output_path.display()
                );
                if is_external && config.allow_external_jsonl {
                    result.add(PreflightCheck::warn(
                        "path_validation",
                        "Output path is within allowlist",
                        msg,
                        "Consider moving the JSONL into .tangle/ for better safety.",
                    ));
                } else {
                    result.add(PreflightCheck::pass(
                        "path_validation",
                        "Output path is within allowlist",
                        msg,
                    ));
                }
            }
            Err(e) => {
                result.add(PreflightCheck::fail(
                    "path_validation",
                    "Output path is within allowlist",
                    format!("Path rejected: {e}"),
                    "Use a path within .tangle/ or set --allow-external-jsonl.",
                ));
            }
        }
    }

    match storage.count_issues() {
        Ok(count) => {
            result.add(PreflightCheck::pass(
                "database_accessible",
                "Database is accessible",
                format!("Database contains {count} issue(s)"),
            ));

            if count == 0 && !config.force && output_path.exists() {
                match count_issues_in_jsonl(output_path) {
                    Ok(jsonl_count) if jsonl_count > 0 => {
                        result.add(PreflightCheck::fail(
                            "empty_database_guard",
                            "Export won't cause data loss",
                            format!(
                                "Database has 0 issues, JSONL has {jsonl_count} issues. Export would cause data loss.",
                            ),
                            "Import the JSONL first, or use --force to override.",
                        ));
                    }
                    Ok(_) => {
                        result.add(PreflightCheck::pass(
                            "empty_database_guard",
                            "Export won't cause data loss",
                            "Existing JSONL is empty.",
                        ));
                    }
                    Err(e) => {
                        result.add(PreflightCheck::warn(
                            "empty_database_guard",
                            "Export won't cause data loss",
                            format!("Could not read existing JSONL: {e}"),
                            "Verify the JSONL file is readable.",
                        ));
                    }
                }
            } else if count == 0 && !config.force {
                result.add(PreflightCheck::pass(
                    "empty_database_guard",
                    "Export won't cause data loss",
                    "Database is empty, no existing JSONL to overwrite.",
                ));
            }

            if count > 0 && !config.force && output_path.exists() {
                match get_issue_ids_from_jsonl(output_path) {
                    Ok(jsonl_ids) if !jsonl_ids.is_empty() => {
                        let db_ids: HashSet<String> = storage
                            .get_all_ids()
                            .map(|ids| ids.into_iter().collect())
                            .unwrap_or_default();
                        let total_missing = jsonl_ids.difference(&db_ids).count();
                        if total_missing == 0 {
                            result.add(PreflightCheck::pass(
                                "stale_database_guard",
                                "Export won't lose JSONL issues",
                                "All JSONL issues are present in the database.",
                            ));
                        } else {
                            let mut sample: Vec<_> = jsonl_ids
                                .difference(&db_ids)
                                .map(String::as_str)
                                .collect();
                            sample.sort_unstable();
                            sample.truncate(5);
                            result.add(PreflightCheck::fail(
                                "stale_database_guard",
                                "Export won't lose JSONL issues",
                                format!(
                                    "Database is missing {total_missing} issue(s) from JSONL: {}{}",
                                    sample.join(", "),
                                    if total_missing > 5 { " ..." } else { "" }
                                ),
                                "Import the JSONL first, or use --force to override.",
                            ));
                        }
                    }
                    Ok(_) => {
                        result.add(PreflightCheck::pass(
                            "stale_database_guard",
                            "Export won't lose JSONL issues",
                            "JSONL is empty or doesn't exist.",
                        ));
                    }
                    Err(e) => {
                        result.add(PreflightCheck::warn(
                            "stale_database_guard",
                            "Export won't lose JSONL issues",
                            format!("Could not read existing JSONL: {e}"),
                            "Verify the JSONL file is readable.",
                        ));
                    }
                }
            }
        }
        Err(e) => {
            result.add(PreflightCheck::fail(
                "database_accessible",
                "Database is accessible",
                format!("Database error: {e}"),
                "Check database file permissions and integrity.",
            ));
        }
    }

    debug!(
        overall_status = ?result.overall_status,
        check_count = result.checks.len(),
        "Export preflight complete"
    );

    Ok(result)
}

/// Run read-only preflight checks for an import.
///
/// # Errors
///
/// Returns an error only on unexpected I/O failure; validation problems are
/// reported inside the `PreflightResult`.
#[allow(clippy::too_many_lines)]
pub fn preflight_import(input_path: &Path, config: &ImportConfig) -> Result<PreflightResult> {
    let mut result = PreflightResult::new();

    debug!(
        input_path = %input_path.display(),
        tangle_dir = ?config.tangle_dir,
        "Running import preflight checks"
    );

    if let Some(ref tangle_dir) = config.tangle_dir {
        if tangle_dir.is_dir() {
            result.add(PreflightCheck::pass(
                "tangle_dir_exists",
                "Tangle directory exists",
                format!("Found: {}", tangle_dir.display()),
            ));
        } else {
            result.add(PreflightCheck::fail(
                "tangle_dir_exists",
                "Tangle directory exists",
                format!("Not found: {}", tangle_dir.display()),
                "Run 'tg init' to initialize the tangle directory.",
            ));
        }

        match require_sync_path_with_external(input_path, tangle_dir, config.allow_external_jsonl)
        {
            Ok(()) => {
                result.add(PreflightCheck::pass(
                    "path_validation",
                    "Input path is within allowlist",
                    format!("Path {} validated", input_path.display()),
                ));
            }
            Err(e) => {
                result.add(PreflightCheck::fail(
                    "path_validation",
                    "Input path is within allowlist",
                    format!("Path rejected: {e}"),
                    "Use a path within .tangle/ or set --allow-external-jsonl.",
                ));
            }
        }
    }

    if input_path.exists() {
        match File::open(input_path) {
            Ok(_) => {
                result.add(PreflightCheck::pass(
                    "file_readable",
                    "Input file exists and is readable",
                    format!("File accessible: {}", input_path.display()),
                ));
            }
            Err(e) => {
                result.add(PreflightCheck::fail(
                    "file_readable",
                    "Input file exists and is readable",
                    format!("Cannot read file: {e}"),
                    "Check file permissions.",
                ));
            }
        }
    } else {
        result.add(PreflightCheck::fail(
            "file_readable",
            "Input file exists and is readable",
            format!("File not found: {}", input_path.display()),
            "Verify the path is correct or run export first.",
        ));
        // Further checks need the file
        return Ok(result);
    }

    match scan_conflict_markers(input_path) {
        Ok(markers) if markers.is_empty() => {
            result.add(PreflightCheck::pass(
                "no_conflict_markers",
                "No merge conflict markers",
                "File is clean of conflict markers.",
            ));
        }
        Ok(markers) => {
            let preview: Vec<String> = markers
                .iter()
                .take(3)
                .map(|m| format!("line {}: {:?}", m.line, m.marker_type))
                .collect();
            result.add(PreflightCheck::fail(
                "no_conflict_markers",
                "No merge conflict markers",
                format!(
                    "Found {} conflict marker(s): {}{}",
                    markers.len(),
                    preview.join("; "),
                    if markers.len() > 3 { " ..." } else { "" }
                ),
                "Resolve git merge conflicts before importing.",
            ));
        }
        Err(e) => {
            result.add(PreflightCheck::warn(
                "no_conflict_markers",
                "No merge conflict markers",
                format!("Could not scan for markers: {e}"),
                "Verify the file is readable and not corrupted.",
            ));
        }
    }

    match validate_jsonl_syntax(input_path) {
        Ok((line_count, issue_count)) => {
            result.add(PreflightCheck::pass(
                "jsonl_parseable",
                "JSONL syntax is valid",
                format!("Parsed {issue_count} issue(s) from {line_count} line(s)."),
            ));
        }
        Err(e) => {
            result.add(PreflightCheck::fail(
                "jsonl_parseable",
                "JSONL syntax is valid",
                format!("Parse error: {e}"),
                "Fix the JSONL syntax error before importing.",
            ));
        }
    }

    debug!(
        overall_status = ?result.overall_status,
        check_count = result.checks.len(),
        "Import preflight complete"
    );

    Ok(result)
}

/// Validate JSONL shape, returning (`total_lines`, `issue_count`).
fn validate_jsonl_syntax(path: &Path) -> Result<(usize, usize)> {
    let file = File::open(path)?;
    let reader = BufReader::with_capacity(2 * 1024 * 1024, file);
    let mut line_count = 0;
    let mut issue_count = 0;

    for (line_num, line) in reader.lines().enumerate() {
        let line = line?;
        line_count += 1;

        if line.trim().is_empty() {
            continue;
        }

        serde_json::from_str::<Issue>(&line).map_err(|e| TangleError::JsonlParse {
            line: line_num + 1,
            reason: e.to_string(),
        })?;
        issue_count += 1;
    }

    Ok((line_count, issue_count))
}

// === Conflict markers ===

/// Conflict marker kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictMarkerType {
    Start,
    Separator,
    End,
}

/// A detected merge conflict marker in an import file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictMarker {
    pub path: PathBuf,
    pub line: usize,
    pub marker_type: ConflictMarkerType,
    pub branch: Option<String>,
}

const CONFLICT_START: &str = "<<<<<<<";
const CONFLICT_SEPARATOR: &str = "=======";
const CONFLICT_END: &str = ">>>>>>>";

/// Scan a file for merge conflict markers.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn scan_conflict_markers(path: &Path) -> Result<Vec<ConflictMarker>> {
    let file = File::open(path)?;
    let reader = BufReader::with_capacity(2 * 1024 * 1024, file);
    let mut markers = Vec::new();

    for (line_num, line) in reader.lines().enumerate() {
        let line = line?;
        if let Some((marker_type, branch)) = detect_conflict_marker(&line) {
            markers.push(ConflictMarker {
                path: path.to_path_buf(),
                line: line_num + 1,
                marker_type,
                branch,
            });
        }
    }

    Ok(markers)
}

fn detect_conflict_marker(line: &str) -> Option<(ConflictMarkerType, Option<String>)> {
    if let Some(branch) = line.strip_prefix(CONFLICT_START) {
        return Some((ConflictMarkerType::Start, Some(branch.trim().to_string())));
    }
    if line.starts_with(CONFLICT_SEPARATOR) {
        return Some((ConflictMarkerType::Separator, None));
    }
    if let Some(branch) = line.strip_prefix(CONFLICT_END) {
        return Some((ConflictMarkerType::End, Some(branch.trim().to_string())));
    }
    None
}

/// Fail if a file contains merge conflict markers. Not overridable.
///
/// # Errors
///
/// Returns `ConflictMarkers` naming the file, count, and first marker line.
pub fn ensure_no_conflict_markers(path: &Path) -> Result<()> {
    let markers = scan_conflict_markers(path)?;
    if markers.is_empty() {
        return Ok(());
    }

    warn!(
        path = %path.display(),
        marker_count = markers.len(),
        first_line = markers[0].line,
        "Merge conflict markers detected, aborting import"
    );

    Err(TangleError::ConflictMarkers {
        path: path.to_path_buf(),
        count: markers.len(),
        first_line: markers[0].line,
    })
}

// === JSONL inspection ===

/// Count issues in an existing JSONL file. Missing file counts as zero.
///
/// # Errors
///
/// Returns an error if the file contains invalid JSON.
pub fn count_issues_in_jsonl(path: &Path) -> Result<usize> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(TangleError::Io(e)),
    };

    let reader = BufReader::new(file);
    let mut count = 0;

    for (line_num, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        if serde_json::from_str::<serde_json::Value>(&line).is_err() {
            return Err(TangleError::JsonlParse {
                line: line_num + 1,
                reason: format!("invalid JSON: {}", line.chars().take(50).collect::<String>()),
            });
        }
        count += 1;
    }

    Ok(count)
}

/// Collect issue IDs from an existing JSONL file.
///
/// # Errors
///
/// Returns an error if the file contains invalid JSON.
pub fn get_issue_ids_from_jsonl(path: &Path) -> Result<HashSet<String>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashSet::new()),
        Err(e) => return Err(TangleError::Io(e)),
    };

    let reader = BufReader::new(file);
    let mut ids = HashSet::new();

    for (line_num, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let value: serde_json::Value =
            serde_json::from_str(&line).map_err(|e| TangleError::JsonlParse {
                line: line_num + 1,
                reason: e.to_string(),
            })?;

        if let Some(id) = value.get("id").and_then(|v| v.as_str()) {
            ids.insert(id.to_string());
        }
    }

    Ok(ids)
}

/// Read all issues from a JSONL file. Any invalid record is fatal.
///
/// # Errors
///
/// Returns an error if the file cannot be read or contains invalid records.
pub fn read_issues_from_jsonl(path: &Path) -> Result<Vec<Issue>> {
    let (issues, _errors) = read_issues_from_jsonl_with_policy(path, SyncErrorPolicy::Strict)?;
    Ok(issues)
}

/// Read issues from a JSONL file under an error policy.
///
/// Under `BestEffort`, lines that fail to parse are skipped and returned
/// as [`ImportLineError`]s; every other policy makes the first bad line
/// fatal.
///
/// # Errors
///
/// Returns an error if the file cannot be read, or `JsonlParse` for a bad
/// line outside best-effort mode.
pub fn read_issues_from_jsonl_with_policy(
    path: &Path,
    policy: SyncErrorPolicy,
) -> Result<(Vec<Issue>, Vec<ImportLineError>)> {
    let file = File::open(path)?;
    let reader = BufReader::with_capacity(2 * 1024 * 1024, file);
    let mut issues = Vec::new();
    let mut line_errors = Vec::new();

    for (line_num, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Issue>(&line) {
            Ok(issue) => issues.push(issue),
            Err(e) if policy == SyncErrorPolicy::BestEffort => {
                warn!(line = line_num + 1, error = %e, "Skipping unparseable JSONL line");
                line_errors.push(ImportLineError {
                    line: line_num + 1,
                    reason: e.to_string(),
                });
            }
            Err(e) => {
                return Err(TangleError::JsonlParse {
                    line: line_num + 1,
                    reason: e.to_string(),
                });
            }
        }
    }

    Ok((issues, line_errors))
}

// === Export ===

/// Export issues from `SQLite` to a JSONL file.
///
/// - Tombstones are included (for sync propagation) unless past retention
/// - Output is sorted by ID for deterministic diffs
/// - The write is atomic: temp file in the same directory, flush, fsync,
///   rename
/// - Guards refuse to overwrite a non-empty JSONL from an empty or stale
///   database unless `force` is set
///
/// # Errors
///
/// Returns `GuardBlocked` on guard violation, `PathConfinement` on path
/// rejection, or an I/O error.
pub fn export_to_jsonl(
    storage: &SqliteStorage,
    output_path: &Path,
    config: &ExportConfig,
) -> Result<ExportResult> {
    let (result, _report) = export_to_jsonl_with_policy(storage, output_path, config)?;
    Ok(result)
}

/// Export issues with a configurable error policy, returning a report.
///
/// # Errors
///
/// See [`export_to_jsonl`]; additionally returns an error when the policy
/// requires strict handling of a failed record.
#[allow(clippy::too_many_lines)]
pub fn export_to_jsonl_with_policy(
    storage: &SqliteStorage,
    output_path: &Path,
    config: &ExportConfig,
) -> Result<(ExportResult, ExportReport)> {
    if let Some(ref tangle_dir) = config.tangle_dir {
        require_sync_path_with_external(output_path, tangle_dir, config.allow_external_jsonl)?;
        debug!(
            output_path = %output_path.display(),
            tangle_dir = %tangle_dir.display(),
            allow_external = config.allow_external_jsonl,
            "Export path validated"
        );
    }

    let issues = storage.get_all_issues_for_export()?;

    // Guard: empty database over non-empty JSONL
    if issues.is_empty() && !config.force {
        let existing_count = count_issues_in_jsonl(output_path)?;
        if existing_count > 0 {
            warn!(
                guard = "empty_database",
                jsonl_count = existing_count,
                "Refusing export of empty database over non-empty JSONL"
            );
            return Err(TangleError::guard_blocked(
                "empty_database",
                format!(
                    "database has 0 issues, JSONL has {existing_count}; export would lose all of them"
                ),
                Some("--force"),
            ));
        }
    }

    // Guard: stale database that would drop issues present in the JSONL
    if !config.force && output_path.exists() {
        let jsonl_ids = get_issue_ids_from_jsonl(output_path)?;
        if !jsonl_ids.is_empty() {
            let db_ids: HashSet<&str> = issues.iter().map(|i| i.id.as_str()).collect();
            let mut missing: Vec<&str> = jsonl_ids
                .iter()
                .map(String::as_str)
                .filter(|id| !db_ids.contains(id))
                .collect();

            if !missing.is_empty() {
                missing.sort_unstable();
                warn!(
                    guard = "stale_database",
                    db_count = issues.len(),
                    jsonl_count = jsonl_ids.len(),
                    missing_count = missing.len(),
                    "Refusing export because the database is stale relative to the JSONL"
                );
                let preview = missing.iter().take(10).copied().collect::<Vec<_>>();
                let more = if missing.len() > 10 {
                    format!(" ... and {} more", missing.len() - 10)
                } else {
                    String::new()
                };
                return Err(TangleError::guard_blocked(
                    "stale_database",
                    format!(
                        "export would lose {} issue(s) present in the JSONL: {}{more}",
                        missing.len(),
                        preview.join(", ")
                    ),
                    Some("--force"),
                ));
            }
        }
    }

    // Both guards passed; back up the canonical JSONL before overwriting
    // it. A guard-blocked export must leave the filesystem untouched, so
    // this runs strictly after the guards.
    if let Some(ref tangle_dir) = config.tangle_dir {
        if output_path == tangle_dir.join("issues.jsonl") {
            history::backup_before_export(tangle_dir, &config.history, output_path)?;
        }
    }

    let parent_dir = output_path.parent().ok_or_else(|| {
        TangleError::Config(format!("Invalid output path: {}", output_path.display()))
    })?;
    fs::create_dir_all(parent_dir)?;

    let temp_path = output_path.with_extension("jsonl.tmp");
    if let Some(ref tangle_dir) = config.tangle_dir {
        require_temp_file_path(
            &temp_path,
            output_path,
            tangle_dir,
            config.allow_external_jsonl,
        )?;
    }

    let mut ctx = ExportContext::new(config.error_policy);
    let mut report = ExportReport::new(config.error_policy);
    let mut hasher = Sha256::new();
    let mut exported_ids = Vec::new();
    let mut skipped_tombstone_ids = Vec::new();
    let mut issue_hashes = Vec::new();

    // Any failure between temp-file creation and the rename must not leave
    // the temp file behind; the previous export stays intact either way.
    let write_outcome: Result<()> = (|| {
        let temp_file = File::create(&temp_path)?;
        let mut writer = BufWriter::new(temp_file);

        for issue in &issues {
            if issue.is_expired_tombstone(config.retention_days) {
                skipped_tombstone_ids.push(issue.id.clone());
                continue;
            }

            let json = match serde_json::to_string(issue) {
                Ok(json) => json,
                Err(err) => {
                    ctx.handle_error(ExportError::new(
                        ExportEntityType::Issue,
                        issue.id.clone(),
                        err.to_string(),
                    ))?;
                    continue;
                }
            };

            if let Err(err) = writeln!(writer, "{json}") {
                ctx.handle_error(ExportError::new(
                    ExportEntityType::Issue,
                    issue.id.clone(),
                    err.to_string(),
                ))?;
                continue;
            }

            hasher.update(json.as_bytes());
            hasher.update(b"\n");

            exported_ids.push(issue.id.clone());
            issue_hashes.push((
                issue.id.clone(),
                issue
                    .content_hash
                    .clone()
                    .unwrap_or_else(|| issue.compute_content_hash()),
            ));
            report.issues_exported += 1;
            report.dependencies_exported += issue.dependencies.len();
            report.labels_exported += issue.labels.len();
        }

        // Flush and fsync before the rename so a crash can't leave a short
        // file
        writer.flush()?;
        writer
            .into_inner()
            .map_err(|e| TangleError::Io(e.into_error()))?
            .sync_all()?;

        // Permissions go on the temp file so the live path never exists
        // with anything broader than 0600
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600))?;
        }

        fs::rename(&temp_path, output_path)?;
        Ok(())
    })();

    if let Err(err) = write_outcome {
        let _ = fs::remove_file(&temp_path);
        return Err(err);
    }

    let content_hash = format!("{:x}", hasher.finalize());

    // Verify the renamed file holds exactly what we wrote
    let actual_count = count_issues_in_jsonl(output_path)?;
    if actual_count != exported_ids.len() {
        return Err(TangleError::Config(format!(
            "Export verification failed: expected {} issues, JSONL has {actual_count} lines",
            exported_ids.len()
        )));
    }

    let result = ExportResult {
        exported_count: exported_ids.len(),
        exported_ids,
        skipped_tombstone_ids,
        content_hash,
        output_path: Some(output_path.to_string_lossy().to_string()),
        issue_hashes,
    };

    report.errors = ctx.errors;

    Ok((result, report))
}

/// Export issues to a writer (e.g. stdout).
///
/// # Errors
///
/// Returns an error if serialization or writing fails.
pub fn export_to_writer<W: Write>(storage: &SqliteStorage, writer: &mut W) -> Result<ExportResult> {
    let issues = storage.get_all_issues_for_export()?;

    let mut hasher = Sha256::new();
    let mut exported_ids = Vec::new();
    let mut issue_hashes = Vec::new();

    for issue in &issues {
        let json = serde_json::to_string(issue)?;
        writeln!(writer, "{json}")?;
        hasher.update(json.as_bytes());
        hasher.update(b"\n");

        exported_ids.push(issue.id.clone());
        issue_hashes.push((
            issue.id.clone(),
            issue
                .content_hash
                .clone()
                .unwrap_or_else(|| issue.compute_content_hash()),
        ));
    }

    Ok(ExportResult {
        exported_count: exported_ids.len(),
        exported_ids,
        skipped_tombstone_ids: Vec::new(),
        content_hash: format!("{:x}", hasher.finalize()),
        output_path: None,
        issue_hashes,
    })
}

/// Finalize a successful export to the default JSONL path.
///
/// Clears dirty flags (all of them under `force`), records per-issue export
/// hashes, and updates the `jsonl_content_hash` and `last_export_time`
/// metadata keys.
///
/// # Errors
///
/// Returns an error if database updates fail.
pub fn finalize_export(
    storage: &mut SqliteStorage,
    result: &ExportResult,
    force: bool,
) -> Result<usize> {
    use chrono::Utc;

    let cleared = if force {
        storage.clear_all_dirty_flags()?
    } else {
        let mut clear_ids = result.exported_ids.clone();
        clear_ids.extend(result.skipped_tombstone_ids.iter().cloned());
        if clear_ids.is_empty() {
            0
        } else {
            storage.clear_dirty_flags(&clear_ids)?
        }
    };

    storage.set_export_hashes(&result.issue_hashes)?;
    storage.set_metadata(METADATA_JSONL_CONTENT_HASH, &result.content_hash)?;
    storage.set_metadata(METADATA_LAST_EXPORT_TIME, &Utc::now().to_rfc3339())?;

    Ok(cleared)
}

// === 4-phase collision detection ===

/// Match type from collision detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    /// Matched by external reference (e.g. `gh-123`).
    ExternalRef,
    /// Matched by content hash (deduplication).
    ContentHash,
    /// Matched by ID.
    Id,
}

/// Result of collision detection.
#[derive(Debug, Clone)]
pub enum CollisionResult {
    /// No match found, the issue is new.
    NewIssue,
    /// Matched an existing issue.
    Match {
        existing_id: String,
        match_type: MatchType,
        /// Which phase found the match (1-3).
        phase: u8,
    },
}

/// Action to take after collision detection.
#[derive(Debug, Clone)]
pub enum CollisionAction {
    Insert,
    Update { existing_id: String },
    Skip { reason: SkipReason },
}

/// Why an incoming record was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The existing row is a tombstone; never resurrected.
    Tombstone,
    /// The existing row has an equal timestamp.
    EqualTimestamp,
    /// The existing row is strictly newer.
    ExistingNewer,
    /// The issue references a missing dependency target (skip orphan mode).
    Orphaned,
}

impl SkipReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Tombstone => "tombstone-protected",
            Self::EqualTimestamp => "equal-timestamp",
            Self::ExistingNewer => "existing-newer",
            Self::Orphaned => "orphaned-dependency",
        }
    }
}

/// Classify an incoming issue against the database.
///
/// Phases, strictly in order, first match wins:
/// 1. external reference
/// 2. content hash
/// 3. ID
/// 4. no match (new issue)
fn detect_collision(
    conn: &rusqlite::Connection,
    incoming: &Issue,
    computed_hash: &str,
) -> Result<CollisionResult> {
    if let Some(ref external_ref) = incoming.external_ref {
        if let Some(existing) = SqliteStorage::find_by_external_ref_in_tx(conn, external_ref)? {
            return Ok(CollisionResult::Match {
                existing_id: existing.id,
                match_type: MatchType::ExternalRef,
                phase: 1,
            });
        }
    }

    if let Some(existing) = SqliteStorage::find_by_content_hash_in_tx(conn, computed_hash)? {
        return Ok(CollisionResult::Match {
            existing_id: existing.id,
            match_type: MatchType::ContentHash,
            phase: 2,
        });
    }

    if SqliteStorage::id_exists_in_tx(conn, &incoming.id)? {
        return Ok(CollisionResult::Match {
            existing_id: incoming.id.clone(),
            match_type: MatchType::Id,
            phase: 3,
        });
    }

    Ok(CollisionResult::NewIssue)
}

/// Decide what to do with an incoming record given its collision result.
///
/// Tombstones are never overwritten, force or not. Otherwise the strictly
/// newer `updated_at` wins; equal or older incoming records are skipped
/// unless `force_upsert` is set.
fn determine_action(
    conn: &rusqlite::Connection,
    collision: &CollisionResult,
    incoming: &Issue,
    force_upsert: bool,
) -> Result<CollisionAction> {
    match collision {
        CollisionResult::NewIssue => Ok(CollisionAction::Insert),
        CollisionResult::Match { existing_id, .. } => {
            if SqliteStorage::is_tombstone_in_tx(conn, existing_id)? {
                return Ok(CollisionAction::Skip {
                    reason: SkipReason::Tombstone,
                });
            }

            if force_upsert {
                return Ok(CollisionAction::Update {
                    existing_id: existing_id.clone(),
                });
            }

            let existing = SqliteStorage::get_issue_in_tx(conn, existing_id)?.ok_or_else(|| {
                TangleError::IssueNotFound {
                    id: existing_id.clone(),
                }
            })?;

            match incoming.updated_at.cmp(&existing.updated_at) {
                std::cmp::Ordering::Greater => Ok(CollisionAction::Update {
                    existing_id: existing_id.clone(),
                }),
                std::cmp::Ordering::Equal => Ok(CollisionAction::Skip {
                    reason: SkipReason::EqualTimestamp,
                }),
                std::cmp::Ordering::Less => Ok(CollisionAction::Skip {
                    reason: SkipReason::ExistingNewer,
                }),
            }
        }
    }
}

/// Normalize an incoming issue before matching.
///
/// Recomputes the content hash from the canonical fields and repairs the
/// `closed_at` invariant.
fn normalize_issue(issue: &mut Issue) {
    issue.content_hash = Some(issue.compute_content_hash());

    if matches!(issue.status, Status::Closed | Status::Tombstone) {
        if issue.closed_at.is_none() {
            issue.closed_at = Some(issue.updated_at);
        }
    } else {
        issue.closed_at = None;
    }
}

/// Import issues from a JSONL file.
///
/// The file is fully validated before any mutation: path confinement,
/// conflict marker scan, and a complete parse. All database writes then run
/// inside a single immediate transaction, so a failed import leaves the
/// database untouched.
///
/// # Errors
///
/// Returns `ConflictMarkers`, `JsonlParse`, `PrefixMismatch`,
/// `PathConfinement`, `DependencyNotFound` (strict orphan mode), or a
/// database error.
#[allow(clippy::too_many_lines)]
pub fn import_from_jsonl(
    storage: &mut SqliteStorage,
    input_path: &Path,
    config: &ImportConfig,
    expected_prefix: Option<&str>,
) -> Result<ImportResult> {
    if let Some(ref tangle_dir) = config.tangle_dir {
        require_sync_path_with_external(input_path, tangle_dir, config.allow_external_jsonl)?;
        debug!(
            input_path = %input_path.display(),
            tangle_dir = %tangle_dir.display(),
            allow_external = config.allow_external_jsonl,
            "Import path validated"
        );
    }

    // Pre-scan: conflict markers, then a full parse. Nothing below touches
    // the database until both pass. Best-effort downgrades bad lines to
    // skip-and-report; the conflict-marker guard is never downgraded.
    ensure_no_conflict_markers(input_path)?;
    let (mut issues, line_errors) =
        read_issues_from_jsonl_with_policy(input_path, config.error_policy)?;

    for issue in &mut issues {
        normalize_issue(issue);
    }

    if !config.skip_prefix_validation {
        if let Some(prefix) = expected_prefix {
            let expected_start = format!("{prefix}-");
            for issue in &issues {
                if !issue.id.starts_with(&expected_start) {
                    // Tombstones with a foreign prefix are silently dropped
                    if issue.status == Status::Tombstone {
                        continue;
                    }
                    return Err(TangleError::PrefixMismatch {
                        expected: prefix.to_string(),
                        found: issue.id.clone(),
                    });
                }
            }
        }
    }

    // Orphan scan: dependency targets absent from both the batch and the DB
    let incoming_ids: HashSet<&str> = issues.iter().map(|i| i.id.as_str()).collect();
    let mut orphaned_issues: HashSet<String> = HashSet::new();
    let mut missing_targets: HashMap<String, String> = HashMap::new();
    for issue in &issues {
        for dep in &issue.dependencies {
            if !incoming_ids.contains(dep.depends_on_id.as_str())
                && !storage.id_exists(&dep.depends_on_id)?
            {
                orphaned_issues.insert(issue.id.clone());
                missing_targets.insert(dep.depends_on_id.clone(), issue.id.clone());
            }
        }
    }

    if !missing_targets.is_empty() {
        match config.orphan_mode {
            OrphanMode::Strict => {
                let mut targets: Vec<&str> = missing_targets.keys().map(String::as_str).collect();
                targets.sort_unstable();
                return Err(TangleError::DependencyNotFound {
                    id: targets.join(", "),
                });
            }
            OrphanMode::Skip => {
                debug!(
                    orphaned = orphaned_issues.len(),
                    "Skipping issues with orphaned dependencies"
                );
            }
            OrphanMode::Resurrect => {
                debug!(
                    targets = missing_targets.len(),
                    "Resurrecting missing dependency targets as placeholders"
                );
            }
            OrphanMode::Allow => {
                debug!(
                    targets = missing_targets.len(),
                    "Importing dangling dependency edges as-is"
                );
            }
        }
    }

    let jsonl_hash = compute_jsonl_hash(input_path)?;
    let mut result = ImportResult {
        line_errors,
        ..ImportResult::default()
    };
    let orphan_mode = config.orphan_mode;
    let force_upsert = config.force_upsert;
    let clear_dup_refs = config.clear_duplicate_external_refs;

    storage.mutate("import", &config.actor, |tx, ctx| {
        SqliteStorage::clear_all_export_hashes_in_tx(tx)?;

        // Resurrect placeholders first so upserted edges have valid targets
        if orphan_mode == OrphanMode::Resurrect {
            let mut targets: Vec<(&String, &String)> = missing_targets.iter().collect();
            targets.sort_unstable();
            for (target_id, referenced_by) in targets {
                let mut stub = Issue::new(target_id, &format!("Placeholder for {target_id}"));
                stub.notes = Some(format!("Resurrected for dependency from {referenced_by}"));
                stub.content_hash = Some(stub.compute_content_hash());
                SqliteStorage::upsert_issue_in_tx(tx, &stub)?;
                ctx.record_event(EventType::Created, target_id, Some("resurrected".into()));
                ctx.mark_dirty(target_id);
                result.resurrected += 1;
            }
        }

        let mut seen_external_refs: HashSet<String> = HashSet::new();
        let mut new_export_hashes = Vec::new();

        for issue in &issues {
            if orphan_mode == OrphanMode::Skip && orphaned_issues.contains(&issue.id) {
                ctx.record_event(
                    EventType::ImportSkipped,
                    &issue.id,
                    Some(SkipReason::Orphaned.as_str().to_string()),
                );
                result.skipped += 1;
                continue;
            }

            let mut effective_issue = issue.clone();

            if let Some(ref ext_ref) = issue.external_ref {
                if seen_external_refs.contains(ext_ref) {
                    if clear_dup_refs {
                        effective_issue.external_ref = None;
                        effective_issue.content_hash =
                            Some(effective_issue.compute_content_hash());
                    } else {
                        return Err(TangleError::validation(
                            "external_ref",
                            format!("duplicate external_ref in import file: {ext_ref}"),
                        ));
                    }
                } else {
                    seen_external_refs.insert(ext_ref.clone());
                }
            }

            let computed_hash = effective_issue.compute_content_hash();
            let collision = detect_collision(tx, &effective_issue, &computed_hash)?;
            let action = determine_action(tx, &collision, &effective_issue, force_upsert)?;

            match &action {
                CollisionAction::Insert => {
                    SqliteStorage::upsert_issue_in_tx(tx, &effective_issue)?;
                    SqliteStorage::sync_labels_in_tx(tx, &effective_issue.id, &effective_issue.labels)?;
                    SqliteStorage::sync_dependencies_in_tx(
                        tx,
                        &effective_issue.id,
                        &effective_issue.dependencies,
                    )?;
                    ctx.record_event(EventType::Created, &effective_issue.id, None);
                    new_export_hashes.push((effective_issue.id.clone(), computed_hash));
                    result.created += 1;
                }
                CollisionAction::Update { existing_id } => {
                    // A phase-1 or phase-2 match may carry a different ID
                    // than the existing row; the existing ID wins.
                    let mut updated = effective_issue.clone();
                    updated.id.clone_from(existing_id);
                    SqliteStorage::upsert_issue_in_tx(tx, &updated)?;
                    SqliteStorage::sync_labels_in_tx(tx, &updated.id, &updated.labels)?;
                    SqliteStorage::sync_dependencies_in_tx(tx, &updated.id, &updated.dependencies)?;
                    ctx.record_event(EventType::Updated, existing_id, None);
                    new_export_hashes.push((existing_id.clone(), computed_hash));
                    result.updated += 1;
                }
                CollisionAction::Skip { reason } => {
                    debug!(id = %effective_issue.id, reason = reason.as_str(), "Skipping issue");
                    ctx.record_event(
                        EventType::ImportSkipped,
                        &effective_issue.id,
                        Some(reason.as_str().to_string()),
                    );
                    if *reason == SkipReason::Tombstone {
                        result.tombstone_skipped += 1;
                    } else {
                        result.skipped += 1;
                    }
                }
            }
        }

        SqliteStorage::set_export_hashes_in_tx(tx, &new_export_hashes)?;
        SqliteStorage::set_metadata_in_tx(
            tx,
            METADATA_LAST_IMPORT_TIME,
            &chrono::Utc::now().to_rfc3339(),
        )?;
        SqliteStorage::set_metadata_in_tx(tx, METADATA_JSONL_CONTENT_HASH, &jsonl_hash)?;

        Ok(())
    })?;

    Ok(result)
}

/// SHA-256 of a JSONL file, line-by-line with normalized newlines.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn compute_jsonl_hash(path: &Path) -> Result<String> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut hasher = Sha256::new();

    for line in reader.lines() {
        let line = line?;
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }

    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Dependency, DependencyType};
    use chrono::{Duration, Utc};
    use std::io::Write as IoWrite;
    use tempfile::TempDir;

    fn make_issue(id: &str, title: &str) -> Issue {
        Issue::new(id, title)
    }

    fn setup_dir() -> (TempDir, PathBuf) {
        let temp = TempDir::new().unwrap();
        let tangle_dir = temp.path().join(".tangle");
        fs::create_dir_all(&tangle_dir).unwrap();
        (temp, tangle_dir)
    }

    fn write_jsonl(path: &Path, issues: &[Issue]) {
        let mut file = File::create(path).unwrap();
        for issue in issues {
            writeln!(file, "{}", serde_json::to_string(issue).unwrap()).unwrap();
        }
    }

    #[test]
    fn test_export_roundtrip() {
        let (_temp, tangle_dir) = setup_dir();
        let mut storage = SqliteStorage::open_memory().unwrap();
        let mut issue = make_issue("tg-abc", "Round trip");
        issue.labels = vec!["sync".to_string()];
        storage.create_issue(&issue, "tester").unwrap();

        let output = tangle_dir.join("issues.jsonl");
        let config = ExportConfig {
            tangle_dir: Some(tangle_dir.clone()),
            ..Default::default()
        };
        let result = export_to_jsonl(&storage, &output, &config).unwrap();
        assert_eq!(result.exported_count, 1);
        assert!(output.exists());
        assert!(!output.with_extension("jsonl.tmp").exists());

        let read_back = read_issues_from_jsonl(&output).unwrap();
        assert_eq!(read_back.len(), 1);
        assert_eq!(read_back[0].id, "tg-abc");
        assert_eq!(read_back[0].labels, vec!["sync"]);
    }

    #[test]
    fn test_export_is_sorted_by_id() {
        let (_temp, tangle_dir) = setup_dir();
        let mut storage = SqliteStorage::open_memory().unwrap();
        storage
            .create_issue(&make_issue("tg-zzz", "Last"), "tester")
            .unwrap();
        storage
            .create_issue(&make_issue("tg-aaa", "First"), "tester")
            .unwrap();

        let output = tangle_dir.join("issues.jsonl");
        let config = ExportConfig::default();
        export_to_jsonl(&storage, &output, &config).unwrap();

        let issues = read_issues_from_jsonl(&output).unwrap();
        assert_eq!(issues[0].id, "tg-aaa");
        assert_eq!(issues[1].id, "tg-zzz");
    }

    #[test]
    fn test_empty_database_guard_blocks_export() {
        let (_temp, tangle_dir) = setup_dir();
        let storage = SqliteStorage::open_memory().unwrap();

        let output = tangle_dir.join("issues.jsonl");
        write_jsonl(&output, &[make_issue("tg-a", "Exists in file")]);

        let config = ExportConfig::default();
        let err = export_to_jsonl(&storage, &output, &config).unwrap_err();
        assert!(matches!(
            err,
            TangleError::GuardBlocked {
                guard: "empty_database",
                ..
            }
        ));
        // The file must be untouched
        assert_eq!(count_issues_in_jsonl(&output).unwrap(), 1);
    }

    #[test]
    fn test_empty_database_guard_force_override() {
        let (_temp, tangle_dir) = setup_dir();
        let storage = SqliteStorage::open_memory().unwrap();

        let output = tangle_dir.join("issues.jsonl");
        write_jsonl(&output, &[make_issue("tg-a", "Exists in file")]);

        let config = ExportConfig {
            force: true,
            ..Default::default()
        };
        let result = export_to_jsonl(&storage, &output, &config).unwrap();
        assert_eq!(result.exported_count, 0);
        assert_eq!(count_issues_in_jsonl(&output).unwrap(), 0);
    }

    #[test]
    fn test_stale_database_guard_names_missing_ids() {
        let (_temp, tangle_dir) = setup_dir();
        let mut storage = SqliteStorage::open_memory().unwrap();
        storage.create_issue(&make_issue("tg-x", "X"), "tester").unwrap();
        storage.create_issue(&make_issue("tg-y", "Y"), "tester").unwrap();

        let output = tangle_dir.join("issues.jsonl");
        write_jsonl(
            &output,
            &[
                make_issue("tg-x", "X"),
                make_issue("tg-y", "Y"),
                make_issue("tg-z", "Z"),
            ],
        );

        let err = export_to_jsonl(&storage, &output, &ExportConfig::default()).unwrap_err();
        match err {
            TangleError::GuardBlocked { guard, details, override_flag } => {
                assert_eq!(guard, "stale_database");
                assert!(details.contains("tg-z"), "details should name tg-z: {details}");
                assert_eq!(override_flag, Some("--force"));
            }
            other => panic!("expected GuardBlocked, got {other:?}"),
        }
    }

    #[test]
    fn test_stale_database_guard_force_truncates_to_db() {
        let (_temp, tangle_dir) = setup_dir();
        let mut storage = SqliteStorage::open_memory().unwrap();
        storage.create_issue(&make_issue("tg-x", "X"), "tester").unwrap();
        storage.create_issue(&make_issue("tg-y", "Y"), "tester").unwrap();

        let output = tangle_dir.join("issues.jsonl");
        write_jsonl(
            &output,
            &[
                make_issue("tg-x", "X"),
                make_issue("tg-y", "Y"),
                make_issue("tg-z", "Z"),
            ],
        );

        let config = ExportConfig {
            force: true,
            ..Default::default()
        };
        let result = export_to_jsonl(&storage, &output, &config).unwrap();
        assert_eq!(result.exported_count, 2);

        let ids = get_issue_ids_from_jsonl(&output).unwrap();
        assert!(ids.contains("tg-x") && ids.contains("tg-y"));
        assert!(!ids.contains("tg-z"));
    }

    #[test]
    fn test_expired_tombstones_dropped_from_export() {
        let (_temp, tangle_dir) = setup_dir();
        let mut storage = SqliteStorage::open_memory().unwrap();
        storage.create_issue(&make_issue("tg-live", "Live"), "tester").unwrap();
        storage.create_issue(&make_issue("tg-dead", "Dead"), "tester").unwrap();
        storage.delete_issue("tg-dead", "tester", None).unwrap();

        // Backdate the tombstone past retention
        let old = (Utc::now() - Duration::days(90)).to_rfc3339();
        let updates = crate::storage::IssueUpdate {
            deleted_at: Some(Some(
                chrono::DateTime::parse_from_rfc3339(&old).unwrap().with_timezone(&Utc),
            )),
            ..Default::default()
        };
        storage.update_issue("tg-dead", &updates, "tester").unwrap();

        let output = tangle_dir.join("issues.jsonl");
        let config = ExportConfig {
            retention_days: Some(30),
            ..Default::default()
        };
        let result = export_to_jsonl(&storage, &output, &config).unwrap();
        assert_eq!(result.exported_count, 1);
        assert_eq!(result.skipped_tombstone_ids, vec!["tg-dead"]);
    }

    #[test]
    fn test_finalize_export_clears_dirty_and_sets_metadata() {
        let (_temp, tangle_dir) = setup_dir();
        let mut storage = SqliteStorage::open_memory().unwrap();
        storage.create_issue(&make_issue("tg-a", "A"), "tester").unwrap();
        assert_eq!(storage.get_dirty_issue_ids().unwrap().len(), 1);

        let output = tangle_dir.join("issues.jsonl");
        let result = export_to_jsonl(&storage, &output, &ExportConfig::default()).unwrap();
        let cleared = finalize_export(&mut storage, &result, false).unwrap();
        assert_eq!(cleared, 1);
        assert!(storage.get_dirty_issue_ids().unwrap().is_empty());
        assert_eq!(
            storage
                .get_metadata(METADATA_JSONL_CONTENT_HASH)
                .unwrap()
                .as_deref(),
            Some(result.content_hash.as_str())
        );
        assert!(storage.get_metadata(METADATA_LAST_EXPORT_TIME).unwrap().is_some());
        assert!(storage.get_export_hash("tg-a").unwrap().is_some());
    }

    #[test]
    fn test_conflict_marker_scan() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("issues.jsonl");
        fs::write(
            &path,
            "{\"id\":\"tg-a\",\"title\":\"A\"}\n<<<<<<< HEAD\n{\"id\":\"tg-b\"}\n=======\n{\"id\":\"tg-c\"}\n>>>>>>> branch\n",
        )
        .unwrap();

        let markers = scan_conflict_markers(&path).unwrap();
        assert_eq!(markers.len(), 3);
        assert_eq!(markers[0].marker_type, ConflictMarkerType::Start);
        assert_eq!(markers[0].line, 2);
        assert_eq!(markers[0].branch.as_deref(), Some("HEAD"));

        let err = ensure_no_conflict_markers(&path).unwrap_err();
        match err {
            TangleError::ConflictMarkers { count, first_line, .. } => {
                assert_eq!(count, 3);
                assert_eq!(first_line, 2);
            }
            other => panic!("expected ConflictMarkers, got {other:?}"),
        }
    }

    #[test]
    fn test_import_creates_new_issues() {
        let (_temp, tangle_dir) = setup_dir();
        let mut storage = SqliteStorage::open_memory().unwrap();

        let input = tangle_dir.join("issues.jsonl");
        let mut issue = make_issue("tg-new", "Fresh");
        issue.labels = vec!["imported".to_string()];
        write_jsonl(&input, &[issue]);

        let result =
            import_from_jsonl(&mut storage, &input, &ImportConfig::default(), Some("tg")).unwrap();
        assert_eq!(result.created, 1);
        assert_eq!(result.updated, 0);

        let loaded = storage.get_issue_for_export("tg-new").unwrap().unwrap();
        assert_eq!(loaded.title, "Fresh");
        assert_eq!(loaded.labels, vec!["imported"]);
    }

    #[test]
    fn test_import_newer_wins_older_skipped() {
        let (_temp, tangle_dir) = setup_dir();
        let mut storage = SqliteStorage::open_memory().unwrap();
        let mut existing = make_issue("tg-a", "Existing title");
        existing.updated_at = Utc::now();
        storage.create_issue(&existing, "tester").unwrap();

        let input = tangle_dir.join("issues.jsonl");

        // Older incoming record: skipped
        let mut older = make_issue("tg-a", "Stale title");
        older.updated_at = existing.updated_at - Duration::hours(1);
        write_jsonl(&input, &[older]);
        let result =
            import_from_jsonl(&mut storage, &input, &ImportConfig::default(), Some("tg")).unwrap();
        assert_eq!(result.skipped, 1);
        assert_eq!(
            storage.get_issue("tg-a").unwrap().unwrap().title,
            "Existing title"
        );

        // Strictly newer incoming record: wins
        let mut newer = make_issue("tg-a", "Newer title");
        newer.updated_at = existing.updated_at + Duration::hours(1);
        write_jsonl(&input, &[newer]);
        let result =
            import_from_jsonl(&mut storage, &input, &ImportConfig::default(), Some("tg")).unwrap();
        assert_eq!(result.updated, 1);
        assert_eq!(
            storage.get_issue("tg-a").unwrap().unwrap().title,
            "Newer title"
        );
    }

    #[test]
    fn test_import_never_resurrects_tombstones() {
        let (_temp, tangle_dir) = setup_dir();
        let mut storage = SqliteStorage::open_memory().unwrap();
        storage.create_issue(&make_issue("tg-dead", "Dead"), "tester").unwrap();
        storage.delete_issue("tg-dead", "tester", None).unwrap();

        let input = tangle_dir.join("issues.jsonl");
        let mut incoming = make_issue("tg-dead", "Back from the grave");
        incoming.updated_at = Utc::now() + Duration::hours(1);
        write_jsonl(&input, &[incoming]);

        let config = ImportConfig {
            force_upsert: true,
            ..Default::default()
        };
        let result = import_from_jsonl(&mut storage, &input, &config, Some("tg")).unwrap();
        assert_eq!(result.tombstone_skipped, 1);
        assert!(storage.is_tombstone("tg-dead").unwrap());
    }

    #[test]
    fn test_external_ref_match_beats_content_hash() {
        let (_temp, tangle_dir) = setup_dir();
        let mut storage = SqliteStorage::open_memory().unwrap();

        // Issue A carries the external ref; issue B has different content
        let mut a = make_issue("tg-a", "Tracked upstream");
        a.external_ref = Some("gh-42".to_string());
        storage.create_issue(&a, "tester").unwrap();
        let b = make_issue("tg-b", "Unrelated");
        storage.create_issue(&b, "tester").unwrap();

        // Incoming record: same external ref as A, but content identical to B
        let mut incoming = make_issue("tg-c", "Unrelated");
        incoming.external_ref = Some("gh-42".to_string());
        incoming.updated_at = Utc::now() + Duration::hours(1);

        let input = tangle_dir.join("issues.jsonl");
        write_jsonl(&input, &[incoming]);

        import_from_jsonl(&mut storage, &input, &ImportConfig::default(), Some("tg")).unwrap();

        // The external-ref phase matched A, so A was updated and B untouched
        assert_eq!(
            storage.get_issue("tg-a").unwrap().unwrap().title,
            "Unrelated"
        );
        assert_eq!(
            storage.get_issue("tg-b").unwrap().unwrap().title,
            "Unrelated"
        );
        assert!(storage.get_issue("tg-c").unwrap().is_none());
    }

    #[test]
    fn test_import_conflict_markers_leave_db_untouched() {
        let (_temp, tangle_dir) = setup_dir();
        let mut storage = SqliteStorage::open_memory().unwrap();

        let input = tangle_dir.join("issues.jsonl");
        fs::write(
            &input,
            "{\"id\":\"tg-a\",\"title\":\"A\"}\n<<<<<<< HEAD\n",
        )
        .unwrap();

        let err = import_from_jsonl(&mut storage, &input, &ImportConfig::default(), Some("tg"))
            .unwrap_err();
        assert!(matches!(err, TangleError::ConflictMarkers { .. }));
        assert_eq!(storage.count_issues().unwrap(), 0);
    }

    #[test]
    fn test_import_parse_error_leaves_db_untouched() {
        let (_temp, tangle_dir) = setup_dir();
        let mut storage = SqliteStorage::open_memory().unwrap();

        let input = tangle_dir.join("issues.jsonl");
        let valid_line = serde_json::to_string(&make_issue("tg-a", "A")).unwrap();
        fs::write(&input, format!("{valid_line}\nnot json at all\n")).unwrap();

        let err = import_from_jsonl(&mut storage, &input, &ImportConfig::default(), Some("tg"))
            .unwrap_err();
        match err {
            TangleError::JsonlParse { line, .. } => assert_eq!(line, 2),
            other => panic!("expected JsonlParse, got {other:?}"),
        }
        assert_eq!(storage.count_issues().unwrap(), 0);
    }

    #[test]
    fn test_import_best_effort_skips_bad_lines_and_reports() {
        let (_temp, tangle_dir) = setup_dir();
        let mut storage = SqliteStorage::open_memory().unwrap();

        let input = tangle_dir.join("issues.jsonl");
        let valid_line = serde_json::to_string(&make_issue("tg-good", "Good")).unwrap();
        fs::write(&input, format!("{valid_line}\nnot json at all\n")).unwrap();

        let config = ImportConfig {
            error_policy: SyncErrorPolicy::BestEffort,
            ..Default::default()
        };
        let result = import_from_jsonl(&mut storage, &input, &config, Some("tg")).unwrap();

        assert_eq!(result.created, 1);
        assert_eq!(result.line_errors.len(), 1);
        assert_eq!(result.line_errors[0].line, 2);
        assert_eq!(
            storage.get_issue("tg-good").unwrap().unwrap().title,
            "Good"
        );
    }

    #[test]
    fn test_guard_blocked_export_leaves_no_backup() {
        let (_temp, tangle_dir) = setup_dir();
        let storage = SqliteStorage::open_memory().unwrap();

        let output = tangle_dir.join("issues.jsonl");
        write_jsonl(&output, &[make_issue("tg-a", "Exists in file")]);

        let config = ExportConfig {
            tangle_dir: Some(tangle_dir.clone()),
            ..Default::default()
        };
        let err = export_to_jsonl(&storage, &output, &config).unwrap_err();
        assert!(matches!(err, TangleError::GuardBlocked { .. }));

        // A blocked export has no filesystem effect at all
        assert!(!tangle_dir.join(history::HISTORY_DIR_NAME).exists());
        assert!(!tangle_dir.join("issues.jsonl.tmp").exists());
    }

    #[test]
    fn test_failed_export_write_removes_temp_file() {
        let (_temp, tangle_dir) = setup_dir();
        let mut storage = SqliteStorage::open_memory().unwrap();
        storage.create_issue(&make_issue("tg-a", "Alpha"), "tester").unwrap();

        // A directory at the target path makes the final rename fail
        let output = tangle_dir.join("issues.jsonl");
        fs::create_dir_all(&output).unwrap();

        let config = ExportConfig {
            force: true,
            ..Default::default()
        };
        export_to_jsonl(&storage, &output, &config).unwrap_err();

        assert!(!tangle_dir.join("issues.jsonl.tmp").exists());
        assert!(output.is_dir(), "target left as-is");
    }

    #[cfg(unix)]
    #[test]
    fn test_export_sets_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let (_temp, tangle_dir) = setup_dir();
        let mut storage = SqliteStorage::open_memory().unwrap();
        storage.create_issue(&make_issue("tg-a", "Alpha"), "tester").unwrap();

        let output = tangle_dir.join("issues.jsonl");
        export_to_jsonl(&storage, &output, &ExportConfig::default()).unwrap();

        let mode = fs::metadata(&output).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_import_prefix_mismatch() {
        let (_temp, tangle_dir) = setup_dir();
        let mut storage = SqliteStorage::open_memory().unwrap();

        let input = tangle_dir.join("issues.jsonl");
        write_jsonl(&input, &[make_issue("other-abc", "Foreign")]);

        let err = import_from_jsonl(&mut storage, &input, &ImportConfig::default(), Some("tg"))
            .unwrap_err();
        assert!(matches!(err, TangleError::PrefixMismatch { .. }));
    }

    #[test]
    fn test_import_orphan_modes() {
        let (_temp, tangle_dir) = setup_dir();
        let input = tangle_dir.join("issues.jsonl");

        let mut issue = make_issue("tg-child", "Child");
        issue.dependencies = vec![Dependency::new("tg-child", "tg-ghost", DependencyType::Blocks)];
        write_jsonl(&input, &[issue]);

        // strict: error names the missing target
        let mut storage = SqliteStorage::open_memory().unwrap();
        let err = import_from_jsonl(&mut storage, &input, &ImportConfig::default(), Some("tg"))
            .unwrap_err();
        match err {
            TangleError::DependencyNotFound { id } => assert!(id.contains("tg-ghost")),
            other => panic!("expected DependencyNotFound, got {other:?}"),
        }
        assert_eq!(storage.count_issues().unwrap(), 0);

        // skip: the orphaned issue is dropped
        let mut storage = SqliteStorage::open_memory().unwrap();
        let config = ImportConfig {
            orphan_mode: OrphanMode::Skip,
            ..Default::default()
        };
        let result = import_from_jsonl(&mut storage, &input, &config, Some("tg")).unwrap();
        assert_eq!(result.skipped, 1);
        assert_eq!(storage.count_issues().unwrap(), 0);

        // allow: the issue lands with the dangling edge
        let mut storage = SqliteStorage::open_memory().unwrap();
        let config = ImportConfig {
            orphan_mode: OrphanMode::Allow,
            ..Default::default()
        };
        let result = import_from_jsonl(&mut storage, &input, &config, Some("tg")).unwrap();
        assert_eq!(result.created, 1);

        // resurrect: a placeholder is created for the missing target
        let mut storage = SqliteStorage::open_memory().unwrap();
        let config = ImportConfig {
            orphan_mode: OrphanMode::Resurrect,
            ..Default::default()
        };
        let result = import_from_jsonl(&mut storage, &input, &config, Some("tg")).unwrap();
        assert_eq!(result.created, 1);
        assert_eq!(result.resurrected, 1);
        assert!(storage.get_issue("tg-ghost").unwrap().is_some());
    }

    #[test]
    fn test_import_records_one_event_per_decision() {
        let (_temp, tangle_dir) = setup_dir();
        let mut storage = SqliteStorage::open_memory().unwrap();
        storage.create_issue(&make_issue("tg-old", "Old"), "tester").unwrap();

        let input = tangle_dir.join("issues.jsonl");
        let mut stale = make_issue("tg-old", "Older copy");
        stale.updated_at = Utc::now() - Duration::days(1);
        write_jsonl(&input, &[make_issue("tg-new", "New"), stale]);

        import_from_jsonl(&mut storage, &input, &ImportConfig::default(), Some("tg")).unwrap();

        // Verify the full list round-trips without duplicate events
        let ids = storage.get_all_ids().unwrap();
        assert_eq!(ids, vec!["tg-new", "tg-old"]);
    }

    #[test]
    fn test_compute_jsonl_hash_stable() {
        let temp = TempDir::new().unwrap();
        let p1 = temp.path().join("a.jsonl");
        let p2 = temp.path().join("b.jsonl");
        fs::write(&p1, "{\"id\":\"tg-a\"}\n").unwrap();
        fs::write(&p2, "{\"id\":\"tg-a\"}\n").unwrap();
        assert_eq!(
            compute_jsonl_hash(&p1).unwrap(),
            compute_jsonl_hash(&p2).unwrap()
        );
    }

    #[test]
    fn test_preflight_export_flags_guard_violations() {
        let (_temp, tangle_dir) = setup_dir();
        let storage = SqliteStorage::open_memory().unwrap();
        let output = tangle_dir.join("issues.jsonl");
        write_jsonl(&output, &[make_issue("tg-a", "A")]);

        let config = ExportConfig {
            tangle_dir: Some(tangle_dir),
            ..Default::default()
        };
        let result = preflight_export(&storage, &output, &config).unwrap();
        assert!(!result.has_no_failures());
        assert!(
            result
                .failures()
                .iter()
                .any(|c| c.name == "empty_database_guard")
        );
    }

    #[test]
    fn test_preflight_import_clean_file_passes() {
        let (_temp, tangle_dir) = setup_dir();
        let input = tangle_dir.join("issues.jsonl");
        write_jsonl(&input, &[make_issue("tg-a", "A")]);

        let config = ImportConfig {
            tangle_dir: Some(tangle_dir),
            ..Default::default()
        };
        let result = preflight_import(&input, &config).unwrap();
        assert!(result.is_ok(), "failures: {:?}", result.failures());
    }

    #[test]
    fn test_export_policy_parsing() {
        assert_eq!(
            "best-effort".parse::<SyncErrorPolicy>().unwrap(),
            SyncErrorPolicy::BestEffort
        );
        assert_eq!(
            "required_core".parse::<SyncErrorPolicy>().unwrap(),
            SyncErrorPolicy::RequiredCore
        );
        assert!("bogus".parse::<SyncErrorPolicy>().is_err());
        assert_eq!("skip".parse::<OrphanMode>().unwrap(), OrphanMode::Skip);
    }
}
