//! Sync command: export (flush), import, and status.

use super::GlobalOpts;
use crate::cli::SyncArgs;
use crate::config::{self, ConfigPaths};
use crate::error::{Result, TangleError};
use crate::storage::SqliteStorage;
use crate::sync::{
    self, ExportConfig, SyncErrorPolicy, ImportConfig, OrphanMode,
    METADATA_JSONL_CONTENT_HASH, METADATA_LAST_EXPORT_TIME, METADATA_LAST_IMPORT_TIME,
    PreflightCheckStatus,
};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Result of a flush (export) for JSON output.
#[derive(Debug, Serialize)]
struct FlushResult {
    exported_issues: usize,
    exported_dependencies: usize,
    exported_labels: usize,
    content_hash: String,
    cleared_dirty: usize,
    policy: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    manifest_path: Option<String>,
}

/// Result of an import for JSON output.
#[derive(Debug, Serialize)]
struct ImportResultOutput {
    created: usize,
    updated: usize,
    skipped: usize,
    tombstone_skipped: usize,
    #[serde(skip_serializing_if = "is_zero")]
    resurrected: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    line_errors: Vec<sync::ImportLineError>,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_zero(n: &usize) -> bool {
    *n == 0
}

/// Sync status report.
#[derive(Debug, Serialize)]
struct SyncStatus {
    dirty_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_export_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_import_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    jsonl_content_hash: Option<String>,
    jsonl_exists: bool,
    jsonl_newer: bool,
    db_newer: bool,
}

/// Resolved and validated paths for a sync operation.
struct SyncPathPolicy {
    jsonl_path: PathBuf,
    manifest_path: PathBuf,
    tangle_dir: PathBuf,
    is_external: bool,
}

/// Execute the sync command.
///
/// # Errors
///
/// Returns a validation error when neither or both modes are selected, or
/// whatever the selected mode returns.
pub fn execute(args: &SyncArgs, opts: &GlobalOpts) -> Result<()> {
    let (mut storage, paths) = opts.open()?;

    if args.status {
        return execute_status(&storage, &paths, opts.json);
    }

    if args.flush_only == args.import_only {
        return Err(TangleError::validation(
            "mode",
            "Must specify exactly one of --flush-only or --import-only",
        ));
    }

    let policy = validate_sync_paths(&paths, args)?;

    if args.flush_only {
        execute_flush(&mut storage, &paths, &policy, args, opts)
    } else {
        execute_import(&mut storage, &paths, &policy, args, opts)
    }
}

/// Resolve the JSONL path and enforce confinement up front.
///
/// External paths (from `--jsonl` or `TANGLE_JSONL`) require the explicit
/// `--allow-external-jsonl` flag; `.git/` paths are rejected outright.
fn validate_sync_paths(paths: &ConfigPaths, args: &SyncArgs) -> Result<SyncPathPolicy> {
    let jsonl_path = args
        .jsonl
        .clone()
        .unwrap_or_else(|| paths.jsonl_path.clone());

    let file_name = jsonl_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    if !file_name.ends_with(".jsonl") {
        return Err(TangleError::PathConfinement {
            path: jsonl_path,
            reason: "sync file must have a .jsonl extension".to_string(),
        });
    }

    let canonical_tangle = paths
        .tangle_dir
        .canonicalize()
        .unwrap_or_else(|_| paths.tangle_dir.clone());
    let is_external = !jsonl_path.starts_with(&paths.tangle_dir)
        && !jsonl_path.starts_with(&canonical_tangle);

    if is_external && !args.allow_external_jsonl {
        let source = if paths.jsonl_from_env && args.jsonl.is_none() {
            "TANGLE_JSONL"
        } else {
            "--jsonl"
        };
        warn!(
            path = %jsonl_path.display(),
            source,
            "External JSONL path rejected without --allow-external-jsonl"
        );
        return Err(TangleError::PathConfinement {
            path: jsonl_path,
            reason: format!(
                "path from {source} is outside {}; pass --allow-external-jsonl to use it",
                paths.tangle_dir.display()
            ),
        });
    }

    sync::require_sync_path_with_external(
        &jsonl_path,
        &paths.tangle_dir,
        args.allow_external_jsonl,
    )?;

    if is_external {
        info!(path = %jsonl_path.display(), "Using external JSONL path (explicitly allowed)");
    }

    let manifest_path = jsonl_path
        .parent()
        .map_or_else(|| PathBuf::from(".manifest.json"), |p| p.join(".manifest.json"));

    Ok(SyncPathPolicy {
        jsonl_path,
        manifest_path,
        tangle_dir: paths.tangle_dir.clone(),
        is_external,
    })
}

fn execute_status(storage: &SqliteStorage, paths: &ConfigPaths, json: bool) -> Result<()> {
    let dirty_count = storage.get_dirty_issue_ids()?.len();
    let last_export_time = storage.get_metadata(METADATA_LAST_EXPORT_TIME)?;
    let last_import_time = storage.get_metadata(METADATA_LAST_IMPORT_TIME)?;
    let stored_hash = storage.get_metadata(METADATA_JSONL_CONTENT_HASH)?;

    let jsonl_exists = paths.jsonl_path.exists();

    // Mtime is only a hint; a `touch` shouldn't trigger a false positive,
    // so an mtime-newer file is confirmed against the stored content hash.
    let mut jsonl_newer = false;
    if jsonl_exists {
        let mtime_newer = match (
            std::fs::symlink_metadata(&paths.jsonl_path).and_then(|m| m.modified()),
            last_import_time.as_deref(),
        ) {
            (Ok(modified), Some(imported)) => {
                chrono::DateTime::parse_from_rfc3339(imported).is_ok_and(|imported_at| {
                    chrono::DateTime::<chrono::Utc>::from(modified)
                        > imported_at.with_timezone(&chrono::Utc)
                })
            }
            (Ok(_), None) => true,
            (Err(_), _) => false,
        };

        if mtime_newer {
            let current_hash = sync::compute_jsonl_hash(&paths.jsonl_path)?;
            jsonl_newer = stored_hash.as_deref() != Some(current_hash.as_str());
        }
    }

    let status = SyncStatus {
        dirty_count,
        last_export_time,
        last_import_time,
        jsonl_content_hash: stored_hash,
        jsonl_exists,
        jsonl_newer,
        db_newer: dirty_count > 0,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("Sync status:");
    println!("  dirty issues:  {}", status.dirty_count);
    println!(
        "  last export:   {}",
        status.last_export_time.as_deref().unwrap_or("never")
    );
    println!(
        "  last import:   {}",
        status.last_import_time.as_deref().unwrap_or("never")
    );
    println!("  JSONL exists:  {}", status.jsonl_exists);
    if status.jsonl_newer && status.db_newer {
        println!("  Both changed: import first, then export.");
    } else if status.jsonl_newer {
        println!("  JSONL is newer (import recommended)");
    } else if status.db_newer {
        println!("  Database is newer (export recommended)");
    } else {
        println!("  In sync");
    }

    Ok(())
}

#[allow(clippy::too_many_lines)]
fn execute_flush(
    storage: &mut SqliteStorage,
    paths: &ConfigPaths,
    policy: &SyncPathPolicy,
    args: &SyncArgs,
    opts: &GlobalOpts,
) -> Result<()> {
    let error_policy = args
        .error_policy
        .as_deref()
        .map(str::parse::<SyncErrorPolicy>)
        .transpose()
        .map_err(|e| TangleError::validation("error-policy", e))?
        .unwrap_or_default();

    let dirty_count = storage.get_dirty_issue_ids()?.len();
    debug!(dirty_count, force = args.force, "Starting flush");

    if dirty_count == 0 && !args.force && policy.jsonl_path.exists() {
        // Nothing changed; still run the guards so a stale or empty DB is
        // reported rather than silently declared in sync.
        let export_config = ExportConfig {
            force: false,
            error_policy,
            retention_days: paths.metadata.deletions_retention_days,
            tangle_dir: Some(policy.tangle_dir.clone()),
            allow_external_jsonl: args.allow_external_jsonl,
            ..Default::default()
        };
        let preflight = sync::preflight_export(storage, &policy.jsonl_path, &export_config)?;
        if preflight.has_no_failures() {
            if opts.json {
                println!("{}", serde_json::json!({ "exported_issues": 0, "up_to_date": true }));
            } else {
                println!("Nothing to export (no dirty issues).");
            }
            return Ok(());
        }
        // Fall through: the full export path raises the precise guard error
    }

    let export_config = ExportConfig {
        force: args.force,
        error_policy,
        retention_days: paths.metadata.deletions_retention_days,
        tangle_dir: Some(policy.tangle_dir.clone()),
        allow_external_jsonl: args.allow_external_jsonl,
        ..Default::default()
    };

    let (result, report) =
        sync::export_to_jsonl_with_policy(storage, &policy.jsonl_path, &export_config)?;
    let cleared = sync::finalize_export(storage, &result, args.force)?;

    info!(
        exported = result.exported_count,
        cleared_dirty = cleared,
        external = policy.is_external,
        "Export complete"
    );

    let manifest_path = if args.manifest {
        let manifest = serde_json::json!({
            "export_time": chrono::Utc::now().to_rfc3339(),
            "issues_count": result.exported_count,
            "content_hash": result.content_hash,
            "exported_ids": result.exported_ids,
            "policy": report.policy_used.to_string(),
            "errors": report.errors.iter().map(sync::ExportError::summary).collect::<Vec<_>>(),
        });
        std::fs::write(
            &policy.manifest_path,
            serde_json::to_string_pretty(&manifest)?,
        )?;
        Some(policy.manifest_path.display().to_string())
    } else {
        None
    };

    if opts.json {
        let output = FlushResult {
            exported_issues: report.issues_exported,
            exported_dependencies: report.dependencies_exported,
            exported_labels: report.labels_exported,
            content_hash: result.content_hash,
            cleared_dirty: cleared,
            policy: report.policy_used.to_string(),
            errors: report.errors.iter().map(sync::ExportError::summary).collect(),
            manifest_path,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        let plural = if result.exported_count == 1 { "" } else { "s" };
        println!(
            "Exported {} issue{plural} to {}",
            result.exported_count,
            policy.jsonl_path.display()
        );
        if !result.skipped_tombstone_ids.is_empty() {
            println!(
                "  dropped {} expired tombstone(s)",
                result.skipped_tombstone_ids.len()
            );
        }
        if report.has_errors() {
            println!("  {} record error(s) under policy {}", report.errors.len(), report.policy_used);
        }
        if let Some(path) = manifest_path {
            println!("  manifest: {path}");
        }
    }

    Ok(())
}

fn execute_import(
    storage: &mut SqliteStorage,
    paths: &ConfigPaths,
    policy: &SyncPathPolicy,
    args: &SyncArgs,
    opts: &GlobalOpts,
) -> Result<()> {
    if !policy.jsonl_path.exists() {
        if opts.json {
            println!("{}", serde_json::json!({ "imported": 0, "skipped_missing_file": true }));
        } else {
            println!(
                "No JSONL file at {}; nothing to import.",
                policy.jsonl_path.display()
            );
        }
        return Ok(());
    }

    let orphan_mode = args
        .orphans
        .as_deref()
        .map(str::parse::<OrphanMode>)
        .transpose()
        .map_err(|e| TangleError::validation("orphans", e))?
        .unwrap_or_default();

    let error_policy = args
        .error_policy
        .as_deref()
        .map(str::parse::<SyncErrorPolicy>)
        .transpose()
        .map_err(|e| TangleError::validation("error-policy", e))?
        .unwrap_or_default();

    let import_config = ImportConfig {
        orphan_mode,
        force_upsert: args.force,
        tangle_dir: Some(policy.tangle_dir.clone()),
        allow_external_jsonl: args.allow_external_jsonl,
        actor: opts.actor(),
        error_policy,
        ..Default::default()
    };

    if args.dry_run {
        return run_import_preflight(&policy.jsonl_path, &import_config, opts.json);
    }

    // Short-circuit when the file hasn't changed since the last sync
    if !args.force {
        let current_hash = sync::compute_jsonl_hash(&policy.jsonl_path)?;
        if storage.get_metadata(METADATA_JSONL_CONTENT_HASH)?.as_deref()
            == Some(current_hash.as_str())
        {
            debug!("JSONL content hash unchanged, skipping import");
            if opts.json {
                println!("{}", serde_json::json!({ "imported": 0, "up_to_date": true }));
            } else {
                println!("JSONL is current; nothing to import.");
            }
            return Ok(());
        }
    }

    let prefix = config::resolve_prefix(storage, &paths.metadata)?;
    let result =
        sync::import_from_jsonl(storage, &policy.jsonl_path, &import_config, Some(&prefix))?;

    info!(
        created = result.created,
        updated = result.updated,
        skipped = result.skipped,
        tombstone_skipped = result.tombstone_skipped,
        "Import complete"
    );

    if opts.json {
        let output = ImportResultOutput {
            created: result.created,
            updated: result.updated,
            skipped: result.skipped,
            tombstone_skipped: result.tombstone_skipped,
            resurrected: result.resurrected,
            line_errors: result.line_errors.clone(),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!(
            "Imported {} issue(s) ({} created, {} updated) from {}",
            result.imported_count(),
            result.created,
            result.updated,
            policy.jsonl_path.display()
        );
        if result.skipped > 0 {
            println!("  skipped {} (existing newer or equal)", result.skipped);
        }
        if result.tombstone_skipped > 0 {
            println!("  skipped {} tombstone-protected", result.tombstone_skipped);
        }
        if result.resurrected > 0 {
            println!("  resurrected {} placeholder(s)", result.resurrected);
        }
        if !result.line_errors.is_empty() {
            println!(
                "  skipped {} unparseable line(s) under policy best-effort",
                result.line_errors.len()
            );
            for err in &result.line_errors {
                println!("    line {}: {}", err.line, err.reason);
            }
        }
    }

    Ok(())
}

fn run_import_preflight(
    jsonl_path: &std::path::Path,
    config: &ImportConfig,
    json: bool,
) -> Result<()> {
    let result = sync::preflight_import(jsonl_path, config)?;

    if json {
        let checks: Vec<serde_json::Value> = result
            .checks
            .iter()
            .map(|c| {
                serde_json::json!({
                    "name": c.name,
                    "status": format!("{:?}", c.status).to_lowercase(),
                    "message": c.message,
                    "remediation": c.remediation,
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "ok": result.has_no_failures(),
                "checks": checks,
            }))?
        );
    } else {
        for check in &result.checks {
            let marker = match check.status {
                PreflightCheckStatus::Pass => "ok  ",
                PreflightCheckStatus::Warn => "warn",
                PreflightCheckStatus::Fail => "FAIL",
            };
            println!("[{marker}] {}: {}", check.name, check.message);
            if check.status != PreflightCheckStatus::Pass {
                if let Some(ref remediation) = check.remediation {
                    println!("       hint: {remediation}");
                }
            }
        }
        if result.has_no_failures() {
            println!("Preflight passed; import would proceed.");
        } else {
            println!("Preflight failed; import would be rejected.");
        }
    }

    // Dry-run reports, it never mutates; a failing preflight still exits 0
    Ok(())
}
