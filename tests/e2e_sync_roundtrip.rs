//! End-to-end export/import round trip through the real binary.
//!
//! Covers the flush path (atomic write, dirty-flag clearing, manifest),
//! the import path (collision resolution, short-circuit on unchanged
//! content), sync status reporting, and export history backups.

mod common;

use chrono::{Duration, Utc};
use common::cli::{TgWorkspace, run_tg};
use std::fs;

/// Read the exported JSONL as a vec of parsed lines.
fn read_jsonl_values(ws: &TgWorkspace) -> Vec<serde_json::Value> {
    let content = fs::read_to_string(ws.jsonl_path()).expect("read jsonl");
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).expect("valid JSONL line"))
        .collect()
}

/// Rewrite the JSONL file from parsed lines.
fn write_jsonl_values(ws: &TgWorkspace, values: &[serde_json::Value]) {
    let mut out = String::new();
    for v in values {
        out.push_str(&serde_json::to_string(v).unwrap());
        out.push('\n');
    }
    fs::write(ws.jsonl_path(), out).expect("write jsonl");
}

#[test]
fn flush_exports_issues_sorted_by_id() {
    let ws = TgWorkspace::initialized();
    let mut ids = vec![
        ws.create_issue("Gamma"),
        ws.create_issue("Alpha"),
        ws.create_issue("Beta"),
    ];

    let run = run_tg(&ws, ["sync", "--flush-only"], "flush");
    run.assert_success("flush");
    assert!(run.stdout.contains("Exported 3 issues"));

    let lines = read_jsonl_values(&ws);
    let exported: Vec<String> = lines
        .iter()
        .map(|v| v["id"].as_str().unwrap().to_string())
        .collect();
    ids.sort();
    assert_eq!(exported, ids, "JSONL must be sorted by id");
}

#[test]
fn flush_twice_reports_nothing_to_export() {
    let ws = TgWorkspace::initialized();
    ws.create_issue("Only one");
    run_tg(&ws, ["sync", "--flush-only"], "flush1").assert_success("first flush");

    let second = run_tg(&ws, ["sync", "--flush-only"], "flush2");
    second.assert_success("second flush");
    assert!(second.stdout.contains("Nothing to export"));
}

#[test]
fn flush_writes_manifest_when_requested() {
    let ws = TgWorkspace::initialized();
    let id = ws.create_issue("Tracked");

    let run = run_tg(&ws, ["sync", "--flush-only", "--manifest"], "flush_manifest");
    run.assert_success("flush with manifest");

    let manifest_path = ws.tangle_dir().join(".manifest.json");
    assert!(manifest_path.is_file(), "manifest must be written");
    let manifest: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&manifest_path).unwrap()).unwrap();
    assert_eq!(manifest["issues_count"], 1);
    assert!(manifest["exported_ids"]
        .as_array()
        .unwrap()
        .iter()
        .any(|v| v == id.as_str()));
    assert!(manifest["content_hash"].as_str().unwrap().len() == 64);
}

#[test]
fn flush_leaves_no_temp_file_behind() {
    let ws = TgWorkspace::initialized();
    ws.create_issue("Atomic");
    run_tg(&ws, ["sync", "--flush-only"], "flush").assert_success("flush");

    let leftovers: Vec<_> = fs::read_dir(ws.tangle_dir())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty(), "temp file must be renamed away");
}

#[test]
fn import_is_short_circuited_when_jsonl_unchanged() {
    let ws = TgWorkspace::initialized();
    ws.create_issue("Stable");
    run_tg(&ws, ["sync", "--flush-only"], "flush").assert_success("flush");

    let run = run_tg(&ws, ["sync", "--import-only"], "import_unchanged");
    run.assert_success("import unchanged");
    assert!(run.stdout.contains("JSONL is current"));
}

#[test]
fn import_applies_newer_edits_from_jsonl() {
    let ws = TgWorkspace::initialized();
    let id = ws.create_issue("Original title");
    run_tg(&ws, ["sync", "--flush-only"], "flush").assert_success("flush");

    let mut lines = read_jsonl_values(&ws);
    lines[0]["title"] = serde_json::json!("Edited elsewhere");
    lines[0]["updated_at"] =
        serde_json::json!((Utc::now() + Duration::seconds(60)).to_rfc3339());
    write_jsonl_values(&ws, &lines);

    let run = run_tg(&ws, ["sync", "--import-only"], "import_newer");
    run.assert_success("import newer");
    assert!(run.stdout.contains("1 updated"), "stdout: {}", run.stdout);

    let shown = run_tg(&ws, ["--json", "show", &id], "show_after");
    shown.assert_success("show");
    let value: serde_json::Value = serde_json::from_str(&shown.stdout).unwrap();
    assert_eq!(value["title"], "Edited elsewhere");
}

#[test]
fn import_skips_edits_with_equal_timestamp() {
    let ws = TgWorkspace::initialized();
    let id = ws.create_issue("Keep me");
    run_tg(&ws, ["sync", "--flush-only"], "flush").assert_success("flush");

    // Same updated_at as the database row: content differs but the
    // incoming copy is not strictly newer, so the database wins.
    let mut lines = read_jsonl_values(&ws);
    lines[0]["title"] = serde_json::json!("Sneaky rewrite");
    write_jsonl_values(&ws, &lines);

    let run = run_tg(&ws, ["sync", "--import-only"], "import_equal");
    run.assert_success("import equal timestamp");
    assert!(run.stdout.contains("skipped 1"), "stdout: {}", run.stdout);

    let shown = run_tg(&ws, ["--json", "show", &id], "show_kept");
    let value: serde_json::Value = serde_json::from_str(&shown.stdout).unwrap();
    assert_eq!(value["title"], "Keep me");
}

#[test]
fn import_creates_issues_unknown_to_database() {
    let ws = TgWorkspace::initialized();
    ws.create_issue("Local");
    run_tg(&ws, ["sync", "--flush-only"], "flush").assert_success("flush");

    let mut lines = read_jsonl_values(&ws);
    let mut incoming = lines[0].clone();
    incoming["id"] = serde_json::json!("tg-remote1");
    incoming["title"] = serde_json::json!("Created on another machine");
    incoming["updated_at"] =
        serde_json::json!((Utc::now() + Duration::seconds(5)).to_rfc3339());
    lines.push(incoming);
    write_jsonl_values(&ws, &lines);

    let run = run_tg(&ws, ["sync", "--import-only"], "import_new");
    run.assert_success("import new");
    assert!(run.stdout.contains("1 created"), "stdout: {}", run.stdout);

    let shown = run_tg(&ws, ["show", "tg-remote1"], "show_imported");
    shown.assert_success("show imported");
    assert!(shown.stdout.contains("Created on another machine"));
}

#[test]
fn imported_issues_are_not_marked_dirty() {
    let ws = TgWorkspace::initialized();
    ws.create_issue("Seed");
    run_tg(&ws, ["sync", "--flush-only"], "flush").assert_success("flush");

    let mut lines = read_jsonl_values(&ws);
    lines[0]["title"] = serde_json::json!("Synced edit");
    lines[0]["updated_at"] =
        serde_json::json!((Utc::now() + Duration::seconds(60)).to_rfc3339());
    write_jsonl_values(&ws, &lines);
    run_tg(&ws, ["sync", "--import-only"], "import").assert_success("import");

    let status = run_tg(&ws, ["--json", "sync", "--status"], "status_after_import");
    status.assert_success("status");
    let value: serde_json::Value = serde_json::from_str(&status.stdout).unwrap();
    assert_eq!(value["dirty_count"], 0, "import must not re-dirty issues");
}

#[test]
fn sync_status_reflects_pending_work() {
    let ws = TgWorkspace::initialized();
    let id = ws.create_issue("Pending");

    let dirty = run_tg(&ws, ["sync", "--status"], "status_dirty");
    dirty.assert_success("status dirty");
    assert!(dirty.stdout.contains("dirty issues:  1"));
    assert!(dirty.stdout.contains("Database is newer"));

    run_tg(&ws, ["sync", "--flush-only"], "flush").assert_success("flush");
    let clean = run_tg(&ws, ["sync", "--status"], "status_clean");
    clean.assert_success("status clean");
    assert!(clean.stdout.contains("In sync"));

    // A content edit to the JSONL is detected even when import state is
    // otherwise current.
    let mut lines = read_jsonl_values(&ws);
    lines[0]["title"] = serde_json::json!("Changed on disk");
    write_jsonl_values(&ws, &lines);
    let _ = id;

    let jsonl_newer = run_tg(&ws, ["sync", "--status"], "status_jsonl_newer");
    jsonl_newer.assert_success("status jsonl newer");
    assert!(jsonl_newer.stdout.contains("JSONL is newer"));
}

#[test]
fn import_dry_run_reports_without_mutating() {
    let ws = TgWorkspace::initialized();
    ws.create_issue("Seed");
    run_tg(&ws, ["sync", "--flush-only"], "flush").assert_success("flush");

    let mut lines = read_jsonl_values(&ws);
    let mut incoming = lines[0].clone();
    incoming["id"] = serde_json::json!("tg-dryrun1");
    incoming["title"] = serde_json::json!("Would be created");
    lines.push(incoming);
    write_jsonl_values(&ws, &lines);

    let run = run_tg(&ws, ["sync", "--import-only", "--dry-run"], "dry_run");
    run.assert_success("dry run always exits 0");
    assert!(run.stdout.contains("Preflight"));

    let shown = run_tg(&ws, ["show", "tg-dryrun1"], "show_not_imported");
    shown.assert_exit_code(3, "dry run must not import");
}

#[test]
fn second_flush_backs_up_previous_export() {
    let ws = TgWorkspace::initialized();
    let id = ws.create_issue("Versioned");
    run_tg(&ws, ["sync", "--flush-only"], "flush1").assert_success("first flush");

    run_tg(&ws, ["update", &id, "--title", "Versioned v2"], "update")
        .assert_success("update");
    run_tg(&ws, ["sync", "--flush-only"], "flush2").assert_success("second flush");

    let history_dir = ws.tangle_dir().join(".tg_history");
    assert!(history_dir.is_dir(), "history dir must exist");
    let backups: Vec<_> = fs::read_dir(&history_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".jsonl"))
        .collect();
    assert_eq!(backups.len(), 1, "one backup of the pre-overwrite export");

    let backup_content = fs::read_to_string(backups[0].path()).unwrap();
    assert!(
        backup_content.contains("Versioned") && !backup_content.contains("Versioned v2"),
        "backup holds the previous export"
    );
}
