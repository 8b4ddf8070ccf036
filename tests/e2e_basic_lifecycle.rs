//! End-to-end lifecycle tests: init, create, list, show, update, close,
//! delete, and dependency management through the real binary.

mod common;

use common::cli::{TgWorkspace, run_tg};
use predicates::prelude::*;

#[test]
fn init_creates_workspace_layout() {
    let ws = TgWorkspace::new();
    let run = run_tg(&ws, ["init"], "init");
    run.assert_success("init");
    assert!(run.stdout.contains("Initialized tangle workspace"));
    assert!(ws.tangle_dir().is_dir());
    assert!(ws.db_path().is_file());
    assert!(ws.tangle_dir().join("metadata.json").is_file());
}

#[test]
fn init_twice_fails_without_force() {
    let ws = TgWorkspace::initialized();
    let run = run_tg(&ws, ["init"], "init_again");
    run.assert_exit_code(7, "second init");
    assert!(run.stderr.contains("ALREADY_INITIALIZED"));

    run_tg(&ws, ["init", "--force"], "init_force").assert_success("forced re-init");
}

#[test]
fn commands_outside_workspace_fail_with_not_initialized() {
    let ws = TgWorkspace::new();
    let run = run_tg(&ws, ["list"], "list_no_init");
    run.assert_exit_code(7, "list without init");
    assert!(run.stderr.contains("NOT_INITIALIZED"));
}

#[test]
fn create_assigns_prefixed_id() {
    let ws = TgWorkspace::initialized();
    let run = run_tg(&ws, ["create", "Fix login timeout"], "create");
    run.assert_success("create");
    assert!(run.stdout.contains("Created tg-"));
    assert!(run.stdout.contains("Fix login timeout"));
}

#[test]
fn create_silent_prints_only_id() {
    let ws = TgWorkspace::initialized();
    let id = ws.create_issue("Quiet one");
    assert!(id.starts_with("tg-"), "got: {id}");
    assert!(!id.contains(' '));
}

#[test]
fn create_json_output_is_parseable() {
    let ws = TgWorkspace::initialized();
    let run = run_tg(
        &ws,
        ["--json", "create", "Structured", "--priority", "1", "--type", "bug"],
        "create_json",
    );
    run.assert_success("create --json");
    let value: serde_json::Value = serde_json::from_str(&run.stdout).expect("valid JSON");
    assert!(value["id"].as_str().unwrap().starts_with("tg-"));
    assert_eq!(value["title"], "Structured");
}

#[test]
fn create_rejects_blank_title() {
    let ws = TgWorkspace::initialized();
    let run = run_tg(&ws, ["create", "   "], "create_blank");
    run.assert_exit_code(4, "blank title");
    assert!(run.stderr.contains("VALIDATION_FAILED"));
}

#[test]
fn list_filters_by_status_and_assignee() {
    let ws = TgWorkspace::initialized();
    let a = ws.create_issue("First task");
    let b = ws.create_issue("Second task");
    run_tg(&ws, ["update", &b, "--assignee", "mel"], "assign").assert_success("assign");
    run_tg(&ws, ["close", &a], "close_a").assert_success("close");

    let open = run_tg(&ws, ["list", "--status", "open"], "list_open");
    open.assert_success("list open");
    assert!(open.stdout.contains(&b));
    assert!(!open.stdout.contains(&a));

    let assigned = run_tg(&ws, ["list", "--assignee", "mel"], "list_assignee");
    assigned.assert_success("list assignee");
    assert!(assigned.stdout.contains(&b));
}

#[test]
fn list_hides_tombstones_unless_all() {
    let ws = TgWorkspace::initialized();
    let id = ws.create_issue("Doomed");
    run_tg(&ws, ["delete", &id], "delete").assert_success("delete");

    let plain = run_tg(&ws, ["list"], "list_plain");
    plain.assert_success("list");
    assert!(!plain.stdout.contains(&id));

    let all = run_tg(&ws, ["list", "--all"], "list_all");
    all.assert_success("list --all");
    assert!(all.stdout.contains(&id));
}

#[test]
fn show_displays_issue_details() {
    let ws = TgWorkspace::initialized();
    let run = run_tg(
        &ws,
        [
            "create",
            "Detailed issue",
            "--description",
            "Has a body",
            "--labels",
            "backend,urgent",
            "--silent",
        ],
        "create_detailed",
    );
    run.assert_success("create");
    let id = run.stdout.trim().to_string();

    let show = run_tg(&ws, ["show", &id], "show");
    show.assert_success("show");
    assert!(show.stdout.contains("Detailed issue"));
    assert!(show.stdout.contains("Has a body"));
    assert!(show.stdout.contains("backend"));
}

#[test]
fn show_unknown_id_exits_3() {
    let ws = TgWorkspace::initialized();
    let run = run_tg(&ws, ["show", "tg-nope"], "show_missing");
    run.assert_exit_code(3, "show missing");
    assert!(run.stderr.contains("ISSUE_NOT_FOUND"));
}

#[test]
fn update_changes_fields_and_clears_with_empty_string() {
    let ws = TgWorkspace::initialized();
    let id = ws.create_issue("Mutable");
    run_tg(
        &ws,
        ["update", &id, "--description", "now has one", "--priority", "0"],
        "update_set",
    )
    .assert_success("update set");

    let shown = run_tg(&ws, ["--json", "show", &id], "show_updated");
    shown.assert_success("show");
    let value: serde_json::Value = serde_json::from_str(&shown.stdout).unwrap();
    assert_eq!(value["description"], "now has one");
    assert_eq!(value["priority"], 0);

    run_tg(&ws, ["update", &id, "--description", ""], "update_clear")
        .assert_success("update clear");
    let cleared = run_tg(&ws, ["--json", "show", &id], "show_cleared");
    let value: serde_json::Value = serde_json::from_str(&cleared.stdout).unwrap();
    assert!(value["description"].is_null());
}

#[test]
fn close_is_idempotent_via_skip() {
    let ws = TgWorkspace::initialized();
    let id = ws.create_issue("Close me");
    let first = run_tg(&ws, ["close", &id, "--reason", "done"], "close_first");
    first.assert_success("first close");
    assert!(first.stdout.contains("Closed"));

    let second = run_tg(&ws, ["close", &id], "close_second");
    second.assert_success("second close");
    assert!(second.stdout.contains("Skipped"));
}

#[test]
fn delete_creates_tombstone() {
    let ws = TgWorkspace::initialized();
    let id = ws.create_issue("Delete me");
    let run = run_tg(&ws, ["delete", &id, "--reason", "obsolete"], "delete");
    run.assert_success("delete");
    assert!(run.stdout.contains("tombstone"));

    let again = run_tg(&ws, ["delete", &id], "delete_again");
    again.assert_success("repeat delete");
    assert!(again.stdout.contains("Skipped"));
}

#[test]
fn dep_add_list_remove_cycle() {
    let ws = TgWorkspace::initialized();
    let a = ws.create_issue("Upstream");
    let b = ws.create_issue("Downstream");

    run_tg(&ws, ["dep", "add", &b, &a], "dep_add").assert_success("dep add");

    let listed = run_tg(&ws, ["dep", "list", &b], "dep_list");
    listed.assert_success("dep list");
    assert!(listed.stdout.contains(&a));
    assert!(listed.stdout.contains("blocks"));

    let removed = run_tg(&ws, ["dep", "remove", &b, &a], "dep_remove");
    removed.assert_success("dep remove");
    assert!(removed.stdout.contains("Removed"));

    let empty = run_tg(&ws, ["dep", "list", &b], "dep_list_empty");
    empty.assert_success("dep list empty");
    assert!(empty.stdout.contains("no dependencies"));
}

#[test]
fn dep_add_rejects_self_dependency() {
    let ws = TgWorkspace::initialized();
    let a = ws.create_issue("Loner");
    let run = run_tg(&ws, ["dep", "add", &a, &a], "dep_self");
    run.assert_exit_code(4, "self dependency");
    assert!(run.stderr.contains("SELF_DEPENDENCY"));
}

#[test]
fn dep_add_rejects_unknown_target() {
    let ws = TgWorkspace::initialized();
    let a = ws.create_issue("Real");
    let run = run_tg(&ws, ["dep", "add", &a, "tg-ghost"], "dep_ghost");
    run.assert_exit_code(4, "unknown target");
    assert!(run.stderr.contains("DEPENDENCY_NOT_FOUND"));
}

#[test]
fn error_output_is_structured_json_when_piped() {
    let ws = TgWorkspace::initialized();
    let run = run_tg(&ws, ["show", "tg-missing"], "structured_err");
    run.assert_exit_code(3, "missing id");
    let value: serde_json::Value =
        serde_json::from_str(&run.stderr).expect("stderr should be JSON when piped");
    assert_eq!(value["error"]["code"], "ISSUE_NOT_FOUND");
    assert!(
        predicate::str::contains("tg-missing").eval(&value["error"]["message"].to_string()),
        "message should name the id"
    );
}
