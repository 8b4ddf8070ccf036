//! Show command implementation.

use super::GlobalOpts;
use crate::error::{Result, TangleError};

/// Execute the show command.
///
/// # Errors
///
/// Returns `IssueNotFound` if any requested ID is unknown.
pub fn execute(ids: &[String], opts: &GlobalOpts) -> Result<()> {
    if ids.is_empty() {
        return Err(TangleError::validation("ids", "no issue IDs provided"));
    }

    let (storage, _paths) = opts.open()?;

    let mut issues = Vec::new();
    for id in ids {
        let issue = storage
            .get_issue_for_export(id)?
            .ok_or_else(|| TangleError::IssueNotFound { id: id.clone() })?;
        issues.push(issue);
    }

    if opts.json {
        if issues.len() == 1 {
            println!("{}", serde_json::to_string_pretty(&issues[0])?);
        } else {
            println!("{}", serde_json::to_string_pretty(&issues)?);
        }
        return Ok(());
    }

    for issue in &issues {
        println!("{}: {}", issue.id, issue.title);
        println!(
            "  status: {}  priority: P{}  type: {}",
            issue.status.as_str(),
            issue.priority.0,
            issue.issue_type.as_str()
        );
        if let Some(ref assignee) = issue.assignee {
            println!("  assignee: {assignee}");
        }
        if let Some(ref owner) = issue.owner {
            println!("  owner: {owner}");
        }
        if let Some(ref external_ref) = issue.external_ref {
            println!("  external-ref: {external_ref}");
        }
        if !issue.labels.is_empty() {
            println!("  labels: {}", issue.labels.join(", "));
        }
        if !issue.dependencies.is_empty() {
            let deps: Vec<String> = issue
                .dependencies
                .iter()
                .map(|d| format!("{} ({})", d.depends_on_id, d.dep_type.as_str()))
                .collect();
            println!("  depends-on: {}", deps.join(", "));
        }
        if let Some(ref description) = issue.description {
            println!("\n  {description}");
        }
        println!(
            "  created: {}  updated: {}",
            issue.created_at.to_rfc3339(),
            issue.updated_at.to_rfc3339()
        );
        if let Some(closed_at) = issue.closed_at {
            let reason = issue
                .close_reason
                .as_deref()
                .map(|r| format!(" ({r})"))
                .unwrap_or_default();
            println!("  closed: {}{}", closed_at.to_rfc3339(), reason);
        }
        println!();
    }

    Ok(())
}
