//! Close command implementation.

use super::GlobalOpts;
use crate::cli::CloseArgs;
use crate::error::{Result, TangleError};
use crate::model::Status;
use crate::storage::IssueUpdate;
use chrono::Utc;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct CloseResult {
    closed: Vec<ClosedIssue>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    skipped: Vec<SkippedIssue>,
}

#[derive(Debug, Serialize)]
struct ClosedIssue {
    id: String,
    title: String,
    closed_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    close_reason: Option<String>,
}

#[derive(Debug, Serialize)]
struct SkippedIssue {
    id: String,
    reason: String,
}

/// Execute the close command.
///
/// # Errors
///
/// Returns an error if no IDs are given or storage fails. Individually
/// missing or already-closed issues are skipped, not fatal.
pub fn execute(args: &CloseArgs, opts: &GlobalOpts) -> Result<()> {
    if args.ids.is_empty() {
        return Err(TangleError::validation("ids", "no issue IDs provided"));
    }

    let (mut storage, _paths) = opts.open()?;
    let actor = opts.actor();

    let mut closed = Vec::new();
    let mut skipped = Vec::new();

    for id in &args.ids {
        let Some(issue) = storage.get_issue(id)? else {
            skipped.push(SkippedIssue {
                id: id.clone(),
                reason: "issue not found".to_string(),
            });
            continue;
        };

        if issue.status.is_terminal() {
            skipped.push(SkippedIssue {
                id: id.clone(),
                reason: format!("already {}", issue.status.as_str()),
            });
            continue;
        }

        let now = Utc::now();
        let update = IssueUpdate {
            status: Some(Status::Closed),
            closed_at: Some(Some(now)),
            close_reason: args.reason.clone().map(Some),
            ..Default::default()
        };
        storage.update_issue(id, &update, &actor)?;
        tracing::info!(id = %id, reason = ?args.reason, "Issue closed");

        closed.push(ClosedIssue {
            id: id.clone(),
            title: issue.title,
            closed_at: now.to_rfc3339(),
            close_reason: args.reason.clone(),
        });
    }

    if opts.json {
        let result = CloseResult { closed, skipped };
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        for item in &closed {
            match &item.close_reason {
                Some(reason) => println!("Closed {}: {} ({reason})", item.id, item.title),
                None => println!("Closed {}: {}", item.id, item.title),
            }
        }
        for item in &skipped {
            println!("Skipped {}: {}", item.id, item.reason);
        }
    }

    Ok(())
}
