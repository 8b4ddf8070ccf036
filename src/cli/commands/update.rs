//! Update command implementation.

use super::GlobalOpts;
use crate::cli::UpdateArgs;
use crate::error::Result;
use crate::model::{IssueType, Priority, Status};
use crate::storage::IssueUpdate;
use serde::Serialize;
use std::str::FromStr;

#[derive(Debug, Serialize)]
struct UpdateResult {
    id: String,
    title: String,
    status: String,
    priority: i32,
}

/// Empty strings clear a field, anything else sets it.
fn clearable(value: Option<&str>) -> Option<Option<String>> {
    value.map(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

/// Execute the update command.
///
/// # Errors
///
/// Returns `IssueNotFound` for unknown IDs or a validation error for bad
/// field values.
pub fn execute(args: &UpdateArgs, opts: &GlobalOpts) -> Result<()> {
    let (mut storage, _paths) = opts.open()?;
    let actor = opts.actor();

    let update = IssueUpdate {
        title: args.title.clone(),
        description: clearable(args.description.as_deref()),
        design: clearable(args.design.as_deref()),
        acceptance_criteria: clearable(args.acceptance_criteria.as_deref()),
        notes: clearable(args.notes.as_deref()),
        status: args.status.as_deref().map(Status::from_str).transpose()?,
        priority: args
            .priority
            .as_deref()
            .map(Priority::from_str)
            .transpose()?,
        issue_type: args.type_.as_deref().map(IssueType::from_str).transpose()?,
        assignee: clearable(args.assignee.as_deref()),
        owner: clearable(args.owner.as_deref()),
        external_ref: clearable(args.external_ref.as_deref()),
        ..Default::default()
    };

    let issue = storage.update_issue(&args.id, &update, &actor)?;

    if let Some(ref labels) = args.set_labels {
        let labels: Vec<String> = labels
            .iter()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect();
        storage.set_labels(&args.id, &labels, &actor)?;
    }

    tracing::info!(id = %args.id, "Issue updated");

    if opts.json {
        let result = UpdateResult {
            id: issue.id.clone(),
            title: issue.title.clone(),
            status: issue.status.as_str().to_string(),
            priority: issue.priority.0,
        };
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("Updated {}: {}", issue.id, issue.title);
    }

    Ok(())
}
