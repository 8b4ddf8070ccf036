//! List command implementation.

use super::GlobalOpts;
use crate::cli::ListArgs;
use crate::error::Result;
use crate::model::{Issue, IssueType, Status};
use crate::storage::ListFilters;
use serde::Serialize;
use std::str::FromStr;

#[derive(Debug, Serialize)]
struct ListRow<'a> {
    id: &'a str,
    title: &'a str,
    status: &'a str,
    priority: i32,
    issue_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    assignee: Option<&'a str>,
}

fn row(issue: &Issue) -> ListRow<'_> {
    ListRow {
        id: &issue.id,
        title: &issue.title,
        status: issue.status.as_str(),
        priority: issue.priority.0,
        issue_type: issue.issue_type.as_str(),
        assignee: issue.assignee.as_deref(),
    }
}

/// Execute the list command.
///
/// # Errors
///
/// Returns a validation error for bad filter values or a storage error.
pub fn execute(args: &ListArgs, opts: &GlobalOpts) -> Result<()> {
    let (storage, _paths) = opts.open()?;

    let filters = ListFilters {
        status: args.status.as_deref().map(Status::from_str).transpose()?,
        issue_type: args.type_.as_deref().map(IssueType::from_str).transpose()?,
        assignee: args.assignee.clone(),
        include_tombstones: args.all,
        limit: args.limit,
    };

    let issues = storage.list_issues(&filters)?;

    if opts.json {
        let rows: Vec<ListRow<'_>> = issues.iter().map(row).collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else if issues.is_empty() {
        println!("No issues found.");
    } else {
        for issue in &issues {
            let assignee = issue
                .assignee
                .as_deref()
                .map(|a| format!(" @{a}"))
                .unwrap_or_default();
            println!(
                "{}  P{} {:<12} {}{}",
                issue.id,
                issue.priority.0,
                issue.status.as_str(),
                issue.title,
                assignee
            );
        }
        println!("\n{} issue(s)", issues.len());
    }

    Ok(())
}
