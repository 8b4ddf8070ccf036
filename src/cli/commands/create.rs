//! Create command implementation.

use super::GlobalOpts;
use crate::cli::CreateArgs;
use crate::config;
use crate::error::{Result, TangleError};
use crate::model::{Issue, IssueType, Priority};
use crate::util::id::IdGenerator;
use chrono::Utc;
use serde::Serialize;
use std::str::FromStr;

#[derive(Debug, Serialize)]
struct CreateResult {
    id: String,
    title: String,
    status: String,
    priority: i32,
    issue_type: String,
}

/// Execute the create command.
///
/// # Errors
///
/// Returns an error on validation failure or when storage fails.
pub fn execute(args: &CreateArgs, opts: &GlobalOpts) -> Result<()> {
    let title = args.title.trim();
    if title.is_empty() {
        return Err(TangleError::validation("title", "cannot be empty"));
    }

    let (mut storage, paths) = opts.open()?;
    let actor = opts.actor();
    let prefix = config::resolve_prefix(&storage, &paths.metadata)?;

    let priority = args
        .priority
        .as_deref()
        .map(Priority::from_str)
        .transpose()?
        .unwrap_or(Priority::MEDIUM);
    let issue_type = args
        .type_
        .as_deref()
        .map(IssueType::from_str)
        .transpose()?
        .unwrap_or_default();

    let generator = IdGenerator::with_prefix(prefix);
    let issue_count = storage.count_issues()?;
    let id = generator.generate(
        title,
        args.description.as_deref(),
        Some(&actor),
        Utc::now(),
        issue_count,
        |candidate| storage.id_exists(candidate).unwrap_or(true),
    );

    let mut issue = Issue::new(&id, title);
    issue.created_by = Some(actor.clone());
    issue.description = args.description.clone();
    issue.priority = priority;
    issue.issue_type = issue_type;
    issue.assignee = args.assignee.clone();
    issue.owner = args.owner.clone();
    issue.external_ref = args.external_ref.clone();
    issue.labels = args
        .labels
        .iter()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect();
    issue.content_hash = Some(issue.compute_content_hash());

    storage.create_issue(&issue, &actor)?;
    tracing::info!(id = %id, "Issue created");

    if args.silent {
        println!("{id}");
    } else if opts.json {
        let result = CreateResult {
            id: issue.id.clone(),
            title: issue.title.clone(),
            status: issue.status.as_str().to_string(),
            priority: issue.priority.0,
            issue_type: issue.issue_type.as_str().to_string(),
        };
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("Created {id}: {title} [{priority} {issue_type}]");
    }

    Ok(())
}
