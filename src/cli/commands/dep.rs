//! Dependency management commands.

use super::GlobalOpts;
use crate::cli::{DepAddArgs, DepCommands, DepRemoveArgs};
use crate::error::Result;
use crate::model::DependencyType;
use crate::storage::SqliteStorage;
use serde::Serialize;
use std::str::FromStr;

/// Dispatch a `tg dep` subcommand.
///
/// # Errors
///
/// Returns an error if the subcommand fails.
pub fn execute(command: &DepCommands, opts: &GlobalOpts) -> Result<()> {
    match command {
        DepCommands::Add(args) => add(args, opts),
        DepCommands::Remove(args) => remove(args, opts),
        DepCommands::List { issue } => list(issue, opts),
    }
}

fn add(args: &DepAddArgs, opts: &GlobalOpts) -> Result<()> {
    let dep_type = DependencyType::from_str(&args.dep_type)?;
    let (mut storage, _paths) = opts.open()?;
    let actor = opts.actor();

    storage.add_dependency(&args.issue, &args.depends_on, dep_type, &actor)?;
    tracing::info!(
        issue = %args.issue,
        depends_on = %args.depends_on,
        dep_type = dep_type.as_str(),
        "Dependency added"
    );

    if opts.json {
        println!(
            "{}",
            serde_json::json!({
                "issue": args.issue,
                "depends_on": args.depends_on,
                "type": dep_type.as_str(),
            })
        );
    } else {
        println!(
            "{} now depends on {} ({})",
            args.issue,
            args.depends_on,
            dep_type.as_str()
        );
    }
    Ok(())
}

fn remove(args: &DepRemoveArgs, opts: &GlobalOpts) -> Result<()> {
    let (mut storage, _paths) = opts.open()?;
    let actor = opts.actor();

    let removed = storage.remove_dependency(&args.issue, &args.depends_on, &actor)?;

    if opts.json {
        println!("{}", serde_json::json!({ "removed": removed }));
    } else if removed {
        println!("Removed dependency {} -> {}", args.issue, args.depends_on);
    } else {
        println!("No dependency {} -> {}", args.issue, args.depends_on);
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct DepRow {
    depends_on: String,
    #[serde(rename = "type")]
    dep_type: String,
}

fn list(issue: &str, opts: &GlobalOpts) -> Result<()> {
    let (storage, _paths) = opts.open()?;
    let deps = SqliteStorage::get_dependencies_full(storage.connection(), issue)?;

    if opts.json {
        let rows: Vec<DepRow> = deps
            .iter()
            .map(|d| DepRow {
                depends_on: d.depends_on_id.clone(),
                dep_type: d.dep_type.as_str().to_string(),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else if deps.is_empty() {
        println!("{issue} has no dependencies.");
    } else {
        for dep in &deps {
            println!("{} -> {} ({})", issue, dep.depends_on_id, dep.dep_type.as_str());
        }
    }
    Ok(())
}
