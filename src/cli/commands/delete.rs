//! Delete command implementation (tombstones).

use super::GlobalOpts;
use crate::cli::DeleteArgs;
use crate::error::{Result, TangleError};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct DeleteResult {
    deleted: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    skipped: Vec<String>,
}

/// Execute the delete command. Issues become tombstones, not rows removed;
/// the tombstone propagates through export so other clones drop the issue
/// too.
///
/// # Errors
///
/// Returns an error if no IDs are given or storage fails.
pub fn execute(args: &DeleteArgs, opts: &GlobalOpts) -> Result<()> {
    if args.ids.is_empty() {
        return Err(TangleError::validation("ids", "no issue IDs provided"));
    }

    let (mut storage, _paths) = opts.open()?;
    let actor = opts.actor();

    let mut deleted = Vec::new();
    let mut skipped = Vec::new();

    for id in &args.ids {
        if storage.get_issue(id)?.is_none() {
            skipped.push(id.clone());
            continue;
        }
        if storage.is_tombstone(id)? {
            skipped.push(id.clone());
            continue;
        }
        storage.delete_issue(id, &actor, Some(&args.reason))?;
        tracing::info!(id = %id, reason = %args.reason, "Issue tombstoned");
        deleted.push(id.clone());
    }

    if opts.json {
        let result = DeleteResult { deleted, skipped };
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        for id in &deleted {
            println!("Deleted {id} (tombstone)");
        }
        for id in &skipped {
            println!("Skipped {id}: not found or already deleted");
        }
    }

    Ok(())
}
