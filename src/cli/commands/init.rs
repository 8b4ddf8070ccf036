//! Init command implementation.

use super::GlobalOpts;
use crate::config::{self, DEFAULT_PREFIX};
use crate::error::Result;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct InitResult {
    tangle_dir: String,
    database: String,
    prefix: String,
}

/// Execute the init command, creating `.tangle/` in the current directory.
///
/// # Errors
///
/// Returns `AlreadyInitialized` when a workspace exists (unless `force`).
pub fn execute(prefix: Option<&str>, force: bool, opts: &GlobalOpts) -> Result<()> {
    let cwd = std::env::current_dir()?;
    let prefix = prefix.unwrap_or(DEFAULT_PREFIX);
    let paths = config::init_workspace(&cwd, prefix, force)?;

    tracing::info!(
        tangle_dir = %paths.tangle_dir.display(),
        prefix,
        "Workspace initialized"
    );

    if opts.json {
        let result = InitResult {
            tangle_dir: paths.tangle_dir.display().to_string(),
            database: paths.db_path.display().to_string(),
            prefix: prefix.to_string(),
        };
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("Initialized tangle workspace at {}", paths.tangle_dir.display());
        println!("  database: {}", paths.db_path.display());
        println!("  prefix:   {prefix}");
    }

    Ok(())
}
