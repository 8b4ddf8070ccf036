//! CLI definitions and entry point.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;

/// Git-friendly issue tracker (`SQLite` + JSONL)
#[derive(Parser, Debug)]
#[command(name = "tg", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Database path (auto-discover .tangle/*.db if not set)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Actor name for the audit trail
    #[arg(long, global = true)]
    pub actor: Option<String>,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// `SQLite` busy timeout in ms
    #[arg(long, global = true)]
    pub lock_timeout: Option<u64>,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a tangle workspace
    Init {
        /// Issue ID prefix (e.g., "tg")
        #[arg(long)]
        prefix: Option<String>,

        /// Overwrite existing workspace metadata
        #[arg(long)]
        force: bool,
    },

    /// Create a new issue
    Create(CreateArgs),

    /// List issues
    List(ListArgs),

    /// Show issue details
    Show {
        /// Issue IDs
        ids: Vec<String>,
    },

    /// Update an issue
    Update(UpdateArgs),

    /// Close an issue
    Close(CloseArgs),

    /// Delete an issue (creates tombstone)
    Delete(DeleteArgs),

    /// Manage dependencies
    Dep {
        #[command(subcommand)]
        command: DepCommands,
    },

    /// Sync database with JSONL file (export or import)
    ///
    /// All file operations are confined to .tangle/ by default.
    /// Use -v for detailed safety logging, -vv for debug output.
    #[command(long_about = "Sync database with JSONL file (export or import).

SAFETY GUARANTEES:
  • tg sync NEVER executes git commands or auto-commits
  • tg sync NEVER modifies files outside .tangle/ (unless --allow-external-jsonl)
  • All writes use atomic temp-file-then-rename
  • Safety guards prevent accidental data loss

MODES (one required unless --status):
  --flush-only    Export database to JSONL
  --import-only   Import JSONL into database (validates first)
  --status        Show sync status (read-only)

SAFETY GUARDS:
  Export guards (bypassed with --force):
    • Empty DB Guard: refuses to export an empty DB over a non-empty JSONL
    • Stale DB Guard: refuses to export if the JSONL has issues missing from the DB

  Import guards (cannot be bypassed):
    • Conflict markers: rejects files with git merge conflict markers
    • Invalid JSON: rejects malformed JSONL entries

EXAMPLES:
  tg sync --flush-only           Export database to .tangle/issues.jsonl
  tg sync --import-only          Import from JSONL (validates first)
  tg sync --import-only --dry-run  Preflight only, no changes
  tg sync --status               Show current sync status")]
    Sync(SyncArgs),
}

#[derive(Args, Debug, Default)]
pub struct CreateArgs {
    /// Issue title
    pub title: String,

    /// Issue type (task, bug, feature, epic, chore, docs, question)
    #[arg(long = "type", short = 't')]
    pub type_: Option<String>,

    /// Priority (0-4 or P0-P4)
    #[arg(long, short = 'p')]
    pub priority: Option<String>,

    /// Description
    #[arg(long, short = 'd')]
    pub description: Option<String>,

    /// Assign to person
    #[arg(long, short = 'a')]
    pub assignee: Option<String>,

    /// Set owner
    #[arg(long)]
    pub owner: Option<String>,

    /// Labels (comma-separated)
    #[arg(long, short = 'l', value_delimiter = ',')]
    pub labels: Vec<String>,

    /// External reference (e.g., gh-123)
    #[arg(long)]
    pub external_ref: Option<String>,

    /// Output only the issue ID
    #[arg(long)]
    pub silent: bool,
}

#[derive(Args, Debug, Default)]
pub struct UpdateArgs {
    /// Issue ID to update
    pub id: String,

    /// Update title
    #[arg(long)]
    pub title: Option<String>,

    /// Update description (empty string clears)
    #[arg(long, visible_alias = "body")]
    pub description: Option<String>,

    /// Update design notes (empty string clears)
    #[arg(long)]
    pub design: Option<String>,

    /// Update acceptance criteria (empty string clears)
    #[arg(long, visible_alias = "acceptance")]
    pub acceptance_criteria: Option<String>,

    /// Update additional notes (empty string clears)
    #[arg(long)]
    pub notes: Option<String>,

    /// Change status
    #[arg(long, short = 's')]
    pub status: Option<String>,

    /// Change priority (0-4 or P0-P4)
    #[arg(long, short = 'p')]
    pub priority: Option<String>,

    /// Change issue type
    #[arg(long = "type", short = 't')]
    pub type_: Option<String>,

    /// Assign to user (empty string clears)
    #[arg(long)]
    pub assignee: Option<String>,

    /// Set owner (empty string clears)
    #[arg(long)]
    pub owner: Option<String>,

    /// Set external reference (empty string clears)
    #[arg(long)]
    pub external_ref: Option<String>,

    /// Set label(s), replacing all (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub set_labels: Option<Vec<String>>,
}

#[derive(Args, Debug, Default)]
pub struct CloseArgs {
    /// Issue IDs to close
    pub ids: Vec<String>,

    /// Close reason
    #[arg(long, short = 'r')]
    pub reason: Option<String>,
}

#[derive(Args, Debug, Default)]
pub struct DeleteArgs {
    /// Issue IDs to delete
    pub ids: Vec<String>,

    /// Delete reason
    #[arg(long, default_value = "delete")]
    pub reason: String,
}

/// Arguments for the list command.
#[derive(Args, Debug, Default, Clone)]
pub struct ListArgs {
    /// Filter by status
    #[arg(long, short = 's')]
    pub status: Option<String>,

    /// Filter by issue type
    #[arg(long = "type", short = 't')]
    pub type_: Option<String>,

    /// Filter by assignee
    #[arg(long, short = 'a')]
    pub assignee: Option<String>,

    /// Include tombstoned issues
    #[arg(long)]
    pub all: bool,

    /// Maximum number of results
    #[arg(long)]
    pub limit: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum DepCommands {
    /// Add a dependency: <issue> depends on <depends-on>
    Add(DepAddArgs),
    /// Remove a dependency
    Remove(DepRemoveArgs),
    /// List dependencies of an issue
    List {
        /// Issue ID
        issue: String,
    },
}

#[derive(Args, Debug, Default)]
pub struct DepAddArgs {
    /// Issue ID (the one that will depend on something)
    pub issue: String,

    /// Target issue ID (the one being depended on)
    pub depends_on: String,

    /// Dependency type (blocks, parent-child, related, ...)
    #[arg(long = "type", short = 't', default_value = "blocks")]
    pub dep_type: String,
}

#[derive(Args, Debug)]
pub struct DepRemoveArgs {
    /// Issue ID
    pub issue: String,

    /// Target issue ID to remove dependency to
    pub depends_on: String,
}

/// Arguments for the sync command.
#[derive(Args, Debug, Default)]
#[allow(clippy::struct_excessive_bools)]
pub struct SyncArgs {
    /// Export database to JSONL (DB → .tangle/issues.jsonl)
    #[arg(long)]
    pub flush_only: bool,

    /// Import JSONL to database (JSONL → DB)
    ///
    /// Validates JSONL before import. Rejects files with git merge
    /// conflict markers or invalid JSON (cannot be bypassed).
    #[arg(long)]
    pub import_only: bool,

    /// Show sync status (read-only)
    #[arg(long)]
    pub status: bool,

    /// Override safety guards (use with caution!)
    ///
    /// Bypasses the empty-DB and stale-DB guards on export, and the
    /// file-hash short-circuit on import. Does NOT bypass conflict
    /// marker detection or JSON validation.
    #[arg(long, short = 'f')]
    pub force: bool,

    /// JSONL path override (defaults to the workspace export file)
    #[arg(long)]
    pub jsonl: Option<PathBuf>,

    /// Allow using a JSONL path outside the .tangle directory.
    ///
    /// Required for paths set via `--jsonl` or the `TANGLE_JSONL`
    /// environment variable that point outside .tangle/. Paths inside
    /// .git/ are always rejected regardless of this flag.
    #[arg(long)]
    pub allow_external_jsonl: bool,

    /// Write a .manifest.json file with the export summary
    #[arg(long)]
    pub manifest: bool,

    /// Record error policy: strict (default), best-effort, partial, required-core.
    ///
    /// On export, governs records that fail to serialize or write. On
    /// import, best-effort skips unparseable lines and reports them
    /// instead of aborting.
    #[arg(long = "error-policy")]
    pub error_policy: Option<String>,

    /// Orphan handling mode for import: strict (default), resurrect, skip, allow
    #[arg(long)]
    pub orphans: Option<String>,

    /// Run preflight checks only, make no changes (import)
    #[arg(long)]
    pub dry_run: bool,
}
