//! Command implementations.

pub mod close;
pub mod create;
pub mod delete;
pub mod dep;
pub mod init;
pub mod list;
pub mod show;
pub mod sync;
pub mod update;

use crate::config::{self, ConfigPaths};
use crate::error::Result;
use crate::storage::SqliteStorage;

/// Global options shared by every command.
#[derive(Debug, Clone, Default)]
pub struct GlobalOpts {
    pub db: Option<std::path::PathBuf>,
    pub actor: Option<String>,
    pub json: bool,
    pub lock_timeout: Option<u64>,
}

impl GlobalOpts {
    /// Discover the workspace and open storage.
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` if no workspace is found, or a database
    /// error if it cannot be opened.
    pub fn open(&self) -> Result<(SqliteStorage, ConfigPaths)> {
        let tangle_dir = config::discover_tangle_dir(None)?;
        config::open_storage(&tangle_dir, self.db.as_ref(), self.lock_timeout)
    }

    #[must_use]
    pub fn actor(&self) -> String {
        config::resolve_actor(self.actor.as_deref())
    }
}
