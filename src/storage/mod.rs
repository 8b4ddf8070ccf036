//! Storage backends.

pub mod schema;
pub mod sqlite;

pub use sqlite::{IssueUpdate, ListFilters, MutationContext, SqliteStorage};
