//! tangle — git-friendly issue tracker (`SQLite` + JSONL sync).
//!
//! The library is organized around an explicitly-passed storage handle:
//! commands open a [`storage::SqliteStorage`] once per invocation and
//! thread it through. The sync engine in [`sync`] is the interesting
//! part; everything else is plumbing around it.

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod storage;
pub mod sync;
pub mod util;

pub use error::{Result, TangleError};
