//! Shared utilities: content hashing, ID generation, time parsing.

pub mod hash;
pub mod id;
pub mod time;

pub use hash::content_hash_from_parts;
pub use id::{IdConfig, IdGenerator, parse_id, validate_prefix};
