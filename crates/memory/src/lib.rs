//! Memory store implementations for mindloop.

pub mod in_memory;
pub mod ranking;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use in_memory::InMemoryStore;
pub use ranking::{KeywordOverlap, order_records};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteMemoryStore;
