//! Event store implementations for mindloop.
//!
//! Both backends enforce the same contract: per execution, sequences start
//! at 1 and each append must be exactly one past the last committed event.

pub mod in_memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use in_memory::InMemoryEventStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteEventStore;
