//! SQLite persistence for graph state and for the work/event streams.

pub mod sqlite;
mod state;
mod stream;

pub use sqlite::SqliteStore;
pub use stream::PendingEntry;
