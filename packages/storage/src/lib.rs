// ABOUTME: SQLite pool setup, migrations and shared cursor-pagination helpers
// ABOUTME: Every repository in `sandchest-repo` builds on top of this crate

pub mod error;
pub mod pagination;
pub mod pool;

pub use error::StorageError;
pub use pagination::Page;
pub use pool::{connect, run_migrations};
