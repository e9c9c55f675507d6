// ABOUTME: Core types and utilities for Sandchest
// ABOUTME: Identifier codec and error taxonomy shared across every package

pub mod constants;
pub mod error;
pub mod ids;

pub use error::{ErrorKind, SandchestError};
pub use ids::{Id, IdParseError, Prefix};
