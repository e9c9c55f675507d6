// ABOUTME: Auth context resolution, scope enforcement and API key storage
// ABOUTME: Session auth implies full access; API-key auth is scoped by key metadata

pub mod api_key;
pub mod context;
pub mod resolver;

pub use api_key::{ApiKey, ApiKeyGeneration, ApiKeyRepo};
pub use context::AuthContext;
pub use resolver::AuthResolver;
