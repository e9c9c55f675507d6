use sandchest_core::SandchestError;

use crate::api_key::ApiKeyRepo;
use crate::context::AuthContext;

/// Resolves an `AuthContext` from the bearer token on an `Authorization`
/// header, or from a session already established upstream (cookie auth is
/// terminated before this point; callers pass the session's user/org here).
pub struct AuthResolver {
    api_keys: ApiKeyRepo,
}

impl AuthResolver {
    pub fn new(api_keys: ApiKeyRepo) -> Self {
        Self { api_keys }
    }

    /// `Authorization: Bearer <token>` → scoped `AuthContext`. Any other
    /// value, or a revoked/unknown key, fails with `authentication_error`.
    pub async fn from_bearer_header(&self, header_value: Option<&str>) -> Result<AuthContext, SandchestError> {
        let Some(header_value) = header_value else {
            return Err(SandchestError::authentication("missing Authorization header"));
        };
        let token = header_value
            .strip_prefix("Bearer ")
            .ok_or_else(|| SandchestError::authentication("Authorization header must use the Bearer scheme"))?;

        let key = self
            .api_keys
            .verify(token)
            .await
            .map_err(|e| SandchestError::internal(e.to_string()))?
            .ok_or_else(|| SandchestError::authentication("invalid or revoked API key"))?;

        Ok(AuthContext::api_key(key.user_id, key.org_id, key.scopes))
    }

    /// Session cookies carry full access; the session layer upstream has
    /// already authenticated `user_id`/`org_id`.
    pub fn from_session(&self, user_id: impl Into<String>, org_id: impl Into<String>) -> AuthContext {
        AuthContext::session(user_id, org_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    async fn setup() -> AuthResolver {
        let pool = sandchest_storage::connect("sqlite::memory:").await.unwrap();
        AuthResolver::new(ApiKeyRepo::new(pool))
    }

    #[tokio::test]
    async fn missing_header_fails_authentication() {
        let resolver = setup().await;
        let err = resolver.from_bearer_header(None).await.unwrap_err();
        assert_eq!(err.kind, sandchest_core::ErrorKind::Authentication);
    }

    #[tokio::test]
    async fn valid_bearer_token_resolves_scoped_context() {
        let pool = sandchest_storage::connect("sqlite::memory:").await.unwrap();
        let repo = ApiKeyRepo::new(pool);
        let generation = repo
            .create("org_1", "user_1", "ci", HashSet::from(["sandbox:create".to_string()]))
            .await
            .unwrap();
        let resolver = AuthResolver::new(repo);

        let header = format!("Bearer {}", generation.plaintext);
        let ctx = resolver.from_bearer_header(Some(&header)).await.unwrap();
        assert_eq!(ctx.org_id, "org_1");
        assert!(ctx.require_scope("sandbox:create").is_ok());
    }

    #[tokio::test]
    async fn non_bearer_scheme_is_rejected() {
        let resolver = setup().await;
        let err = resolver.from_bearer_header(Some("Basic abcd")).await.unwrap_err();
        assert_eq!(err.kind, sandchest_core::ErrorKind::Authentication);
    }
}
