use std::collections::HashSet;

use sandchest_core::SandchestError;

/// Resolved identity for a request. `user_id`/`org_id` are empty strings on
/// unauthenticated paths. `scopes = None` means full access (session auth);
/// `Some(set)` means access is limited to those tokens (API-key auth).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub user_id: String,
    pub org_id: String,
    pub scopes: Option<HashSet<String>>,
}

impl AuthContext {
    pub fn anonymous() -> Self {
        Self { user_id: String::new(), org_id: String::new(), scopes: None }
    }

    pub fn session(user_id: impl Into<String>, org_id: impl Into<String>) -> Self {
        Self { user_id: user_id.into(), org_id: org_id.into(), scopes: None }
    }

    pub fn api_key(user_id: impl Into<String>, org_id: impl Into<String>, scopes: HashSet<String>) -> Self {
        Self { user_id: user_id.into(), org_id: org_id.into(), scopes: Some(scopes) }
    }

    pub fn is_authenticated(&self) -> bool {
        !self.user_id.is_empty()
    }

    /// Fails with `forbidden` when the context carries a restricted scope set
    /// that does not contain `token`, directly or via a matching wildcard
    /// (`session:*` covers `session:create`).
    pub fn require_scope(&self, token: &str) -> Result<(), SandchestError> {
        let Some(scopes) = &self.scopes else {
            return Ok(());
        };
        if scopes.iter().any(|granted| scope_matches(granted, token)) {
            Ok(())
        } else {
            Err(SandchestError::forbidden(format!("missing required scope `{token}`")))
        }
    }
}

fn scope_matches(granted: &str, token: &str) -> bool {
    if granted == token {
        return true;
    }
    match granted.strip_suffix(":*") {
        Some(prefix) => token.strip_prefix(prefix).map(|rest| rest.starts_with(':')).unwrap_or(false),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_scopes_grant_everything() {
        let ctx = AuthContext::session("u_1", "org_1");
        assert!(ctx.require_scope("admin:*").is_ok());
    }

    #[test]
    fn exact_scope_is_granted() {
        let ctx = AuthContext::api_key("u_1", "org_1", ["sandbox:create".to_string()].into());
        assert!(ctx.require_scope("sandbox:create").is_ok());
        assert!(ctx.require_scope("sandbox:delete").is_err());
    }

    #[test]
    fn wildcard_scope_covers_its_namespace() {
        let ctx = AuthContext::api_key("u_1", "org_1", ["session:*".to_string()].into());
        assert!(ctx.require_scope("session:create").is_ok());
        assert!(ctx.require_scope("sandbox:create").is_err());
    }

    #[test]
    fn wildcard_does_not_match_a_different_prefix_by_accident() {
        let ctx = AuthContext::api_key("u_1", "org_1", ["session:*".to_string()].into());
        assert!(ctx.require_scope("sessions:create").is_err());
    }
}
