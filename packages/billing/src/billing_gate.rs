use std::collections::HashMap;

use chrono::{Datelike, TimeZone, Utc};
use tracing::warn;

use sandchest_core::SandchestError;
use sandchest_repo::UsageRepo;

/// Outcome of a pre-admission billing check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingDecision {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl BillingDecision {
    pub fn allow() -> Self {
        Self { allowed: true, reason: None }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self { allowed: false, reason: Some(reason.into()) }
    }
}

/// Monthly usage caps per tracked category. Missing categories are uncapped.
#[derive(Debug, Clone)]
pub struct BillingLimits {
    pub monthly_caps: HashMap<String, i64>,
}

impl Default for BillingLimits {
    fn default() -> Self {
        Self {
            monthly_caps: HashMap::from([
                ("sandbox_create".to_string(), 1000),
                ("exec_create".to_string(), 20_000),
            ]),
        }
    }
}

/// Admission and usage-tracking gate fronting the relational usage ledger.
pub struct BillingGate {
    usage: UsageRepo,
    limits: BillingLimits,
}

impl BillingGate {
    pub fn new(usage: UsageRepo, limits: BillingLimits) -> Self {
        Self { usage, limits }
    }

    /// `check(userId, category)`: denies with `billing_limit` once the org's
    /// usage for `category` in the current calendar month reaches its cap.
    pub async fn check(&self, org_id: &str, category: &str) -> Result<BillingDecision, SandchestError> {
        let Some(&cap) = self.limits.monthly_caps.get(category) else {
            return Ok(BillingDecision::allow());
        };

        let since = start_of_current_month();
        let used = self
            .usage
            .count_since(org_id, category, since)
            .await
            .map_err(|e| SandchestError::internal(e.to_string()))?;

        if used >= cap {
            Ok(BillingDecision::deny(format!("monthly {category} limit of {cap} reached")))
        } else {
            Ok(BillingDecision::allow())
        }
    }

    /// `billing.track(userId, category)`: invoked best-effort after an
    /// operation commits. Failure is logged, never propagated.
    pub async fn track(&self, user_id: &str, org_id: &str, category: &str) {
        if let Err(e) = self.usage.record(user_id, org_id, category).await {
            warn!(error = %e, user_id, org_id, category, "failed to record usage, continuing");
        }
    }
}

fn start_of_current_month() -> chrono::DateTime<Utc> {
    let now = Utc::now();
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0).single().unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    async fn setup() -> UsageRepo {
        let pool = sandchest_storage::connect("sqlite::memory:").await.unwrap();
        UsageRepo::new(pool)
    }

    #[tokio::test]
    async fn under_cap_is_allowed() {
        let usage = setup().await;
        let gate = BillingGate::new(usage, BillingLimits { monthly_caps: Map::from([("sandbox_create".into(), 2)]) });
        let decision = gate.check("org_1", "sandbox_create").await.unwrap();
        assert!(decision.allowed);
    }

    #[tokio::test]
    async fn reaching_the_cap_denies_further_admission() {
        let usage = setup().await;
        gate_track_twice(&usage, "org_1", "sandbox_create").await;
        let gate = BillingGate::new(usage, BillingLimits { monthly_caps: Map::from([("sandbox_create".into(), 2)]) });
        let decision = gate.check("org_1", "sandbox_create").await.unwrap();
        assert!(!decision.allowed);
        assert!(decision.reason.unwrap().contains("sandbox_create"));
    }

    #[tokio::test]
    async fn uncapped_category_is_always_allowed() {
        let usage = setup().await;
        let gate = BillingGate::new(usage, BillingLimits { monthly_caps: Map::new() });
        let decision = gate.check("org_1", "anything").await.unwrap();
        assert!(decision.allowed);
    }

    async fn gate_track_twice(usage: &UsageRepo, org_id: &str, category: &str) {
        usage.record("user_1", org_id, category).await.unwrap();
        usage.record("user_1", org_id, category).await.unwrap();
    }
}
