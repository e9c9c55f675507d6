// ABOUTME: Quota and billing admission checks evaluated before resource creation
// ABOUTME: Billing denies with `billing_limit`; quota breaches split validation vs quota_exceeded

pub mod billing_gate;
pub mod quota_gate;

pub use billing_gate::{BillingDecision, BillingGate, BillingLimits};
