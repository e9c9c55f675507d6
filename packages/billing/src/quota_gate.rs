use sandchest_core::SandchestError;
use sandchest_repo::types::OrgQuota;

/// `maxExecTimeoutSeconds` bounds a request parameter: exceeding it is a
/// client-correctable validation error, not a hard account limit.
pub fn check_exec_timeout(quota: &OrgQuota, requested_seconds: i64) -> Result<(), SandchestError> {
    if let Some(max) = quota.max_exec_timeout_seconds {
        if requested_seconds > max {
            return Err(SandchestError::validation(format!(
                "timeout_seconds {requested_seconds} exceeds the org's max of {max}"
            )));
        }
    }
    Ok(())
}

/// `maxConcurrentSandboxes` is a hard account quota: evaluated against the
/// count of currently active (non-terminal) sandboxes before admission.
pub fn check_concurrent_sandboxes(quota: &OrgQuota, active_count: i64) -> Result<(), SandchestError> {
    if let Some(max) = quota.max_concurrent_sandboxes {
        if active_count >= max {
            return Err(SandchestError::quota_exceeded(format!(
                "org already has {active_count} active sandboxes, limit is {max}"
            )));
        }
    }
    Ok(())
}

pub fn check_fork_depth(quota: &OrgQuota, depth_after_fork: i64) -> Result<(), SandchestError> {
    if let Some(max) = quota.max_fork_depth {
        if depth_after_fork > max {
            return Err(SandchestError::quota_exceeded(format!(
                "fork depth {depth_after_fork} exceeds the org's max of {max}"
            )));
        }
    }
    Ok(())
}

pub fn check_sessions_per_sandbox(quota: &OrgQuota, active_sessions: i64) -> Result<(), SandchestError> {
    if let Some(max) = quota.max_sessions_per_sandbox {
        if active_sessions >= max {
            return Err(SandchestError::quota_exceeded(format!(
                "sandbox already has {active_sessions} active sessions, limit is {max}"
            )));
        }
    }
    Ok(())
}

pub fn check_file_bytes(quota: &OrgQuota, requested_bytes: i64) -> Result<(), SandchestError> {
    if let Some(max) = quota.max_file_bytes {
        if requested_bytes > max {
            return Err(SandchestError::validation(format!(
                "file of {requested_bytes} bytes exceeds the org's max of {max}"
            )));
        }
    }
    Ok(())
}

pub fn check_artifact_bytes_per_org(quota: &OrgQuota, bytes_so_far: i64, incoming_bytes: i64) -> Result<(), SandchestError> {
    if let Some(max) = quota.max_artifact_bytes_per_org {
        if bytes_so_far + incoming_bytes > max {
            return Err(SandchestError::quota_exceeded(format!(
                "artifact storage would reach {} bytes, limit is {max}",
                bytes_so_far + incoming_bytes
            )));
        }
    }
    Ok(())
}
