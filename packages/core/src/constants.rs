/// Default page size for cursor-paginated list operations.
pub const DEFAULT_PAGE_LIMIT: u32 = 50;

/// Maximum page size accepted for cursor-paginated list operations.
pub const MAX_PAGE_LIMIT: u32 = 200;

/// Default exec timeout in seconds when a request omits `timeout_seconds`.
pub const DEFAULT_EXEC_TIMEOUT_SECONDS: u32 = 300;

/// Hard ceiling on how long a synchronous exec request may block.
pub const MAX_SYNC_EXEC_WAIT_SECONDS: u32 = 300;

/// Cap applied to stdout/stderr echoed back from a synchronous exec response.
pub const MAX_SYNC_EXEC_OUTPUT_BYTES: usize = 1024 * 1024;

/// Default shell session command.
pub const DEFAULT_SESSION_SHELL: &str = "/bin/bash";

/// Default working directory for execs that omit `cwd`.
pub const DEFAULT_EXEC_CWD: &str = "/root";

/// Slot lease TTL used by the scheduler.
pub const SLOT_LEASE_TTL_SECONDS: u64 = 60;

/// Interval at which the orchestrator renews a slot lease for a running sandbox.
pub const SLOT_LEASE_RENEW_INTERVAL_SECONDS: u64 = 20;
