use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeClientError {
    #[error("node unavailable: {0}")]
    Unavailable(String),

    #[error("rpc failed: {0}")]
    Rpc(String),

    #[error("exec timed out after {0}s")]
    Timeout(u64),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
