// ABOUTME: Control-plane to node RPC contract (Control→Node calls, Node→Control events)
// ABOUTME: Ships a fake in-process backend; real deployments plug in a gRPC/mTLS client

pub mod client;
pub mod error;
pub mod fake;
pub mod types;

pub use client::NodeClient;
pub use error::NodeClientError;
pub use fake::FakeNodeClient;
pub use types::{
    ExecEvent, ExecOutcome, ExecRequest, FileEntry, FileEntryType, NodeEvent, ResourceUsage, SandboxEventKind,
    SandboxSpec,
};
