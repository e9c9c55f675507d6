// ABOUTME: Sandbox lifecycle state machine, guest-facing controllers, and background sweepers
// ABOUTME: Sits between the HTTP surface and the repo/kv/scheduler/node-client layers

pub mod artifact_controller;
pub mod exec_controller;
pub mod file_controller;
pub mod object_store;
pub mod replay;
pub mod sandbox_controller;
pub mod session_controller;
pub mod sweepers;
pub mod types;

pub use artifact_controller::ArtifactController;
pub use exec_controller::ExecController;
pub use file_controller::FileController;
pub use object_store::{LocalObjectStore, ObjectStore, ObjectStoreError};
pub use replay::ReplayAggregator;
pub use sandbox_controller::SandboxController;
pub use session_controller::SessionController;
pub use sweepers::Sweepers;
