//! Container runtime clients for aid.
//!
//! This crate implements the execution layer: the `RuntimeClient` trait that
//! is the orchestrator's only view of live container state, a client driving
//! the Docker CLI (`DockerRuntime`), an in-process double (`MockRuntime`),
//! host prerequisite checks, and the HTTP client used to invoke a running
//! solver.

pub mod client;
pub mod docker;
pub mod inference;
pub mod mock;
pub mod prereq;

pub use client::{select_runtime, BuildOutput, BuildRequest, RuntimeClient, CONTAINER_PORT};
pub use docker::DockerRuntime;
pub use inference::InferenceClient;
pub use mock::{MockOp, MockRuntime};
pub use prereq::{check_docker_prereqs, format_missing, MissingPrereq};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("runtime '{0}' is not available on this system")]
    Unavailable(String),
    #[error("`{command}` failed ({status}): {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("container '{0}' is not running")]
    NotRunning(String),
    #[error("container '{0}' is already running")]
    AlreadyRunning(String),
    #[error("unexpected runtime output: {0}")]
    InvalidOutput(String),
    #[error("runtime execution failed: {0}")]
    ExecFailed(String),
    #[error("inference request failed: {0}")]
    Inference(String),
}
