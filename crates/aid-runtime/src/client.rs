use crate::RuntimeError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Port every solver container serves on. Host ports are bound to it.
pub const CONTAINER_PORT: &str = "8080/tcp";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildRequest {
    /// Tag given to the built image.
    pub tag: String,
    pub dockerfile: PathBuf,
    /// Build context directory.
    pub context: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildOutput {
    /// Engine-issued image id, possibly `sha256:`-prefixed.
    pub image_id: String,
    /// Combined build output.
    pub log: String,
}

/// The container engine primitives the lifecycle engine relies on.
///
/// Implementations are blocking: each call returns once the engine has
/// finished (or failed) the operation. Callers own timeouts.
pub trait RuntimeClient: Send + Sync {
    fn name(&self) -> &'static str;

    fn available(&self) -> bool;

    fn build_image(&self, request: &BuildRequest) -> Result<BuildOutput, RuntimeError>;

    /// Create (but do not start) a container from `image_ref`, publishing
    /// [`CONTAINER_PORT`] on `0.0.0.0:<host_port>`. Returns the engine's
    /// container id.
    fn create_container(&self, image_ref: &str, host_port: &str) -> Result<String, RuntimeError>;

    fn start_container(&self, id: &str) -> Result<(), RuntimeError>;

    fn stop_container(&self, id: &str) -> Result<(), RuntimeError>;

    fn remove_container(&self, id: &str) -> Result<(), RuntimeError>;

    fn remove_image(&self, id: &str) -> Result<(), RuntimeError>;
}

pub fn select_runtime(
    name: &str,
    docker_bin: &str,
) -> Result<Arc<dyn RuntimeClient>, RuntimeError> {
    match name {
        "docker" => Ok(Arc::new(crate::docker::DockerRuntime::with_binary(docker_bin))),
        "mock" => Ok(Arc::new(crate::mock::MockRuntime::new())),
        other => Err(RuntimeError::Unavailable(other.to_owned())),
    }
}
