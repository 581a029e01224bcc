use crate::client::{BuildOutput, BuildRequest, RuntimeClient};
use crate::RuntimeError;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

/// Operations recorded by [`MockRuntime`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    Build,
    Create,
    Start,
    Stop,
    RemoveContainer,
    RemoveImage,
}

#[derive(Default)]
struct MockState {
    /// Known containers and whether they run. Containers created by another
    /// process are unknown and accepted by every operation.
    containers: HashMap<String, bool>,
    images: HashSet<String>,
    calls: HashMap<MockOp, usize>,
    fail_next: HashSet<MockOp>,
}

impl MockState {
    /// Full id for `id`, which may be a unique prefix as with docker.
    fn resolve(&self, id: &str) -> String {
        if self.containers.contains_key(id) {
            return id.to_owned();
        }
        let mut matches = self.containers.keys().filter(|k| k.starts_with(id));
        match (matches.next(), matches.next()) {
            (Some(full), None) => full.clone(),
            _ => id.to_owned(),
        }
    }
}

/// In-process runtime double. Never touches a container engine.
///
/// Image ids are deterministic in the tag and Dockerfile contents. Tests can
/// inject a single failure per operation with [`MockRuntime::fail_next`].
#[derive(Default)]
pub struct MockRuntime {
    state: Mutex<MockState>,
    seq: AtomicU64,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call of `op` fail with `ExecFailed`.
    pub fn fail_next(&self, op: MockOp) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_next.insert(op);
        }
    }

    /// How many times `op` has been invoked, failed calls included.
    pub fn calls(&self, op: MockOp) -> usize {
        self.state
            .lock()
            .map(|s| s.calls.get(&op).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.state
            .lock()
            .map(|s| s.containers.get(&s.resolve(id)).copied().unwrap_or(false))
            .unwrap_or(false)
    }

    fn enter(&self, op: MockOp) -> Result<MutexGuard<'_, MockState>, RuntimeError> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| RuntimeError::ExecFailed(format!("mutex poisoned: {e}")))?;
        *state.calls.entry(op).or_insert(0) += 1;
        if state.fail_next.remove(&op) {
            return Err(RuntimeError::ExecFailed(format!("injected {op:?} failure")));
        }
        Ok(state)
    }

    fn next_container_id(&self, image_ref: &str, host_port: &str) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_nanos());
        let seed = format!(
            "{image_ref}:{host_port}:{seq}:{}:{nanos}",
            std::process::id()
        );
        blake3::hash(seed.as_bytes()).to_hex().to_string()
    }
}

impl RuntimeClient for MockRuntime {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn available(&self) -> bool {
        true
    }

    fn build_image(&self, request: &BuildRequest) -> Result<BuildOutput, RuntimeError> {
        let mut state = self.enter(MockOp::Build)?;
        let dockerfile = std::fs::read(&request.dockerfile)?;

        let mut hasher = blake3::Hasher::new();
        hasher.update(request.tag.as_bytes());
        hasher.update(b"\0");
        hasher.update(&dockerfile);
        let image_id = format!("sha256:{}", hasher.finalize().to_hex());

        state.images.insert(image_id.clone());
        let log = format!(
            "mock build {} ({} bytes of Dockerfile)\nSuccessfully built {}\n",
            request.tag,
            dockerfile.len(),
            &image_id[7..19]
        );
        Ok(BuildOutput { image_id, log })
    }

    fn create_container(&self, image_ref: &str, host_port: &str) -> Result<String, RuntimeError> {
        let mut state = self.enter(MockOp::Create)?;
        let id = self.next_container_id(image_ref, host_port);
        state.containers.insert(id.clone(), false);
        Ok(id)
    }

    fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        let mut state = self.enter(MockOp::Start)?;
        let id = state.resolve(id);
        if state.containers.get(&id) == Some(&true) {
            return Err(RuntimeError::AlreadyRunning(id));
        }
        state.containers.insert(id, true);
        Ok(())
    }

    fn stop_container(&self, id: &str) -> Result<(), RuntimeError> {
        let mut state = self.enter(MockOp::Stop)?;
        let id = state.resolve(id);
        if state.containers.get(&id) == Some(&false) {
            return Err(RuntimeError::NotRunning(id));
        }
        state.containers.insert(id, false);
        Ok(())
    }

    fn remove_container(&self, id: &str) -> Result<(), RuntimeError> {
        let mut state = self.enter(MockOp::RemoveContainer)?;
        let id = state.resolve(id);
        if state.containers.get(&id) == Some(&true) {
            return Err(RuntimeError::CommandFailed {
                command: "mock rm".to_owned(),
                status: "exit code 1".to_owned(),
                stderr: format!("container {id} is running"),
            });
        }
        state.containers.remove(&id);
        Ok(())
    }

    fn remove_image(&self, id: &str) -> Result<(), RuntimeError> {
        let mut state = self.enter(MockOp::RemoveImage)?;
        state.images.retain(|img| !img.trim_start_matches("sha256:").starts_with(id));
        Ok(())
    }
}
