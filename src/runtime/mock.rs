//! In-memory container engine for supervisor and watcher tests.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use super::types::{
    ContainerEngine, ContainerState, EngineHealth, EngineResult, LaunchRequest, LABEL_DIGEST,
    LABEL_STACK, LABEL_VENDOR,
};
use crate::error::EngineError;
use crate::registry::{Digest, ImageRef};

#[derive(Default)]
struct State {
    containers: BTreeMap<String, ContainerState>,
    /// image name -> digest a pull currently yields
    remote: HashMap<String, Digest>,
    /// pinned references present locally
    local: HashSet<String>,
    /// digests whose containers exit right after starting
    crashing: HashSet<Digest>,
    /// digests whose `run` leaves a created container behind and errors
    broken_runtime: HashSet<Digest>,
    unpullable: HashSet<String>,
    calls: Vec<String>,
    /// (stack, vendor) -> most instances ever running at once
    max_running: HashMap<(String, String), usize>,
    next_id: u64,
}

impl State {
    fn running_for(&self, stack: &str, vendor: &str) -> usize {
        self.containers
            .values()
            .filter(|c| {
                c.running
                    && c.labels.get(LABEL_STACK).map(String::as_str) == Some(stack)
                    && c.vendor() == Some(vendor)
            })
            .count()
    }

    fn record_running(&mut self, stack: &str, vendor: &str) {
        let now = self.running_for(stack, vendor);
        let max = self
            .max_running
            .entry((stack.to_string(), vendor.to_string()))
            .or_insert(0);
        *max = (*max).max(now);
    }
}

#[derive(Default)]
pub struct MemoryEngine {
    state: Mutex<State>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make pulls of `image` resolve to `digest`.
    pub fn publish(&self, image: &str, digest: &Digest) {
        let name = ImageRef::parse(image).unwrap().name();
        self.state.lock().unwrap().remote.insert(name, digest.clone());
    }

    /// Containers started from `digest` exit immediately.
    pub fn crash_on_start(&self, digest: &Digest) {
        self.state.lock().unwrap().crashing.insert(digest.clone());
    }

    /// `run` of `digest` creates the container, then fails to start it, the
    /// way `docker run` does on an OCI runtime error.
    pub fn break_runtime(&self, digest: &Digest) {
        self.state.lock().unwrap().broken_runtime.insert(digest.clone());
    }

    pub fn fail_pulls(&self, image: &str) {
        let name = ImageRef::parse(image).unwrap().name();
        self.state.lock().unwrap().unpullable.insert(name);
    }

    /// Drop a local image, as `docker image prune` would.
    pub fn evict(&self, image: &str, digest: &Digest) {
        let pinned = ImageRef::parse(image).unwrap().pinned(digest);
        self.state.lock().unwrap().local.remove(&pinned);
    }

    /// Simulate an instance dying.
    pub fn kill(&self, name: &str) {
        if let Some(c) = self.state.lock().unwrap().containers.get_mut(name) {
            c.running = false;
            c.status = "exited".into();
            c.exit_code = Some(137);
        }
    }

    pub fn container(&self, name: &str) -> Option<ContainerState> {
        self.state.lock().unwrap().containers.get(name).cloned()
    }

    pub fn running_count(&self, stack: &str, vendor: &str) -> usize {
        self.state.lock().unwrap().running_for(stack, vendor)
    }

    pub fn max_running(&self, stack: &str, vendor: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .max_running
            .get(&(stack.to_string(), vendor.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }
}

#[async_trait]
impl ContainerEngine for MemoryEngine {
    fn name(&self) -> &str {
        "memory"
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn pull(&self, image: &ImageRef, _platform: Option<&str>) -> EngineResult<Digest> {
        let mut state = self.state.lock().unwrap();
        let name = image.name();
        state.calls.push(format!("pull {}", name));
        if state.unpullable.contains(&name) {
            return Err(EngineError::CommandFailed(format!("pull access denied for {}", name)));
        }
        let digest = state
            .remote
            .get(&name)
            .cloned()
            .ok_or_else(|| EngineError::CommandFailed(format!("manifest unknown: {}", name)))?;
        state.local.insert(image.pinned(&digest));
        Ok(digest)
    }

    async fn image_present(&self, reference: &str) -> EngineResult<bool> {
        Ok(self.state.lock().unwrap().local.contains(reference))
    }

    async fn run(&self, request: &LaunchRequest) -> EngineResult<String> {
        let mut state = self.state.lock().unwrap();
        let name = request.spec.container_name.clone();
        state.calls.push(format!("run {}", name));
        if state.containers.contains_key(&name) {
            return Err(EngineError::CommandFailed(format!(
                "Conflict. The container name \"/{}\" is already in use",
                name
            )));
        }
        if !state.local.contains(&request.image) {
            return Err(EngineError::CommandFailed(format!(
                "No such image: {}",
                request.image
            )));
        }
        let digest = request
            .labels
            .get(LABEL_DIGEST)
            .and_then(|d| Digest::parse(d).ok());
        let crashes = digest.as_ref().is_some_and(|d| state.crashing.contains(d));
        let broken = digest
            .as_ref()
            .is_some_and(|d| state.broken_runtime.contains(d));

        state.next_id += 1;
        let id = format!("c{:04}", state.next_id);
        if broken {
            state.containers.insert(
                name.clone(),
                ContainerState {
                    name,
                    id,
                    image: request.image.clone(),
                    running: false,
                    status: "created".into(),
                    health: EngineHealth::None,
                    exit_code: Some(128),
                    restart_count: 0,
                    labels: request.labels.clone(),
                    started_at: None,
                },
            );
            return Err(EngineError::CommandFailed(
                "OCI runtime create failed: unable to start container process".into(),
            ));
        }
        state.containers.insert(
            name.clone(),
            ContainerState {
                name,
                id: id.clone(),
                image: request.image.clone(),
                running: !crashes,
                status: if crashes { "exited" } else { "running" }.into(),
                health: EngineHealth::None,
                exit_code: crashes.then_some(1),
                restart_count: 0,
                labels: request.labels.clone(),
                started_at: Some(Utc::now()),
            },
        );
        let stack = request.spec.stack.clone();
        let vendor = request
            .labels
            .get(LABEL_VENDOR)
            .cloned()
            .unwrap_or_default();
        state.record_running(&stack, &vendor);
        Ok(id)
    }

    async fn stop(&self, name: &str) -> EngineResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("stop {}", name));
        if let Some(c) = state.containers.get_mut(name) {
            c.running = false;
            c.status = "exited".into();
            c.exit_code = Some(0);
        }
        Ok(())
    }

    async fn remove(&self, name: &str) -> EngineResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("remove {}", name));
        state.containers.remove(name);
        Ok(())
    }

    async fn inspect(&self, name: &str) -> EngineResult<Option<ContainerState>> {
        Ok(self.state.lock().unwrap().containers.get(name).cloned())
    }

    async fn list(&self, stack: &str) -> EngineResult<Vec<ContainerState>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .containers
            .values()
            .filter(|c| c.labels.get(LABEL_STACK).map(String::as_str) == Some(stack))
            .cloned()
            .collect())
    }
}
