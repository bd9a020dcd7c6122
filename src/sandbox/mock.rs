//! In-memory container runtime for testing.
//!
//! Behaves like a tiny Docker: unique names, published ports only while
//! running, start fails if another running container holds the host port.
//! Failures and latency can be scripted per operation.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::runtime::{
    ContainerInfo, ContainerRuntime, ContainerSpec, RuntimeError, LABEL_MANAGED, LABEL_PORT,
};

#[derive(Debug, Default)]
struct State {
    containers: BTreeMap<String, Stored>,
    images: HashSet<String>,
    next_id: usize,
    fail_list: Option<String>,
    fail_pull: Option<String>,
    fail_start: Option<String>,
    hang_pull: bool,
    hang_start: bool,
}

#[derive(Debug, Clone)]
struct Stored {
    info: ContainerInfo,
    spec_port: Option<u16>,
    env: Vec<String>,
}

/// A mock runtime for testing.
#[derive(Debug, Clone, Default)]
pub(crate) struct MockRuntime {
    state: Arc<Mutex<State>>,
    latency: Option<Duration>,
    list_calls: Arc<AtomicUsize>,
    create_calls: Arc<AtomicUsize>,
    start_calls: Arc<AtomicUsize>,
    pull_calls: Arc<AtomicUsize>,
    remove_calls: Arc<AtomicUsize>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every operation, to interleave concurrent callers.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn add_image(&self, image: &str) {
        self.lock().images.insert(image.to_string());
    }

    pub fn has_image(&self, image: &str) -> bool {
        self.lock().images.contains(image)
    }

    /// Seed a running managed sandbox publishing `port`.
    pub fn insert_running(&self, name: &str, port: u16) {
        self.insert(name, "running", vec![port], Some(port), true);
    }

    /// Seed a stopped managed sandbox that was allocated `port`.
    pub fn insert_stopped(&self, name: &str, port: u16) {
        self.insert(name, "exited", Vec::new(), Some(port), true);
    }

    /// Seed a container this service did not create.
    pub fn insert_foreign(&self, name: &str, port: u16) {
        self.insert(name, "running", vec![port], None, false);
    }

    fn insert(&self, name: &str, state: &str, ports: Vec<u16>, label: Option<u16>, managed: bool) {
        let mut labels = HashMap::new();
        if managed {
            labels.insert(LABEL_MANAGED.to_string(), "true".to_string());
        }
        if let Some(port) = label {
            labels.insert(LABEL_PORT.to_string(), port.to_string());
        }

        let mut st = self.lock();
        st.next_id += 1;
        let id = format!("mock{:04}", st.next_id);
        st.containers.insert(
            name.to_string(),
            Stored {
                info: ContainerInfo {
                    id,
                    name: name.to_string(),
                    state: state.to_string(),
                    labels,
                    host_ports: ports,
                },
                spec_port: label,
                env: Vec::new(),
            },
        );
    }

    pub fn fail_list(&self, message: &str) {
        self.lock().fail_list = Some(message.to_string());
    }

    pub fn fail_pull(&self, message: &str) {
        self.lock().fail_pull = Some(message.to_string());
    }

    pub fn fail_start(&self, message: &str) {
        self.lock().fail_start = Some(message.to_string());
    }

    pub fn hang_pull(&self) {
        self.lock().hang_pull = true;
    }

    pub fn hang_start(&self) {
        self.lock().hang_start = true;
    }

    pub fn container(&self, name: &str) -> Option<ContainerInfo> {
        self.lock().containers.get(name).map(|s| s.info.clone())
    }

    pub fn env_of(&self, name: &str) -> Vec<String> {
        self.lock()
            .containers
            .get(name)
            .map(|s| s.env.clone())
            .unwrap_or_default()
    }

    pub fn container_count(&self) -> usize {
        self.lock().containers.len()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn pull_calls(&self) -> usize {
        self.pull_calls.load(Ordering::SeqCst)
    }

    pub fn remove_calls(&self) -> usize {
        self.remove_calls.load(Ordering::SeqCst)
    }

    /// Total mutating calls, for asserting that nothing was touched.
    pub fn mutation_calls(&self) -> usize {
        self.create_calls() + self.start_calls() + self.pull_calls() + self.remove_calls()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn find(&self, name_or_id: &str) -> Result<Option<ContainerInfo>, RuntimeError> {
        self.delay().await;
        let st = self.lock();
        Ok(st
            .containers
            .values()
            .find(|s| s.info.name == name_or_id || s.info.id == name_or_id)
            .map(|s| s.info.clone()))
    }

    async fn list(&self) -> Result<Vec<ContainerInfo>, RuntimeError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        let st = self.lock();
        if let Some(msg) = &st.fail_list {
            return Err(RuntimeError::Failed(msg.clone()));
        }
        Ok(st.containers.values().map(|s| s.info.clone()).collect())
    }

    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        Ok(self.has_image(image))
    }

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        self.pull_calls.fetch_add(1, Ordering::SeqCst);
        let (hang, failure) = {
            let st = self.lock();
            (st.hang_pull, st.fail_pull.clone())
        };
        if hang {
            std::future::pending::<()>().await;
        }
        if let Some(msg) = failure {
            return Err(RuntimeError::Failed(msg));
        }
        self.add_image(image);
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<(), RuntimeError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        let mut st = self.lock();
        if st.containers.contains_key(&spec.name) {
            return Err(RuntimeError::Conflict(format!(
                "The container name \"/{}\" is already in use",
                spec.name
            )));
        }
        if !st.images.contains(&spec.image) {
            return Err(RuntimeError::NotFound(format!("No such image: {}", spec.image)));
        }
        st.next_id += 1;
        let id = format!("mock{:04}", st.next_id);
        st.containers.insert(
            spec.name.clone(),
            Stored {
                info: ContainerInfo {
                    id,
                    name: spec.name.clone(),
                    state: "created".to_string(),
                    labels: spec.labels.clone(),
                    host_ports: Vec::new(),
                },
                spec_port: Some(spec.host_port),
                env: spec.env.clone(),
            },
        );
        Ok(())
    }

    async fn start(&self, name: &str) -> Result<(), RuntimeError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        let hang = self.lock().hang_start;
        if hang {
            std::future::pending::<()>().await;
        }
        self.delay().await;

        let mut st = self.lock();
        if let Some(msg) = &st.fail_start {
            return Err(RuntimeError::Failed(msg.clone()));
        }
        let port = st
            .containers
            .get(name)
            .ok_or_else(|| RuntimeError::NotFound(format!("No such container: {name}")))?
            .spec_port;

        if let Some(port) = port {
            let taken = st
                .containers
                .values()
                .any(|c| c.info.name != name && c.info.host_ports.contains(&port));
            if taken {
                return Err(RuntimeError::Conflict(format!(
                    "Bind for 0.0.0.0:{port} failed: port is already allocated"
                )));
            }
        }

        if let Some(stored) = st.containers.get_mut(name) {
            stored.info.state = "running".to_string();
            stored.info.host_ports = port.into_iter().collect();
        }
        Ok(())
    }

    async fn remove(&self, name_or_id: &str) -> Result<(), RuntimeError> {
        self.remove_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        let mut st = self.lock();
        let key = st
            .containers
            .iter()
            .find(|(name, s)| *name == name_or_id || s.info.id == name_or_id)
            .map(|(name, _)| name.clone());

        match key {
            Some(key) => {
                st.containers.remove(&key);
                Ok(())
            }
            None => Err(RuntimeError::NotFound(format!(
                "No such container: {name_or_id}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::runtime::ResourceLimits;

    fn spec(name: &str, port: u16) -> ContainerSpec {
        ContainerSpec {
            name: name.to_string(),
            image: "img".to_string(),
            container_port: 22,
            host_port: port,
            env: Vec::new(),
            labels: HashMap::new(),
            limits: ResourceLimits {
                memory_bytes: 1,
                nano_cpus: 1,
                pids_limit: 1,
            },
        }
    }

    #[tokio::test]
    async fn test_mock_rejects_duplicate_names() {
        let runtime = MockRuntime::new();
        runtime.add_image("img");
        runtime.create(&spec("a", 1)).await.unwrap();
        let err = runtime.create(&spec("a", 2)).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_mock_rejects_port_conflicts_on_start() {
        let runtime = MockRuntime::new();
        runtime.add_image("img");
        runtime.insert_running("a", 22001);
        runtime.create(&spec("b", 22001)).await.unwrap();
        let err = runtime.start("b").await.unwrap_err();
        assert!(matches!(err, RuntimeError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_mock_remove_by_id() {
        let runtime = MockRuntime::new();
        runtime.insert_running("a", 22001);
        let id = runtime.container("a").unwrap().id;
        runtime.remove(&id).await.unwrap();
        assert_eq!(runtime.container_count(), 0);
        assert!(matches!(
            runtime.remove(&id).await,
            Err(RuntimeError::NotFound(_))
        ));
    }
}
