use std::{
    collections::BTreeMap,
    sync::{
        Arc, Mutex, MutexGuard, OnceLock,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use crate::{
    clock::Clock,
    error::{DispatchError, RegistryError, StoreError},
    executor::ExecutorManager,
    model::{Container, Executor, Instance, InstanceState},
    registry::{RegistryEntry, ServiceRegistry},
    store::KvStore,
};

/// Global lock for environment variable modifications in tests.
/// All tests that modify environment variables should acquire this lock
/// to prevent race conditions between parallel test executions.
pub static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

pub fn env_lock() -> MutexGuard<'static, ()> {
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Ordered audit trail shared between fakes, so tests can assert ordering
/// across store writes and executor dispatches.
pub type SharedLog = Arc<Mutex<Vec<String>>>;

pub fn shared_log() -> SharedLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Clock that only moves when told to.
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(|e| e.into_inner());
        *offset += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Registry answering the `executor` formation from a fixed member list.
pub struct StaticRegistry {
    executors: Vec<String>,
}

impl StaticRegistry {
    pub fn with_executors(names: &[&str]) -> Self {
        Self {
            executors: names.iter().map(|n| n.to_string()).collect(),
        }
    }
}

impl ServiceRegistry for StaticRegistry {
    fn query_formation(
        &self,
        formation: &str,
    ) -> Result<Vec<(String, RegistryEntry)>, RegistryError> {
        if formation != "executor" {
            return Ok(Vec::new());
        }
        Ok(self
            .executors
            .iter()
            .map(|name| {
                (
                    name.clone(),
                    RegistryEntry {
                        instance: name.clone(),
                        attrs: BTreeMap::new(),
                    },
                )
            })
            .collect())
    }
}

/// In-memory executor manager recording every operation it is asked for.
pub struct FakeExecutorManager {
    fleet: Mutex<Vec<Executor>>,
    containers: Mutex<BTreeMap<String, Container>>,
    wait_states: Mutex<BTreeMap<String, InstanceState>>,
    fail_dispatch: AtomicBool,
    pub dispatched: Mutex<Vec<(String, String)>>,
    pub restarted: Mutex<Vec<String>>,
    pub terminated: Mutex<Vec<String>>,
    log: SharedLog,
}

impl FakeExecutorManager {
    pub fn new() -> Self {
        Self::with_log(shared_log())
    }

    pub fn with_log(log: SharedLog) -> Self {
        Self {
            fleet: Mutex::new(Vec::new()),
            containers: Mutex::new(BTreeMap::new()),
            wait_states: Mutex::new(BTreeMap::new()),
            fail_dispatch: AtomicBool::new(false),
            dispatched: Mutex::new(Vec::new()),
            restarted: Mutex::new(Vec::new()),
            terminated: Mutex::new(Vec::new()),
            log,
        }
    }

    pub fn add_executor(&self, executor: Executor) {
        self.fleet
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(executor);
    }

    pub fn set_container(&self, instance_name: &str, container: Container) {
        self.containers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(instance_name.to_string(), container);
    }

    /// State `wait()` reports for the service; `running` when unset.
    pub fn set_wait_state(&self, service: &str, state: InstanceState) {
        self.wait_states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(service.to_string(), state);
    }

    pub fn fail_dispatch(&self, fail: bool) {
        self.fail_dispatch.store(fail, Ordering::SeqCst);
    }

    pub fn dispatch_log(&self) -> Vec<(String, String)> {
        self.dispatched
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn restart_log(&self) -> Vec<String> {
        self.restarted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn terminate_log(&self) -> Vec<String> {
        self.terminated
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn record(&self, event: String) {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).push(event);
    }
}

impl Default for FakeExecutorManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutorManager for FakeExecutorManager {
    fn clients(&self) -> Vec<Executor> {
        self.fleet.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn dispatch(&self, instance: &Instance, executor: &str) -> Result<(), DispatchError> {
        if self.fail_dispatch.load(Ordering::SeqCst) {
            return Err(DispatchError::Unreachable {
                executor: executor.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        self.record(format!("dispatch {}", instance.service));
        self.dispatched
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((instance.name.clone(), executor.to_string()));
        Ok(())
    }

    fn wait(
        &self,
        instance: &Instance,
        _executor: &str,
        _timeout: Duration,
    ) -> Result<InstanceState, DispatchError> {
        let state = self
            .wait_states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&instance.service)
            .copied()
            .unwrap_or(InstanceState::Running);
        Ok(state)
    }

    fn containers(&self, instances: &[Instance]) -> Vec<Option<Container>> {
        let containers = self.containers.lock().unwrap_or_else(|e| e.into_inner());
        instances
            .iter()
            .map(|instance| containers.get(&instance.name).cloned())
            .collect()
    }

    fn restart(&self, instance: &Instance) -> Result<(), DispatchError> {
        self.record(format!("restart {}", instance.service));
        self.restarted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(instance.name.clone());
        Ok(())
    }

    fn terminate(&self, instance: &Instance) -> Result<(), DispatchError> {
        self.record(format!("terminate {}", instance.service));
        self.terminated
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(instance.name.clone());
        Ok(())
    }
}

/// [`KvStore`] wrapper that records every mutation into the shared log.
pub struct RecordingKvStore<S: KvStore> {
    inner: S,
    log: SharedLog,
}

impl<S: KvStore> RecordingKvStore<S> {
    pub fn new(inner: S, log: SharedLog) -> Self {
        Self { inner, log }
    }

    fn record(&self, event: String) {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).push(event);
    }
}

impl<S: KvStore> KvStore for RecordingKvStore<S> {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(key)
    }

    fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.record(format!("store-write {key}"));
        self.inner.put(key, value)
    }

    fn create(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool, StoreError> {
        self.record(format!("store-write {key}"));
        self.inner.create(key, value, ttl)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.record(format!("store-delete {key}"));
        self.inner.delete(key)
    }

    fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        self.record(format!("store-delete {key}"));
        self.inner.compare_and_delete(key, expected)
    }

    fn refresh(&self, key: &str, expected: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.inner.refresh(key, expected, ttl)
    }

    fn list(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError> {
        self.inner.list(prefix)
    }

    fn ping(&self) -> Result<(), StoreError> {
        self.inner.ping()
    }
}
