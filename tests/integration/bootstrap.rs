use std::sync::Arc;

use gilliam_scheduler::{
    bootstrap::Bootstrap,
    clock::Clock,
    config::ReleaseManifest,
    error::BootstrapError,
    executor::ExecutorManager,
    lock::LeaderLock,
    model::InstanceState,
    registry::ServiceRegistry,
    store::{InstanceStore, KvStore, MemoryKvStore, ReleaseStore},
    test_utils::{
        FakeExecutorManager, ManualClock, RecordingKvStore, SharedLog, StaticRegistry,
        shared_log,
    },
};

const MANIFEST: &str = r#"
services:
  _store:
    image: "gilliam/etcd:2"
    ports: [4001]
  api:
    image: "gilliam/api:1"
  worker:
    image: "gilliam/worker:1"
  _bootstrap:
    image: "gilliam/bootstrap:1"
"#;

fn manifest() -> ReleaseManifest {
    serde_yaml::from_str(MANIFEST).expect("manifest parses")
}

struct Harness {
    log: SharedLog,
    kv: Arc<RecordingKvStore<MemoryKvStore>>,
    manager: Arc<FakeExecutorManager>,
    registry: Arc<StaticRegistry>,
}

impl Harness {
    fn new(executors: &[&str]) -> Self {
        let log = shared_log();
        let clock = Arc::new(ManualClock::new());
        let kv = Arc::new(RecordingKvStore::new(
            MemoryKvStore::new(clock as Arc<dyn Clock>),
            Arc::clone(&log),
        ));
        let manager = Arc::new(FakeExecutorManager::with_log(Arc::clone(&log)));
        Self {
            log,
            kv,
            manager,
            registry: Arc::new(StaticRegistry::with_executors(executors)),
        }
    }

    fn bootstrap(&self) -> Bootstrap {
        Bootstrap::new(
            Arc::clone(&self.registry) as Arc<dyn ServiceRegistry>,
            Arc::clone(&self.manager) as Arc<dyn ExecutorManager>,
            Arc::clone(&self.kv) as Arc<dyn KvStore>,
            "scheduler",
        )
    }

    fn events(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

#[test]
fn s5_bootstrap_installs_the_formation() {
    let harness = Harness::new(&["exec-1"]);

    harness.bootstrap().run(manifest()).expect("bootstrap succeeds");

    // _store went out first; _bootstrap was never materialized.
    let dispatched: Vec<String> = harness
        .manager
        .dispatch_log()
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert_eq!(dispatched.len(), 3);
    assert!(dispatched[0].starts_with("_store."));
    assert!(dispatched.iter().all(|name| !name.starts_with("_bootstrap")));

    let instances = InstanceStore::new(Arc::clone(&harness.kv) as Arc<dyn KvStore>, "scheduler");
    let index = instances.index().unwrap();
    assert_eq!(index.len(), 3);
    for record in &index {
        assert_eq!(record.state, InstanceState::Running);
        assert_eq!(record.assigned_to.as_deref(), Some("exec-1"));
        assert_ne!(record.service, "_bootstrap");
    }

    // The release landed under (formation, "1").
    let releases = ReleaseStore::new(Arc::clone(&harness.kv) as Arc<dyn KvStore>, "scheduler");
    let release = releases.get("1").unwrap().expect("release persisted");
    assert_eq!(release.name, "1");
    assert_eq!(release.services.len(), 4);
}

#[test]
fn bootstrap_deploys_store_before_any_store_write() {
    let harness = Harness::new(&["exec-1"]);

    harness.bootstrap().run(manifest()).expect("bootstrap succeeds");

    let events = harness.events();
    let first_store_dispatch = events
        .iter()
        .position(|e| e == "dispatch _store")
        .expect("store was dispatched");
    let first_store_write = events
        .iter()
        .position(|e| e.starts_with("store-write"))
        .expect("records were written");
    let first_other_dispatch = events
        .iter()
        .position(|e| e == "dispatch api" || e == "dispatch worker")
        .expect("services were dispatched");

    assert!(
        first_store_dispatch < first_store_write,
        "store write happened before the _store deploy: {events:?}"
    );
    assert!(
        first_store_dispatch < first_other_dispatch,
        "a service was dispatched before _store: {events:?}"
    );
    assert!(
        first_store_write < first_other_dispatch,
        "services must deploy under the lock, after the backfill: {events:?}"
    );
}

#[test]
fn bootstrap_releases_the_leader_lock() {
    let harness = Harness::new(&["exec-1"]);

    harness.bootstrap().run(manifest()).expect("bootstrap succeeds");

    let guard = LeaderLock::try_acquire(
        Arc::clone(&harness.kv) as Arc<dyn KvStore>,
        "leader",
        "steady-state-scheduler",
    )
    .expect("lock store reachable");
    assert!(guard.is_some(), "bootstrap must release the leader lock");
}

#[test]
fn failed_store_deploy_is_fatal() {
    let harness = Harness::new(&["exec-1"]);
    harness
        .manager
        .set_wait_state("_store", InstanceState::Terminated);

    let err = harness.bootstrap().run(manifest()).unwrap_err();
    assert!(matches!(
        err,
        BootstrapError::DeployFailure { instance, state }
            if instance.starts_with("_store.") && state == "terminated"
    ));

    // Nothing was persisted.
    let instances = InstanceStore::new(Arc::clone(&harness.kv) as Arc<dyn KvStore>, "scheduler");
    assert!(instances.index().unwrap().is_empty());
}

#[test]
fn manifest_without_store_service_is_rejected() {
    let harness = Harness::new(&["exec-1"]);
    let manifest: ReleaseManifest =
        serde_yaml::from_str("services:\n  api:\n    image: \"gilliam/api:1\"\n").unwrap();

    assert!(matches!(
        harness.bootstrap().run(manifest),
        Err(BootstrapError::MissingStoreService)
    ));
}

#[test]
fn empty_executor_formation_is_fatal() {
    let harness = Harness::new(&[]);

    assert!(matches!(
        harness.bootstrap().run(manifest()),
        Err(BootstrapError::Registry(_))
    ));
    assert!(harness.manager.dispatch_log().is_empty());
}
