#[path = "common/mod.rs"]
mod common;

use std::sync::Arc;

use common::{clock_and_store, executor, instance, leadership, matching_container};
use gilliam_scheduler::{
    clock::Clock,
    executor::ExecutorManager,
    model::InstanceState,
    scheduler::{Scheduler, Terminator, Updater},
    store::{InstanceStore, KvStore, MemoryKvStore},
    test_utils::{FakeExecutorManager, ManualClock},
};

struct Harness {
    clock: Arc<ManualClock>,
    kv: Arc<MemoryKvStore>,
    instances: Arc<InstanceStore>,
    manager: Arc<FakeExecutorManager>,
}

impl Harness {
    fn new() -> Self {
        let (clock, kv) = clock_and_store();
        let instances = Arc::new(InstanceStore::new(
            Arc::clone(&kv) as Arc<dyn KvStore>,
            "scheduler",
        ));
        Self {
            clock,
            kv,
            instances,
            manager: Arc::new(FakeExecutorManager::new()),
        }
    }

    fn scheduler(&self) -> Scheduler {
        Scheduler::new(
            Arc::clone(&self.clock) as Arc<dyn Clock>,
            Arc::clone(&self.instances),
            Arc::clone(&self.manager) as Arc<dyn ExecutorManager>,
            leadership(Arc::clone(&self.kv) as Arc<dyn KvStore>),
        )
    }

    fn updater(&self) -> Updater {
        Updater::new(
            Arc::clone(&self.clock) as Arc<dyn Clock>,
            Arc::clone(&self.instances),
            Arc::clone(&self.manager) as Arc<dyn ExecutorManager>,
            leadership(Arc::clone(&self.kv) as Arc<dyn KvStore>),
        )
    }

    fn terminator(&self) -> Terminator {
        Terminator::new(
            Arc::clone(&self.clock) as Arc<dyn Clock>,
            Arc::clone(&self.instances),
            Arc::clone(&self.manager) as Arc<dyn ExecutorManager>,
            leadership(Arc::clone(&self.kv) as Arc<dyn KvStore>),
        )
    }
}

#[test]
fn s1_empty_fleet_makes_no_dispatch() {
    let harness = Harness::new();
    harness
        .instances
        .create(&instance("api", InstanceState::Pending))
        .unwrap();

    let mut scheduler = harness.scheduler();
    scheduler.tick().expect("tick succeeds");

    assert!(harness.manager.dispatch_log().is_empty());
    let index = harness.instances.index().unwrap();
    assert_eq!(index.len(), 1);
    assert!(index[0].assigned_to.is_none());
}

#[test]
fn s2_happy_placement_prefers_least_loaded_executor() {
    let harness = Harness::new();
    harness.manager.add_executor(executor("exec-a", &[], 3));
    harness.manager.add_executor(executor("exec-b", &[], 1));

    let api = instance("api", InstanceState::Pending);
    harness.instances.create(&api).unwrap();

    harness.scheduler().tick().expect("tick succeeds");

    let dispatched = harness.manager.dispatch_log();
    assert_eq!(dispatched, vec![(api.name.clone(), "exec-b".to_string())]);

    // The placement decision is recorded so a later tick can recover it.
    let stored = harness.instances.get(&api.name).unwrap().unwrap();
    assert_eq!(stored.assigned_to.as_deref(), Some("exec-b"));
}

#[test]
fn scheduler_redispatches_recorded_assignments() {
    let harness = Harness::new();
    harness.manager.add_executor(executor("exec-a", &[], 0));

    let mut api = instance("api", InstanceState::Pending);
    api.assigned_to = Some("exec-gone".to_string());
    harness.instances.create(&api).unwrap();

    harness.scheduler().tick().expect("tick succeeds");

    // The earlier placement wins over a fresh policy decision.
    assert_eq!(
        harness.manager.dispatch_log(),
        vec![(api.name.clone(), "exec-gone".to_string())]
    );
}

#[test]
fn dispatch_errors_are_swallowed_and_retried() {
    let harness = Harness::new();
    harness.manager.add_executor(executor("exec-a", &[], 0));
    harness
        .instances
        .create(&instance("api", InstanceState::Pending))
        .unwrap();

    harness.manager.fail_dispatch(true);
    let mut scheduler = harness.scheduler();
    scheduler.tick().expect("failed dispatch does not break the tick");

    assert!(harness.manager.dispatch_log().is_empty());
    let stored = &harness.instances.index().unwrap()[0];
    assert!(stored.assigned_to.is_none());

    // The next tick picks the instance up again.
    harness.manager.fail_dispatch(false);
    scheduler.tick().expect("tick succeeds");
    assert_eq!(harness.manager.dispatch_log().len(), 1);
}

#[test]
fn s6_rate_clamp_bounds_dispatches_per_tick() {
    let harness = Harness::new();
    harness.manager.add_executor(executor("exec-a", &[], 0));

    for _ in 0..100 {
        harness
            .instances
            .create(&instance("api", InstanceState::Pending))
            .unwrap();
    }

    harness.scheduler().tick().expect("tick succeeds");

    // burst = 30, and the tick takes well under a second of accrual.
    assert_eq!(harness.manager.dispatch_log().len(), 30);
}

#[test]
fn s3_drift_restart_issues_exactly_one_restart() {
    let harness = Harness::new();

    let mut api = instance("api", InstanceState::Pending);
    harness.instances.create(&api).unwrap();
    harness.instances.mark_running(&mut api, "exec-a").unwrap();

    // The executor reports an older image than the instance declares.
    let mut observed = matching_container(&api);
    observed.image = "repo/app:v1".to_string();
    harness.manager.set_container(&api.name, observed);

    harness.updater().tick().expect("tick succeeds");

    assert_eq!(harness.manager.restart_log(), vec![api.name.clone()]);
    let stored = harness.instances.get(&api.name).unwrap().unwrap();
    assert_eq!(stored.state, InstanceState::Running);
}

#[test]
fn env_drift_triggers_restart() {
    let harness = Harness::new();

    let mut api = instance("api", InstanceState::Pending);
    api.env.insert("PORT".into(), "8080".into());
    harness.instances.create(&api).unwrap();
    harness.instances.mark_running(&mut api, "exec-a").unwrap();

    let mut observed = matching_container(&api);
    observed.env.insert("PORT".into(), "9090".into());
    harness.manager.set_container(&api.name, observed);

    harness.updater().tick().expect("tick succeeds");
    assert_eq!(harness.manager.restart_log().len(), 1);
}

#[test]
fn s4_migration_repair_transitions_to_running() {
    let harness = Harness::new();

    let mut api = instance("api", InstanceState::Pending);
    harness.instances.create(&api).unwrap();
    harness.instances.mark_running(&mut api, "exec-a").unwrap();
    harness
        .instances
        .set_state(&mut api, InstanceState::Migrating)
        .unwrap();

    harness
        .manager
        .set_container(&api.name, matching_container(&api));

    harness.updater().tick().expect("tick succeeds");

    assert!(harness.manager.restart_log().is_empty());
    let stored = harness.instances.get(&api.name).unwrap().unwrap();
    assert_eq!(stored.state, InstanceState::Running);
}

#[test]
fn updater_skips_unknown_containers_and_settled_instances() {
    let harness = Harness::new();

    // No container observed at all.
    let mut blind = instance("api", InstanceState::Pending);
    harness.instances.create(&blind).unwrap();
    harness.instances.mark_running(&mut blind, "exec-a").unwrap();

    // A terminated instance whose stale container still drifts.
    let mut settled = instance("worker", InstanceState::Pending);
    harness.instances.create(&settled).unwrap();
    harness
        .instances
        .set_state(&mut settled, InstanceState::Terminated)
        .unwrap();
    let mut stale = matching_container(&settled);
    stale.image = "repo/app:v0".to_string();
    harness.manager.set_container(&settled.name, stale);

    harness.updater().tick().expect("tick succeeds");

    assert!(harness.manager.restart_log().is_empty());
}

#[test]
fn terminator_drives_shutting_down_to_terminated() {
    let harness = Harness::new();

    let mut api = instance("api", InstanceState::Pending);
    harness.instances.create(&api).unwrap();
    harness
        .instances
        .set_state(&mut api, InstanceState::ShuttingDown)
        .unwrap();

    harness.terminator().tick().expect("tick succeeds");

    assert_eq!(harness.manager.terminate_log(), vec![api.name.clone()]);
    let stored = harness.instances.get(&api.name).unwrap().unwrap();
    assert_eq!(stored.state, InstanceState::Terminated);

    // A second tick finds nothing left to do.
    harness.terminator().tick().expect("tick succeeds");
    assert_eq!(harness.manager.terminate_log().len(), 1);
}

#[test]
fn loops_are_inert_without_leadership() {
    let harness = Harness::new();
    harness.manager.add_executor(executor("exec-a", &[], 0));
    harness
        .instances
        .create(&instance("api", InstanceState::Pending))
        .unwrap();

    let mut scheduler = harness.scheduler();

    // Another process took the slot after our lease lapsed.
    harness.kv.delete("locks/leader").unwrap();
    harness.kv.put("locks/leader", "other-scheduler").unwrap();

    scheduler.tick().expect("non-leader tick is a no-op");
    assert!(harness.manager.dispatch_log().is_empty());
}

#[test]
fn placement_requirements_steer_dispatch() {
    let harness = Harness::new();
    harness.manager.add_executor(executor("exec-db", &["db"], 0));
    harness
        .manager
        .add_executor(executor("exec-web", &["webserver"], 5));

    let mut api = instance("api", InstanceState::Pending);
    api.placement.requirements = vec!["'webserver' in tags".to_string()];
    harness.instances.create(&api).unwrap();

    harness.scheduler().tick().expect("tick succeeds");

    // The only tag match wins despite its higher container count.
    assert_eq!(
        harness.manager.dispatch_log(),
        vec![(api.name, "exec-web".to_string())]
    );
}

#[test]
fn unmatched_requirements_leave_instance_unassigned() {
    let harness = Harness::new();
    harness.manager.add_executor(executor("exec-db", &["db"], 0));

    let mut api = instance("api", InstanceState::Pending);
    api.placement.requirements = vec!["'webserver' in tags".to_string()];
    harness.instances.create(&api).unwrap();

    harness.scheduler().tick().expect("tick succeeds");

    assert!(harness.manager.dispatch_log().is_empty());
    assert!(harness.instances.index().unwrap()[0].assigned_to.is_none());
}

#[test]
fn observed_container_matching_declared_config_is_left_alone() {
    let harness = Harness::new();

    let mut api = instance("api", InstanceState::Pending);
    api.env.insert("A".into(), "1".into());
    api.env.insert("B".into(), "2".into());
    api.ports = vec![80, 443];
    harness.instances.create(&api).unwrap();
    harness.instances.mark_running(&mut api, "exec-a").unwrap();

    harness
        .manager
        .set_container(&api.name, matching_container(&api));

    harness.updater().tick().expect("tick succeeds");

    assert!(harness.manager.restart_log().is_empty());
    let stored = harness.instances.get(&api.name).unwrap().unwrap();
    assert_eq!(stored.state, InstanceState::Running);
}

#[test]
fn drained_bucket_ends_the_update_cycle() {
    let harness = Harness::new();

    // More drifted instances than the burst allows in one tick.
    for _ in 0..40 {
        let mut inst = instance("api", InstanceState::Pending);
        harness.instances.create(&inst).unwrap();
        harness.instances.mark_running(&mut inst, "exec-a").unwrap();
        let mut observed = matching_container(&inst);
        observed.image = "repo/app:v1".to_string();
        harness.manager.set_container(&inst.name, observed);
    }

    harness.updater().tick().expect("tick succeeds");
    assert_eq!(harness.manager.restart_log().len(), 30);
}
