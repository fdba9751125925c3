#![allow(dead_code)]

use std::{collections::BTreeSet, sync::Arc};

use gilliam_scheduler::{
    clock::Clock,
    config::ServiceTemplate,
    lock::{LeaderGuard, LeaderLock},
    model::{Container, Executor, Instance, InstanceState},
    store::{KvStore, MemoryKvStore},
    test_utils::ManualClock,
};

pub fn clock_and_store() -> (Arc<ManualClock>, Arc<MemoryKvStore>) {
    let clock = Arc::new(ManualClock::new());
    let kv = Arc::new(MemoryKvStore::new(Arc::clone(&clock) as Arc<dyn Clock>));
    (clock, kv)
}

pub fn leadership(kv: Arc<dyn KvStore>) -> Arc<LeaderGuard> {
    Arc::new(
        LeaderLock::try_acquire(kv, "leader", "test-leader")
            .expect("lock store reachable")
            .expect("lock free"),
    )
}

pub fn template(image: &str) -> ServiceTemplate {
    ServiceTemplate {
        image: image.into(),
        command: None,
        env: None,
        ports: None,
        placement: None,
    }
}

pub fn executor(name: &str, tags: &[&str], ncont: usize) -> Executor {
    Executor {
        name: name.into(),
        host: format!("{name}.example"),
        domain: "test".into(),
        tags: tags.iter().map(|t| t.to_string()).collect::<BTreeSet<_>>(),
        containers: vec![Container::default(); ncont],
    }
}

pub fn instance(service: &str, state: InstanceState) -> Instance {
    let mut built = Instance::from_template("scheduler", service, "1", &template("repo/app:v2"));
    built.state = state;
    built
}

/// A container that realizes the instance's declared configuration.
pub fn matching_container(instance: &Instance) -> Container {
    Container {
        image: instance.image.clone(),
        command: instance.command.clone(),
        env: instance.env.clone(),
        ports: instance.ports.clone(),
    }
}
