//! One-shot self-install of the initial formation.
//!
//! The coordination store cannot be written to before it exists, so the
//! `_store` instance is deployed by value first and backfilled once its own
//! service answers. The leader lock keeps a racing scheduler from stealing
//! placement decisions mid-bootstrap.
use std::{collections::BTreeMap, sync::Arc, thread, time::Instant};

use tracing::info;

use crate::{
    config::ReleaseManifest,
    constants::{
        BOOTSTRAP_HOLDER, DEPLOY_TIMEOUT, INITIAL_RELEASE_NAME, LEADER_LOCK, STORE_READY_INTERVAL,
        STORE_READY_TIMEOUT, STORE_SERVICE,
    },
    error::BootstrapError,
    executor::ExecutorManager,
    lock::LeaderLock,
    model::{Instance, InstanceState},
    registry::{ServiceRegistry, select_executor},
    store::{InstanceStore, KvStore, ReleaseStore},
};

/// Bootstrapper wiring: the registry to pick executors from, the manager
/// to dispatch through, and the store client that becomes usable once the
/// `_store` instance is up.
pub struct Bootstrap {
    registry: Arc<dyn ServiceRegistry>,
    manager: Arc<dyn ExecutorManager>,
    kv: Arc<dyn KvStore>,
    formation: String,
}

impl Bootstrap {
    /// Creates the bootstrapper for one formation.
    pub fn new(
        registry: Arc<dyn ServiceRegistry>,
        manager: Arc<dyn ExecutorManager>,
        kv: Arc<dyn KvStore>,
        formation: &str,
    ) -> Self {
        Self {
            registry,
            manager,
            kv,
            formation: formation.to_string(),
        }
    }

    /// Installs the formation described by the manifest. All-or-nothing:
    /// any failure aborts so an external supervisor can retry.
    pub fn run(&self, manifest: ReleaseManifest) -> Result<(), BootstrapError> {
        let release = manifest.clone().into_release(INITIAL_RELEASE_NAME);

        let mut instances: BTreeMap<String, Instance> = manifest
            .deployable_services()
            .map(|(service, template)| {
                (
                    service.clone(),
                    Instance::from_template(
                        &self.formation,
                        service,
                        INITIAL_RELEASE_NAME,
                        template,
                    ),
                )
            })
            .collect();

        let mut store_instance = instances
            .remove(STORE_SERVICE)
            .ok_or(BootstrapError::MissingStoreService)?;

        let executor = select_executor(self.registry.as_ref())?;
        self.deploy(&store_instance, &executor)?;

        info!("waiting for the coordination store to answer");
        self.await_store_ready()?;

        let instance_store = InstanceStore::new(Arc::clone(&self.kv), &self.formation);
        let release_store = ReleaseStore::new(Arc::clone(&self.kv), &self.formation);

        // The store is reachable now, so the earlier by-value deploy can
        // become a proper record.
        store_instance.state = InstanceState::Running;
        store_instance.assigned_to = Some(executor);
        instance_store.create(&store_instance)?;
        release_store.create(&release)?;

        let leader = LeaderLock::acquire(Arc::clone(&self.kv), LEADER_LOCK, BOOTSTRAP_HOLDER)?;
        for (_, mut instance) in instances {
            leader.verify()?;
            instance_store.create(&instance)?;

            let executor = select_executor(self.registry.as_ref())?;
            self.deploy(&instance, &executor)?;
            instance_store.mark_running(&mut instance, &executor)?;
        }
        leader.release()?;

        info!("done! scheduler should be up and running");
        Ok(())
    }

    fn deploy(&self, instance: &Instance, executor: &str) -> Result<(), BootstrapError> {
        info!("dispatching instance {} to {executor}", instance.name);
        self.manager.dispatch(instance, executor)?;

        let state = self.manager.wait(instance, executor, DEPLOY_TIMEOUT)?;
        if state != InstanceState::Running {
            return Err(BootstrapError::DeployFailure {
                instance: instance.name.clone(),
                state: state.to_string(),
            });
        }
        Ok(())
    }

    fn await_store_ready(&self) -> Result<(), BootstrapError> {
        let deadline = Instant::now() + STORE_READY_TIMEOUT;
        while self.kv.ping().is_err() {
            if Instant::now() >= deadline {
                return Err(BootstrapError::StoreNotReady {
                    secs: STORE_READY_TIMEOUT.as_secs(),
                });
            }
            thread::sleep(STORE_READY_INTERVAL);
        }
        Ok(())
    }
}
