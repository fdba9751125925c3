//! The three reconciliation control loops: placement, update, termination.
//!
//! Each loop verifies leadership at the top of a tick and no-ops when the
//! lock is not held, so loops in non-leader processes are inert. Errors
//! inside one iteration are logged and swallowed; the runner keeps ticking.
use std::{collections::BTreeSet, sync::Arc};

use tracing::{debug, info, warn};

use crate::{
    clock::Clock,
    constants::{LIMITER_BURST, LIMITER_RATE, LOOP_INTERVAL},
    error::StoreError,
    executor::ExecutorManager,
    limiter::RateLimiter,
    lock::LeaderGuard,
    model::InstanceState,
    policy::PlacementPolicy,
    runner::PeriodicRunner,
    store::InstanceStore,
};

/// Placement loop: dispatches unassigned instances to an executor chosen
/// by the policy.
pub struct Scheduler {
    instances: Arc<InstanceStore>,
    manager: Arc<dyn ExecutorManager>,
    policy: PlacementPolicy,
    limiter: RateLimiter,
    leadership: Arc<LeaderGuard>,
}

impl Scheduler {
    /// Creates the loop with the default token bucket.
    pub fn new(
        clock: Arc<dyn Clock>,
        instances: Arc<InstanceStore>,
        manager: Arc<dyn ExecutorManager>,
        leadership: Arc<LeaderGuard>,
    ) -> Self {
        Self {
            instances,
            manager,
            policy: PlacementPolicy::new(),
            limiter: RateLimiter::new(clock, LIMITER_RATE, LIMITER_BURST),
            leadership,
        }
    }

    /// One placement pass over the unassigned index.
    pub fn tick(&mut self) -> Result<(), StoreError> {
        if let Err(err) = self.leadership.verify() {
            debug!("scheduler is not leader, skipping tick: {err}");
            return Ok(());
        }

        let clients = self.manager.clients();
        let live: BTreeSet<String> = clients.iter().map(|e| e.name.clone()).collect();

        for mut instance in self.instances.unassigned(&live)? {
            if !self.limiter.check() {
                break;
            }

            if let Some(executor) = instance.assigned_to.clone() {
                // A placement that was decided earlier but never delivered;
                // re-dispatch to the recorded executor.
                if let Err(err) = self.manager.dispatch(&instance, &executor) {
                    warn!("re-dispatch of {} to {executor} failed: {err}", instance.name);
                }
                continue;
            }

            let Some(target) = self.policy.select(&clients, &instance.placement) else {
                debug!("no executor matches placement for {}", instance.name);
                continue;
            };
            let target = target.name.clone();

            match self.manager.dispatch(&instance, &target) {
                Ok(()) => {
                    instance.assigned_to = Some(target.clone());
                    if let Err(err) = self.instances.update(&instance) {
                        warn!(
                            "failed to record assignment of {} to {target}: {err}",
                            instance.name
                        );
                    }
                }
                Err(err) => {
                    warn!("dispatch of {} to {target} failed: {err}", instance.name);
                }
            }
        }

        Ok(())
    }

    /// Starts the loop at the standard cadence.
    pub fn spawn(mut self) -> PeriodicRunner {
        PeriodicRunner::spawn("scheduler", LOOP_INTERVAL, move || self.tick())
    }
}

/// Update loop: detects instance-vs-container drift and repairs state for
/// completed migrations.
pub struct Updater {
    instances: Arc<InstanceStore>,
    manager: Arc<dyn ExecutorManager>,
    limiter: RateLimiter,
    leadership: Arc<LeaderGuard>,
}

impl Updater {
    /// Creates the loop with the default token bucket.
    pub fn new(
        clock: Arc<dyn Clock>,
        instances: Arc<InstanceStore>,
        manager: Arc<dyn ExecutorManager>,
        leadership: Arc<LeaderGuard>,
    ) -> Self {
        Self {
            instances,
            manager,
            limiter: RateLimiter::new(clock, LIMITER_RATE, LIMITER_BURST),
            leadership,
        }
    }

    /// One drift-detection pass over the full instance index.
    pub fn tick(&mut self) -> Result<(), StoreError> {
        if let Err(err) = self.leadership.verify() {
            debug!("updater is not leader, skipping tick: {err}");
            return Ok(());
        }

        let index = self.instances.index()?;
        let containers = self.manager.containers(&index);

        for (mut instance, container) in index.into_iter().zip(containers) {
            let Some(container) = container else {
                continue;
            };
            if !instance.is_running() {
                continue;
            }

            if !instance.matches_container(&container) {
                if !self.limiter.check() {
                    break;
                }
                info!(
                    "restarting {}/{} because of config change",
                    instance.formation, instance.name
                );
                if let Err(err) = self.manager.restart(&instance) {
                    warn!("restart of {} failed: {err}", instance.name);
                }
            } else if instance.state == InstanceState::Migrating {
                if !self.limiter.check() {
                    break;
                }
                // The migration finished but nobody recorded it; this is
                // what a scheduler that migrated itself leaves behind.
                info!(
                    "setting migrating instance {}/{} to running",
                    instance.formation, instance.name
                );
                if let Err(err) =
                    self.instances.set_state(&mut instance, InstanceState::Running)
                {
                    warn!("state repair of {} failed: {err}", instance.name);
                }
            }
        }

        Ok(())
    }

    /// Starts the loop at the standard cadence.
    pub fn spawn(mut self) -> PeriodicRunner {
        PeriodicRunner::spawn("updater", LOOP_INTERVAL, move || self.tick())
    }
}

/// Termination loop: drives shutting-down instances to terminated.
pub struct Terminator {
    instances: Arc<InstanceStore>,
    manager: Arc<dyn ExecutorManager>,
    limiter: RateLimiter,
    leadership: Arc<LeaderGuard>,
}

impl Terminator {
    /// Creates the loop with the default token bucket.
    pub fn new(
        clock: Arc<dyn Clock>,
        instances: Arc<InstanceStore>,
        manager: Arc<dyn ExecutorManager>,
        leadership: Arc<LeaderGuard>,
    ) -> Self {
        Self {
            instances,
            manager,
            limiter: RateLimiter::new(clock, LIMITER_RATE, LIMITER_BURST),
            leadership,
        }
    }

    /// One termination pass over the shutting-down index.
    pub fn tick(&mut self) -> Result<(), StoreError> {
        if let Err(err) = self.leadership.verify() {
            debug!("terminator is not leader, skipping tick: {err}");
            return Ok(());
        }

        for mut instance in self.instances.shutting_down()? {
            if !self.limiter.check() {
                break;
            }

            match self.manager.terminate(&instance) {
                Ok(()) => {
                    if let Err(err) =
                        self.instances.set_state(&mut instance, InstanceState::Terminated)
                    {
                        warn!("failed to record termination of {}: {err}", instance.name);
                    }
                }
                Err(err) => {
                    warn!("terminate of {} failed: {err}", instance.name);
                }
            }
        }

        Ok(())
    }

    /// Starts the loop at the standard cadence.
    pub fn spawn(mut self) -> PeriodicRunner {
        PeriodicRunner::spawn("terminator", LOOP_INTERVAL, move || self.tick())
    }
}
