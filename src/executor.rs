//! Executor manager: the live fleet view and the dispatch contract the
//! control loops consume.
use std::{
    collections::BTreeSet,
    sync::{Arc, RwLock},
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, warn};

use crate::{
    constants::{EXECUTOR_AGENT_PORT, FLEET_REFRESH_INTERVAL},
    error::{DispatchError, RegistryError},
    model::{Container, Executor, Instance, InstanceState},
    registry::ServiceRegistry,
    runner::PeriodicRunner,
};

/// Asynchronous dispatcher with a state-probe interface. Holds the live
/// fleet view; delivery to executor agents happens behind this contract.
pub trait ExecutorManager: Send + Sync {
    /// Live snapshot of the fleet.
    fn clients(&self) -> Vec<Executor>;

    /// Delivers the instance to the named executor.
    fn dispatch(&self, instance: &Instance, executor: &str) -> Result<(), DispatchError>;

    /// Blocks up to `timeout` for the instance to reach a terminal deploy
    /// state on the executor, returning the state observed.
    fn wait(
        &self,
        instance: &Instance,
        executor: &str,
        timeout: Duration,
    ) -> Result<InstanceState, DispatchError>;

    /// Observed containers aligned with `instances`; `None` where the
    /// container is unknown.
    fn containers(&self, instances: &[Instance]) -> Vec<Option<Container>>;

    /// Restarts the instance's container on its assigned executor.
    fn restart(&self, instance: &Instance) -> Result<(), DispatchError>;

    /// Terminates the instance's container on its assigned executor.
    fn terminate(&self, instance: &Instance) -> Result<(), DispatchError>;
}

/// Executor manager over HTTP: the fleet view refreshes from the service
/// registry on a background worker, and instance operations go to the
/// executor agents directly.
pub struct HttpExecutorManager {
    registry: Arc<dyn ServiceRegistry>,
    fleet: Arc<RwLock<Vec<Executor>>>,
    client: reqwest::blocking::Client,
    refresher: Option<PeriodicRunner>,
}

impl HttpExecutorManager {
    /// Creates a manager with an empty fleet view.
    pub fn new(registry: Arc<dyn ServiceRegistry>) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self {
            registry,
            fleet: Arc::new(RwLock::new(Vec::new())),
            client,
            refresher: None,
        }
    }

    /// Starts the background fleet refresh and performs one synchronous
    /// refresh so the first caller sees a populated view.
    pub fn start(&mut self) {
        if self.refresher.is_some() {
            return;
        }

        let registry = Arc::clone(&self.registry);
        let fleet = Arc::clone(&self.fleet);
        let client = self.client.clone();
        if let Err(err) = refresh_fleet(&registry, &client, &fleet) {
            warn!("initial fleet refresh failed: {err}");
        }

        self.refresher = Some(PeriodicRunner::spawn(
            "fleet-refresh",
            FLEET_REFRESH_INTERVAL,
            move || refresh_fleet(&registry, &client, &fleet),
        ));
    }

    /// Stops the background refresh.
    pub fn stop(&mut self) {
        if let Some(refresher) = self.refresher.take() {
            refresher.stop();
        }
    }

    fn executor_host(&self, name: &str) -> Result<String, DispatchError> {
        let fleet = self.fleet.read().unwrap_or_else(|e| e.into_inner());
        fleet
            .iter()
            .find(|executor| executor.name == name)
            .map(|executor| executor.host.clone())
            .ok_or_else(|| DispatchError::Unreachable {
                executor: name.to_string(),
                reason: "not in the live fleet".to_string(),
            })
    }

    fn assigned_host(&self, instance: &Instance) -> Result<(String, String), DispatchError> {
        let executor =
            instance
                .assigned_to
                .clone()
                .ok_or_else(|| DispatchError::UnknownExecutor {
                    instance: instance.name.clone(),
                    executor: "<unassigned>".to_string(),
                })?;
        let host = self.executor_host(&executor)?;
        Ok((executor, host))
    }

    fn agent_url(host: &str, path: &str) -> String {
        format!("http://{host}:{EXECUTOR_AGENT_PORT}{path}")
    }

    fn probe_state(&self, host: &str, instance: &Instance) -> Option<InstanceState> {
        let url = Self::agent_url(host, &format!("/state/{}", instance.name));
        let body = self.client.get(url).send().ok()?.text().ok()?;
        let doc: serde_json::Value = serde_json::from_str(&body).ok()?;
        doc["state"].as_str()?.parse().ok()
    }
}

fn refresh_fleet(
    registry: &Arc<dyn ServiceRegistry>,
    client: &reqwest::blocking::Client,
    fleet: &Arc<RwLock<Vec<Executor>>>,
) -> Result<(), RegistryError> {
    let members = registry.query_formation("executor")?;

    let mut view = Vec::with_capacity(members.len());
    for (_, entry) in members {
        let host = entry
            .attr("host")
            .unwrap_or(entry.instance.as_str())
            .to_string();
        let tags: BTreeSet<String> = entry
            .attrs
            .get("tags")
            .and_then(|value| value.as_array())
            .map(|values| {
                values
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        let url = HttpExecutorManager::agent_url(&host, "/containers");
        let containers: Vec<Container> = client
            .get(url)
            .send()
            .and_then(|r| r.text())
            .ok()
            .and_then(|body| serde_json::from_str(&body).ok())
            .unwrap_or_else(|| {
                debug!("no container listing from executor '{}'", entry.instance);
                Vec::new()
            });

        view.push(Executor {
            name: entry.instance.clone(),
            host,
            domain: entry.attr("domain").unwrap_or_default().to_string(),
            tags,
            containers,
        });
    }

    *fleet.write().unwrap_or_else(|e| e.into_inner()) = view;
    Ok(())
}

impl ExecutorManager for HttpExecutorManager {
    fn clients(&self) -> Vec<Executor> {
        self.fleet.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn dispatch(&self, instance: &Instance, executor: &str) -> Result<(), DispatchError> {
        let host = self.executor_host(executor)?;
        let url = Self::agent_url(&host, "/containers");
        let body = serde_json::to_string(instance).map_err(|err| DispatchError::Rejected {
            executor: executor.to_string(),
            operation: "dispatch",
            instance: format!("{} ({err})", instance.name),
        })?;

        let response = self
            .client
            .post(url)
            .header("content-type", "application/json")
            .body(body)
            .send()
            .map_err(|err| DispatchError::Unreachable {
                executor: executor.to_string(),
                reason: err.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(DispatchError::Rejected {
                executor: executor.to_string(),
                operation: "dispatch",
                instance: instance.name.clone(),
            });
        }
        Ok(())
    }

    fn wait(
        &self,
        instance: &Instance,
        executor: &str,
        timeout: Duration,
    ) -> Result<InstanceState, DispatchError> {
        let host = self.executor_host(executor)?;
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(state) = self.probe_state(&host, instance)
                && state != InstanceState::Pending
            {
                return Ok(state);
            }
            if Instant::now() >= deadline {
                return Err(DispatchError::Timeout {
                    instance: instance.name.clone(),
                    secs: timeout.as_secs(),
                });
            }
            thread::sleep(Duration::from_secs(1));
        }
    }

    fn containers(&self, instances: &[Instance]) -> Vec<Option<Container>> {
        instances
            .iter()
            .map(|instance| {
                let (_, host) = self.assigned_host(instance).ok()?;
                let url = Self::agent_url(&host, &format!("/containers/{}", instance.name));
                let response = self.client.get(url).send().ok()?;
                if !response.status().is_success() {
                    return None;
                }
                let body = response.text().ok()?;
                serde_json::from_str(&body).ok()
            })
            .collect()
    }

    fn restart(&self, instance: &Instance) -> Result<(), DispatchError> {
        let (executor, host) = self.assigned_host(instance)?;
        let url = Self::agent_url(&host, &format!("/containers/{}/restart", instance.name));
        let response = self
            .client
            .post(url)
            .send()
            .map_err(|err| DispatchError::Unreachable {
                executor: executor.clone(),
                reason: err.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(DispatchError::Rejected {
                executor,
                operation: "restart",
                instance: instance.name.clone(),
            });
        }
        Ok(())
    }

    fn terminate(&self, instance: &Instance) -> Result<(), DispatchError> {
        let (executor, host) = self.assigned_host(instance)?;
        let url = Self::agent_url(&host, &format!("/containers/{}", instance.name));
        let response = self
            .client
            .delete(url)
            .send()
            .map_err(|err| DispatchError::Unreachable {
                executor: executor.clone(),
                reason: err.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(DispatchError::Rejected {
                executor,
                operation: "terminate",
                instance: instance.name.clone(),
            });
        }
        Ok(())
    }
}

impl Drop for HttpExecutorManager {
    fn drop(&mut self) {
        self.stop();
    }
}
