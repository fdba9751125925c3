//! Records reconciled by the scheduler: instances, releases, executors and
//! their observed containers.
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::config::ServiceTemplate;

/// Lifecycle state of a declared instance.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum InstanceState {
    /// Declared but not yet confirmed on an executor.
    Pending,
    /// Confirmed running on its assigned executor.
    Running,
    /// Being moved between executors.
    Migrating,
    /// Shutdown requested; awaiting termination.
    ShuttingDown,
    /// Gone. Terminal.
    Terminated,
}

impl InstanceState {
    /// Whether the state still requires a live container (pending, running
    /// or migrating).
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            InstanceState::Pending | InstanceState::Running | InstanceState::Migrating
        )
    }
}

/// Placement options steering an instance toward suitable executors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlacementOptions {
    /// Boolean expressions an executor must all satisfy.
    #[serde(default)]
    pub requirements: Vec<String>,
    /// Scalar expression ranking surviving executors; largest value wins.
    #[serde(default)]
    pub rank: Option<String>,
}

/// A single declared runtime occurrence of a service within a formation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    /// Formation this instance belongs to.
    pub formation: String,
    /// Service role within the formation.
    pub service: String,
    /// Globally unique name, `service.shortid`.
    pub name: String,
    /// Release the instance was created from.
    pub release: String,
    /// Short opaque id, the suffix of `name`.
    pub instance: String,
    /// Container image to run.
    pub image: String,
    /// Optional command override.
    #[serde(default)]
    pub command: Option<String>,
    /// Environment, order-insensitive.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Ordered list of ports.
    #[serde(default)]
    pub ports: Vec<u16>,
    /// Placement requirements and rank.
    #[serde(default)]
    pub placement: PlacementOptions,
    /// Current lifecycle state.
    pub state: InstanceState,
    /// Executor the instance is assigned to, if any.
    #[serde(default)]
    pub assigned_to: Option<String>,
    /// Timestamp of the last state change.
    pub changed_at: DateTime<Utc>,
}

impl Instance {
    /// Builds a fresh pending instance from a service template, minting a
    /// short id for the `service.shortid` name.
    pub fn from_template(
        formation: &str,
        service: &str,
        release: &str,
        template: &ServiceTemplate,
    ) -> Self {
        let short_id = mint_short_id(service);
        Self {
            formation: formation.to_string(),
            service: service.to_string(),
            name: format!("{service}.{short_id}"),
            release: release.to_string(),
            instance: short_id,
            image: template.image.clone(),
            command: template.command.clone(),
            env: template.env.clone().unwrap_or_default(),
            ports: template.ports.clone().unwrap_or_default(),
            placement: template.placement.clone().unwrap_or_default(),
            state: InstanceState::Pending,
            assigned_to: None,
            changed_at: Utc::now(),
        }
    }

    /// Whether the instance still requires a live container.
    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    /// Whether the observed container realizes this instance's declared
    /// configuration: same image, command, env (as mappings) and ports (as
    /// ordered lists).
    pub fn matches_container(&self, container: &Container) -> bool {
        self.image == container.image
            && self.command == container.command
            && self.env == container.env
            && self.ports == container.ports
    }
}

/// Observed runtime realization of an instance on its executor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Container {
    /// Image the container was started from.
    pub image: String,
    /// Command the container runs, if overridden.
    #[serde(default)]
    pub command: Option<String>,
    /// Environment the container was started with.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Ports the container exposes.
    #[serde(default)]
    pub ports: Vec<u16>,
}

/// Live description of a fleet node, discovered via the executor manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Executor {
    /// Registered executor name.
    pub name: String,
    /// Host the executor agent listens on.
    pub host: String,
    /// Domain the executor belongs to.
    pub domain: String,
    /// Free-form capability tags.
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Containers currently running on the executor.
    #[serde(default)]
    pub containers: Vec<Container>,
}

impl Executor {
    /// Current container count, the `ncont` rank binding.
    pub fn ncont(&self) -> usize {
        self.containers.len()
    }
}

/// Immutable snapshot of a formation's service templates at a release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Release {
    /// Release name.
    pub name: String,
    /// Service name to template mapping.
    pub services: BTreeMap<String, ServiceTemplate>,
}

static SHORT_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Mints a short opaque id: a truncated digest over the seed, the wall
/// clock and a process-local counter.
pub fn mint_short_id(seed: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let counter = SHORT_ID_COUNTER.fetch_add(1, Ordering::Relaxed);

    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    hasher.update(nanos.to_be_bytes());
    hasher.update(counter.to_be_bytes());
    let digest = hasher.finalize();

    let word = u64::from_be_bytes(digest[0..8].try_into().unwrap());
    format!("{word:016x}")[..12].to_string()
}
