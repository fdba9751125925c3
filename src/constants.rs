//! Constants and default configuration values for the scheduler.

use std::time::Duration;

/// Cadence of the placement, update and termination control loops.
pub const LOOP_INTERVAL: Duration = Duration::from_secs(3);

/// Token accrual rate for every control-loop rate limiter, in tokens per second.
pub const LIMITER_RATE: f64 = 10.0;

/// Token-bucket capacity for every control-loop rate limiter.
pub const LIMITER_BURST: f64 = 30.0;

/// Upper bound on waiting for a dispatched instance to reach `running`.
pub const DEPLOY_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Release name assigned to the manifest during bootstrap.
pub const INITIAL_RELEASE_NAME: &str = "1";

/// Reserved service name for the coordination-store instance.
pub const STORE_SERVICE: &str = "_store";

/// Reserved service name for the bootstrapper; never deployed as an instance.
pub const BOOTSTRAP_SERVICE: &str = "_bootstrap";

/// Name of the leader-lock slot in the coordination store.
pub const LEADER_LOCK: &str = "leader";

/// Holder identity used while the bootstrapper owns the leader lock.
pub const BOOTSTRAP_HOLDER: &str = "bootstrapper";

/// Delay between attempts to acquire an already-held lock.
pub const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Lease applied to the leader-lock slot so a dead holder eventually expires.
pub const LOCK_TTL: Duration = Duration::from_secs(30);

/// Interval between store readiness probes after the `_store` deploy.
pub const STORE_READY_INTERVAL: Duration = Duration::from_millis(500);

/// Deadline for the coordination store to answer readiness probes.
pub const STORE_READY_TIMEOUT: Duration = Duration::from_secs(60);

/// Cadence of the executor manager's fleet-view refresh.
pub const FLEET_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// Port executor agents listen on.
pub const EXECUTOR_AGENT_PORT: u16 = 9123;

/// Port the coordination store listens on.
pub const STORE_PORT: u16 = 4001;

/// Rank expression applied when placement options carry none.
pub const DEFAULT_RANK: &str = "-ncont";

/// Formation assumed when `GILLIAM_FORMATION` is unset.
pub const DEFAULT_FORMATION: &str = "scheduler";

/// Environment variable carrying an inline release manifest.
pub const ENV_RELEASE: &str = "RELEASE";

/// Environment variable with comma-separated service registry endpoints.
pub const ENV_SERVICE_REGISTRY: &str = "GILLIAM_SERVICE_REGISTRY";

/// Environment variable naming the scheduler's own formation.
pub const ENV_FORMATION: &str = "GILLIAM_FORMATION";

/// Hostname of the coordination store within a formation.
pub fn store_endpoint(formation: &str) -> String {
    format!("_store.{formation}.service")
}
