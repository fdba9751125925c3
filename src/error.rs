//! Error handling for the scheduler.
use thiserror::Error;

/// Errors raised by coordination-store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store endpoint could not be reached.
    #[error("Store unreachable at '{endpoint}': {reason}")]
    Unreachable {
        /// Endpoint the client tried to reach.
        endpoint: String,
        /// Transport-level failure description.
        reason: String,
    },

    /// A transactional write failed and was rolled back by the store.
    #[error("Store write for key '{key}' rolled back: {reason}")]
    RolledBack {
        /// Key the write targeted.
        key: String,
        /// Store-reported failure description.
        reason: String,
    },

    /// A stored document could not be decoded.
    #[error("Invalid record under key '{key}': {source}")]
    Decode {
        /// Key of the malformed record.
        key: String,
        /// The underlying decoding error.
        #[source]
        source: serde_json::Error,
    },

    /// A record could not be encoded for storage.
    #[error("Failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Transient failure talking to an executor. Logged, swallowed, retried
/// on the next control-loop tick.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The executor could not be reached.
    #[error("Executor '{executor}' unreachable: {reason}")]
    Unreachable {
        /// Name of the executor.
        executor: String,
        /// Transport-level failure description.
        reason: String,
    },

    /// The executor rejected the operation.
    #[error("Executor '{executor}' rejected {operation} for instance '{instance}'")]
    Rejected {
        /// Name of the executor.
        executor: String,
        /// Operation that was rejected (dispatch, restart, terminate).
        operation: &'static str,
        /// Instance the operation targeted.
        instance: String,
    },

    /// No live executor matched the instance's assignment.
    #[error("Instance '{instance}' is assigned to unknown executor '{executor}'")]
    UnknownExecutor {
        /// Instance carrying the stale assignment.
        instance: String,
        /// The assigned executor name.
        executor: String,
    },

    /// The deploy wait elapsed before the instance reached a terminal state.
    #[error("Timed out after {secs}s waiting for instance '{instance}'")]
    Timeout {
        /// Instance that was being waited on.
        instance: String,
        /// Seconds waited.
        secs: u64,
    },
}

/// Errors from leader-lock acquisition and verification.
#[derive(Debug, Error)]
pub enum LockError {
    /// The lock's holder changed while we believed we held it.
    #[error("Lock '{name}' lost: held by '{observed}', expected '{holder}'")]
    Lost {
        /// Name of the lock slot.
        name: String,
        /// Holder identity we wrote.
        holder: String,
        /// Holder identity currently in the slot.
        observed: String,
    },

    /// The store rejected a lock operation.
    #[error("Lock store operation failed: {0}")]
    Store(#[from] StoreError),
}

/// Errors from service-registry queries.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No registry endpoint answered the query.
    #[error("No service registry endpoint reachable: {reason}")]
    Unreachable {
        /// Last transport failure observed.
        reason: String,
    },

    /// The registry answered with a malformed document.
    #[error("Invalid registry response for formation '{formation}': {source}")]
    Decode {
        /// Formation that was queried.
        formation: String,
        /// The underlying decoding error.
        #[source]
        source: serde_json::Error,
    },

    /// The queried formation has no members.
    #[error("Formation '{0}' has no registered instances")]
    Empty(String),
}

/// Errors reading or validating a release manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Error reading the manifest file.
    #[error("Failed to read manifest file: {0}")]
    Read(#[from] std::io::Error),

    /// Error parsing YAML manifest content.
    #[error("Invalid manifest YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// The manifest declares no services.
    #[error("Manifest declares no services")]
    NoServices,

    /// A service template is missing a required field.
    #[error("Service '{service}' has an empty image")]
    EmptyImage {
        /// The offending service name.
        service: String,
    },
}

/// Fatal errors from the one-shot bootstrap procedure.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// An essential instance did not reach `running` within the deploy timeout.
    #[error("Instance '{instance}' failed to deploy: reached state '{state}'")]
    DeployFailure {
        /// The instance that failed to come up.
        instance: String,
        /// The state it was last observed in.
        state: String,
    },

    /// The manifest could not be loaded.
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// The manifest lacks the reserved `_store` service.
    #[error("Manifest has no '_store' service; nothing can be persisted")]
    MissingStoreService,

    /// The coordination store never became ready after its deploy.
    #[error("Coordination store not ready within {secs}s")]
    StoreNotReady {
        /// Seconds spent polling.
        secs: u64,
    },

    /// A registry query failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// A store write failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A dispatch to an executor failed.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// The leader lock was lost mid-bootstrap.
    #[error(transparent)]
    Lock(#[from] LockError),
}
