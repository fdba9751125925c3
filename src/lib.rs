//! Reconciling cluster scheduler for container-style service fleets.

#![warn(unused_crate_dependencies)]
// These dependencies are only used in the binary (src/bin/main.rs)
// Test dependencies are only used in test code
#[cfg(test)]
use assert_cmd as _;
use ctrlc as _;
// OpenSSL is only needed for static linking on musl
#[cfg(all(target_os = "linux", target_env = "musl"))]
use openssl_sys as _;
#[cfg(test)]
use predicates as _;
use strum as _;
use tracing_subscriber as _;

/// One-shot formation install.
pub mod bootstrap;

/// CLI parsing.
pub mod cli;

/// Injected time source.
pub mod clock;

/// Release manifest loading.
pub mod config;

/// Constants.
pub mod constants;

/// Errors.
pub mod error;

/// Executor manager and dispatch contract.
pub mod executor;

/// Placement expression language.
pub mod expr;

/// Token-bucket rate limiting.
pub mod limiter;

/// Leader lock.
pub mod lock;

/// Reconciled records.
pub mod model;

/// Placement policy.
pub mod policy;

/// Service registry client.
pub mod registry;

/// Periodic task runner.
pub mod runner;

/// Control loops.
pub mod scheduler;

/// Coordination store access.
pub mod store;

/// Test utils.
#[doc(hidden)]
pub mod test_utils;
