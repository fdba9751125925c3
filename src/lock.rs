//! Leader lock: cross-process mutual exclusion through a named slot in the
//! coordination store.
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use tracing::{debug, warn};

use crate::{
    constants::{LOCK_RETRY_INTERVAL, LOCK_TTL},
    error::LockError,
    store::KvStore,
};

fn slot_key(name: &str) -> String {
    format!("locks/{name}")
}

/// Scoped leader-lock acquisition. Acquiring writes the holder identity
/// into the slot only if currently absent; the slot carries a lease so a
/// dead holder expires on its own. The returned guard releases on every
/// exit path.
pub struct LeaderLock;

impl LeaderLock {
    /// Acquires the named lock, blocking with periodic retry until the
    /// slot is free.
    pub fn acquire(
        kv: Arc<dyn KvStore>,
        name: &str,
        holder: &str,
    ) -> Result<LeaderGuard, LockError> {
        loop {
            if let Some(guard) = Self::try_acquire(Arc::clone(&kv), name, holder)? {
                return Ok(guard);
            }
            debug!("lock '{name}' is held; retrying");
            thread::sleep(LOCK_RETRY_INTERVAL);
        }
    }

    /// Single acquisition attempt; `None` when the slot is held.
    pub fn try_acquire(
        kv: Arc<dyn KvStore>,
        name: &str,
        holder: &str,
    ) -> Result<Option<LeaderGuard>, LockError> {
        let key = slot_key(name);
        if kv.create(&key, holder, Some(LOCK_TTL))? {
            debug!("acquired lock '{name}' as '{holder}'");
            Ok(Some(LeaderGuard {
                kv,
                name: name.to_string(),
                key,
                holder: holder.to_string(),
                released: AtomicBool::new(false),
            }))
        } else {
            Ok(None)
        }
    }
}

/// Held leader lock. Dropping releases the slot; a slot usurped by another
/// holder is never clobbered.
pub struct LeaderGuard {
    kv: Arc<dyn KvStore>,
    name: String,
    key: String,
    holder: String,
    released: AtomicBool,
}

impl LeaderGuard {
    /// Name of the lock slot.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Holder identity written into the slot.
    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Confirms the slot still names us as holder and renews its lease.
    /// Fails with [`LockError::Lost`] when ownership changed.
    pub fn verify(&self) -> Result<(), LockError> {
        if self.kv.refresh(&self.key, &self.holder, LOCK_TTL)? {
            return Ok(());
        }

        let observed = self
            .kv
            .get(&self.key)?
            .unwrap_or_else(|| "<expired>".to_string());
        Err(LockError::Lost {
            name: self.name.clone(),
            holder: self.holder.clone(),
            observed,
        })
    }

    /// Releases the lock explicitly. Equivalent to dropping the guard but
    /// surfaces store failures.
    pub fn release(self) -> Result<(), LockError> {
        self.release_slot()
    }

    fn release_slot(&self) -> Result<(), LockError> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if !self.kv.compare_and_delete(&self.key, &self.holder)? {
            warn!(
                "lock '{}' was not held by '{}' at release",
                self.name, self.holder
            );
        }
        Ok(())
    }
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        if let Err(err) = self.release_slot() {
            warn!("failed to release lock '{}': {err}", self.name);
        }
    }
}
