//! Coordination-store access: the key-value contract, an in-memory
//! implementation, an etcd-style HTTP client and the typed instance and
//! release facades on top.
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use chrono::Utc;
use serde::de::DeserializeOwned;

use crate::{
    clock::Clock,
    error::StoreError,
    model::{Instance, InstanceState, Release},
};

/// Transactional key-addressed store contract. Writes either land or roll
/// back; `create` is create-if-absent and carries an optional lease.
pub trait KvStore: Send + Sync {
    /// Reads a key, `None` when absent.
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Writes a key unconditionally.
    fn put(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Writes a key only if currently absent. Returns false when the key
    /// already exists. A `ttl` leases the slot so it expires on its own.
    fn create(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool, StoreError>;

    /// Deletes a key; absent keys are fine.
    fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Deletes a key only while it still holds `expected`. Returns false
    /// when the value differs or the key is gone.
    fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError>;

    /// Renews the lease on a key while it still holds `expected`. Returns
    /// false when the value differs or the key is gone.
    fn refresh(&self, key: &str, expected: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Lists `(key, value)` pairs under a prefix, ordered by key.
    fn list(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError>;

    /// Cheap readiness probe.
    fn ping(&self) -> Result<(), StoreError>;
}

struct MemoryEntry {
    value: String,
    expires_at: Option<Instant>,
}

/// In-memory [`KvStore`]. Lease expiry runs against the injected clock, so
/// tests drive it deterministically.
pub struct MemoryKvStore {
    clock: Arc<dyn Clock>,
    entries: Mutex<BTreeMap<String, MemoryEntry>>,
}

impl MemoryKvStore {
    /// Creates an empty store.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    fn purge_expired(&self, entries: &mut BTreeMap<String, MemoryEntry>) {
        let now = self.clock.now();
        entries.retain(|_, entry| entry.expires_at.is_none_or(|at| at > now));
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        self.purge_expired(&mut entries);
        Ok(entries.get(key).map(|entry| entry.value.clone()))
    }

    fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        self.purge_expired(&mut entries);
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }

    fn create(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        self.purge_expired(&mut entries);
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: ttl.map(|ttl| self.clock.now() + ttl),
            },
        );
        Ok(true)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
        Ok(())
    }

    fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        self.purge_expired(&mut entries);
        match entries.get(key) {
            Some(entry) if entry.value == expected => {
                entries.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn refresh(&self, key: &str, expected: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        self.purge_expired(&mut entries);
        match entries.get_mut(key) {
            Some(entry) if entry.value == expected => {
                entry.expires_at = Some(self.clock.now() + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        self.purge_expired(&mut entries);
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect())
    }

    fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// HTTP client for an etcd-style v2 keys API, the store the formation's
/// `_store` instance runs.
pub struct EtcdKvStore {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl EtcdKvStore {
    /// Creates a client for `host` (e.g. `_store.scheduler.service:4001`).
    pub fn new(host: &str) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self {
            base_url: format!("http://{host}"),
            client,
        }
    }

    fn key_url(&self, key: &str) -> String {
        format!("{}/v2/keys/{key}", self.base_url)
    }

    fn unreachable(&self, err: reqwest::Error) -> StoreError {
        StoreError::Unreachable {
            endpoint: self.base_url.clone(),
            reason: err.to_string(),
        }
    }

    fn node_value(key: &str, body: &str) -> Result<String, StoreError> {
        let doc: serde_json::Value =
            serde_json::from_str(body).map_err(|source| StoreError::Decode {
                key: key.to_string(),
                source,
            })?;
        Ok(doc["node"]["value"].as_str().unwrap_or_default().to_string())
    }
}

impl KvStore for EtcdKvStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let response = self
            .client
            .get(self.key_url(key))
            .send()
            .map_err(|e| self.unreachable(e))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = response.text().map_err(|e| self.unreachable(e))?;
        Self::node_value(key, &body).map(Some)
    }

    fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let response = self
            .client
            .put(self.key_url(key))
            .form(&[("value", value)])
            .send()
            .map_err(|e| self.unreachable(e))?;
        if !response.status().is_success() {
            return Err(StoreError::RolledBack {
                key: key.to_string(),
                reason: format!("status {}", response.status()),
            });
        }
        Ok(())
    }

    fn create(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool, StoreError> {
        let mut params = vec![("value", value.to_string()), ("prevExist", "false".into())];
        if let Some(ttl) = ttl {
            params.push(("ttl", ttl.as_secs().to_string()));
        }
        let response = self
            .client
            .put(self.key_url(key))
            .form(&params)
            .send()
            .map_err(|e| self.unreachable(e))?;
        if response.status() == reqwest::StatusCode::PRECONDITION_FAILED {
            return Ok(false);
        }
        if !response.status().is_success() {
            return Err(StoreError::RolledBack {
                key: key.to_string(),
                reason: format!("status {}", response.status()),
            });
        }
        Ok(true)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let response = self
            .client
            .delete(self.key_url(key))
            .send()
            .map_err(|e| self.unreachable(e))?;
        if !response.status().is_success()
            && response.status() != reqwest::StatusCode::NOT_FOUND
        {
            return Err(StoreError::RolledBack {
                key: key.to_string(),
                reason: format!("status {}", response.status()),
            });
        }
        Ok(())
    }

    fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let url = format!("{}?prevValue={expected}", self.key_url(key));
        let response = self
            .client
            .delete(url)
            .send()
            .map_err(|e| self.unreachable(e))?;
        Ok(response.status().is_success())
    }

    fn refresh(&self, key: &str, expected: &str, ttl: Duration) -> Result<bool, StoreError> {
        let response = self
            .client
            .put(self.key_url(key))
            .form(&[
                ("prevValue", expected.to_string()),
                ("refresh", "true".into()),
                ("ttl", ttl.as_secs().to_string()),
            ])
            .send()
            .map_err(|e| self.unreachable(e))?;
        Ok(response.status().is_success())
    }

    fn list(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError> {
        let url = format!("{}?recursive=true", self.key_url(prefix));
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| self.unreachable(e))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let body = response.text().map_err(|e| self.unreachable(e))?;
        let doc: serde_json::Value =
            serde_json::from_str(&body).map_err(|source| StoreError::Decode {
                key: prefix.to_string(),
                source,
            })?;

        let mut pairs = Vec::new();
        if let Some(nodes) = doc["node"]["nodes"].as_array() {
            for node in nodes {
                if let (Some(key), Some(value)) = (node["key"].as_str(), node["value"].as_str())
                {
                    pairs.push((key.trim_start_matches('/').to_string(), value.to_string()));
                }
            }
        }
        pairs.sort();
        Ok(pairs)
    }

    fn ping(&self) -> Result<(), StoreError> {
        self.client
            .get(format!("{}/version", self.base_url))
            .send()
            .map(|_| ())
            .map_err(|e| self.unreachable(e))
    }
}

fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> Result<T, StoreError> {
    serde_json::from_str(raw).map_err(|source| StoreError::Decode {
        key: key.to_string(),
        source,
    })
}

/// Typed facade over instance records: one JSON document per instance
/// keyed by `(formation, instance_name)`, plus the query indices the
/// control loops consume.
pub struct InstanceStore {
    kv: Arc<dyn KvStore>,
    formation: String,
}

impl InstanceStore {
    /// Creates a facade scoped to one formation.
    pub fn new(kv: Arc<dyn KvStore>, formation: &str) -> Self {
        Self {
            kv,
            formation: formation.to_string(),
        }
    }

    fn prefix(&self) -> String {
        format!("{}/instances/", self.formation)
    }

    fn key(&self, name: &str) -> String {
        format!("{}{name}", self.prefix())
    }

    /// Persists a new instance record; conflicts roll back. Returns the
    /// created record.
    pub fn create(&self, instance: &Instance) -> Result<Instance, StoreError> {
        let key = self.key(&instance.name);
        let raw = serde_json::to_string(instance)?;
        if !self.kv.create(&key, &raw, None)? {
            return Err(StoreError::RolledBack {
                key,
                reason: "record already exists".into(),
            });
        }
        Ok(instance.clone())
    }

    /// Overwrites an existing instance record.
    pub fn update(&self, instance: &Instance) -> Result<(), StoreError> {
        let raw = serde_json::to_string(instance)?;
        self.kv.put(&self.key(&instance.name), &raw)
    }

    /// Transitions the record's state, stamping `changed_at`.
    pub fn set_state(
        &self,
        instance: &mut Instance,
        state: InstanceState,
    ) -> Result<(), StoreError> {
        instance.state = state;
        instance.changed_at = Utc::now();
        self.update(instance)
    }

    /// Marks the record running on the given executor, stamping
    /// `changed_at`.
    pub fn mark_running(
        &self,
        instance: &mut Instance,
        executor: &str,
    ) -> Result<(), StoreError> {
        instance.state = InstanceState::Running;
        instance.assigned_to = Some(executor.to_string());
        instance.changed_at = Utc::now();
        self.update(instance)
    }

    /// Removes an instance record.
    pub fn remove(&self, name: &str) -> Result<(), StoreError> {
        self.kv.delete(&self.key(name))
    }

    /// Reads one instance record.
    pub fn get(&self, name: &str) -> Result<Option<Instance>, StoreError> {
        let key = self.key(name);
        match self.kv.get(&key)? {
            Some(raw) => decode(&key, &raw).map(Some),
            None => Ok(None),
        }
    }

    /// The full instance index, ordered by name.
    pub fn index(&self) -> Result<Vec<Instance>, StoreError> {
        self.kv
            .list(&self.prefix())?
            .into_iter()
            .map(|(key, raw)| decode(&key, &raw))
            .collect()
    }

    /// Instances whose state requires placement and whose assignment is
    /// absent or points outside the live fleet.
    pub fn unassigned(&self, live: &BTreeSet<String>) -> Result<Vec<Instance>, StoreError> {
        Ok(self
            .index()?
            .into_iter()
            .filter(|instance| {
                instance.is_running()
                    && instance
                        .assigned_to
                        .as_ref()
                        .is_none_or(|executor| !live.contains(executor))
            })
            .collect())
    }

    /// Instances awaiting termination.
    pub fn shutting_down(&self) -> Result<Vec<Instance>, StoreError> {
        Ok(self
            .index()?
            .into_iter()
            .filter(|instance| instance.state == InstanceState::ShuttingDown)
            .collect())
    }
}

/// Typed facade over release records keyed by `(formation, release_name)`.
pub struct ReleaseStore {
    kv: Arc<dyn KvStore>,
    formation: String,
}

impl ReleaseStore {
    /// Creates a facade scoped to one formation.
    pub fn new(kv: Arc<dyn KvStore>, formation: &str) -> Self {
        Self {
            kv,
            formation: formation.to_string(),
        }
    }

    fn key(&self, name: &str) -> String {
        format!("{}/releases/{name}", self.formation)
    }

    /// Persists a release; conflicts roll back. Returns the created record.
    pub fn create(&self, release: &Release) -> Result<Release, StoreError> {
        let key = self.key(&release.name);
        let raw = serde_json::to_string(release)?;
        if !self.kv.create(&key, &raw, None)? {
            return Err(StoreError::RolledBack {
                key,
                reason: "release already exists".into(),
            });
        }
        Ok(release.clone())
    }

    /// Reads one release record.
    pub fn get(&self, name: &str) -> Result<Option<Release>, StoreError> {
        let key = self.key(name);
        match self.kv.get(&key)? {
            Some(raw) => decode(&key, &raw).map(Some),
            None => Ok(None),
        }
    }
}
