//! Service registry client: formation discovery for executors and peers.
use std::{collections::BTreeMap, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::RegistryError;

/// One registered formation member. Beyond the instance name the registry
/// may announce arbitrary attributes (host, domain, tags, ports).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// Instance name of the member.
    pub instance: String,
    /// Remaining announcement attributes.
    #[serde(flatten)]
    pub attrs: BTreeMap<String, serde_json::Value>,
}

impl RegistryEntry {
    /// Reads a string attribute from the announcement.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).and_then(|value| value.as_str())
    }
}

/// Discovery service: who is registered under a formation name.
pub trait ServiceRegistry: Send + Sync {
    /// Yields `(name, entry)` pairs for the formation's members.
    fn query_formation(
        &self,
        formation: &str,
    ) -> Result<Vec<(String, RegistryEntry)>, RegistryError>;
}

/// Picks any executor from the registry's `executor` formation; the first
/// announced member wins.
pub fn select_executor(registry: &dyn ServiceRegistry) -> Result<String, RegistryError> {
    let members = registry.query_formation("executor")?;
    members
        .into_iter()
        .next()
        .map(|(_, entry)| entry.instance)
        .ok_or_else(|| RegistryError::Empty("executor".to_string()))
}

/// HTTP registry client fanning out over a comma-separated endpoint list;
/// the first endpoint that answers wins.
pub struct HttpServiceRegistry {
    endpoints: Vec<String>,
    client: reqwest::blocking::Client,
}

impl HttpServiceRegistry {
    /// Creates a client from a comma-separated endpoint list, e.g. the
    /// `GILLIAM_SERVICE_REGISTRY` value.
    pub fn from_endpoints(csv: &str) -> Self {
        let endpoints = csv
            .split(',')
            .map(str::trim)
            .filter(|endpoint| !endpoint.is_empty())
            .map(str::to_string)
            .collect();
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self { endpoints, client }
    }
}

impl ServiceRegistry for HttpServiceRegistry {
    fn query_formation(
        &self,
        formation: &str,
    ) -> Result<Vec<(String, RegistryEntry)>, RegistryError> {
        let mut last_failure = String::from("no endpoints configured");

        for endpoint in &self.endpoints {
            let url = format!("http://{endpoint}/formation/{formation}");
            let body = match self.client.get(&url).send().and_then(|r| r.text()) {
                Ok(body) => body,
                Err(err) => {
                    last_failure = err.to_string();
                    continue;
                }
            };

            let members: BTreeMap<String, RegistryEntry> = serde_json::from_str(&body)
                .map_err(|source| RegistryError::Decode {
                    formation: formation.to_string(),
                    source,
                })?;
            return Ok(members.into_iter().collect());
        }

        Err(RegistryError::Unreachable {
            reason: last_failure,
        })
    }
}
