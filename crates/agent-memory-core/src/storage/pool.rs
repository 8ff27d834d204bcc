//! `StoragePool`: agent-keyed `Store` registry (spec §4.2).
//!
//! Stores are opened lazily on first use and kept open for the process
//! lifetime; the pool itself holds only the lock and the map, so lookups
//! never block on i/o for an already-open agent.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use tracing::info;

use crate::config::AppConfig;
use crate::error::ValidationError;

use super::sqlite::{Result, Store};

/// Conservative identifier charset: ascii alphanumerics, `-`, `_`. Rejects
/// anything that could traverse out of the data directory.
fn validate_agent_id(agent: &str) -> std::result::Result<(), ValidationError> {
    if agent.is_empty() || agent.len() > 128 {
        return Err(ValidationError::InvalidAgentId(agent.to_string()));
    }
    if !agent.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(ValidationError::InvalidAgentId(agent.to_string()));
    }
    Ok(())
}

pub struct StoragePool {
    data_dir: PathBuf,
    dims: usize,
    stores: RwLock<HashMap<String, Arc<Store>>>,
}

impl StoragePool {
    pub fn new(config: &AppConfig) -> Self {
        let data_dir = config.resolve_data_dir();
        Self {
            data_dir,
            dims: config.embed.dimensions,
            stores: RwLock::new(HashMap::new()),
        }
    }

    /// Get (opening lazily if needed) the `Store` for a single agent.
    /// `agent == "all"` is reserved for fan-out operations and is rejected
    /// here — callers must resolve it to a concrete agent list first.
    pub fn get(&self, agent: &str) -> std::result::Result<Arc<Store>, ValidationError> {
        validate_agent_id(agent)?;

        if let Some(store) = self.stores.read().expect("pool lock poisoned").get(agent) {
            return Ok(store.clone());
        }

        let mut stores = self.stores.write().expect("pool lock poisoned");
        if let Some(store) = stores.get(agent) {
            return Ok(store.clone());
        }

        let path = self.data_dir.join(agent).join("memory.sqlite");
        let store = Store::open(&path, agent, self.dims)
            .map_err(|e| ValidationError::InvalidField { field: "agent", reason: e.to_string() })?;
        info!(agent, dir = %self.data_dir.display(), "opened store for agent");
        let store = Arc::new(store);
        stores.insert(agent.to_string(), store.clone());
        Ok(store)
    }

    /// List agents with an on-disk store directory, for `agent="all"`
    /// fan-out (spec §4.2).
    pub fn known_agents(&self) -> Result<Vec<String>> {
        if !self.data_dir.exists() {
            return Ok(Vec::new());
        }
        let mut agents = Vec::new();
        for entry in std::fs::read_dir(&self.data_dir).map_err(|e| crate::error::StoreError::Io(e.to_string()))? {
            let entry = entry.map_err(|e| crate::error::StoreError::Io(e.to_string()))?;
            if entry.path().is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    agents.push(name.to_string());
                }
            }
        }
        agents.sort();
        Ok(agents)
    }

    /// Resolve `"all"` to every known agent, otherwise the single agent as
    /// a one-element list (spec §4.2 fan-out semantics).
    pub fn resolve_agents(&self, agent: &str) -> Result<Vec<String>> {
        if agent == "all" {
            self.known_agents()
        } else {
            Ok(vec![agent.to_string()])
        }
    }

    pub fn data_dir(&self) -> &std::path::Path {
        &self.data_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_in(dir: &std::path::Path) -> StoragePool {
        let mut config = AppConfig::default();
        config.store.data_dir = Some(dir.to_string_lossy().to_string());
        config.embed.dimensions = 4;
        StoragePool::new(&config)
    }

    #[test]
    fn opens_and_reuses_store_for_agent() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_in(dir.path());
        let a = pool.get("agent-one").unwrap();
        let b = pool.get("agent-one").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn rejects_malformed_agent_id() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_in(dir.path());
        assert!(pool.get("../escape").is_err());
        assert!(pool.get("").is_err());
    }

    #[test]
    fn resolve_all_lists_known_agents() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_in(dir.path());
        pool.get("agent-a").unwrap();
        pool.get("agent-b").unwrap();
        let mut agents = pool.resolve_agents("all").unwrap();
        agents.sort();
        assert_eq!(agents, vec!["agent-a".to_string(), "agent-b".to_string()]);
    }
}
