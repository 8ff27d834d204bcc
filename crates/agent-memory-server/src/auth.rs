//! Per-agent API-key scoping and rotation (spec §6 "Per-agent API-key scoping
//! is enforced at the adapter"). This never lives in `agent-memory-core` —
//! spec §7 ties `AuthError`/`RateLimitError` to the adapter exclusively.

use std::sync::RwLock;

use axum::extract::{Query, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::response::ApiError;
use crate::AppState;

/// `*` means the key is valid for every agent, including `agent=all` fan-out.
const WILDCARD_SCOPE: &str = "*";

#[derive(Debug, Clone, Serialize)]
pub struct ApiKeyRecord {
    pub id: String,
    #[serde(skip)]
    pub key_hash: String,
    pub scope: String,
    pub label: Option<String>,
    pub created_at: DateTime<Utc>,
    pub revoked: bool,
}

fn hash_key(key: &str) -> String {
    blake3::hash(key.as_bytes()).to_hex().to_string()
}

fn generate_key() -> String {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("amk_{}", hex_encode(&bytes))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// In-memory registry of active keys. Loaded at startup from
/// `AGENT_MEMORY_API_KEYS` (`key:scope,key:scope`, `scope` either an agent id
/// or `*`); empty means auth is disabled (single-operator/local dev use).
pub struct AuthStore {
    keys: RwLock<Vec<ApiKeyRecord>>,
}

impl AuthStore {
    pub fn from_env() -> Self {
        let mut keys = Vec::new();
        if let Ok(raw) = std::env::var("AGENT_MEMORY_API_KEYS") {
            for pair in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                let Some((key, scope)) = pair.split_once(':') else { continue };
                keys.push(ApiKeyRecord {
                    id: hash_key(key)[..16].to_string(),
                    key_hash: hash_key(key),
                    scope: scope.to_string(),
                    label: Some("env".to_string()),
                    created_at: Utc::now(),
                    revoked: false,
                });
            }
        }
        Self { keys: RwLock::new(keys) }
    }

    pub fn is_enabled(&self) -> bool {
        !self.keys.read().expect("auth store lock poisoned").is_empty()
    }

    fn authorize(&self, presented_key: &str, agent: &str) -> Result<(), ApiError> {
        let hash = hash_key(presented_key);
        let keys = self.keys.read().expect("auth store lock poisoned");
        let record = keys.iter().find(|k| k.key_hash == hash && !k.revoked);
        match record {
            None => Err(ApiError::Auth("invalid or revoked API key".to_string())),
            Some(record) if record.scope == WILDCARD_SCOPE || record.scope == agent => Ok(()),
            Some(_) => Err(ApiError::Auth(format!("API key is not scoped for agent '{agent}'"))),
        }
    }

    /// Mint a new key under `scope`, optionally revoking `revoke_id` in the
    /// same call (spec §6 `/v1/admin/rotate-key`).
    pub fn rotate(&self, scope: &str, label: Option<String>, revoke_id: Option<&str>) -> (String, ApiKeyRecord) {
        let new_key = generate_key();
        let record = ApiKeyRecord {
            id: hash_key(&new_key)[..16].to_string(),
            key_hash: hash_key(&new_key),
            scope: scope.to_string(),
            label,
            created_at: Utc::now(),
            revoked: false,
        };

        let mut keys = self.keys.write().expect("auth store lock poisoned");
        if let Some(revoke_id) = revoke_id {
            for k in keys.iter_mut().filter(|k| k.id == revoke_id) {
                k.revoked = true;
            }
        }
        keys.push(record.clone());
        (new_key, record)
    }

    pub fn list(&self) -> Vec<ApiKeyRecord> {
        self.keys.read().expect("auth store lock poisoned").clone()
    }
}

#[derive(Debug, Deserialize)]
pub struct AgentQuery {
    #[serde(default = "default_agent")]
    pub agent: String,
}

fn default_agent() -> String {
    "main".to_string()
}

/// Middleware: every `/v1/*` route (other than `/v1/health`) requires a
/// bearer key scoped for the request's `?agent=` (spec §6's routing table
/// note that "all routes accept `?agent=<id>` including `agent=all`").
pub async fn require_api_key(
    State(state): State<AppState>,
    Query(q): Query<AgentQuery>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if !state.auth.is_enabled() {
        return Ok(next.run(request).await);
    }

    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let Some(key) = header else {
        return Err(ApiError::Auth("missing Authorization: Bearer <key> header".to_string()));
    };

    state.auth.authorize(key, &q.agent)?;
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_store_has_no_keys() {
        let store = AuthStore { keys: RwLock::new(Vec::new()) };
        assert!(!store.is_enabled());
    }

    #[test]
    fn wildcard_scope_authorizes_any_agent() {
        let store = AuthStore { keys: RwLock::new(Vec::new()) };
        let (key, _record) = store.rotate(WILDCARD_SCOPE, None, None);
        assert!(store.authorize(&key, "main").is_ok());
        assert!(store.authorize(&key, "anything").is_ok());
    }

    #[test]
    fn scoped_key_rejects_other_agents() {
        let store = AuthStore { keys: RwLock::new(Vec::new()) };
        let (key, _record) = store.rotate("main", None, None);
        assert!(store.authorize(&key, "main").is_ok());
        assert!(store.authorize(&key, "other").is_err());
    }

    #[test]
    fn rotate_can_revoke_previous_key_atomically() {
        let store = AuthStore { keys: RwLock::new(Vec::new()) };
        let (old_key, old_record) = store.rotate("main", None, None);
        assert!(store.authorize(&old_key, "main").is_ok());

        let (new_key, _new_record) = store.rotate("main", None, Some(&old_record.id));
        assert!(store.authorize(&old_key, "main").is_err());
        assert!(store.authorize(&new_key, "main").is_ok());
    }
}
