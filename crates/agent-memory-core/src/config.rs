//! Env-driven configuration with an optional JSON overlay file (spec §6).
//!
//! Every variable is read under the `AGENT_MEMORY_` prefix first, falling
//! back to the legacy `ASUMAN_MEMORY_` prefix (spec §9 open question 3).

use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

fn env_var(suffix: &str) -> Option<String> {
    env::var(format!("AGENT_MEMORY_{suffix}"))
        .or_else(|_| env::var(format!("ASUMAN_MEMORY_{suffix}")))
        .ok()
        .filter(|v| !v.is_empty())
}

fn env_parsed<T: std::str::FromStr>(suffix: &str) -> Option<T> {
    env_var(suffix).and_then(|v| v.parse().ok())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Resolved at runtime by `StoragePool` per spec §4.2's fallback chain;
    /// this field, when set, takes precedence over that chain entirely.
    pub data_dir: Option<String>,
    pub backup_retention_days: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            backup_retention_days: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub dimensions: usize,
    pub max_embed_chars: usize,
    pub batch_size: usize,
    pub batch_window_ms: u64,
    pub request_timeout_ms: u64,
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_backoff_factor: f64,
    pub circuit_failure_threshold: u32,
    pub circuit_open_secs: u64,
    pub lru_cache_size: usize,
    pub worker_enabled: bool,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/v1".to_string(),
            api_key: None,
            model: "text-embedding-3-small".to_string(),
            dimensions: 1024,
            max_embed_chars: 8000,
            batch_size: 64,
            batch_window_ms: 20,
            request_timeout_ms: 10_000,
            retry_attempts: 3,
            retry_base_delay_ms: 500,
            retry_backoff_factor: 2.0,
            circuit_failure_threshold: 5,
            circuit_open_secs: 300,
            lru_cache_size: 4096,
            worker_enabled: true,
        }
    }
}

/// Fusion weights for the candidate layers (spec §4.7). Pinned defaults —
/// `importance` is 0.08, not the historically buggy 0.25 (spec §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchWeights {
    pub semantic: f32,
    pub keyword: f32,
    pub recency: f32,
    pub strength: f32,
    pub importance: f32,
    pub rrf_k: f32,
    pub n_semantic: usize,
    pub n_lexical: usize,
    pub k_fuse: usize,
    pub recency_lambda: f64,
}

impl Default for SearchWeights {
    fn default() -> Self {
        Self {
            semantic: 0.50,
            keyword: 0.25,
            recency: 0.10,
            strength: 0.07,
            importance: 0.08,
            rrf_k: 60.0,
            n_semantic: 50,
            n_lexical: 50,
            k_fuse: 20,
            recency_lambda: 0.01,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankConfig {
    pub enabled: bool,
    pub primary_model: String,
    pub primary_top_k: usize,
    pub primary_weight: f32,
    pub primary_max_doc_chars: usize,
    pub confident_spread_threshold: f32,
    pub secondary_model: String,
    pub secondary_top_k: usize,
    pub secondary_weight: f32,
    pub threads: usize,
    pub prewarm: bool,
    pub mmr_lambda: f32,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            primary_model: "balanced".to_string(),
            primary_top_k: 10,
            primary_weight: 0.22,
            primary_max_doc_chars: 600,
            confident_spread_threshold: 0.2,
            secondary_model: "quality".to_string(),
            secondary_top_k: 3,
            secondary_weight: 0.35,
            threads: 2,
            prewarm: false,
            mmr_lambda: 0.7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    pub decay_base_rate: f64,
    pub decay_alpha: f64,
    pub merge_threshold: f32,
    pub consolidate_threshold: f32,
    pub weak_strength_threshold: f32,
    pub stale_age_days: i64,
    pub hard_purge_after_days: i64,
    pub conflict_margin: f32,
    pub recall_deadline_ms: u64,
    pub recall_cache_ttl_secs: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            decay_base_rate: 0.15,
            decay_alpha: 2.0,
            merge_threshold: 0.85,
            consolidate_threshold: 0.9,
            weak_strength_threshold: 0.1,
            stale_age_days: 90,
            hard_purge_after_days: 30,
            conflict_margin: 0.1,
            recall_deadline_ms: 2000,
            recall_cache_ttl_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub embed: EmbedConfig,
    pub weights: SearchWeights,
    pub rerank: RerankConfig,
    pub lifecycle: LifecycleConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            embed: EmbedConfig::default(),
            weights: SearchWeights::default(),
            rerank: RerankConfig::default(),
            lifecycle: LifecycleConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load defaults, then an optional JSON overlay file, then environment
    /// overlays, in that precedence order (env wins).
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(path) = env_var("CONFIG_FILE") {
            config = Self::apply_overlay_file(config, Path::new(&path))?;
        }

        config.apply_env_overlays();
        config.validate()?;
        Ok(config)
    }

    fn apply_overlay_file(base: Self, path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::OverlayIo {
            path: path.display().to_string(),
            source,
        })?;
        let overlay: serde_json::Value =
            serde_json::from_str(&raw).map_err(|source| ConfigError::OverlayParse {
                path: path.display().to_string(),
                source,
            })?;
        let mut base_value = serde_json::to_value(&base).expect("AppConfig always serializes");
        merge_json(&mut base_value, overlay);
        serde_json::from_value(base_value).map_err(|source| ConfigError::OverlayParse {
            path: path.display().to_string(),
            source,
        })
    }

    fn apply_env_overlays(&mut self) {
        if let Some(v) = env_var("DATA_DIR") {
            self.store.data_dir = Some(v);
        }
        if let Some(v) = env_var("EMBED_BASE_URL") {
            self.embed.base_url = v;
        }
        if let Some(v) = env_var("EMBED_API_KEY") {
            self.embed.api_key = Some(v);
        }
        if let Some(v) = env_var("EMBED_MODEL") {
            self.embed.model = v;
        }
        if let Some(v) = env_parsed("DIMENSIONS") {
            self.embed.dimensions = v;
        }
        if let Some(v) = env_parsed("EMBED_MAX_CHARS") {
            self.embed.max_embed_chars = v;
        }
        if let Some(v) = env_parsed("EMBED_WORKER_ENABLE") {
            self.embed.worker_enabled = v;
        }
        if let Some(v) = env_parsed("W_SEMANTIC") {
            self.weights.semantic = v;
        }
        if let Some(v) = env_parsed("W_KEYWORD") {
            self.weights.keyword = v;
        }
        if let Some(v) = env_parsed("W_RECENCY") {
            self.weights.recency = v;
        }
        if let Some(v) = env_parsed("W_STRENGTH") {
            self.weights.strength = v;
        }
        if let Some(v) = env_parsed("W_IMPORTANCE") {
            self.weights.importance = v;
        }
        if let Some(v) = env_parsed("RERANK_ENABLE") {
            self.rerank.enabled = v;
        }
        if let Some(v) = env_var("RERANK_PRIMARY_MODEL") {
            self.rerank.primary_model = v;
        }
        if let Some(v) = env_parsed("RERANK_PRIMARY_TOP_K") {
            self.rerank.primary_top_k = v;
        }
        if let Some(v) = env_parsed("RERANK_PRIMARY_WEIGHT") {
            self.rerank.primary_weight = v;
        }
        if let Some(v) = env_parsed("RERANK_THREADS") {
            self.rerank.threads = v;
        }
        if let Some(v) = env_parsed("RERANK_PREWARM") {
            self.rerank.prewarm = v;
        }
        if let Some(v) = env_parsed("BACKUP_RETENTION_DAYS") {
            self.store.backup_retention_days = v;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.embed.dimensions == 0 {
            return Err(ConfigError::Invalid {
                field: "embed.dimensions",
                reason: "must be positive".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.rerank.mmr_lambda) {
            return Err(ConfigError::Invalid {
                field: "rerank.mmr_lambda",
                reason: "must be in [0, 1]".to_string(),
            });
        }
        Ok(())
    }

    /// Resolve the per-agent data directory per spec §4.2's fallback chain:
    /// explicit config/env value → `$AGENT_MEMORY_DATA_DIR` → `~/.agent-memory`
    /// → `~/.asuman` if it already exists.
    pub fn resolve_data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.store.data_dir {
            return PathBuf::from(dir);
        }
        let home = directories::UserDirs::new().map(|u| u.home_dir().to_path_buf());
        if let Some(home) = &home {
            let preferred = home.join(".agent-memory");
            if preferred.exists() {
                return preferred;
            }
            let legacy = home.join(".asuman");
            if legacy.exists() {
                return legacy;
            }
            return preferred;
        }
        PathBuf::from(".agent-memory")
    }
}

fn merge_json(base: &mut serde_json::Value, overlay: serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(overlay_map)) => {
            for (k, v) in overlay_map {
                merge_json(base_map.entry(k).or_insert(serde_json::Value::Null), v);
            }
        }
        (base_slot, overlay_value) => *base_slot = overlay_value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_weights_are_pinned_per_spec() {
        let w = SearchWeights::default();
        assert_eq!(w.importance, 0.08, "importance weight must stay pinned at 0.08, not the historical 0.25 bug");
        assert_eq!(w.semantic, 0.50);
        assert_eq!(w.rrf_k, 60.0);
    }

    #[test]
    fn overlay_merges_partial_object() {
        let base = AppConfig::default();
        let overlay = serde_json::json!({ "embed": { "dimensions": 2560 } });
        let mut base_value = serde_json::to_value(&base).unwrap();
        merge_json(&mut base_value, overlay);
        let merged: AppConfig = serde_json::from_value(base_value).unwrap();
        assert_eq!(merged.embed.dimensions, 2560);
        assert_eq!(merged.embed.model, base.embed.model);
    }

    #[test]
    fn validate_rejects_zero_dimensions() {
        let mut cfg = AppConfig::default();
        cfg.embed.dimensions = 0;
        assert!(cfg.validate().is_err());
    }
}
