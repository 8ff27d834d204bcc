//! `RecallCache` (spec §4.9): short-TTL cache of fully-ranked recall
//! results, keyed by (agent, namespace, normalized query, filter).
//!
//! A hit returns instantly with `cached: true`; background secondary
//! reranking (spec §4.7 "two-pass") refreshes the entry in place once it
//! completes so a subsequent request sees the higher-precision ordering
//! without paying for it itself.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::memory::{Filter, RecallResult};

fn cache_key(agent: &str, namespace: Option<&str>, normalized_query: &str, filter: &Filter) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(agent.as_bytes());
    hasher.update(&[0u8]);
    hasher.update(namespace.unwrap_or("").as_bytes());
    hasher.update(&[0u8]);
    hasher.update(normalized_query.as_bytes());
    hasher.update(&[0u8]);
    let filter_json = serde_json::to_vec(filter).unwrap_or_default();
    hasher.update(&filter_json);
    hasher.finalize().to_hex().to_string()
}

struct Entry {
    agent: String,
    results: Vec<RecallResult>,
    inserted_at: Instant,
}

pub struct RecallCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, Entry>>,
}

impl RecallCache {
    pub fn new(ttl_secs: u64) -> Self {
        Self { ttl: Duration::from_secs(ttl_secs), entries: Mutex::new(HashMap::new()) }
    }

    pub fn get(&self, agent: &str, namespace: Option<&str>, normalized_query: &str, filter: &Filter) -> Option<Vec<RecallResult>> {
        let key = cache_key(agent, namespace, normalized_query, filter);
        let entries = self.entries.lock().expect("recall cache mutex poisoned");
        let entry = entries.get(&key)?;
        if entry.inserted_at.elapsed() > self.ttl {
            return None;
        }
        Some(entry.results.iter().cloned().map(|mut r| {
            r.cached = true;
            r
        }).collect())
    }

    pub fn put(&self, agent: &str, namespace: Option<&str>, normalized_query: &str, filter: &Filter, results: Vec<RecallResult>) {
        let key = cache_key(agent, namespace, normalized_query, filter);
        let mut entries = self.entries.lock().expect("recall cache mutex poisoned");
        entries.insert(key, Entry { agent: agent.to_string(), results, inserted_at: Instant::now() });
    }

    /// Invalidate every cached entry for an agent. Called after a write that
    /// could change recall results (spec §4.9 "Invalidation").
    pub fn invalidate_agent(&self, agent: &str) {
        let mut entries = self.entries.lock().expect("recall cache mutex poisoned");
        entries.retain(|_, entry| entry.agent != agent);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("recall cache mutex poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Category, ConfidenceTier, LayerScores, Memory, SearchMode};

    fn sample_result(id: &str) -> RecallResult {
        RecallResult {
            memory: Memory::new(id.into(), "main".into(), "x".into(), "x".into(), Category::Fact),
            scores: LayerScores::default(),
            score: 0.5,
            confidence_tier: ConfidenceTier::Medium,
            search_mode: SearchMode::Full,
            cached: false,
        }
    }

    #[test]
    fn hit_after_put_marks_cached() {
        let cache = RecallCache::new(60);
        cache.put("main", None, "hello", &Filter::default(), vec![sample_result("id1")]);
        let hit = cache.get("main", None, "hello", &Filter::default()).unwrap();
        assert!(hit[0].cached);
    }

    #[test]
    fn miss_on_different_query() {
        let cache = RecallCache::new(60);
        cache.put("main", None, "hello", &Filter::default(), vec![sample_result("id1")]);
        assert!(cache.get("main", None, "goodbye", &Filter::default()).is_none());
    }

    #[test]
    fn expired_entry_is_a_miss() {
        let cache = RecallCache::new(0);
        cache.put("main", None, "hello", &Filter::default(), vec![sample_result("id1")]);
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("main", None, "hello", &Filter::default()).is_none());
    }

    #[test]
    fn invalidate_agent_clears_cache() {
        let cache = RecallCache::new(60);
        cache.put("main", None, "hello", &Filter::default(), vec![sample_result("id1")]);
        cache.invalidate_agent("main");
        assert_eq!(cache.len(), 0);
    }
}
