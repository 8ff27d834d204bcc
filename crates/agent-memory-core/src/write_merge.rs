//! `WriteMerge` (spec §4.10): write-time semantic dedup. Every capture is
//! checked against existing near-duplicates before an insert happens — a
//! hit above `merge_threshold` reinforces the existing memory instead of
//! creating a new row, except for the exclusive categories (`rule`,
//! `preference`, `fact`) where a conflicting update supersedes the old one
//! rather than being folded into it.

use chrono::{DateTime, Utc};

use crate::config::LifecycleConfig;
use crate::embed::cosine_similarity;
use crate::error::StoreError;
use crate::memory::{Category, Filter, Memory};
use crate::storage::Store;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeDecision {
    /// No sufficiently similar memory exists; caller should insert fresh.
    Insert,
    /// An existing memory should be reinforced rather than duplicated.
    Reinforce { existing_id: String },
    /// An existing exclusive-slot memory conflicts and should be
    /// superseded by the new write.
    Supersede { existing_id: String },
}

pub struct WriteMerge {
    config: LifecycleConfig,
}

impl WriteMerge {
    pub fn new(config: LifecycleConfig) -> Self {
        Self { config }
    }

    /// Decide how a new candidate memory relates to what's already stored
    /// for this agent/namespace. `candidate_vec` is the new memory's
    /// embedding (may be absent if the embedder degraded — in that case
    /// dedup is skipped and the write always inserts, spec §4.3 "Partial
    /// failure fallback").
    pub fn decide(
        &self,
        store: &Store,
        agent: &str,
        namespace: Option<&str>,
        category: Category,
        candidate_vec: Option<&[f32]>,
    ) -> Result<MergeDecision, StoreError> {
        let Some(candidate_vec) = candidate_vec else {
            return Ok(MergeDecision::Insert);
        };

        let filter = Filter { namespace: namespace.map(str::to_string), category: Some(category), ..Filter::default() };
        let neighbors = store.vector_topk(candidate_vec, 5, &filter)?;

        let Some((closest_id, similarity)) = neighbors.into_iter().next() else {
            return Ok(MergeDecision::Insert);
        };

        if similarity < self.config.merge_threshold {
            return Ok(MergeDecision::Insert);
        }

        if category.is_exclusive_candidate() {
            // An exclusive slot already holding a near-duplicate is treated
            // as an update: the new write supersedes, it doesn't reinforce,
            // so contradictory rules/preferences/facts don't accumulate.
            Ok(MergeDecision::Supersede { existing_id: closest_id })
        } else {
            Ok(MergeDecision::Reinforce { existing_id: closest_id })
        }
    }

    pub fn apply_reinforce(&self, store: &Store, existing_id: &str, importance: Option<f32>, now: DateTime<Utc>) -> Result<(), StoreError> {
        store.reinforce(existing_id, 0.1, importance, now)
    }

    pub fn apply_supersede(&self, store: &Store, existing_id: &str, new_memory: &Memory, now: DateTime<Utc>) -> Result<(), StoreError> {
        store.soft_delete(existing_id, now, Some(&new_memory.id))?;
        store.insert(new_memory)
    }

    /// Cosine similarity helper exposed for callers that already hold both
    /// vectors and want to skip the index round-trip (e.g. batch capture).
    pub fn similarity(a: &[f32], b: &[f32]) -> f32 {
        cosine_similarity(a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store(dims: usize) -> (Store, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.sqlite");
        (Store::open(&path, "main", dims).unwrap(), dir)
    }

    #[test]
    fn no_embedding_always_inserts() {
        let (store, _dir) = temp_store(4);
        let merger = WriteMerge::new(LifecycleConfig::default());
        let decision = merger.decide(&store, "main", None, Category::Fact, None).unwrap();
        assert_eq!(decision, MergeDecision::Insert);
    }

    #[test]
    fn empty_store_always_inserts() {
        let (store, _dir) = temp_store(4);
        let merger = WriteMerge::new(LifecycleConfig::default());
        let decision = merger.decide(&store, "main", None, Category::Fact, Some(&[1.0, 0.0, 0.0, 0.0])).unwrap();
        assert_eq!(decision, MergeDecision::Insert);
    }

    #[test]
    fn near_duplicate_non_exclusive_category_reinforces() {
        let (store, _dir) = temp_store(4);
        let m = Memory::new("id1".into(), "main".into(), "likes coffee".into(), "likes coffee".into(), Category::Fact);
        store.insert(&m).unwrap();
        store.set_embedding("id1", &[1.0, 0.0, 0.0, 0.0]).unwrap();

        let merger = WriteMerge::new(LifecycleConfig { merge_threshold: 0.9, ..LifecycleConfig::default() });
        let decision = merger.decide(&store, "main", None, Category::Fact, Some(&[0.99, 0.01, 0.0, 0.0])).unwrap();
        assert_eq!(decision, MergeDecision::Reinforce { existing_id: "id1".to_string() });
    }

    #[test]
    fn near_duplicate_exclusive_category_supersedes() {
        let (store, _dir) = temp_store(4);
        let m = Memory::new("id1".into(), "main".into(), "always use dark mode".into(), "always use dark mode".into(), Category::Rule);
        store.insert(&m).unwrap();
        store.set_embedding("id1", &[1.0, 0.0, 0.0, 0.0]).unwrap();

        let merger = WriteMerge::new(LifecycleConfig { merge_threshold: 0.9, ..LifecycleConfig::default() });
        let decision = merger.decide(&store, "main", None, Category::Rule, Some(&[0.99, 0.01, 0.0, 0.0])).unwrap();
        assert_eq!(decision, MergeDecision::Supersede { existing_id: "id1".to_string() });
    }
}
