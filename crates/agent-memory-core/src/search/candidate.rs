//! `CandidateGen` (spec §4.4): generates the per-layer candidate sets a
//! recall fuses over — semantic and lexical rank lists from the store, plus
//! numeric recency/strength/importance layers from the fetched rows.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::SearchWeights;
use crate::embed::Embedder;
use crate::memory::{Filter, LayerScores, Memory, SearchMode};
use crate::storage::Store;

use super::fuse::recency_score;

pub struct CandidateSet {
    pub memories: HashMap<String, Memory>,
    pub scores: HashMap<String, LayerScores>,
    pub mode: SearchMode,
}

impl CandidateSet {
    pub fn ordered_ids(&self) -> Vec<String> {
        self.memories.keys().cloned().collect()
    }
}

/// Pull semantic + lexical candidates from the store, embed the query if
/// possible, and attach the recency/strength/importance numeric layers from
/// each candidate's row. Degrades gracefully: an embedding failure drops the
/// semantic layer rather than failing the whole recall (spec §4.4, §5).
pub async fn generate(
    store: &Arc<Store>,
    embedder: &Arc<dyn Embedder>,
    query_text: &str,
    normalized_query: &str,
    weights: &SearchWeights,
    filter: &Filter,
    now: DateTime<Utc>,
) -> CandidateSet {
    let query_vec = embedder.embed_batch(std::slice::from_ref(&query_text.to_string())).await.into_iter().next().flatten();

    let store_for_semantic = store.clone();
    let filter_for_semantic = filter.clone();
    let n_semantic = weights.n_semantic;
    let semantic_handle = query_vec.clone().map(|qv| {
        tokio::task::spawn_blocking(move || store_for_semantic.vector_topk(&qv, n_semantic, &filter_for_semantic))
    });

    let store_for_lexical = store.clone();
    let filter_for_lexical = filter.clone();
    let normalized_owned = normalized_query.to_string();
    let n_lexical = weights.n_lexical;
    let lexical_handle = tokio::task::spawn_blocking(move || {
        store_for_lexical.lexical_topk(&normalized_owned, n_lexical, &filter_for_lexical)
    });

    let semantic: Vec<(String, f32)> = match semantic_handle {
        Some(h) => h.await.ok().and_then(|r| r.ok()).unwrap_or_default(),
        None => Vec::new(),
    };
    let lexical: Vec<(String, f32)> = lexical_handle.await.ok().and_then(|r| r.ok()).unwrap_or_default();

    let mode = if query_vec.is_none() {
        SearchMode::DegradedNoVector
    } else if lexical.is_empty() && !normalized_query.trim().is_empty() {
        SearchMode::DegradedNoLexical
    } else {
        SearchMode::Full
    };

    let mut scores: HashMap<String, LayerScores> = HashMap::new();
    for (id, s) in &semantic {
        scores.entry(id.clone()).or_default().semantic = Some(*s);
    }
    for (id, s) in &lexical {
        scores.entry(id.clone()).or_default().lexical = Some(*s);
    }

    let mut memories = HashMap::new();
    for id in scores.keys().cloned().collect::<Vec<_>>() {
        let store_clone = store.clone();
        let id_clone = id.clone();
        if let Ok(Ok(memory)) = tokio::task::spawn_blocking(move || store_clone.get(&id_clone)).await {
            let entry = scores.get_mut(&id).expect("id present in scores map");
            entry.recency = Some(recency_score(memory.age_days(now), weights.recency_lambda));
            entry.strength = Some(memory.strength);
            entry.importance = Some(memory.importance);
            memories.insert(id, memory);
        }
    }

    // Drop candidates whose row vanished between candidate generation and
    // fetch (e.g. concurrent hard delete) rather than scoring a ghost id.
    scores.retain(|id, _| memories.contains_key(id));

    CandidateSet { memories, scores, mode }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::DeterministicTestEmbedder;
    use crate::memory::Category;

    fn temp_store(dims: usize) -> (Arc<Store>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.sqlite");
        (Arc::new(Store::open(&path, "main", dims).unwrap()), dir)
    }

    #[tokio::test]
    async fn generates_candidates_from_both_layers() {
        let (store, _dir) = temp_store(32);
        let embedder: Arc<dyn Embedder> = Arc::new(DeterministicTestEmbedder::new(32));

        let m = Memory::new("id1".into(), "main".into(), "dark mode preference".into(), "dark mode preference".into(), Category::Preference);
        store.insert(&m).unwrap();
        let vec = embedder.embed_batch(&["dark mode preference".to_string()]).await.remove(0).unwrap();
        store.set_embedding("id1", &vec).unwrap();

        let weights = SearchWeights::default();
        let filter = Filter::default();
        let result = generate(&store, &embedder, "dark mode", "dark mode", &weights, &filter, Utc::now()).await;

        assert_eq!(result.mode, SearchMode::Full);
        assert!(result.memories.contains_key("id1"));
        let scores = &result.scores["id1"];
        assert!(scores.semantic.is_some());
        assert!(scores.lexical.is_some());
        assert!(scores.recency.is_some());
    }

    #[tokio::test]
    async fn degrades_when_embedder_fails() {
        let (store, _dir) = temp_store(32);
        let embedder: Arc<dyn Embedder> = Arc::new(crate::embed::NullEmbedder::new(32));

        let m = Memory::new("id1".into(), "main".into(), "text about dogs".into(), "text about dogs".into(), Category::Fact);
        store.insert(&m).unwrap();

        let weights = SearchWeights::default();
        let filter = Filter::default();
        let result = generate(&store, &embedder, "dogs", "dogs", &weights, &filter, Utc::now()).await;

        assert_eq!(result.mode, SearchMode::DegradedNoVector);
        assert!(result.scores["id1"].semantic.is_none());
        assert!(result.scores["id1"].lexical.is_some());
    }
}
