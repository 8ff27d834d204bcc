//! `Fuser`: combines the candidate layers into one ranked list (spec §4.7).
//!
//! All five layers (semantic, lexical, recency, strength, importance) are
//! independent rank lists over the candidate set; each contributes
//! `w_L / (k + rank_L(doc))` to a document's fused score, so a layer's
//! configured weight governs its influence on the final ranking rather than
//! being applied as a second, unweighted pass on top of RRF.

use std::collections::HashMap;

use crate::config::SearchWeights;
use crate::memory::LayerScores;

/// Reciprocal Rank Fusion over an arbitrary number of ranked lists.
///
/// score(d) = sum over lists containing d of 1/(k + rank(d))
///
/// Normalizes across different scoring scales, rewards items appearing in
/// multiple lists, and `k` (typically 60) dampens the effect of top ranks.
pub fn reciprocal_rank_fusion(lists: &[&[(String, f32)]], k: f32) -> Vec<(String, f32)> {
    let mut scores: HashMap<String, f32> = HashMap::new();
    for list in lists {
        for (rank, (key, _)) in list.iter().enumerate() {
            *scores.entry(key.clone()).or_default() += 1.0 / (k + rank as f32);
        }
    }
    let mut results: Vec<(String, f32)> = scores.into_iter().collect();
    results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    results
}

/// Weighted Reciprocal Rank Fusion: each list carries its own weight, so
/// `score(d) = sum over lists L of w_L/(k + rank_L(d))`. Zeroing a layer's
/// weight zeroes its contribution entirely, unlike an unweighted RRF sum.
pub fn weighted_rank_fusion(lists: &[(&[(String, f32)], f32)], k: f32) -> Vec<(String, f32)> {
    let mut scores: HashMap<String, f32> = HashMap::new();
    for (list, weight) in lists {
        for (rank, (key, _)) in list.iter().enumerate() {
            *scores.entry(key.clone()).or_default() += weight / (k + rank as f32);
        }
    }
    let mut results: Vec<(String, f32)> = scores.into_iter().collect();
    results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    results
}

/// Rank the candidates that carry `field` (descending by raw score), for
/// feeding a single layer into [`weighted_rank_fusion`].
fn ranked_layer(scores: &HashMap<String, LayerScores>, field: impl Fn(&LayerScores) -> Option<f32>) -> Vec<(String, f32)> {
    let mut ranked: Vec<(String, f32)> = scores.iter().filter_map(|(id, s)| field(s).map(|v| (id.clone(), v))).collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    ranked
}

/// Linear combination of two result lists with explicit weights, normalized
/// by each list's top score. Kept alongside RRF as an alternate fusion
/// strategy for callers that want scale-aware blending instead of
/// rank-based fusion.
pub fn linear_combination(
    keyword_results: &[(String, f32)],
    semantic_results: &[(String, f32)],
    keyword_weight: f32,
    semantic_weight: f32,
) -> Vec<(String, f32)> {
    let mut scores: HashMap<String, f32> = HashMap::new();

    let max_keyword = keyword_results.first().map(|(_, s)| *s).unwrap_or(1.0).max(0.001);
    for (key, score) in keyword_results {
        *scores.entry(key.clone()).or_default() += (score / max_keyword) * keyword_weight;
    }

    let max_semantic = semantic_results.first().map(|(_, s)| *s).unwrap_or(1.0).max(0.001);
    for (key, score) in semantic_results {
        *scores.entry(key.clone()).or_default() += (score / max_semantic) * semantic_weight;
    }

    let mut results: Vec<(String, f32)> = scores.into_iter().collect();
    results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    results
}

/// Normalized exponential recency score in [0, 1]; `lambda` controls decay
/// rate per day (spec §4.6 "recency layer").
pub fn recency_score(age_days: f64, lambda: f64) -> f32 {
    (-lambda * age_days.max(0.0)).exp() as f32
}

/// Blend the per-layer scores into one scalar using the configured weights.
/// Layers absent from a given candidate (e.g. no semantic hit) contribute
/// zero rather than skew the weighted sum by renormalizing.
pub fn combine_scores(scores: &LayerScores, weights: &SearchWeights) -> f32 {
    scores.semantic.unwrap_or(0.0) * weights.semantic
        + scores.lexical.unwrap_or(0.0) * weights.keyword
        + scores.recency.unwrap_or(0.0) * weights.recency
        + scores.strength.unwrap_or(0.0) * weights.strength
        + scores.importance.unwrap_or(0.0) * weights.importance
}

pub struct Fuser {
    weights: SearchWeights,
}

impl Fuser {
    pub fn new(weights: SearchWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &SearchWeights {
        &self.weights
    }

    /// Fuse all five candidate layers (semantic, lexical, recency, strength,
    /// importance) via weighted RRF, returning fused ids in descending
    /// relevance order with their final fused score (spec §4.7).
    pub fn fuse(&self, scores: &HashMap<String, LayerScores>) -> Vec<(String, f32)> {
        let semantic = ranked_layer(scores, |s| s.semantic);
        let lexical = ranked_layer(scores, |s| s.lexical);
        let recency = ranked_layer(scores, |s| s.recency);
        let strength = ranked_layer(scores, |s| s.strength);
        let importance = ranked_layer(scores, |s| s.importance);

        weighted_rank_fusion(
            &[
                (semantic.as_slice(), self.weights.semantic),
                (lexical.as_slice(), self.weights.keyword),
                (recency.as_slice(), self.weights.recency),
                (strength.as_slice(), self.weights.strength),
                (importance.as_slice(), self.weights.importance),
            ],
            self.weights.rrf_k,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rrf_rewards_items_in_both_lists() {
        let keyword = vec![("doc-1".to_string(), 0.9), ("doc-2".to_string(), 0.8), ("doc-3".to_string(), 0.7)];
        let semantic = vec![("doc-2".to_string(), 0.95), ("doc-1".to_string(), 0.85), ("doc-4".to_string(), 0.75)];

        let results = reciprocal_rank_fusion(&[&keyword, &semantic], 60.0);

        assert!(results.iter().any(|(k, _)| k == "doc-1"));
        assert!(results.iter().any(|(k, _)| k == "doc-2"));
        for i in 1..results.len() {
            assert!(results[i - 1].1 >= results[i].1);
        }
    }

    #[test]
    fn rrf_with_empty_list_returns_other_list() {
        let keyword: Vec<(String, f32)> = vec![];
        let semantic = vec![("doc-1".to_string(), 0.9)];
        let results = reciprocal_rank_fusion(&[&keyword, &semantic], 60.0);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, "doc-1");
    }

    #[test]
    fn linear_combination_favors_heavier_weight() {
        let keyword = vec![("doc-1".to_string(), 1.0)];
        let semantic = vec![("doc-2".to_string(), 1.0)];
        let results = linear_combination(&keyword, &semantic, 0.9, 0.1);
        let doc1 = results.iter().find(|(k, _)| k == "doc-1").map(|(_, s)| *s).unwrap();
        let doc2 = results.iter().find(|(k, _)| k == "doc-2").map(|(_, s)| *s).unwrap();
        assert!(doc1 > doc2);
    }

    #[test]
    fn recency_score_decays_with_age() {
        let fresh = recency_score(0.0, 0.01);
        let old = recency_score(100.0, 0.01);
        assert!(fresh > old);
        assert_eq!(fresh, 1.0);
    }

    #[test]
    fn combine_scores_weights_each_layer() {
        let weights = SearchWeights::default();
        let scores = LayerScores { semantic: Some(1.0), ..Default::default() };
        let combined = combine_scores(&scores, &weights);
        assert_eq!(combined, weights.semantic);
    }
}
