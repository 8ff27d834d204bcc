//! `CoreContext` (spec §9 "Global state"): the single handle that wires every
//! component together and is threaded through recall, capture, and
//! maintenance. Constructed once at startup and shared behind an `Arc` so
//! the background secondary-rerank pass can outlive the request that
//! triggered it; tests build a parallel, fully isolated instance per test
//! rather than reaching for a process-wide singleton.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::embed::{embed_cache_key, Embedder, RemoteEmbedder};
use crate::error::{CoreError, RecallError, StoreError};
use crate::lifecycle::{Lifecycle, LifecycleRunResult};
use crate::memory::{
    Category, CaptureInput, CaptureMessage, ConfidenceTier, Filter, Memory, RecallInput,
    RecallResult, SearchMode, StoreInput,
};
use crate::metrics::MetricsHub;
use crate::normalize::{DefaultNormalizer, TextNormalizer};
use crate::search::{self, mmr_select, Fuser, RecallCache, Reranker};
use crate::storage::{Store, StoragePool};
use crate::trigger::TriggerScorer;
use crate::write_merge::{MergeDecision, WriteMerge};

/// Everything a recall/capture/maintenance call needs, constructed once at
/// startup and shared by every request.
pub struct CoreContext {
    pub config: AppConfig,
    pub pool: StoragePool,
    pub embedder: Arc<dyn Embedder>,
    pub normalizer: Arc<dyn TextNormalizer>,
    pub trigger: TriggerScorer,
    pub fuser: Fuser,
    pub reranker: Reranker,
    pub cache: RecallCache,
    pub write_merge: WriteMerge,
    pub lifecycle: Lifecycle,
    pub metrics: MetricsHub,
}

/// Outcome of a recall call, including the adapter-facing annotations spec
/// §3/§6 require alongside the ranked results.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecallResponse {
    pub results: Vec<RecallResult>,
    pub triggered: bool,
    pub search_mode: SearchMode,
    pub degraded: bool,
    pub cached: bool,
}

/// Outcome of a single captured message.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureRecord {
    pub id: String,
    pub action: CaptureAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureAction {
    Inserted,
    Reinforced,
    Superseded,
}

/// A single named maintenance trigger (spec §6), as opposed to
/// [`CoreContext::run_maintenance`]'s full sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenancePhase {
    Decay,
    Consolidate,
    Compress,
    Gc,
}

impl MaintenancePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            MaintenancePhase::Decay => "decay",
            MaintenancePhase::Consolidate => "consolidate",
            MaintenancePhase::Compress => "compress",
            MaintenancePhase::Gc => "gc",
        }
    }
}

impl CoreContext {
    pub fn new(config: AppConfig) -> Self {
        let embedder: Arc<dyn Embedder> = Arc::new(RemoteEmbedder::new(config.embed.clone()));
        Self::with_embedder(config, embedder)
    }

    /// Construct with an injected embedder (mock/null/deterministic), the
    /// capability-interface seam spec §9 calls for so tests don't need a
    /// live embedding service.
    pub fn with_embedder(config: AppConfig, embedder: Arc<dyn Embedder>) -> Self {
        let pool = StoragePool::new(&config);
        let fuser = Fuser::new(config.weights.clone());
        let mut reranker = Reranker::new(config.rerank.clone());
        if config.rerank.prewarm {
            #[cfg(feature = "reranker")]
            reranker.init_models();
        }
        let cache = RecallCache::new(config.lifecycle.recall_cache_ttl_secs);
        let write_merge = WriteMerge::new(config.lifecycle.clone());
        let lifecycle = Lifecycle::new(config.lifecycle.clone());

        Self {
            config,
            pool,
            embedder,
            normalizer: Arc::new(DefaultNormalizer),
            trigger: TriggerScorer::default(),
            fuser,
            reranker,
            cache,
            write_merge,
            lifecycle,
            metrics: MetricsHub::new(),
        }
    }

    fn embedder_model(&self) -> &str {
        &self.config.embed.model
    }

    /// Embed with the persistent Store-backed cache tier in front of the
    /// embedder's own in-memory cache (spec §4.3's third cache tier).
    async fn embed_one_cached(&self, store: &Store, text: &str) -> Option<Vec<f32>> {
        let key = embed_cache_key(text, self.embedder_model(), self.config.embed.dimensions);
        if let Ok(Some(cached)) = store.get_cached_embedding(&key) {
            return Some(cached);
        }
        let vec = self
            .embedder
            .embed_batch(std::slice::from_ref(&text.to_string()))
            .await
            .into_iter()
            .next()
            .flatten()?;
        if let Err(e) = store.put_cached_embedding(&key, vec.len(), &vec, Utc::now()) {
            warn!(error = %e, "failed to persist embedding cache entry");
        }
        Some(vec)
    }

    // ------------------------------------------------------------------
    // Recall (spec §2 "Data flow (recall)")
    // ------------------------------------------------------------------

    pub async fn recall(self: &Arc<Self>, input: RecallInput) -> Result<RecallResponse, RecallError> {
        let start = Instant::now();
        self.metrics.incr("recall_requests_total");

        let store = self.pool.get(&input.agent)?;
        let normalized = self.normalizer.normalize(&input.query);
        let triggered = self.trigger.should_trigger(&input.query);

        let mut filter = input.filter.clone().unwrap_or_default();
        if filter.namespace.is_none() {
            filter.namespace = input.namespace.clone();
        }
        if let Some((start_t, end_t)) = normalized.temporal_refs.first() {
            filter.time_range = Some((*start_t, *end_t));
        }

        if let Some(cached) = self.cache.get(&input.agent, filter.namespace.as_deref(), &normalized.text, &filter) {
            self.metrics.incr("recall_cache_hits_total");
            let mode = cached.first().map(|r| r.search_mode).unwrap_or(SearchMode::Full);
            return Ok(RecallResponse { results: cached, triggered, search_mode: mode, degraded: false, cached: true });
        }
        self.metrics.incr("recall_cache_misses_total");

        let deadline = Duration::from_millis(self.config.lifecycle.recall_deadline_ms);
        let outcome = tokio::time::timeout(deadline, self.recall_uncached(&store, &input, &normalized.text, &filter)).await;

        let (results, mode, degraded, confident) = match outcome {
            Ok(r) => r,
            Err(_) => {
                self.metrics.incr("recall_deadline_exceeded_total");
                warn!(agent = %input.agent, "recall deadline exceeded, returning fused-only result");
                let (results, mode) = self.recall_fused_only(&store, &input, &normalized.text, &filter).await;
                (results, mode, true, true)
            }
        };

        self.cache.put(&input.agent, filter.namespace.as_deref(), &normalized.text, &filter, results.clone());
        self.metrics.observe_ms("recall_latency_ms", start.elapsed().as_millis() as u64);

        if !confident && self.config.rerank.enabled && !degraded {
            self.spawn_secondary_rerank(store, input.clone(), filter.clone(), results.clone());
        }

        Ok(RecallResponse { results, triggered, search_mode: mode, degraded, cached: false })
    }

    /// Full pipeline: candidates → fuse → primary rerank → MMR diversity
    /// (spec §4.6, §4.7). Returns whether the primary pass was confident, so
    /// the caller can decide whether to kick off the secondary pass.
    async fn recall_uncached(
        &self,
        store: &Arc<Store>,
        input: &RecallInput,
        normalized_query: &str,
        filter: &Filter,
    ) -> (Vec<RecallResult>, SearchMode, bool, bool) {
        let now = Utc::now();
        let candidates = search::generate_candidates(store, &self.embedder, &input.query, normalized_query, &self.config.weights, filter, now).await;

        let fused = self.fuser.fuse(&candidates.scores);
        let mut ranked: Vec<(String, f32)> = fused.into_iter().take(self.config.weights.k_fuse).collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let limit = input.limit.unwrap_or(10).max(1);

        let (mut final_ranked, confident) = if self.config.rerank.enabled && !ranked.is_empty() {
            let docs: Vec<((String, f32), String)> = ranked
                .iter()
                .filter_map(|(id, score)| candidates.memories.get(id).map(|m| ((id.clone(), *score), m.text.clone())))
                .collect();
            match self.reranker.rerank_primary(&input.query, docs) {
                Ok((reranked, confident)) => {
                    let w_r = self.config.rerank.primary_weight;
                    let blended: Vec<(String, f32)> = reranked
                        .into_iter()
                        .map(|r| {
                            let (id, fused_score) = r.item;
                            (id, (1.0 - w_r) * fused_score + w_r * r.score)
                        })
                        .collect();
                    (blended, confident)
                }
                Err(_) => (ranked.clone(), true),
            }
        } else {
            (ranked.clone(), true)
        };

        final_ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        final_ranked.truncate(limit.max(self.config.rerank.primary_top_k));

        let mut embeddings: HashMap<String, Vec<f32>> = HashMap::new();
        for (id, _) in &final_ranked {
            if let Ok(Some(v)) = store.get_embedding(id) {
                embeddings.insert(id.clone(), v);
            }
        }
        let diversified = mmr_select(&final_ranked, &embeddings, self.config.rerank.mmr_lambda, limit);

        let min_score = input.min_score.unwrap_or(0.0);
        let mut results = Vec::with_capacity(diversified.len());
        for id in &diversified {
            let Some(memory) = candidates.memories.get(id) else { continue };
            let Some((_, score)) = final_ranked.iter().find(|(rid, _)| rid == id) else { continue };
            if *score < min_score {
                continue;
            }
            let scores = candidates.scores.get(id).cloned().unwrap_or_default();
            let _ = store.mark_accessed(id, now);
            results.push(RecallResult {
                memory: memory.clone(),
                scores,
                score: *score,
                confidence_tier: ConfidenceTier::from_score(*score),
                search_mode: candidates.mode,
                cached: false,
            });
        }

        (results, candidates.mode, false, confident)
    }

    /// Deadline fallback: fused ranking only, no rerank, no MMR (spec §5
    /// "Cancellation").
    async fn recall_fused_only(
        &self,
        store: &Arc<Store>,
        input: &RecallInput,
        normalized_query: &str,
        filter: &Filter,
    ) -> (Vec<RecallResult>, SearchMode) {
        let now = Utc::now();
        let candidates = search::generate_candidates(store, &self.embedder, &input.query, normalized_query, &self.config.weights, filter, now).await;
        let fused = self.fuser.fuse(&candidates.scores);

        let results = fused
            .into_iter()
            .take(input.limit.unwrap_or(10))
            .filter_map(|(id, score)| {
                let memory = candidates.memories.get(&id)?.clone();
                let layer = candidates.scores.get(&id).cloned().unwrap_or_default();
                Some(RecallResult {
                    memory,
                    scores: layer,
                    score,
                    confidence_tier: ConfidenceTier::from_score(score),
                    search_mode: candidates.mode,
                    cached: false,
                })
            })
            .collect();

        (results, candidates.mode)
    }

    /// Secondary (background) rerank (spec §4.7, §4.9): recomputes the
    /// ranking with the higher-precision secondary model and replaces the
    /// cache entry under the same key once it finishes, off the request's
    /// critical path. Best-effort — a failure here is dropped silently and
    /// never surfaces to the original caller.
    fn spawn_secondary_rerank(self: &Arc<Self>, store: Arc<Store>, input: RecallInput, filter: Filter, mut results: Vec<RecallResult>) {
        let ctx = Arc::clone(self);
        tokio::spawn(async move {
            let docs: Vec<((String, f32), String)> =
                results.iter().map(|r| ((r.memory.id.clone(), r.score), r.memory.text.clone())).collect();
            let reranked = match ctx.reranker.rerank_secondary(&input.query, docs) {
                Ok(r) => r,
                Err(_) => return,
            };
            if reranked.is_empty() {
                return;
            }

            let w = ctx.config.rerank.secondary_weight;
            for rr in &reranked {
                let (id, _fused_score) = &rr.item;
                if let Some(existing) = results.iter_mut().find(|r| &r.memory.id == id) {
                    existing.score = (1.0 - w) * existing.score + w * rr.score;
                    existing.scores.reranker_secondary = Some(rr.score);
                }
            }
            results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

            let normalized = ctx.normalizer.normalize(&input.query);
            ctx.cache.put(&input.agent, filter.namespace.as_deref(), &normalized.text, &filter, results);
            let _ = store.persist_vector_index();
        });
    }

    // ------------------------------------------------------------------
    // Capture / store (spec §2 "Data flow (ingest)")
    // ------------------------------------------------------------------

    pub async fn capture(&self, input: CaptureInput) -> Result<Vec<CaptureRecord>, CoreError> {
        let store = self.pool.get(&input.agent)?;
        let mut out = Vec::with_capacity(input.messages.len());

        let is_qa_pair = input.messages.len() == 2
            && input.messages[0].role.as_deref() == Some("user")
            && input.messages[1].role.as_deref() == Some("assistant");

        if is_qa_pair {
            let combined = format!("{}\n{}", input.messages[0].text, input.messages[1].text);
            let record = self
                .write_one(&store, &input.agent, input.namespace.as_deref(), &combined, Category::QaPair, input.source.as_deref(), true, None)
                .await?;
            out.push(record);
        } else {
            for msg in &input.messages {
                let category = category_for_role(msg);
                let record = self
                    .write_one(&store, &input.agent, input.namespace.as_deref(), &msg.text, category, input.source.as_deref(), false, None)
                    .await?;
                out.push(record);
            }
        }

        self.cache.invalidate_agent(&input.agent);
        Ok(out)
    }

    pub async fn store_single(&self, input: StoreInput) -> Result<CaptureRecord, CoreError> {
        let store = self.pool.get(&input.agent)?;
        let category = input.category.unwrap_or(Category::Fact);
        let record = self
            .write_one(&store, &input.agent, input.namespace.as_deref(), &input.text, category, input.source.as_deref(), false, input.importance)
            .await?;
        if input.pinned {
            store.pin(&record.id)?;
        }
        self.cache.invalidate_agent(&input.agent);
        Ok(record)
    }

    /// Insert a pinned, maximum-importance rule memory (`/v1/rule`).
    pub async fn store_rule(&self, agent: &str, text: &str, namespace: Option<&str>) -> Result<CaptureRecord, CoreError> {
        let store = self.pool.get(agent)?;
        let record = self.write_one(&store, agent, namespace, text, Category::Rule, None, false, Some(1.0)).await?;
        store.pin(&record.id)?;
        self.cache.invalidate_agent(agent);
        Ok(record)
    }

    #[allow(clippy::too_many_arguments)]
    async fn write_one(
        &self,
        store: &Arc<Store>,
        agent: &str,
        namespace: Option<&str>,
        text: &str,
        category: Category,
        source: Option<&str>,
        is_qa_pair: bool,
        importance_override: Option<f32>,
    ) -> Result<CaptureRecord, CoreError> {
        let normalized = self.normalizer.normalize(text);
        let id = crate::id::derive_memory_id(agent, &normalized.text);
        let importance = importance_override.unwrap_or_else(|| self.trigger.score_importance(text, is_qa_pair, source == Some("cron")));
        let now = Utc::now();

        let vec = self.embed_one_cached(store, text).await;
        let decision = self.write_merge.decide(store, agent, namespace, category, vec.as_deref())?;

        match decision {
            MergeDecision::Reinforce { existing_id } => {
                self.write_merge.apply_reinforce(store, &existing_id, Some(importance), now)?;
                self.metrics.incr("writes_reinforced_total");
                Ok(CaptureRecord { id: existing_id, action: CaptureAction::Reinforced })
            }
            MergeDecision::Supersede { existing_id } => {
                let mut m = Memory::new(id, agent.to_string(), text.to_string(), normalized.text, category);
                m.importance = importance;
                m.namespace = namespace.map(str::to_string);
                m.source = source.map(str::to_string);
                self.write_merge.apply_supersede(store, &existing_id, &m, now)?;
                if let Some(v) = &vec {
                    store.set_embedding(&m.id, v)?;
                } else {
                    store.mark_embedding_failed(&m.id)?;
                }
                self.metrics.incr("writes_superseded_total");
                Ok(CaptureRecord { id: m.id, action: CaptureAction::Superseded })
            }
            MergeDecision::Insert => {
                let mut m = Memory::new(id, agent.to_string(), text.to_string(), normalized.text, category);
                m.importance = importance;
                m.namespace = namespace.map(str::to_string);
                m.source = source.map(str::to_string);
                store.insert(&m)?;
                if let Some(v) = &vec {
                    store.set_embedding(&m.id, v)?;
                } else {
                    store.mark_embedding_failed(&m.id)?;
                    self.metrics.incr("writes_vectorless_total");
                }
                self.metrics.incr("writes_inserted_total");
                Ok(CaptureRecord { id: m.id, action: CaptureAction::Inserted })
            }
        }
    }

    // ------------------------------------------------------------------
    // Forget / pin / unpin (spec §6)
    // ------------------------------------------------------------------

    pub fn forget_by_id(&self, agent: &str, id: &str) -> Result<(), CoreError> {
        let store = self.pool.get(agent)?;
        store.soft_delete(id, Utc::now(), None)?;
        self.cache.invalidate_agent(agent);
        Ok(())
    }

    pub async fn forget_by_query(self: &Arc<Self>, agent: &str, query: &str) -> Result<Option<String>, CoreError> {
        let input = RecallInput { query: query.to_string(), agent: agent.to_string(), limit: Some(1), namespace: None, filter: None, max_tokens: None, min_score: None };
        let response = self.recall(input).await.map_err(|e| match e {
            RecallError::Core(c) => c,
            RecallError::Timeout => CoreError::Store(StoreError::Io("recall timed out during forget-by-query".to_string())),
        })?;
        let Some(top) = response.results.into_iter().next() else { return Ok(None) };
        self.forget_by_id(agent, &top.memory.id)?;
        Ok(Some(top.memory.id))
    }

    pub fn pin(&self, agent: &str, id: &str) -> Result<(), CoreError> {
        let store = self.pool.get(agent)?;
        self.lifecycle.pin(&store, id)?;
        Ok(())
    }

    pub fn unpin(&self, agent: &str, id: &str) -> Result<(), CoreError> {
        let store = self.pool.get(agent)?;
        self.lifecycle.unpin(&store, id, Utc::now())?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Maintenance (spec §4.11, fans out over `agent="all"`)
    // ------------------------------------------------------------------

    pub fn run_maintenance(&self, agent: &str) -> Result<Vec<(String, LifecycleRunResult)>, CoreError> {
        let agents = self.pool.resolve_agents(agent)?;
        let mut out = Vec::with_capacity(agents.len());
        for a in agents {
            let store = self.pool.get(&a)?;
            let result = self.lifecycle.run_full_sweep(&store, Utc::now())?;
            info!(agent = %a, ?result, "maintenance sweep complete");
            out.push((a, result));
        }
        Ok(out)
    }

    /// Run a single named maintenance trigger (`/v1/decay`, `/v1/consolidate`,
    /// `/v1/compress`, `/v1/gc`) rather than the full sweep, fanned out the
    /// same way over `agent = "all"`. `Compress` is the hard-purge half of GC
    /// on its own, for callers that want to reclaim space without touching
    /// memories that are merely weak (spec §9 open question: the distilled
    /// spec names `compress` alongside `gc` without defining it separately).
    pub fn run_maintenance_phase(&self, agent: &str, phase: MaintenancePhase) -> Result<Vec<(String, serde_json::Value)>, CoreError> {
        let agents = self.pool.resolve_agents(agent)?;
        let mut out = Vec::with_capacity(agents.len());
        let now = Utc::now();
        for a in agents {
            let store = self.pool.get(&a)?;
            let value = match phase {
                MaintenancePhase::Decay => {
                    let decayed = self.lifecycle.decay_tick(&store, now)?;
                    serde_json::json!({ "decayed": decayed })
                }
                MaintenancePhase::Consolidate => {
                    let (groups, merged) = self.lifecycle.consolidate(&store, now)?;
                    let conflicts = self.lifecycle.resolve_conflicts(&store, now)?;
                    serde_json::json!({
                        "consolidatedGroups": groups,
                        "consolidatedMemories": merged,
                        "conflictsResolved": conflicts,
                    })
                }
                MaintenancePhase::Compress => {
                    let (_, hard_purged) = self.lifecycle.gc(&store, now)?;
                    serde_json::json!({ "hardPurged": hard_purged })
                }
                MaintenancePhase::Gc => {
                    let (soft_deleted, hard_purged) = self.lifecycle.gc(&store, now)?;
                    serde_json::json!({ "softDeleted": soft_deleted, "hardPurged": hard_purged })
                }
            };
            info!(agent = %a, phase = phase.as_str(), %value, "maintenance phase complete");
            self.cache.invalidate_agent(&a);
            out.push((a, value));
        }
        Ok(out)
    }

    /// Amnesia check (spec §4.11): for each topic, recall and report whether
    /// any result cleared `MEDIUM` confidence.
    pub async fn amnesia_check(self: &Arc<Self>, agent: &str, topics: &[String]) -> Vec<(String, bool)> {
        let mut out = Vec::with_capacity(topics.len());
        for topic in topics {
            let input = RecallInput { query: topic.clone(), agent: agent.to_string(), limit: Some(5), namespace: None, filter: None, max_tokens: None, min_score: None };
            let covered = match self.recall(input).await {
                Ok(response) => response.results.iter().any(|r| r.confidence_tier.at_least_medium()),
                Err(_) => false,
            };
            out.push((topic.clone(), covered));
        }
        out
    }

    pub fn export(&self, agent: &str, filter: &Filter) -> Result<Vec<Memory>, CoreError> {
        let store = self.pool.get(agent)?;
        Ok(store.export(filter)?)
    }

    pub fn import(&self, agent: &str, records: &[Memory]) -> Result<(), CoreError> {
        let store = self.pool.get(agent)?;
        store.import(records)?;
        self.cache.invalidate_agent(agent);
        Ok(())
    }

    pub fn stats(&self, agent: &str) -> Result<(i64, i64, i64), CoreError> {
        let store = self.pool.get(agent)?;
        Ok(store.count_rows()?)
    }
}

fn category_for_role(msg: &CaptureMessage) -> Category {
    match msg.role.as_deref() {
        Some("user") => Category::User,
        Some("assistant") => Category::Assistant,
        _ => Category::Conversation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::DeterministicTestEmbedder;

    fn context_in(dir: &std::path::Path) -> Arc<CoreContext> {
        let mut config = AppConfig::default();
        config.store.data_dir = Some(dir.to_string_lossy().to_string());
        config.embed.dimensions = 32;
        config.rerank.enabled = false;
        let embedder: Arc<dyn Embedder> = Arc::new(DeterministicTestEmbedder::new(32));
        Arc::new(CoreContext::with_embedder(config, embedder))
    }

    #[tokio::test]
    async fn store_then_recall_exact_text_is_top_hit() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_in(dir.path());

        ctx.store_single(StoreInput {
            text: "User prefers dark mode".to_string(),
            agent: "main".to_string(),
            category: Some(Category::Preference),
            importance: None,
            pinned: false,
            namespace: None,
            session: None,
            source: None,
        })
        .await
        .unwrap();

        let response = ctx
            .recall(RecallInput {
                query: "User prefers dark mode".to_string(),
                agent: "main".to_string(),
                limit: Some(1),
                namespace: None,
                filter: None,
                max_tokens: None,
                min_score: None,
            })
            .await
            .unwrap();

        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].memory.text, "User prefers dark mode");
    }

    #[tokio::test]
    async fn repeated_capture_reinforces_instead_of_duplicating() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_in(dir.path());

        let input = CaptureInput {
            agent: "main".to_string(),
            messages: vec![CaptureMessage { text: "geçen hafta yeni sunucu aldık".to_string(), role: None, session: None }],
            namespace: None,
            source: None,
        };

        let first = ctx.capture(input.clone()).await.unwrap();
        let second = ctx.capture(input).await.unwrap();

        assert_eq!(first[0].id, second[0].id);
        assert_eq!(second[0].action, CaptureAction::Reinforced);

        let store = ctx.pool.get("main").unwrap();
        let m = store.get(&first[0].id).unwrap();
        assert_eq!(m.reinforce_count, 1);
    }

    #[tokio::test]
    async fn pinned_memory_survives_aggressive_decay() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_in(dir.path());

        let record = ctx
            .store_single(StoreInput {
                text: "Pinned rule".to_string(),
                agent: "main".to_string(),
                category: Some(Category::Rule),
                importance: None,
                pinned: true,
                namespace: None,
                session: None,
                source: None,
            })
            .await
            .unwrap();

        let store = ctx.pool.get("main").unwrap();
        let mut m = store.get(&record.id).unwrap();
        m.last_reinforced_at = Utc::now() - chrono::Duration::days(1000);
        store.insert(&m).ok();

        ctx.run_maintenance("main").unwrap();

        let after = store.get(&record.id).unwrap();
        assert!(after.pinned);
        assert_eq!(after.strength, 1.0);
    }

    #[tokio::test]
    async fn forget_by_query_soft_deletes_top_hit() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_in(dir.path());

        let record = ctx
            .store_single(StoreInput {
                text: "The wifi password is hunter2".to_string(),
                agent: "main".to_string(),
                category: None,
                importance: None,
                pinned: false,
                namespace: None,
                session: None,
                source: None,
            })
            .await
            .unwrap();

        let forgotten = ctx.forget_by_query("main", "wifi password").await.unwrap();
        assert_eq!(forgotten, Some(record.id.clone()));

        let store = ctx.pool.get("main").unwrap();
        let m = store.get(&record.id).unwrap();
        assert!(m.is_soft_deleted());
    }
}
