//! Black-box acceptance tests: the literal end-to-end scenarios, run against
//! a `CoreContext` backed by a fresh temp-directory store per test rather
//! than any shared fixture, so scenarios can run in parallel without
//! interfering with each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use agent_memory_core::{
    Category, CaptureInput, CaptureMessage, ConfidenceTier, CoreContext, Embedder, Filter,
    MaintenancePhase, Memory, RecallInput, StoreInput,
};
use chrono::{Duration, Utc};

/// Looks up a handful of known fixture texts by exact match, returning a
/// hand-picked vector that simulates what a real embedding model would
/// produce for that pair (e.g. a paraphrase mapped near its source
/// sentence); anything else falls back to a content hash, the same
/// deterministic-but-unrelated-text behavior `DeterministicTestEmbedder`
/// gives the rest of the suite.
struct FixtureEmbedder {
    dims: usize,
    fixtures: Mutex<HashMap<String, Vec<f32>>>,
}

impl FixtureEmbedder {
    fn new(dims: usize) -> Self {
        Self { dims, fixtures: Mutex::new(HashMap::new()) }
    }

    fn register(&self, text: &str, vec: Vec<f32>) {
        self.fixtures.lock().expect("fixture lock poisoned").insert(text.to_string(), vec);
    }

    fn hash_embed(&self, text: &str) -> Vec<f32> {
        let mut hasher = blake3::Hasher::new();
        hasher.update(text.as_bytes());
        let mut reader = hasher.finalize_xof();
        let mut raw = vec![0u8; self.dims];
        reader.fill(&mut raw);
        let mut v: Vec<f32> = raw.into_iter().map(|b| (b as f32 / 255.0) * 2.0 - 1.0).collect();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in v.iter_mut() {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait::async_trait]
impl Embedder for FixtureEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Vec<Option<Vec<f32>>> {
        let fixtures = self.fixtures.lock().expect("fixture lock poisoned");
        texts
            .iter()
            .map(|t| Some(fixtures.get(t).cloned().unwrap_or_else(|| self.hash_embed(t))))
            .collect()
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}

const DIMS: usize = 16;

fn unit_vec(dims: usize, index: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; dims];
    v[index % dims] = 1.0;
    v
}

fn context_with_fixtures(dir: &std::path::Path, fixtures: &[(&str, Vec<f32>)]) -> Arc<CoreContext> {
    let embedder = Arc::new(FixtureEmbedder::new(DIMS));
    for (text, vec) in fixtures {
        embedder.register(text, vec.clone());
    }

    let mut config = agent_memory_core::AppConfig::default();
    config.store.data_dir = Some(dir.to_string_lossy().to_string());
    config.embed.dimensions = DIMS;
    config.rerank.enabled = false;
    Arc::new(CoreContext::with_embedder(config, embedder))
}

fn bare_context(dir: &std::path::Path) -> Arc<CoreContext> {
    context_with_fixtures(dir, &[])
}

// ---------------------------------------------------------------------
// 1. Dark-mode preference recall
// ---------------------------------------------------------------------

#[tokio::test]
async fn scenario_1_preference_recall_is_top_hit_with_high_confidence() {
    let dir = tempfile::tempdir().unwrap();
    let anchor = unit_vec(DIMS, 0);
    let ctx = context_with_fixtures(
        &dir.path(),
        &[
            ("User prefers dark mode", anchor.clone()),
            ("what is the user's UI preference", anchor),
        ],
    );

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
            query: "what is the user's UI preference".to_string(),
            agent: "main".to_string(),
            limit: Some(5),
            namespace: None,
            filter: None,
            max_tokens: None,
            min_score: None,
        })
        .await
        .unwrap();

    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].memory.text, "User prefers dark mode");
    assert!(response.results[0].confidence_tier.at_least_medium(), "expected HIGH or MEDIUM, got {:?}", response.results[0].confidence_tier);
}

// ---------------------------------------------------------------------
// 2. Istanbul -> Ankara supersede-after-consolidate
// ---------------------------------------------------------------------

#[tokio::test]
async fn scenario_2_consolidate_supersedes_stale_location_fact() {
    let dir = tempfile::tempdir().unwrap();
    let same_slot = unit_vec(DIMS, 1);
    let ctx = context_with_fixtures(
        &dir.path(),
        &[
            ("User lives in Istanbul", same_slot.clone()),
            ("User moved to Ankara last week", same_slot),
        ],
    );

    let istanbul = ctx
        .store_single(StoreInput {
            text: "User lives in Istanbul".to_string(),
            agent: "main".to_string(),
            category: Some(Category::Fact),
            importance: Some(0.5),
            pinned: false,
            namespace: None,
            session: None,
            source: None,
        })
        .await
        .unwrap();

    let ankara = ctx
        .store_single(StoreInput {
            text: "User moved to Ankara last week".to_string(),
            agent: "main".to_string(),
            category: Some(Category::Fact),
            importance: Some(0.9),
            pinned: false,
            namespace: None,
            session: None,
            source: None,
        })
        .await
        .unwrap();

    // Two near-duplicate facts landed as separate rows at write time (they
    // are not reinforced into one another because `fact` is an exclusive
    // category); consolidation is what reconciles them.
    ctx.run_maintenance_phase("main", MaintenancePhase::Consolidate).unwrap();

    let store = ctx.pool.get("main").unwrap();
    let istanbul_row = store.get(&istanbul.id).unwrap();
    assert!(istanbul_row.is_soft_deleted());
    assert_eq!(istanbul_row.superseded_by.as_deref(), Some(ankara.id.as_str()));

    let response = ctx
        .recall(RecallInput {
            query: "where does the user live".to_string(),
            agent: "main".to_string(),
            limit: Some(5),
            namespace: None,
            filter: None,
            max_tokens: None,
            min_score: None,
        })
        .await
        .unwrap();

    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].memory.id, ankara.id);
}

// ---------------------------------------------------------------------
// 3. Repeated Turkish sentence reinforces instead of duplicating
// ---------------------------------------------------------------------

#[tokio::test]
async fn scenario_3_repeated_sentence_reinforces_not_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = bare_context(dir.path());

    let input = CaptureInput {
        agent: "main".to_string(),
        messages: vec![CaptureMessage { text: "geçen hafta yeni sunucu aldık".to_string(), role: None, session: None }],
        namespace: None,
        source: None,
    };

    let first = ctx.capture(input.clone()).await.unwrap();
    let second = ctx.capture(input).await.unwrap();

    assert_eq!(first[0].id, second[0].id, "identical text must resolve to the same memory id");

    let store = ctx.pool.get("main").unwrap();
    let m = store.get(&first[0].id).unwrap();
    assert_eq!(m.reinforce_count, 1, "second identical capture reinforces the existing memory once");
    assert!(m.strength >= 1.0 - f32::EPSILON);
}

// ---------------------------------------------------------------------
// 4. Pinned memory survives aggressive decay
// ---------------------------------------------------------------------

#[tokio::test]
async fn scenario_4_pinned_memory_survives_aggressive_decay() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = bare_context(dir.path());

    let record = ctx
        .store_single(StoreInput {
            text: "Always respond in formal English".to_string(),
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
    m.last_reinforced_at = Utc::now() - Duration::days(1000);
    store.insert(&m).expect("overwrite with backdated reinforcement timestamp");

    ctx.run_maintenance("main").unwrap();

    let after = store.get(&record.id).unwrap();
    assert!(after.pinned);
    assert_eq!(after.strength, 1.0);

    let response = ctx
        .recall(RecallInput {
            query: "Always respond in formal English".to_string(),
            agent: "main".to_string(),
            limit: Some(5),
            namespace: None,
            filter: None,
            max_tokens: None,
            min_score: None,
        })
        .await
        .unwrap();

    assert!(response.results.iter().any(|r| r.memory.id == record.id));
}

// ---------------------------------------------------------------------
// 5. Temporal-filtered recall
// ---------------------------------------------------------------------

#[tokio::test]
async fn scenario_5_temporal_filter_restricts_results_to_the_window() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = bare_context(dir.path());
    let store = ctx.pool.get("main").unwrap();

    let now = Utc::now();
    let mut yesterday = Memory::new("err-yesterday".into(), "main".into(), "deploy errors spiked".into(), "deploy errors spiked".into(), Category::Fact);
    yesterday.created_at = now - Duration::hours(20);
    store.insert(&yesterday).unwrap();
    store.set_embedding("err-yesterday", &unit_vec(DIMS, 2)).unwrap();

    let mut last_month = Memory::new("err-last-month".into(), "main".into(), "deploy errors spiked".into(), "deploy errors spiked".into(), Category::Fact);
    last_month.created_at = now - Duration::days(30);
    store.insert(&last_month).unwrap();
    store.set_embedding("err-last-month", &unit_vec(DIMS, 2)).unwrap();

    let response = ctx
        .recall(RecallInput {
            query: "yesterday's deploy errors".to_string(),
            agent: "main".to_string(),
            limit: Some(10),
            namespace: None,
            filter: None,
            max_tokens: None,
            min_score: None,
        })
        .await
        .unwrap();

    assert!(!response.results.is_empty());
    let window_start = now - Duration::days(1);
    for r in &response.results {
        assert!(r.memory.created_at >= window_start && r.memory.created_at <= now, "result {} fell outside the extracted temporal window", r.memory.id);
    }
    assert!(response.results.iter().any(|r| r.memory.id == "err-yesterday"));
    assert!(!response.results.iter().any(|r| r.memory.id == "err-last-month"));
}

// ---------------------------------------------------------------------
// 6. 1000-memory GC exactness
// ---------------------------------------------------------------------

#[tokio::test]
async fn scenario_6_gc_removes_exactly_the_aged_soft_deleted_rows() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = bare_context(dir.path());
    let store = ctx.pool.get("main").unwrap();

    let now = Utc::now();
    for i in 0..1000 {
        let id = format!("mem-{i:04}");
        let m = Memory::new(id.clone(), "main".into(), format!("memory number {i}"), format!("memory number {i}"), Category::Fact);
        store.insert(&m).unwrap();
        store.set_embedding(&id, &unit_vec(DIMS, i)).unwrap();
    }

    let (memory_before, vec_before, fts_before) = store.count_rows().unwrap();
    assert_eq!((memory_before, vec_before, fts_before), (1000, 1000, 1000));

    let backdated = now - Duration::days(31);
    for i in 0..500 {
        let id = format!("mem-{i:04}");
        store.soft_delete(&id, backdated, None).unwrap();
    }

    ctx.run_maintenance_phase("main", MaintenancePhase::Gc).unwrap();

    let (memory_after, vec_after, fts_after) = store.count_rows().unwrap();
    assert_eq!(memory_after, 500);
    assert_eq!(vec_after, 500);
    assert_eq!(fts_after, 500);
}

// ---------------------------------------------------------------------
// Boundary behaviors (spec "Boundary behaviors")
// ---------------------------------------------------------------------

#[tokio::test]
async fn vectorless_memory_is_still_retrievable_via_lexical_path() {
    let dir = tempfile::tempdir().unwrap();
    let embedder = Arc::new(agent_memory_core::NullEmbedder::new(DIMS));
    let mut config = agent_memory_core::AppConfig::default();
    config.store.data_dir = Some(dir.path().to_string_lossy().to_string());
    config.embed.dimensions = DIMS;
    config.rerank.enabled = false;
    let ctx = Arc::new(CoreContext::with_embedder(config, embedder as Arc<dyn Embedder>));

    let record = ctx
        .store_single(StoreInput {
            text: "wifi password is hunter2".to_string(),
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

    let store = ctx.pool.get("main").unwrap();
    let m = store.get(&record.id).unwrap();
    assert_eq!(m.embedding_status, agent_memory_core::EmbeddingStatus::Pending);

    let response = ctx
        .recall(RecallInput {
            query: "wifi password".to_string(),
            agent: "main".to_string(),
            limit: Some(5),
            namespace: None,
            filter: None,
            max_tokens: None,
            min_score: None,
        })
        .await
        .unwrap();

    assert_eq!(response.search_mode, agent_memory_core::SearchMode::DegradedNoVector);
    assert!(response.results.iter().any(|r| r.memory.id == record.id));
}

#[tokio::test]
async fn agent_all_fans_out_across_every_known_store() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = bare_context(dir.path());

    for agent in ["alice", "bob"] {
        ctx.store_single(StoreInput {
            text: format!("{agent} likes tea"),
            agent: agent.to_string(),
            category: Some(Category::Preference),
            importance: None,
            pinned: false,
            namespace: None,
            session: None,
            source: None,
        })
        .await
        .unwrap();
    }

    let agents = ctx.pool.known_agents().unwrap();
    assert_eq!(agents, vec!["alice".to_string(), "bob".to_string()]);

    let results = ctx.export("alice", &Filter::default()).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].text, "alice likes tea");
}

// ---------------------------------------------------------------------
// Invariants
// ---------------------------------------------------------------------

#[tokio::test]
async fn export_then_import_round_trips_core_fields() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = bare_context(dir.path());

    ctx.store_single(StoreInput {
        text: "round trip me".to_string(),
        agent: "main".to_string(),
        category: Some(Category::Fact),
        importance: Some(0.8),
        pinned: true,
        namespace: None,
        session: None,
        source: None,
    })
    .await
    .unwrap();

    let exported = ctx.export("main", &Filter::default()).unwrap();
    assert_eq!(exported.len(), 1);

    let fresh_dir = tempfile::tempdir().unwrap();
    let fresh_ctx = bare_context(fresh_dir.path());
    fresh_ctx.import("main", &exported).unwrap();

    let reimported = fresh_ctx.export("main", &Filter::default()).unwrap();
    assert_eq!(reimported.len(), 1);
    assert_eq!(reimported[0].id, exported[0].id);
    assert_eq!(reimported[0].text, exported[0].text);
    assert_eq!(reimported[0].category, exported[0].category);
    assert_eq!(reimported[0].importance, exported[0].importance);
    assert_eq!(reimported[0].pinned, exported[0].pinned);
    assert_eq!(reimported[0].created_at, exported[0].created_at);
}

#[tokio::test]
async fn consolidate_twice_back_to_back_is_idempotent_on_the_second_run() {
    let dir = tempfile::tempdir().unwrap();
    let same_slot = unit_vec(DIMS, 3);
    let ctx = context_with_fixtures(&dir.path(), &[("likes dark mode", same_slot.clone()), ("prefers dark mode", same_slot)]);

    ctx.store_single(StoreInput {
        text: "likes dark mode".to_string(),
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
    ctx.store_single(StoreInput {
        text: "prefers dark mode".to_string(),
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

    let store = ctx.pool.get("main").unwrap();
    let (groups_first, merged_first) = ctx.lifecycle.consolidate(&store, Utc::now()).unwrap();
    assert_eq!((groups_first, merged_first), (1, 1));

    let (groups_second, merged_second) = ctx.lifecycle.consolidate(&store, Utc::now()).unwrap();
    assert_eq!((groups_second, merged_second), (0, 0), "re-running consolidate with no intervening writes must be a no-op");
}
