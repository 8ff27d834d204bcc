//! `Lifecycle` (spec §4.11): the maintenance loops that run independently of
//! any single recall or capture request — decay, consolidation, conflict
//! detection, and garbage collection, plus pin/unpin. Each pass is a pure
//! function over a `Store` snapshot, tracked with a `LifecycleRun` the way
//! the teacher tracks a consolidation pass, so callers get a summary instead
//! of having to recompute what happened.

use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::config::LifecycleConfig;
use crate::embed::cosine_similarity;
use crate::error::StoreError;
use crate::memory::Memory;
use crate::storage::Store;

/// Ebbinghaus decay (spec §4.11): `strength * exp(-t * base_rate / (1 + alpha * importance))`
/// where `t` is days since the memory was last reinforced. Higher importance
/// slows decay; monotonically decreasing in `t`.
pub fn decay_strength(strength: f32, days_since_reinforced: f64, importance: f32, base_rate: f64, alpha: f64) -> f32 {
    let factor = (-days_since_reinforced.max(0.0) * base_rate / (1.0 + alpha * importance as f64)).exp();
    (strength as f64 * factor).clamp(0.0, 1.0) as f32
}

#[derive(Debug, Default, Clone)]
pub struct LifecycleRunResult {
    pub decayed: i64,
    pub consolidated_groups: i64,
    pub consolidated_memories: i64,
    pub conflicts_resolved: i64,
    pub soft_deleted: i64,
    pub hard_purged: i64,
    pub duration_ms: i64,
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self { parent: (0..n).collect() }
    }

    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            self.parent[x] = self.find(self.parent[x]);
        }
        self.parent[x]
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            self.parent[ra] = rb;
        }
    }
}

pub struct Lifecycle {
    config: LifecycleConfig,
}

impl Lifecycle {
    pub fn new(config: LifecycleConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Apply decay to every non-pinned, non-deleted memory (spec §4.11
    /// "Decay"). Pinned memories are frozen in place; unpinning resets the
    /// reinforcement clock so decay resumes from the unpin moment, not from
    /// whatever elapsed while pinned (handled in `Store::unpin`).
    pub fn decay_tick(&self, store: &Store, now: DateTime<Utc>) -> Result<i64, StoreError> {
        let candidates = store.scan_for_maintenance(|m| !m.pinned && !m.is_soft_deleted())?;
        let mut count = 0;
        for m in candidates {
            let days = m.days_since_reinforced(now);
            let new_strength = decay_strength(m.strength, days, m.importance, self.config.decay_base_rate, self.config.decay_alpha);
            if (new_strength - m.strength).abs() > f32::EPSILON {
                store.update_strength(&m.id, new_strength)?;
                count += 1;
            }
        }
        Ok(count)
    }

    /// Group near-duplicate memories via union-find over cosine similarity
    /// on their embeddings and merge each group into its strongest member,
    /// soft-deleting the rest with `superseded_by` set (spec §4.11
    /// "Consolidation").
    pub fn consolidate(&self, store: &Store, now: DateTime<Utc>) -> Result<(i64, i64), StoreError> {
        let candidates = store.scan_for_maintenance(|m| !m.is_soft_deleted())?;
        let mut embeddings = HashMap::new();
        for m in &candidates {
            if let Some(v) = store.get_embedding(&m.id)? {
                embeddings.insert(m.id.clone(), v);
            }
        }

        let eligible: Vec<&Memory> = candidates.iter().filter(|m| embeddings.contains_key(&m.id)).collect();
        if eligible.len() < 2 {
            return Ok((0, 0));
        }

        let mut uf = UnionFind::new(eligible.len());
        for i in 0..eligible.len() {
            for j in (i + 1)..eligible.len() {
                if eligible[i].agent != eligible[j].agent || eligible[i].namespace != eligible[j].namespace {
                    continue;
                }
                let sim = cosine_similarity(&embeddings[&eligible[i].id], &embeddings[&eligible[j].id]);
                if sim >= self.config.consolidate_threshold {
                    uf.union(i, j);
                }
            }
        }

        let mut groups: HashMap<usize, Vec<usize>> = HashMap::new();
        for i in 0..eligible.len() {
            let root = uf.find(i);
            groups.entry(root).or_default().push(i);
        }

        let mut group_count = 0;
        let mut merged_count = 0;
        for members in groups.values() {
            if members.len() < 2 {
                continue;
            }
            group_count += 1;
            let winner_idx = *members
                .iter()
                .max_by(|&&a, &&b| {
                    let score_a = eligible[a].strength + eligible[a].importance;
                    let score_b = eligible[b].strength + eligible[b].importance;
                    score_a.partial_cmp(&score_b).unwrap_or(std::cmp::Ordering::Equal)
                })
                .expect("non-empty group");
            let winner_id = eligible[winner_idx].id.clone();
            for &idx in members {
                if idx == winner_idx {
                    continue;
                }
                store.soft_delete(&eligible[idx].id, now, Some(&winner_id))?;
                merged_count += 1;
            }
        }

        info!(groups = group_count, merged = merged_count, "consolidation pass complete");
        Ok((group_count, merged_count))
    }

    /// Resolve conflicts between exclusive-slot memories (`rule`/`preference`,
    /// spec §4.10/§4.11): within the same agent/namespace/category, if two
    /// active memories are near-duplicates by embedding but their importance
    /// differs by more than `conflict_margin`, the weaker one is superseded.
    /// A margin too small to call confidently is left untouched rather than
    /// guessed at.
    pub fn resolve_conflicts(&self, store: &Store, now: DateTime<Utc>) -> Result<i64, StoreError> {
        let candidates = store.scan_for_maintenance(|m| !m.is_soft_deleted() && m.category.is_exclusive_candidate())?;
        let mut embeddings = HashMap::new();
        for m in &candidates {
            if let Some(v) = store.get_embedding(&m.id)? {
                embeddings.insert(m.id.clone(), v);
            }
        }

        let mut resolved = 0;
        for i in 0..candidates.len() {
            for j in (i + 1)..candidates.len() {
                let a = &candidates[i];
                let b = &candidates[j];
                if a.agent != b.agent || a.namespace != b.namespace || a.category != b.category {
                    continue;
                }
                let (Some(va), Some(vb)) = (embeddings.get(&a.id), embeddings.get(&b.id)) else { continue };
                let sim = cosine_similarity(va, vb);
                if sim < self.config.merge_threshold {
                    continue;
                }
                let diff = a.importance - b.importance;
                if diff.abs() < self.config.conflict_margin {
                    continue;
                }
                let (winner, loser) = if diff > 0.0 { (a, b) } else { (b, a) };
                store.soft_delete(&loser.id, now, Some(&winner.id))?;
                resolved += 1;
            }
        }
        Ok(resolved)
    }

    /// Soft-delete memories that have decayed below `weak_strength_threshold`
    /// and aged past `stale_age_days`, then hard-purge anything soft-deleted
    /// longer than `hard_purge_after_days` (spec §4.11 "GC"). Pinned memories
    /// are never collected.
    pub fn gc(&self, store: &Store, now: DateTime<Utc>) -> Result<(i64, i64), StoreError> {
        let weak = store.scan_for_maintenance(|m| {
            !m.pinned
                && !m.is_soft_deleted()
                && m.strength < self.config.weak_strength_threshold
                && m.age_days(now) > self.config.stale_age_days as f64
                && m.access_count == 0
        })?;
        let mut soft_deleted = 0;
        for m in weak {
            store.soft_delete(&m.id, now, None)?;
            soft_deleted += 1;
        }

        let purgeable = store.scan_for_maintenance(|m| {
            m.soft_deleted_at.map(|deleted_at| (now - deleted_at).num_days() >= self.config.hard_purge_after_days).unwrap_or(false)
        })?;
        let mut hard_purged = 0;
        for m in purgeable {
            store.hard_delete(&m.id)?;
            hard_purged += 1;
        }

        Ok((soft_deleted, hard_purged))
    }

    pub fn pin(&self, store: &Store, id: &str) -> Result<(), StoreError> {
        store.pin(id)
    }

    pub fn unpin(&self, store: &Store, id: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        store.unpin(id, now)
    }

    /// Run the full maintenance sweep in order: decay, consolidate, resolve
    /// conflicts, GC. Intended for a scheduled job, not the request path.
    pub fn run_full_sweep(&self, store: &Store, now: DateTime<Utc>) -> Result<LifecycleRunResult, StoreError> {
        let start = Instant::now();
        let decayed = self.decay_tick(store, now)?;
        let (consolidated_groups, consolidated_memories) = self.consolidate(store, now)?;
        let conflicts_resolved = self.resolve_conflicts(store, now)?;
        let (soft_deleted, hard_purged) = self.gc(store, now)?;
        Ok(LifecycleRunResult {
            decayed,
            consolidated_groups,
            consolidated_memories,
            conflicts_resolved,
            soft_deleted,
            hard_purged,
            duration_ms: start.elapsed().as_millis() as i64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Category;

    fn temp_store(dims: usize) -> (Store, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.sqlite");
        (Store::open(&path, "main", dims).unwrap(), dir)
    }

    #[test]
    fn decay_strength_reduces_over_time_and_clamps() {
        let s0 = decay_strength(1.0, 0.0, 0.5, 0.15, 2.0);
        let s30 = decay_strength(1.0, 30.0, 0.5, 0.15, 2.0);
        assert_eq!(s0, 1.0);
        assert!(s30 < s0);
        assert!(s30 >= 0.0);
    }

    #[test]
    fn decay_strength_slows_with_higher_importance() {
        let low_imp = decay_strength(1.0, 30.0, 0.0, 0.15, 2.0);
        let high_imp = decay_strength(1.0, 30.0, 1.0, 0.15, 2.0);
        assert!(high_imp > low_imp);
    }

    #[test]
    fn decay_tick_skips_pinned_memories() {
        let (store, _dir) = temp_store(4);
        let mut m = Memory::new("id1".into(), "main".into(), "t".into(), "t".into(), Category::Fact);
        m.pinned = true;
        m.last_reinforced_at = Utc::now() - chrono::Duration::days(365);
        store.insert(&m).unwrap();

        let lifecycle = Lifecycle::new(LifecycleConfig::default());
        lifecycle.decay_tick(&store, Utc::now()).unwrap();

        let fetched = store.get("id1").unwrap();
        assert_eq!(fetched.strength, 1.0);
    }

    #[test]
    fn consolidate_merges_near_duplicate_embeddings() {
        let (store, _dir) = temp_store(4);
        let a = Memory::new("a".into(), "main".into(), "likes dark mode".into(), "likes dark mode".into(), Category::Preference);
        let b = Memory::new("b".into(), "main".into(), "prefers dark mode".into(), "prefers dark mode".into(), Category::Preference);
        store.insert(&a).unwrap();
        store.insert(&b).unwrap();
        store.set_embedding("a", &[1.0, 0.0, 0.0, 0.0]).unwrap();
        store.set_embedding("b", &[0.99, 0.01, 0.0, 0.0]).unwrap();

        let lifecycle = Lifecycle::new(LifecycleConfig { consolidate_threshold: 0.9, ..LifecycleConfig::default() });
        let (groups, merged) = lifecycle.consolidate(&store, Utc::now()).unwrap();
        assert_eq!(groups, 1);
        assert_eq!(merged, 1);

        let survivors = store.scan_for_maintenance(|m| !m.is_soft_deleted()).unwrap();
        assert_eq!(survivors.len(), 1);
    }

    #[test]
    fn gc_soft_deletes_then_hard_purges_after_grace_period() {
        let (store, _dir) = temp_store(4);
        let mut m = Memory::new("id1".into(), "main".into(), "stale".into(), "stale".into(), Category::Fact);
        m.strength = 0.01;
        m.created_at = Utc::now() - chrono::Duration::days(200);
        store.insert(&m).unwrap();

        let lifecycle = Lifecycle::new(LifecycleConfig { weak_strength_threshold: 0.1, stale_age_days: 90, hard_purge_after_days: 30, ..LifecycleConfig::default() });
        let (soft_deleted, hard_purged) = lifecycle.gc(&store, Utc::now()).unwrap();
        assert_eq!(soft_deleted, 1);
        assert_eq!(hard_purged, 0);

        let far_future = Utc::now() + chrono::Duration::days(31);
        let (_, hard_purged_later) = lifecycle.gc(&store, far_future).unwrap();
        assert_eq!(hard_purged_later, 1);
        assert!(store.get("id1").is_err());
    }

    #[test]
    fn pinned_memory_is_never_collected() {
        let (store, _dir) = temp_store(4);
        let mut m = Memory::new("id1".into(), "main".into(), "pinned stale".into(), "pinned stale".into(), Category::Fact);
        m.pinned = true;
        m.strength = 0.0;
        m.created_at = Utc::now() - chrono::Duration::days(400);
        store.insert(&m).unwrap();

        let lifecycle = Lifecycle::new(LifecycleConfig::default());
        let far_future = Utc::now() + chrono::Duration::days(400);
        let (soft_deleted, _) = lifecycle.gc(&store, far_future).unwrap();
        assert_eq!(soft_deleted, 0);
    }
}
