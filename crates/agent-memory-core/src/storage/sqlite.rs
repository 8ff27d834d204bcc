//! `Store`: per-agent embedded store combining the relational table, the
//! vector index, and the FTS5 lexical index on one file (spec §4.1).

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{info, warn};

use crate::error::StoreError;
use crate::memory::{Category, EmbeddingStatus, Filter, Memory};

use super::migrations::apply_migrations;
use super::vector::{VectorIndex, VectorIndexConfig};

pub type Result<T> = std::result::Result<T, StoreError>;

fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "busy_timeout", 5000i64)?;
    conn.pragma_update(None, "cache_size", -20000i64)?;
    conn.pragma_update(None, "mmap_size", 268_435_456i64)?;
    Ok(())
}

fn parse_timestamp(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

fn embedding_to_blob(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn blob_to_embedding(b: &[u8]) -> Vec<f32> {
    b.chunks_exact(4).map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect()
}

/// One per agent: the relational table, lexical index, and vector index
/// co-resident on a single sqlite file plus a sidecar HNSW index file.
pub struct Store {
    agent: String,
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
    vector_index: Mutex<VectorIndex>,
    vector_index_path: PathBuf,
    dims: usize,
}

impl Store {
    pub fn open(path: &Path, agent: &str, dims: usize) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Io(e.to_string()))?;
        }

        let writer = Connection::open(path).map_err(StoreError::from)?;
        configure_connection(&writer).map_err(StoreError::from)?;
        apply_migrations(&writer).map_err(StoreError::from)?;

        let reader = Connection::open(path).map_err(StoreError::from)?;
        configure_connection(&reader).map_err(StoreError::from)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Ok(meta) = std::fs::metadata(path) {
                let mut perms = meta.permissions();
                perms.set_mode(0o600);
                let _ = std::fs::set_permissions(path, perms);
            }
        }

        let vector_index_path = path.with_extension("usearch");
        let vector_config = VectorIndexConfig {
            dimensions: dims,
            ..VectorIndexConfig::default()
        };
        let vector_index = match VectorIndex::load(&vector_index_path, vector_config) {
            Ok(index) if vector_index_path.exists() => index,
            _ => {
                if vector_index_path.exists() {
                    warn!("failed to load vector index, rebuilding from vec_memory table");
                }
                Self::rebuild_vector_index(&reader, dims)?
            }
        };

        info!(agent, path = %path.display(), "store opened");

        Ok(Self {
            agent: agent.to_string(),
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            vector_index: Mutex::new(vector_index),
            vector_index_path,
            dims,
        })
    }

    fn rebuild_vector_index(conn: &Connection, dims: usize) -> Result<VectorIndex> {
        let mut index = VectorIndex::with_config(VectorIndexConfig {
            dimensions: dims,
            ..VectorIndexConfig::default()
        })
        .map_err(|e| StoreError::Integrity(e.to_string()))?;
        let mut stmt = conn.prepare("SELECT id, embedding FROM vec_memory").map_err(StoreError::from)?;
        let rows = stmt
            .query_map([], |row| {
                let id: String = row.get(0)?;
                let blob: Vec<u8> = row.get(1)?;
                Ok((id, blob))
            })
            .map_err(StoreError::from)?;
        let mut count = 0usize;
        for row in rows {
            let (id, blob) = row.map_err(StoreError::from)?;
            count += 1;
            let _ = index.reserve(count.max(16));
            let _ = index.add(&id, &blob_to_embedding(&blob));
        }
        Ok(index)
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    fn reader(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.reader.lock().expect("reader mutex poisoned")
    }

    fn writer(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.writer.lock().expect("writer mutex poisoned")
    }

    /// Atomic insert into all three co-resident indices. Fails → rolls back
    /// all (spec §4.1).
    pub fn insert(&self, m: &Memory) -> Result<()> {
        let mut conn = self.writer();
        let tx = conn.transaction().map_err(StoreError::from)?;
        tx.execute(
            "INSERT INTO memory (
                id, agent, text, normalized_text, category, memory_type, importance, strength,
                created_at, last_reinforced_at, last_accessed_at, access_count, reinforce_count,
                pinned, soft_deleted_at, superseded_by, session, source, provenance, namespace,
                embedding_status
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21)",
            params![
                m.id,
                m.agent,
                m.text,
                m.normalized_text,
                m.category.as_str(),
                m.memory_type,
                m.importance,
                m.strength,
                m.created_at.to_rfc3339(),
                m.last_reinforced_at.to_rfc3339(),
                m.last_accessed_at.to_rfc3339(),
                m.access_count,
                m.reinforce_count,
                m.pinned as i64,
                m.soft_deleted_at.map(|t| t.to_rfc3339()),
                m.superseded_by,
                m.session,
                m.source,
                m.provenance,
                m.namespace,
                m.embedding_status.as_str(),
            ],
        )
        .map_err(StoreError::from)?;
        tx.commit().map_err(StoreError::from)?;
        Ok(())
    }

    pub fn set_embedding(&self, id: &str, vec: &[f32]) -> Result<()> {
        if vec.len() != self.dims {
            return Err(StoreError::Conflict(format!("embedding dims {} != store dims {}", vec.len(), self.dims)));
        }
        {
            let conn = self.writer();
            conn.execute(
                "INSERT INTO vec_memory (id, embedding, dims) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET embedding = excluded.embedding, dims = excluded.dims",
                params![id, embedding_to_blob(vec), self.dims as i64],
            )
            .map_err(StoreError::from)?;
            conn.execute(
                "UPDATE memory SET embedding_status = 'present' WHERE id = ?1",
                params![id],
            )
            .map_err(StoreError::from)?;
        }
        let mut index = self.vector_index.lock().expect("vector index mutex poisoned");
        let _ = index.reserve(index.len() + 1);
        index.add(id, vec).map_err(|e| StoreError::Integrity(e.to_string()))?;
        Ok(())
    }

    pub fn mark_embedding_failed(&self, id: &str) -> Result<()> {
        self.writer()
            .execute("UPDATE memory SET embedding_status = 'failed' WHERE id = ?1", params![id])
            .map_err(StoreError::from)?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Memory> {
        let conn = self.reader();
        row_to_memory(&conn, id)
    }

    pub fn get_embedding(&self, id: &str) -> Result<Option<Vec<f32>>> {
        let conn = self.reader();
        let blob: Option<Vec<u8>> = conn
            .query_row("SELECT embedding FROM vec_memory WHERE id = ?1", params![id], |r| r.get(0))
            .optional()
            .map_err(StoreError::from)?;
        Ok(blob.map(|b| blob_to_embedding(&b)))
    }

    pub fn update_strength(&self, id: &str, strength: f32) -> Result<()> {
        self.writer()
            .execute("UPDATE memory SET strength = ?1 WHERE id = ?2", params![strength, id])
            .map_err(StoreError::from)?;
        Ok(())
    }

    pub fn reinforce(&self, id: &str, delta_strength: f32, importance: Option<f32>, now: DateTime<Utc>) -> Result<()> {
        let conn = self.writer();
        if let Some(imp) = importance {
            conn.execute(
                "UPDATE memory SET
                    strength = MIN(1.0, strength + ?1),
                    reinforce_count = reinforce_count + 1,
                    last_reinforced_at = ?2,
                    importance = MAX(importance, ?3)
                 WHERE id = ?4",
                params![delta_strength, now.to_rfc3339(), imp, id],
            )
        } else {
            conn.execute(
                "UPDATE memory SET
                    strength = MIN(1.0, strength + ?1),
                    reinforce_count = reinforce_count + 1,
                    last_reinforced_at = ?2
                 WHERE id = ?3",
                params![delta_strength, now.to_rfc3339(), id],
            )
        }
        .map_err(StoreError::from)?;
        Ok(())
    }

    pub fn mark_accessed(&self, id: &str, now: DateTime<Utc>) -> Result<()> {
        self.writer()
            .execute(
                "UPDATE memory SET access_count = access_count + 1, last_accessed_at = ?1 WHERE id = ?2",
                params![now.to_rfc3339(), id],
            )
            .map_err(StoreError::from)?;
        Ok(())
    }

    pub fn pin(&self, id: &str) -> Result<()> {
        self.writer().execute("UPDATE memory SET pinned = 1 WHERE id = ?1", params![id]).map_err(StoreError::from)?;
        Ok(())
    }

    /// Unpinning resumes decay from the current strength (spec §4.11): reset
    /// `last_reinforced_at` to now so the next decay tick measures elapsed
    /// time from the unpin moment, not from before pinning.
    pub fn unpin(&self, id: &str, now: DateTime<Utc>) -> Result<()> {
        self.writer()
            .execute(
                "UPDATE memory SET pinned = 0, last_reinforced_at = ?1 WHERE id = ?2",
                params![now.to_rfc3339(), id],
            )
            .map_err(StoreError::from)?;
        Ok(())
    }

    pub fn soft_delete(&self, id: &str, now: DateTime<Utc>, superseded_by: Option<&str>) -> Result<()> {
        self.writer()
            .execute(
                "UPDATE memory SET soft_deleted_at = ?1, superseded_by = ?2 WHERE id = ?3",
                params![now.to_rfc3339(), superseded_by, id],
            )
            .map_err(StoreError::from)?;
        Ok(())
    }

    pub fn hard_delete(&self, id: &str) -> Result<()> {
        {
            let conn = self.writer();
            conn.execute("DELETE FROM memory WHERE id = ?1", params![id]).map_err(StoreError::from)?;
            conn.execute("DELETE FROM vec_memory WHERE id = ?1", params![id]).map_err(StoreError::from)?;
        }
        let mut index = self.vector_index.lock().expect("vector index mutex poisoned");
        let _ = index.remove(id);
        Ok(())
    }

    /// Top-K by cosine similarity (descending), filtered by the passed
    /// predicate over rows already present in the relational table. Spec
    /// calls this ordering "ascending" meaning ascending distance, which is
    /// descending similarity — the same order returned here.
    pub fn vector_topk(&self, query_vec: &[f32], k: usize, filter: &Filter) -> Result<Vec<(String, f32)>> {
        let index = self.vector_index.lock().expect("vector index mutex poisoned");
        let raw = index
            .search(query_vec, k.saturating_mul(3).max(k))
            .map_err(|e| StoreError::Integrity(e.to_string()))?;
        drop(index);
        let conn = self.reader();
        let mut out = Vec::with_capacity(k);
        for (id, score) in raw {
            if out.len() >= k {
                break;
            }
            if row_matches_filter(&conn, &id, filter).unwrap_or(false) {
                out.push((id, score));
            }
        }
        Ok(out)
    }

    /// Top-K by BM25-style rank (descending). FTS5 `rank` is negative with
    /// more-negative meaning more relevant; this returns a positive score
    /// where higher is better.
    pub fn lexical_topk(&self, normalized_query: &str, k: usize, filter: &Filter) -> Result<Vec<(String, f32)>> {
        let sanitized = sanitize_fts5_query(normalized_query);
        if sanitized.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.reader();
        let mut stmt = conn
            .prepare(
                "SELECT m.id, bm25(fts_memory) AS rank
                 FROM fts_memory
                 JOIN memory m ON m.rowid = fts_memory.rowid
                 WHERE fts_memory MATCH ?1
                 ORDER BY rank ASC
                 LIMIT ?2",
            )
            .map_err(StoreError::from)?;
        let rows = stmt
            .query_map(params![sanitized, (k * 3) as i64], |row| {
                let id: String = row.get(0)?;
                let rank: f64 = row.get(1)?;
                Ok((id, -rank as f32))
            })
            .map_err(StoreError::from)?;

        let mut out = Vec::with_capacity(k);
        for row in rows {
            let (id, score) = row.map_err(StoreError::from)?;
            if out.len() >= k {
                break;
            }
            if row_matches_filter(&conn, &id, filter).unwrap_or(false) {
                out.push((id, score));
            }
        }
        Ok(out)
    }

    /// Stream ids whose row satisfies `predicate`, for Lifecycle's
    /// decay/consolidate/GC passes (spec §4.1 `scan_for_maintenance`).
    pub fn scan_for_maintenance(&self, predicate: impl Fn(&Memory) -> bool) -> Result<Vec<Memory>> {
        let conn = self.reader();
        let mut stmt = conn.prepare("SELECT id FROM memory").map_err(StoreError::from)?;
        let ids: Vec<String> = stmt
            .query_map([], |r| r.get(0))
            .map_err(StoreError::from)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::from)?;
        let mut out = Vec::new();
        for id in ids {
            let m = row_to_memory(&conn, &id)?;
            if predicate(&m) {
                out.push(m);
            }
        }
        Ok(out)
    }

    pub fn count_rows(&self) -> Result<(i64, i64, i64)> {
        let conn = self.reader();
        let memory: i64 = conn.query_row("SELECT count(*) FROM memory", [], |r| r.get(0)).map_err(StoreError::from)?;
        let vec: i64 = conn.query_row("SELECT count(*) FROM vec_memory", [], |r| r.get(0)).map_err(StoreError::from)?;
        let fts: i64 = conn.query_row("SELECT count(*) FROM fts_memory", [], |r| r.get(0)).map_err(StoreError::from)?;
        Ok((memory, vec, fts))
    }

    /// JSON backup export (spec §4.1). Idempotent companion is `import`.
    pub fn export(&self, filter: &Filter) -> Result<Vec<Memory>> {
        let all = self.scan_for_maintenance(|_| true)?;
        Ok(all.into_iter().filter(|m| matches_filter(m, filter)).collect())
    }

    /// Import is idempotent by id: an existing id is overwritten in place,
    /// not duplicated (spec §4.1).
    pub fn import(&self, records: &[Memory]) -> Result<()> {
        for m in records {
            let exists = self.get(&m.id).is_ok();
            if exists {
                self.hard_delete(&m.id)?;
            }
            self.insert(m)?;
        }
        Ok(())
    }

    pub fn persist_vector_index(&self) -> Result<()> {
        let index = self.vector_index.lock().expect("vector index mutex poisoned");
        index.save(&self.vector_index_path).map_err(|e| StoreError::Io(e.to_string()))
    }

    /// Persistent embedding cache, the Embedder's 3rd cache tier (spec §4.3)
    /// sitting between the in-memory LRU and the remote call.
    pub fn get_cached_embedding(&self, cache_key: &str) -> Result<Option<Vec<f32>>> {
        let conn = self.reader();
        let row: Option<Vec<u8>> = conn
            .query_row("SELECT embedding FROM embed_cache WHERE cache_key = ?1", params![cache_key], |r| r.get(0))
            .optional()
            .map_err(StoreError::from)?;
        Ok(row.map(|b| blob_to_embedding(&b)))
    }

    pub fn put_cached_embedding(&self, cache_key: &str, dims: usize, vec: &[f32], now: DateTime<Utc>) -> Result<()> {
        let conn = self.writer();
        conn.execute(
            "INSERT INTO embed_cache (cache_key, embedding, dims, created_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(cache_key) DO UPDATE SET embedding = excluded.embedding, dims = excluded.dims",
            params![cache_key, embedding_to_blob(vec), dims as i64, now.to_rfc3339()],
        )
        .map_err(StoreError::from)?;
        Ok(())
    }
}

/// Strips FTS5 special characters that would otherwise be interpreted as
/// query syntax, so free-text search input can never break out into an
/// FTS5 expression.
pub fn sanitize_fts5_query(input: &str) -> String {
    input
        .split_whitespace()
        .map(|tok| {
            let cleaned: String = tok.chars().filter(|c| c.is_alphanumeric()).collect();
            if cleaned.is_empty() {
                String::new()
            } else {
                format!("\"{cleaned}\"")
            }
        })
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" OR ")
}

fn row_to_memory(conn: &Connection, id: &str) -> Result<Memory> {
    conn.query_row(
        "SELECT id, agent, text, normalized_text, category, memory_type, importance, strength,
                created_at, last_reinforced_at, last_accessed_at, access_count, reinforce_count,
                pinned, soft_deleted_at, superseded_by, session, source, provenance, namespace,
                embedding_status
         FROM memory WHERE id = ?1",
        params![id],
        |row| {
            let category_str: String = row.get(4)?;
            let embedding_status_str: String = row.get(20)?;
            let soft_deleted_raw: Option<String> = row.get(14)?;
            Ok(Memory {
                id: row.get(0)?,
                agent: row.get(1)?,
                text: row.get(2)?,
                normalized_text: row.get(3)?,
                category: Category::parse(&category_str).unwrap_or(Category::Fact),
                memory_type: row.get(5)?,
                importance: row.get(6)?,
                strength: row.get(7)?,
                created_at: parse_timestamp(&row.get::<_, String>(8)?)?,
                last_reinforced_at: parse_timestamp(&row.get::<_, String>(9)?)?,
                last_accessed_at: parse_timestamp(&row.get::<_, String>(10)?)?,
                access_count: row.get(11)?,
                reinforce_count: row.get(12)?,
                pinned: row.get::<_, i64>(13)? != 0,
                soft_deleted_at: soft_deleted_raw.map(|s| parse_timestamp(&s)).transpose()?,
                superseded_by: row.get(15)?,
                session: row.get(16)?,
                source: row.get(17)?,
                provenance: row.get(18)?,
                namespace: row.get(19)?,
                embedding_status: EmbeddingStatus::parse(&embedding_status_str),
            })
        },
    )
    .map_err(StoreError::from)
}

fn row_matches_filter(conn: &Connection, id: &str, filter: &Filter) -> Result<bool> {
    let m = row_to_memory(conn, id)?;
    Ok(matches_filter(&m, filter))
}

fn matches_filter(m: &Memory, filter: &Filter) -> bool {
    if !filter.include_soft_deleted && m.is_soft_deleted() {
        return false;
    }
    if let Some(ns) = &filter.namespace {
        if m.namespace.as_deref() != Some(ns.as_str()) {
            return false;
        }
    }
    if let Some(cat) = filter.category {
        if m.category != cat {
            return false;
        }
    }
    if let Some(min_imp) = filter.min_importance {
        if m.importance < min_imp {
            return false;
        }
    }
    if let Some((start, end)) = filter.time_range {
        if m.created_at < start || m.created_at >= end {
            return false;
        }
    }
    true
}
