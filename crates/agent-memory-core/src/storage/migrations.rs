//! Schema migrations: forward-only, idempotent by version, applied in order
//! at open time (spec §6, §9 "Schema evolution").

use rusqlite::Connection;
use tracing::info;

pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub up: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "core memory table",
        up: r#"
            CREATE TABLE memory (
                id TEXT PRIMARY KEY,
                agent TEXT NOT NULL,
                text TEXT NOT NULL,
                normalized_text TEXT NOT NULL,
                category TEXT NOT NULL,
                memory_type TEXT NOT NULL,
                importance REAL NOT NULL DEFAULT 0.5,
                strength REAL NOT NULL DEFAULT 1.0,
                created_at TEXT NOT NULL,
                last_reinforced_at TEXT NOT NULL,
                last_accessed_at TEXT NOT NULL,
                access_count INTEGER NOT NULL DEFAULT 0,
                reinforce_count INTEGER NOT NULL DEFAULT 0,
                pinned INTEGER NOT NULL DEFAULT 0,
                soft_deleted_at TEXT,
                superseded_by TEXT,
                session TEXT,
                source TEXT,
                provenance TEXT,
                namespace TEXT,
                embedding_status TEXT NOT NULL DEFAULT 'pending'
            );
            CREATE INDEX idx_memory_agent ON memory(agent);
            CREATE INDEX idx_memory_agent_namespace ON memory(agent, namespace);
            CREATE INDEX idx_memory_soft_deleted ON memory(soft_deleted_at);
            CREATE INDEX idx_memory_pinned ON memory(pinned);
        "#,
    },
    Migration {
        version: 2,
        description: "vector embedding table",
        up: r#"
            CREATE TABLE vec_memory (
                id TEXT PRIMARY KEY REFERENCES memory(id) ON DELETE CASCADE,
                embedding BLOB NOT NULL,
                dims INTEGER NOT NULL
            );
        "#,
    },
    Migration {
        version: 3,
        description: "fts5 lexical index over normalized_text (external content)",
        up: r#"
            CREATE VIRTUAL TABLE fts_memory USING fts5(
                normalized_text,
                content='memory',
                content_rowid='rowid',
                tokenize='trigram'
            );
            CREATE TRIGGER memory_ai AFTER INSERT ON memory BEGIN
                INSERT INTO fts_memory(rowid, normalized_text) VALUES (new.rowid, new.normalized_text);
            END;
            CREATE TRIGGER memory_ad AFTER DELETE ON memory BEGIN
                INSERT INTO fts_memory(fts_memory, rowid, normalized_text) VALUES ('delete', old.rowid, old.normalized_text);
            END;
            CREATE TRIGGER memory_au AFTER UPDATE ON memory BEGIN
                INSERT INTO fts_memory(fts_memory, rowid, normalized_text) VALUES ('delete', old.rowid, old.normalized_text);
                INSERT INTO fts_memory(rowid, normalized_text) VALUES (new.rowid, new.normalized_text);
            END;
        "#,
    },
    Migration {
        version: 4,
        description: "persistent embedding cache (Embedder 3rd tier)",
        up: r#"
            CREATE TABLE embed_cache (
                cache_key TEXT PRIMARY KEY,
                embedding BLOB NOT NULL,
                dims INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );
        "#,
    },
    Migration {
        version: 5,
        description: "schema metadata table",
        up: r#"
            CREATE TABLE meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
        "#,
    },
];

pub fn get_current_version(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
}

pub fn apply_migrations(conn: &Connection) -> rusqlite::Result<()> {
    let current = get_current_version(conn)?;
    for migration in MIGRATIONS {
        if migration.version <= current {
            continue;
        }
        info!(version = migration.version, description = migration.description, "applying migration");
        conn.execute_batch(migration.up)?;
        conn.pragma_update(None, "user_version", migration.version)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_apply_cleanly_on_fresh_db() {
        let conn = Connection::open_in_memory().unwrap();
        apply_migrations(&conn).unwrap();
        let version = get_current_version(&conn).unwrap();
        assert_eq!(version, MIGRATIONS.last().unwrap().version);
    }

    #[test]
    fn applying_twice_is_a_no_op() {
        let conn = Connection::open_in_memory().unwrap();
        apply_migrations(&conn).unwrap();
        apply_migrations(&conn).unwrap();
        let count: i64 = conn
            .query_row("SELECT count(*) FROM sqlite_master WHERE type='table' AND name='memory'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
