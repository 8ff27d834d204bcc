//! Storage layer: one `Store` per agent backing the relational table, the
//! FTS5 lexical index, and the HNSW vector index on a single sqlite file,
//! plus `StoragePool` for agent-keyed lifecycle management (spec §4.1, §4.2).

mod migrations;
mod pool;
mod sqlite;
mod vector;

pub use migrations::{apply_migrations, get_current_version, Migration, MIGRATIONS};
pub use pool::StoragePool;
pub use sqlite::{sanitize_fts5_query, Result, Store};
pub use vector::{VectorIndex, VectorIndexConfig, VectorIndexStats, VectorSearchError};
